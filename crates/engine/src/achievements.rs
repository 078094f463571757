//! Achievement evaluation.
//!
//! Awards are written insert-if-absent keyed on `(user_id, achievement_id)`,
//! so two concurrent checks for the same user award each rule exactly once.
//! Only the call that actually created the award row enqueues the unlock
//! notification. If that enqueue fails the award is removed again and the
//! check reports an error, so a later sweep retries both.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{AchievementRule, BatchFailure, NotificationType, UserAchievement};

use crate::dispatch::DispatchPipeline;
use crate::store::{AchievementStore, UserStatisticsProvider};

const UNLOCK_TEMPLATE: &str = "achievement_unlock";

/// Rules newly awarded by one `check_user` call.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CheckResult {
    pub user_id: Uuid,
    pub newly_awarded: Vec<AchievementRule>,
}

/// Outcome of evaluating a batch of users.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AchievementSweepSummary {
    pub successful_checks: u64,
    pub failed_checks: u64,
    pub total_new_achievements: u64,
    pub failures: Vec<BatchFailure>,
}

#[derive(Clone)]
pub struct AchievementEvaluator {
    achievements: Arc<dyn AchievementStore>,
    statistics: Arc<dyn UserStatisticsProvider>,
    dispatch: DispatchPipeline,
}

impl AchievementEvaluator {
    pub fn new(
        achievements: Arc<dyn AchievementStore>,
        statistics: Arc<dyn UserStatisticsProvider>,
        dispatch: DispatchPipeline,
    ) -> Self {
        Self {
            achievements,
            statistics,
            dispatch,
        }
    }

    /// Evaluate every rule the user does not hold yet against a fresh snapshot.
    pub async fn check_user(&self, user_id: Uuid) -> Result<CheckResult, AppError> {
        let stats = self.statistics.snapshot(user_id).await?;
        let rules = self.achievements.list_rules().await?;
        let held = self.achievements.awarded_ids(user_id).await?;

        let mut result = CheckResult {
            user_id,
            newly_awarded: Vec::new(),
        };

        for rule in rules {
            if held.contains(&rule.id) || !rule.requirements.is_satisfied_by(&stats) {
                continue;
            }

            let award = UserAchievement {
                user_id,
                achievement_id: rule.id,
                awarded_at: Utc::now(),
            };

            // A concurrent check may have inserted the row since `awarded_ids`.
            if !self.achievements.insert_award_if_absent(&award).await? {
                continue;
            }

            tracing::info!(
                user_id = %user_id,
                achievement = %rule.name,
                "Achievement awarded"
            );

            let variables = HashMap::from([
                ("achievement_name".to_string(), rule.name.clone()),
                ("achievement_description".to_string(), rule.description.clone()),
                ("achievement_id".to_string(), rule.id.to_string()),
            ]);
            if let Err(e) = self
                .dispatch
                .enqueue(
                    user_id,
                    NotificationType::AchievementUnlock,
                    UNLOCK_TEMPLATE,
                    &variables,
                )
                .await
            {
                // Drop the award so the next check awards and notifies again.
                if let Err(rollback) = self.achievements.remove_award(user_id, rule.id).await {
                    tracing::error!(
                        user_id = %user_id,
                        achievement = %rule.name,
                        error = %rollback,
                        "Failed to roll back award after enqueue failure"
                    );
                }
                return Err(e);
            }

            result.newly_awarded.push(rule);
        }

        Ok(result)
    }

    /// Check each user in `user_ids`, continuing past individual failures.
    pub async fn check_users(&self, user_ids: &[Uuid]) -> AchievementSweepSummary {
        let mut summary = AchievementSweepSummary::default();

        for &user_id in user_ids {
            match self.check_user(user_id).await {
                Ok(result) => {
                    summary.successful_checks += 1;
                    summary.total_new_achievements += result.newly_awarded.len() as u64;
                }
                Err(e) => {
                    tracing::warn!(user_id = %user_id, error = %e, "Achievement check failed");
                    summary.failed_checks += 1;
                    summary.failures.push(BatchFailure {
                        id: user_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        summary
    }

    /// Check the first `limit` users in id order.
    pub async fn check_all_users(&self, limit: i64) -> Result<AchievementSweepSummary, AppError> {
        let user_ids = self.statistics.list_user_ids(None, limit).await?;
        let summary = self.check_users(&user_ids).await;

        tracing::info!(
            users = user_ids.len(),
            successful = summary.successful_checks,
            failed = summary.failed_checks,
            new_achievements = summary.total_new_achievements,
            "Achievement sweep complete"
        );

        Ok(summary)
    }
}
