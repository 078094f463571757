//! Operator-facing operations exposed to the HTTP layer.

use std::collections::HashMap;

use serde::Serialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{BatchFailure, NotificationType};
use studybell_engine::Engine;
use studybell_engine::achievements::AchievementSweepSummary;
use studybell_engine::health::HealthReport;
use studybell_engine::tokens::DedupSummary;

use crate::registry::{JobRegistry, JobStatus, RunReport};
use crate::tasks;

const EMERGENCY_TEMPLATE: &str = "system_announcement";

/// Outcome of an emergency broadcast.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyReport {
    pub targeted: u64,
    pub enqueued: u64,
    pub failures: Vec<BatchFailure>,
    /// Name of the bulk job delivering the broadcast.
    pub job: String,
}

#[derive(Clone)]
pub struct Operations {
    engine: Engine,
    registry: JobRegistry,
}

impl Operations {
    pub fn new(engine: Engine, registry: JobRegistry) -> Self {
        Self { engine, registry }
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Check the given users, or the standard batch of users when none are given.
    pub async fn trigger_achievement_check(
        &self,
        user_ids: Option<Vec<Uuid>>,
    ) -> Result<AchievementSweepSummary, AppError> {
        let summary = match user_ids {
            Some(ids) => self.engine.achievements.check_users(&ids).await,
            None => {
                self.engine
                    .achievements
                    .check_all_users(self.engine.settings.achievement_batch_limit)
                    .await?
            }
        };

        tracing::info!(
            successful = summary.successful_checks,
            failed = summary.failed_checks,
            awarded = summary.total_new_achievements,
            "Manual achievement check complete"
        );

        Ok(summary)
    }

    pub async fn trigger_device_token_cleanup(
        &self,
        user_id: Option<Uuid>,
    ) -> Result<DedupSummary, AppError> {
        match user_id {
            Some(user_id) => {
                let deactivated = self.engine.tokens.cleanup_duplicate_tokens(user_id).await?;
                Ok(DedupSummary {
                    users_checked: 1,
                    tokens_deactivated: deactivated,
                    failures: Vec::new(),
                })
            }
            None => self.engine.tokens.cleanup_all_duplicates().await,
        }
    }

    pub async fn get_system_status(&self) -> Result<HealthReport, AppError> {
        self.engine.health.status(self.registry.counts()).await
    }

    pub fn get_job_status(&self) -> Vec<JobStatus> {
        self.registry.status()
    }

    pub async fn run_job_now(&self, name: &str) -> Result<RunReport, AppError> {
        Ok(self.registry.run_now(name).await?)
    }

    /// Enqueue an urgent announcement per target and deliver it through a bulk job.
    ///
    /// With no explicit targets every known user is addressed.
    pub async fn send_emergency_notification(
        &self,
        title: &str,
        body: &str,
        target_users: Option<Vec<Uuid>>,
    ) -> Result<EmergencyReport, AppError> {
        let title = title.trim();
        let body = body.trim();
        if title.is_empty() || body.is_empty() {
            return Err(AppError::validation("Emergency title and body are required"));
        }

        let targets = match target_users {
            Some(ids) if !ids.is_empty() => ids,
            _ => self.every_user_id().await?,
        };

        let variables = HashMap::from([
            ("title".to_string(), title.to_string()),
            ("body".to_string(), body.to_string()),
        ]);
        let metadata = serde_json::json!({ "urgent": true, "emergency": true });

        let mut enqueued = 0u64;
        let mut failures = Vec::new();
        for user_id in &targets {
            match self
                .engine
                .dispatch
                .enqueue_with_metadata(
                    *user_id,
                    NotificationType::SystemAnnouncement,
                    EMERGENCY_TEMPLATE,
                    &variables,
                    metadata.clone(),
                )
                .await
            {
                Ok(_) => enqueued += 1,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "Failed to enqueue emergency notification"
                    );
                    failures.push(BatchFailure {
                        id: user_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let job = format!("emergency-dispatch-{}", Uuid::new_v4());
        self.registry
            .schedule_bulk(&job, tasks::process_pending(&self.engine))?;

        tracing::warn!(
            targeted = targets.len(),
            enqueued,
            job = %job,
            "Emergency notification broadcast scheduled"
        );

        Ok(EmergencyReport {
            targeted: targets.len() as u64,
            enqueued,
            failures,
            job,
        })
    }

    async fn every_user_id(&self) -> Result<Vec<Uuid>, AppError> {
        let page_size = self.engine.settings.achievement_batch_limit.max(1);
        let mut ids = Vec::new();
        loop {
            let page = self.engine.users.list_user_ids(ids.last().copied(), page_size).await?;
            let done = (page.len() as i64) < page_size;
            ids.extend(page);
            if done {
                return Ok(ids);
            }
        }
    }
}
