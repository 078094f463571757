//! Reminder planner: decides which users get the recurring nudges.
//!
//! Each pass pages through every user, `batch_limit` ids at a time, reads
//! their statistics snapshot, and enqueues an intent for the users that
//! qualify. Delivery itself happens
//! on the next dispatch pass, where preferences and quiet hours apply.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{BatchFailure, NotificationType, UserStatistics};

use crate::dispatch::DispatchPipeline;
use crate::store::UserStatisticsProvider;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReminderSummary {
    pub users_scanned: u64,
    pub enqueued: u64,
    pub skipped: u64,
    pub failures: Vec<BatchFailure>,
}

/// Which reminder a pass produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReminderKind {
    Study,
    Streak,
    Motivational { inactive_days: i64 },
    Coaching,
}

impl ReminderKind {
    fn notification_type(self) -> NotificationType {
        match self {
            ReminderKind::Study => NotificationType::StudyReminder,
            ReminderKind::Streak => NotificationType::StreakReminder,
            ReminderKind::Motivational { .. } => NotificationType::Motivational,
            ReminderKind::Coaching => NotificationType::CoachingNote,
        }
    }
}

#[derive(Clone)]
pub struct ReminderPlanner {
    statistics: Arc<dyn UserStatisticsProvider>,
    dispatch: DispatchPipeline,
    batch_limit: i64,
}

impl ReminderPlanner {
    pub fn new(
        statistics: Arc<dyn UserStatisticsProvider>,
        dispatch: DispatchPipeline,
        batch_limit: i64,
    ) -> Self {
        Self {
            statistics,
            dispatch,
            batch_limit,
        }
    }

    /// Daily study reminder for users who have not studied today.
    pub async fn send_study_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReminderSummary, AppError> {
        self.run(ReminderKind::Study, now).await
    }

    /// Streak reminder for users with a live streak who have not studied today.
    pub async fn send_streak_reminders(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReminderSummary, AppError> {
        self.run(ReminderKind::Streak, now).await
    }

    /// Motivational message for users inactive for at least `inactive_days`.
    pub async fn send_motivational_messages(
        &self,
        inactive_days: i64,
        now: DateTime<Utc>,
    ) -> Result<ReminderSummary, AppError> {
        self.run(ReminderKind::Motivational { inactive_days }, now).await
    }

    /// Weekly coaching note summarising the trailing seven days.
    pub async fn send_coaching_notes(
        &self,
        now: DateTime<Utc>,
    ) -> Result<ReminderSummary, AppError> {
        self.run(ReminderKind::Coaching, now).await
    }

    async fn run(
        &self,
        kind: ReminderKind,
        now: DateTime<Utc>,
    ) -> Result<ReminderSummary, AppError> {
        let page_size = self.batch_limit.max(1);
        let mut summary = ReminderSummary::default();
        let mut after = None;

        loop {
            let user_ids = self.statistics.list_user_ids(after, page_size).await?;
            let Some(&last) = user_ids.last() else {
                break;
            };
            after = Some(last);

            for &user_id in &user_ids {
                summary.users_scanned += 1;
                match self.plan_one(kind, user_id, now).await {
                    Ok(true) => summary.enqueued += 1,
                    Ok(false) => summary.skipped += 1,
                    Err(e) => {
                        tracing::warn!(
                            user_id = %user_id,
                            notification_type = %kind.notification_type(),
                            error = %e,
                            "Failed to plan reminder"
                        );
                        summary.failures.push(BatchFailure {
                            id: user_id.to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }

            if (user_ids.len() as i64) < page_size {
                break;
            }
        }

        tracing::info!(
            notification_type = %kind.notification_type(),
            scanned = summary.users_scanned,
            enqueued = summary.enqueued,
            failures = summary.failures.len(),
            "Reminder pass complete"
        );

        Ok(summary)
    }

    async fn plan_one(
        &self,
        kind: ReminderKind,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let stats = self.statistics.snapshot(user_id).await?;
        let Some((template, variables)) = plan(kind, &stats, now) else {
            return Ok(false);
        };

        self.dispatch
            .enqueue(user_id, kind.notification_type(), template, &variables)
            .await?;
        Ok(true)
    }
}

fn studied_today(stats: &UserStatistics, now: DateTime<Utc>) -> bool {
    stats
        .last_study_at
        .is_some_and(|at| at.date_naive() == now.date_naive())
}

/// Template name and variables for `stats`, or `None` when the user does not qualify.
fn plan(
    kind: ReminderKind,
    stats: &UserStatistics,
    now: DateTime<Utc>,
) -> Option<(&'static str, HashMap<String, String>)> {
    match kind {
        ReminderKind::Study => {
            (!studied_today(stats, now)).then(|| ("study_reminder", HashMap::new()))
        }
        ReminderKind::Streak => (stats.current_streak_days > 0 && !studied_today(stats, now))
            .then(|| {
                (
                    "streak_reminder",
                    HashMap::from([(
                        "streak_days".to_string(),
                        stats.current_streak_days.to_string(),
                    )]),
                )
            }),
        ReminderKind::Motivational { inactive_days } => {
            // Users who never studied are left to the study reminder.
            let last = stats.last_study_at?;
            let days = (now - last).num_days();
            (days >= inactive_days).then(|| {
                (
                    "motivational",
                    HashMap::from([("days_inactive".to_string(), days.to_string())]),
                )
            })
        }
        ReminderKind::Coaching => Some((
            "coaching_note",
            HashMap::from([
                (
                    "weekly_minutes".to_string(),
                    stats.weekly_study_minutes.to_string(),
                ),
                (
                    "weekly_tests".to_string(),
                    stats.weekly_tests_completed.to_string(),
                ),
                ("tip".to_string(), coaching_tip(stats).to_string()),
            ]),
        )),
    }
}

fn coaching_tip(stats: &UserStatistics) -> &'static str {
    if stats.weekly_study_minutes == 0 {
        "A fresh week starts now: try one short session tomorrow."
    } else if stats.weekly_tests_completed == 0 {
        "Try a practice test next week to check what stuck."
    } else if stats.tests_completed > 0 && stats.average_accuracy < 0.6 {
        "Revisit the topics you missed before moving on."
    } else {
        "Great consistency. Keep the rhythm going."
    }
}
