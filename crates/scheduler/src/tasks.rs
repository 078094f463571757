//! The standard job set and the bodies it runs.

use std::time::Duration;

use chrono::{Utc, Weekday};

use studybell_common::config::AppConfig;
use studybell_common::types::MaintenanceReport;
use studybell_engine::Engine;
use studybell_engine::tokens::ProbeSummary;

use crate::SchedulerError;
use crate::cadence::Cadence;
use crate::registry::{JobRegistry, TaskFn, task};

pub const STUDY_REMINDERS: &str = "study-reminders";
pub const MOTIVATIONAL_MESSAGES: &str = "motivational-messages";
pub const STREAK_REMINDERS: &str = "streak-reminders";
pub const WEEKLY_COACHING_NOTES: &str = "weekly-coaching-notes";
pub const PROCESS_PENDING: &str = "process-pending-notifications";
pub const TOKEN_MAINTENANCE: &str = "token-maintenance";
pub const STALE_TOKEN_DETECTION: &str = "stale-token-detection";
pub const NOTIFICATION_CLEANUP: &str = "notification-cleanup";
pub const ACHIEVEMENT_SWEEP: &str = "achievement-sweep";
pub const WEEKLY_MAINTENANCE: &str = "weekly-maintenance";

/// Intervals for the sub-daily jobs.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub pending_interval: Duration,
    pub token_maintenance_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pending_interval: Duration::from_secs(5 * 60),
            token_maintenance_interval: Duration::from_secs(6 * 3600),
        }
    }
}

impl From<&AppConfig> for SchedulerSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            pending_interval: Duration::from_secs(
                config.pending_interval_minutes.saturating_mul(60),
            ),
            token_maintenance_interval: Duration::from_secs(
                config.token_maintenance_interval_hours.saturating_mul(3600),
            ),
        }
    }
}

/// Register every standard job in the `created` state.
pub fn register_standard_jobs(
    registry: &JobRegistry,
    engine: &Engine,
    settings: &SchedulerSettings,
) -> Result<(), SchedulerError> {
    let jobs: Vec<(&str, Cadence, TaskFn)> = vec![
        (STUDY_REMINDERS, Cadence::daily(9, 0)?, study_reminders(engine)),
        (MOTIVATIONAL_MESSAGES, Cadence::daily(12, 0)?, motivational_messages(engine)),
        (STREAK_REMINDERS, Cadence::daily(19, 0)?, streak_reminders(engine)),
        (
            WEEKLY_COACHING_NOTES,
            Cadence::weekly(Weekday::Sun, 10, 0)?,
            coaching_notes(engine),
        ),
        (
            PROCESS_PENDING,
            Cadence::Every(settings.pending_interval),
            process_pending(engine),
        ),
        (
            TOKEN_MAINTENANCE,
            Cadence::Every(settings.token_maintenance_interval),
            token_maintenance(engine),
        ),
        (STALE_TOKEN_DETECTION, Cadence::daily(3, 0)?, stale_token_detection(engine)),
        (
            NOTIFICATION_CLEANUP,
            Cadence::weekly(Weekday::Mon, 4, 0)?,
            notification_cleanup(engine),
        ),
        (ACHIEVEMENT_SWEEP, Cadence::daily(2, 0)?, achievement_sweep(engine)),
        (
            WEEKLY_MAINTENANCE,
            Cadence::weekly(Weekday::Sun, 3, 0)?,
            weekly_maintenance_task(engine),
        ),
    ];

    for (name, cadence, body) in jobs {
        registry.register(name, cadence, body)?;
    }
    Ok(())
}

fn study_reminders(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            engine.reminders.send_study_reminders(Utc::now()).await?;
            Ok(())
        }
    })
}

fn motivational_messages(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            let days = engine.settings.inactive_days_for_motivation;
            engine
                .reminders
                .send_motivational_messages(days, Utc::now())
                .await?;
            Ok(())
        }
    })
}

fn streak_reminders(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            engine.reminders.send_streak_reminders(Utc::now()).await?;
            Ok(())
        }
    })
}

fn coaching_notes(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            engine.reminders.send_coaching_notes(Utc::now()).await?;
            Ok(())
        }
    })
}

/// Body of the pending-notification pass, shared with emergency broadcasts.
pub(crate) fn process_pending(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            engine.dispatch.process_pending().await?;
            Ok(())
        }
    })
}

fn token_maintenance(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            let summary = engine.tokens.cleanup_all_duplicates().await?;
            tracing::info!(
                users_checked = summary.users_checked,
                deactivated = summary.tokens_deactivated,
                failures = summary.failures.len(),
                "Token maintenance complete"
            );
            Ok(())
        }
    })
}

fn stale_token_detection(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            stale_token_sweep(&engine).await?;
            Ok(())
        }
    })
}

fn notification_cleanup(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            let days = engine.settings.notification_retention_days;
            engine.dispatch.cleanup_old_notifications(days).await?;
            Ok(())
        }
    })
}

fn achievement_sweep(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            let limit = engine.settings.achievement_batch_limit;
            engine.achievements.check_all_users(limit).await?;
            Ok(())
        }
    })
}

fn weekly_maintenance_task(engine: &Engine) -> TaskFn {
    let engine = engine.clone();
    task(move || {
        let engine = engine.clone();
        async move {
            let report = weekly_maintenance(&engine).await;
            if !report.errors.is_empty() {
                anyhow::bail!(
                    "weekly maintenance finished with {} error(s): {}",
                    report.errors.len(),
                    report.errors.join("; ")
                );
            }
            Ok(())
        }
    })
}

/// Find stale tokens and probe a bounded, oldest-first sample of them.
///
/// Returns how many stale tokens were found and the probe outcome.
pub async fn stale_token_sweep(engine: &Engine) -> anyhow::Result<(usize, ProbeSummary)> {
    let stale = engine
        .tokens
        .detect_stale_tokens(engine.settings.token_stale_days)
        .await?;
    let sample_size = stale.len().min(engine.settings.token_probe_sample);
    let summary = engine.tokens.probe_and_disable(&stale[..sample_size]).await;

    tracing::info!(
        stale = stale.len(),
        sampled = sample_size,
        disabled = summary.disabled,
        "Stale token detection complete"
    );

    Ok((stale.len(), summary))
}

/// Comprehensive weekly sweep. Every step runs even if an earlier one failed.
pub async fn weekly_maintenance(engine: &Engine) -> MaintenanceReport {
    let settings = &engine.settings;
    let mut report = MaintenanceReport {
        started_at: Some(Utc::now()),
        ..Default::default()
    };

    match engine.tokens.cleanup_all_duplicates().await {
        Ok(summary) => {
            report.duplicate_tokens_deactivated = summary.tokens_deactivated;
            report.errors.extend(
                summary
                    .failures
                    .into_iter()
                    .map(|f| format!("dedup {}: {}", f.id, f.error)),
            );
        }
        Err(e) => report.errors.push(format!("dedup: {e}")),
    }

    match stale_token_sweep(engine).await {
        Ok((found, summary)) => {
            report.stale_tokens_found = found as u64;
            report.stale_tokens_disabled = summary.disabled;
            report.errors.extend(
                summary
                    .failures
                    .into_iter()
                    .map(|f| format!("probe {}: {}", f.id, f.error)),
            );
        }
        Err(e) => report.errors.push(format!("stale tokens: {e}")),
    }

    match engine.tokens.purge_old(settings.token_purge_days).await {
        Ok(removed) => report.tokens_deleted = removed.len() as u64,
        Err(e) => report.errors.push(format!("token purge: {e}")),
    }

    match engine
        .dispatch
        .cleanup_old_notifications(settings.notification_retention_days)
        .await
    {
        Ok(removed) => report.notifications_purged = removed.len() as u64,
        Err(e) => report.errors.push(format!("notification cleanup: {e}")),
    }

    match engine
        .achievements
        .check_all_users(settings.achievement_batch_limit)
        .await
    {
        Ok(summary) => {
            report.achievements_awarded = summary.total_new_achievements;
            report.errors.extend(
                summary
                    .failures
                    .into_iter()
                    .map(|f| format!("achievements {}: {}", f.id, f.error)),
            );
        }
        Err(e) => report.errors.push(format!("achievements: {e}")),
    }

    report.finished_at = Some(Utc::now());

    tracing::info!(
        duplicate_tokens_deactivated = report.duplicate_tokens_deactivated,
        stale_tokens_found = report.stale_tokens_found,
        stale_tokens_disabled = report.stale_tokens_disabled,
        tokens_deleted = report.tokens_deleted,
        notifications_purged = report.notifications_purged,
        achievements_awarded = report.achievements_awarded,
        errors = report.errors.len(),
        "Weekly maintenance report"
    );

    report
}
