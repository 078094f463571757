//! Health/status aggregation.
//!
//! Read-only: composes token statistics, last-24h delivery outcomes and job
//! counts into a report with a 0..=100 score. Never writes to any store.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use studybell_common::error::AppError;
use studybell_common::types::{OutcomeCounts, TokenStats};

use crate::store::{DeviceTokenStore, NotificationStore};

const FAILURE_PENALTY_MAX: f64 = 50.0;
const STOPPED_JOB_PENALTY_MAX: f64 = 30.0;
const TOKEN_BONUS_MAX: f64 = 10.0;
/// Active tokens per bonus point.
const TOKENS_PER_BONUS_POINT: f64 = 10.0;

/// Running/stopped job counts, supplied by the scheduler.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobCounts {
    pub running: u64,
    pub stopped: u64,
}

impl JobCounts {
    pub fn total(&self) -> u64 {
        self.running + self.stopped
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub health_score: u8,
    pub tokens: TokenStats,
    pub recent_notifications: OutcomeCounts,
    pub jobs: JobCounts,
    pub generated_at: DateTime<Utc>,
}

/// Score a snapshot.
///
/// Starts at 100, loses up to 50 for the recent failure rate and up to 30 for
/// the share of stopped jobs, gains up to 10 for active-token volume, and is
/// clamped to `[0, 100]`. An empty system scores exactly 100.
pub fn health_score(recent: &OutcomeCounts, jobs: &JobCounts, tokens: &TokenStats) -> u8 {
    let mut score = 100.0;

    if recent.total > 0 {
        let failure_rate = recent.failed.max(0) as f64 / recent.total as f64;
        score -= (failure_rate * FAILURE_PENALTY_MAX).min(FAILURE_PENALTY_MAX);
    }

    if jobs.total() > 0 {
        score -= STOPPED_JOB_PENALTY_MAX * jobs.stopped as f64 / jobs.total() as f64;
    }

    score += (tokens.active.max(0) as f64 / TOKENS_PER_BONUS_POINT).min(TOKEN_BONUS_MAX);

    score.clamp(0.0, 100.0).round() as u8
}

#[derive(Clone)]
pub struct HealthAggregator {
    notifications: Arc<dyn NotificationStore>,
    tokens: Arc<dyn DeviceTokenStore>,
}

impl HealthAggregator {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        tokens: Arc<dyn DeviceTokenStore>,
    ) -> Self {
        Self {
            notifications,
            tokens,
        }
    }

    pub async fn status(&self, jobs: JobCounts) -> Result<HealthReport, AppError> {
        self.status_at(jobs, Utc::now()).await
    }

    pub async fn status_at(
        &self,
        jobs: JobCounts,
        now: DateTime<Utc>,
    ) -> Result<HealthReport, AppError> {
        let tokens = self.tokens.stats().await?;
        let recent = self
            .notifications
            .outcome_counts(now - Duration::hours(24))
            .await?;

        Ok(HealthReport {
            health_score: health_score(&recent, &jobs, &tokens),
            tokens,
            recent_notifications: recent,
            jobs,
            generated_at: now,
        })
    }
}
