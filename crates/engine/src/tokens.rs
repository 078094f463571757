//! Device token registry: registration, duplicate consolidation, staleness.
//!
//! A user may briefly hold two active tokens for the same device group after
//! a reinstall; consolidation is eventual and happens on the next dedup pass.
//! Every operation here is commutative with the others, so the 6-hourly dedup
//! and the daily stale probe can interleave freely.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{
    BatchFailure, ChannelType, DISABLED_DUPLICATE, DISABLED_STALE_INVALID, DeviceToken, Platform,
    TokenStats,
};

use crate::channel::ChannelSet;
use crate::store::DeviceTokenStore;

/// Result of a fleet-wide duplicate consolidation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupSummary {
    pub users_checked: u64,
    pub tokens_deactivated: u64,
    pub failures: Vec<BatchFailure>,
}

/// Result of probing a sample of stale tokens.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProbeSummary {
    pub probed: u64,
    pub still_valid: u64,
    pub disabled: u64,
    /// Tokens whose deactivation could not be written.
    pub failures: Vec<BatchFailure>,
    /// True when no push channel is configured and nothing was probed.
    pub skipped: bool,
}

/// Duplicate-detection key: at most one active token per group and user.
pub(crate) fn dedup_group(token: &DeviceToken) -> (Platform, Option<String>) {
    (token.platform, token.device_hint.clone())
}

#[derive(Clone)]
pub struct DeviceTokenRegistry {
    store: Arc<dyn DeviceTokenStore>,
    channels: ChannelSet,
}

impl DeviceTokenRegistry {
    pub fn new(store: Arc<dyn DeviceTokenStore>, channels: ChannelSet) -> Self {
        Self { store, channels }
    }

    /// Register a token, or reactivate it if the user already owns it.
    pub async fn register(
        &self,
        user_id: Uuid,
        token: &str,
        platform: &str,
        device_hint: Option<&str>,
    ) -> Result<DeviceToken, AppError> {
        self.register_at(user_id, token, platform, device_hint, Utc::now())
            .await
    }

    pub async fn register_at(
        &self,
        user_id: Uuid,
        token: &str,
        platform: &str,
        device_hint: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<DeviceToken, AppError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(AppError::validation("Device token must not be empty"));
        }
        let platform: Platform = platform.parse()?;

        let candidate = DeviceToken {
            user_id,
            token: token.to_string(),
            platform,
            device_hint: device_hint
                .map(str::trim)
                .filter(|h| !h.is_empty())
                .map(str::to_string),
            is_active: true,
            registered_at: now,
            last_used_at: now,
            disabled_reason: None,
        };

        let stored = self.store.upsert(&candidate).await?;

        tracing::info!(
            user_id = %user_id,
            platform = %platform,
            "Device token registered"
        );

        Ok(stored)
    }

    pub async fn active_tokens(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        self.store.list_active_for_user(user_id).await
    }

    /// Record a successful delivery to `token`.
    pub async fn touch(
        &self,
        user_id: Uuid,
        token: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        self.store.touch(user_id, token, at).await
    }

    /// Keep the most recently used active token per device group; deactivate the rest.
    ///
    /// Returns the number of tokens this call deactivated. A concurrent run
    /// that got there first simply makes this one deactivate fewer.
    pub async fn cleanup_duplicate_tokens(&self, user_id: Uuid) -> Result<u64, AppError> {
        let active = self.store.list_active_for_user(user_id).await?;

        let mut groups: HashMap<(Platform, Option<String>), Vec<DeviceToken>> = HashMap::new();
        for token in active {
            groups.entry(dedup_group(&token)).or_default().push(token);
        }

        let mut deactivated = 0u64;
        for (_, mut tokens) in groups.into_iter().filter(|(_, t)| t.len() > 1) {
            tokens.sort_by(|a, b| {
                b.last_used_at
                    .cmp(&a.last_used_at)
                    .then(b.registered_at.cmp(&a.registered_at))
                    .then(a.token.cmp(&b.token))
            });

            for loser in tokens.iter().skip(1) {
                if self
                    .store
                    .deactivate(user_id, &loser.token, DISABLED_DUPLICATE)
                    .await?
                {
                    deactivated += 1;
                }
            }
        }

        if deactivated > 0 {
            tracing::info!(
                user_id = %user_id,
                deactivated,
                "Duplicate device tokens deactivated"
            );
        }

        Ok(deactivated)
    }

    /// Run duplicate consolidation for every user that currently has duplicates.
    pub async fn cleanup_all_duplicates(&self) -> Result<DedupSummary, AppError> {
        let users = self.store.users_with_duplicate_tokens().await?;
        let mut summary = DedupSummary::default();

        for user_id in users {
            summary.users_checked += 1;
            match self.cleanup_duplicate_tokens(user_id).await {
                Ok(n) => summary.tokens_deactivated += n,
                Err(e) => {
                    tracing::warn!(
                        user_id = %user_id,
                        error = %e,
                        "Duplicate cleanup failed for user"
                    );
                    summary.failures.push(BatchFailure {
                        id: user_id.to_string(),
                        error: e.to_string(),
                    });
                }
            }
        }

        Ok(summary)
    }

    /// Active tokens unused for more than `threshold_days`. Read-only.
    pub async fn detect_stale_tokens(
        &self,
        threshold_days: i64,
    ) -> Result<Vec<DeviceToken>, AppError> {
        self.detect_stale_tokens_at(threshold_days, Utc::now()).await
    }

    pub async fn detect_stale_tokens_at(
        &self,
        threshold_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceToken>, AppError> {
        self.store
            .list_stale(now - Duration::days(threshold_days))
            .await
    }

    /// Probe each token in `sample` and disable the ones the channel rejects.
    ///
    /// A probe error or timeout counts as an invalid token. A failed write
    /// only affects its own token; the batch always runs to the end.
    pub async fn probe_and_disable(&self, sample: &[DeviceToken]) -> ProbeSummary {
        let mut summary = ProbeSummary::default();

        if !self.channels.has(ChannelType::Push) {
            tracing::warn!(
                sample = sample.len(),
                "No push channel configured, skipping token probe"
            );
            summary.skipped = true;
            return summary;
        }

        for token in sample {
            summary.probed += 1;

            let valid = match self.channels.probe(&token.token, token.platform).await {
                Ok(valid) => valid,
                Err(e) => {
                    tracing::debug!(
                        user_id = %token.user_id,
                        platform = %token.platform,
                        error = %e,
                        "Token probe failed, treating token as invalid"
                    );
                    false
                }
            };

            if valid {
                summary.still_valid += 1;
                continue;
            }

            match self
                .store
                .deactivate(token.user_id, &token.token, DISABLED_STALE_INVALID)
                .await
            {
                Ok(true) => summary.disabled += 1,
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(
                        user_id = %token.user_id,
                        error = %e,
                        "Failed to disable invalid token"
                    );
                    summary.failures.push(BatchFailure {
                        id: format!("{}:{}", token.user_id, token.platform),
                        error: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            probed = summary.probed,
            disabled = summary.disabled,
            still_valid = summary.still_valid,
            "Stale token probe complete"
        );

        summary
    }

    /// Hard-delete inactive tokens unused for more than `threshold_days`.
    pub async fn purge_old(&self, threshold_days: i64) -> Result<Vec<DeviceToken>, AppError> {
        self.purge_old_at(threshold_days, Utc::now()).await
    }

    pub async fn purge_old_at(
        &self,
        threshold_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<DeviceToken>, AppError> {
        let removed = self
            .store
            .delete_inactive_before(now - Duration::days(threshold_days))
            .await?;

        if !removed.is_empty() {
            tracing::info!(deleted = removed.len(), threshold_days, "Purged old device tokens");
        }

        Ok(removed)
    }

    pub async fn stats(&self) -> Result<TokenStats, AppError> {
        self.store.stats().await
    }
}
