//! Collaborator store interfaces consumed by the engine.
//!
//! Every mutating method is expected to be safe under concurrent invocation:
//! award inserts are insert-if-absent, status updates are guarded by the
//! current status, and token timestamps are last-write-wins.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{
    AchievementRule, DeviceToken, NotificationIntent, NotificationType, OutcomeCounts, TokenStats,
    UserAchievement, UserNotificationPreference, UserStatistics,
};

/// Position in the pending scan: the `(created_at, id)` of the last row seen.
pub type PendingCursor = (DateTime<Utc>, Uuid);

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn insert(&self, intent: &NotificationIntent) -> Result<(), AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<NotificationIntent>, AppError>;

    /// Pending intents ordered by `(created_at, id)`, strictly after `after`,
    /// at most `limit` rows.
    async fn list_pending(
        &self,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<NotificationIntent>, AppError>;

    /// Take the delivery lease on a pending intent until `lease_until`.
    ///
    /// Succeeds only if the intent is still pending and no unexpired lease is
    /// held, so at most one pass delivers a given intent at a time. A lease
    /// left behind by a crashed pass lapses at `lease_until`.
    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// `pending → sent`, releasing any lease. Returns `false` if the intent
    /// was no longer pending.
    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool, AppError>;

    /// `pending → failed`, releasing any lease and recording `reason` under
    /// `metadata.failure_reason`.
    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, AppError>;

    /// `sent → delivered`.
    async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError>;

    /// `sent | delivered → read`.
    async fn mark_read(&self, id: Uuid, read_at: DateTime<Utc>) -> Result<bool, AppError>;

    /// Most recent `sent_at` for this user and type, if any.
    async fn last_sent_at(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<Option<DateTime<Utc>>, AppError>;

    /// Outcome counts for intents created at or after `since`.
    async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, AppError>;

    /// Delete every intent created before `cutoff`, returning the removed rows.
    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NotificationIntent>, AppError>;
}

#[async_trait]
pub trait DeviceTokenStore: Send + Sync {
    /// Insert a token, or reactivate and refresh an existing `(user_id, token)` row.
    async fn upsert(&self, token: &DeviceToken) -> Result<DeviceToken, AppError>;

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError>;

    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError>;

    /// Users owning more than one active token in the same `(platform, device_hint)` group.
    async fn users_with_duplicate_tokens(&self) -> Result<Vec<Uuid>, AppError>;

    /// Mark a token inactive. Returns `false` if it was already inactive or missing.
    async fn deactivate(&self, user_id: Uuid, token: &str, reason: &str)
    -> Result<bool, AppError>;

    /// Advance `last_used_at`; never moves it backwards.
    async fn touch(&self, user_id: Uuid, token: &str, at: DateTime<Utc>)
    -> Result<bool, AppError>;

    /// Active tokens last used before `cutoff`, oldest first.
    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceToken>, AppError>;

    /// Delete inactive tokens last used before `cutoff`, returning the removed rows.
    async fn delete_inactive_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeviceToken>, AppError>;

    async fn stats(&self) -> Result<TokenStats, AppError>;
}

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn get(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<Option<UserNotificationPreference>, AppError>;

    async fn upsert(
        &self,
        preference: &UserNotificationPreference,
    ) -> Result<UserNotificationPreference, AppError>;
}

#[async_trait]
pub trait AchievementStore: Send + Sync {
    async fn list_rules(&self) -> Result<Vec<AchievementRule>, AppError>;

    async fn awarded_ids(&self, user_id: Uuid) -> Result<HashSet<Uuid>, AppError>;

    /// Insert the award unless the `(user_id, achievement_id)` pair exists.
    /// Returns `true` only when this call created the row.
    async fn insert_award_if_absent(&self, award: &UserAchievement) -> Result<bool, AppError>;

    /// Delete an award row. Returns `false` if it did not exist.
    async fn remove_award(&self, user_id: Uuid, achievement_id: Uuid) -> Result<bool, AppError>;
}

#[async_trait]
pub trait UserStatisticsProvider: Send + Sync {
    /// Current statistics snapshot. `NotFound` if the user does not exist.
    async fn snapshot(&self, user_id: Uuid) -> Result<UserStatistics, AppError>;

    /// Up to `limit` user ids in ascending id order, strictly after `after`.
    async fn list_user_ids(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Uuid>, AppError>;
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Address used by the email channel, if the user has one.
    async fn email_address(&self, user_id: Uuid) -> Result<Option<String>, AppError>;
}
