//! In-memory implementation of every collaborator store.
//!
//! Used by the test suites and by local runs without a database. All state
//! sits behind one `parking_lot::Mutex`; no lock is held across an await.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{
    AchievementRule, DeviceToken, NotificationIntent, NotificationStatus, NotificationType,
    OutcomeCounts, Platform, TokenStats, UserAchievement, UserNotificationPreference,
    UserStatistics,
};

use crate::store::{
    AchievementStore, DeviceTokenStore, NotificationStore, PendingCursor, PreferenceStore,
    UserDirectory, UserStatisticsProvider,
};
use crate::tokens::dedup_group;

#[derive(Default)]
struct State {
    notifications: HashMap<Uuid, NotificationIntent>,
    claims: HashMap<Uuid, DateTime<Utc>>,
    reject_notification_inserts: bool,
    tokens: Vec<DeviceToken>,
    preferences: HashMap<(Uuid, NotificationType), UserNotificationPreference>,
    rules: Vec<AchievementRule>,
    awards: HashMap<(Uuid, Uuid), UserAchievement>,
    users: Vec<Uuid>,
    statistics: HashMap<Uuid, UserStatistics>,
    emails: HashMap<Uuid, String>,
    unavailable_users: HashSet<Uuid>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a user with a statistics snapshot and optional email.
    pub fn put_user(&self, stats: UserStatistics, email: Option<&str>) {
        let mut state = self.state.lock();
        let user_id = stats.user_id;
        if !state.users.contains(&user_id) {
            state.users.push(user_id);
        }
        if let Some(email) = email {
            state.emails.insert(user_id, email.to_string());
        }
        state.statistics.insert(user_id, stats);
    }

    pub fn put_rule(&self, rule: AchievementRule) {
        self.state.lock().rules.push(rule);
    }

    /// Make statistics reads for `user_id` fail, as if its backing store were down.
    pub fn mark_unavailable(&self, user_id: Uuid) {
        self.state.lock().unavailable_users.insert(user_id);
    }

    /// Make notification inserts fail until called again with `false`.
    pub fn fail_notification_inserts(&self, failing: bool) {
        self.state.lock().reject_notification_inserts = failing;
    }

    /// Insert a token row exactly as given, bypassing registration rules.
    pub fn put_token(&self, token: DeviceToken) {
        let mut state = self.state.lock();
        state
            .tokens
            .retain(|t| !(t.user_id == token.user_id && t.token == token.token));
        state.tokens.push(token);
    }

    /// Insert an intent exactly as given.
    pub fn put_notification(&self, intent: NotificationIntent) {
        self.state.lock().notifications.insert(intent.id, intent);
    }

    pub fn token(&self, user_id: Uuid, token: &str) -> Option<DeviceToken> {
        self.state
            .lock()
            .tokens
            .iter()
            .find(|t| t.user_id == user_id && t.token == token)
            .cloned()
    }

    pub fn notifications_for(&self, user_id: Uuid) -> Vec<NotificationIntent> {
        let mut items: Vec<_> = self
            .state
            .lock()
            .notifications
            .values()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        items.sort_by_key(|n| n.created_at);
        items
    }

    pub fn awards_for(&self, user_id: Uuid) -> Vec<UserAchievement> {
        self.state
            .lock()
            .awards
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert(&self, intent: &NotificationIntent) -> Result<(), AppError> {
        let mut state = self.state.lock();
        if state.reject_notification_inserts {
            return Err(AppError::Internal("notification store unavailable".to_string()));
        }
        state.notifications.insert(intent.id, intent.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationIntent>, AppError> {
        Ok(self.state.lock().notifications.get(&id).cloned())
    }

    async fn list_pending(
        &self,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<NotificationIntent>, AppError> {
        let mut items: Vec<_> = self
            .state
            .lock()
            .notifications
            .values()
            .filter(|n| n.status == NotificationStatus::Pending)
            .filter(|n| after.is_none_or(|cursor| (n.created_at, n.id) > cursor))
            .cloned()
            .collect();
        items.sort_by_key(|n| (n.created_at, n.id));
        items.truncate(limit.max(0) as usize);
        Ok(items)
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        let pending = state
            .notifications
            .get(&id)
            .is_some_and(|n| n.status == NotificationStatus::Pending);
        let leased = state.claims.get(&id).is_some_and(|until| *until > now);
        if !pending || leased {
            return Ok(false);
        }
        state.claims.insert(id, lease_until);
        Ok(true)
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n) if n.status == NotificationStatus::Pending => {
                n.status = NotificationStatus::Sent;
                n.sent_at = Some(sent_at);
                state.claims.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n) if n.status == NotificationStatus::Pending => {
                n.status = NotificationStatus::Failed;
                if !n.metadata.is_object() {
                    n.metadata = serde_json::json!({});
                }
                n.metadata["failure_reason"] = serde_json::Value::String(reason.to_string());
                state.claims.remove(&id);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n) if n.status == NotificationStatus::Sent => {
                n.status = NotificationStatus::Delivered;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_read(&self, id: Uuid, read_at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state.notifications.get_mut(&id) {
            Some(n)
                if matches!(
                    n.status,
                    NotificationStatus::Sent | NotificationStatus::Delivered
                ) =>
            {
                n.status = NotificationStatus::Read;
                n.read_at = Some(read_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn last_sent_at(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        Ok(self
            .state
            .lock()
            .notifications
            .values()
            .filter(|n| n.user_id == user_id && n.notification_type == notification_type)
            .filter_map(|n| n.sent_at)
            .max())
    }

    async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, AppError> {
        let state = self.state.lock();
        let mut counts = OutcomeCounts::default();
        for n in state.notifications.values().filter(|n| n.created_at >= since) {
            counts.total += 1;
            match n.status {
                NotificationStatus::Pending => counts.pending += 1,
                NotificationStatus::Failed => counts.failed += 1,
                _ => counts.sent += 1,
            }
        }
        Ok(counts)
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NotificationIntent>, AppError> {
        let mut state = self.state.lock();
        let expired: Vec<Uuid> = state
            .notifications
            .values()
            .filter(|n| n.created_at < cutoff)
            .map(|n| n.id)
            .collect();
        Ok(expired
            .into_iter()
            .filter_map(|id| state.notifications.remove(&id))
            .collect())
    }
}

#[async_trait]
impl DeviceTokenStore for MemoryStore {
    async fn upsert(&self, token: &DeviceToken) -> Result<DeviceToken, AppError> {
        let mut state = self.state.lock();
        if let Some(existing) = state
            .tokens
            .iter_mut()
            .find(|t| t.user_id == token.user_id && t.token == token.token)
        {
            existing.platform = token.platform;
            existing.device_hint = token.device_hint.clone();
            existing.is_active = true;
            existing.disabled_reason = None;
            existing.last_used_at = existing.last_used_at.max(token.last_used_at);
            return Ok(existing.clone());
        }
        state.tokens.push(token.clone());
        Ok(token.clone())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        Ok(self
            .state
            .lock()
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        Ok(self
            .state
            .lock()
            .tokens
            .iter()
            .filter(|t| t.user_id == user_id && t.is_active)
            .cloned()
            .collect())
    }

    async fn users_with_duplicate_tokens(&self) -> Result<Vec<Uuid>, AppError> {
        let state = self.state.lock();
        let mut groups: HashMap<(Uuid, Platform, Option<String>), usize> = HashMap::new();
        for t in state.tokens.iter().filter(|t| t.is_active) {
            let (platform, hint) = dedup_group(t);
            *groups.entry((t.user_id, platform, hint)).or_default() += 1;
        }
        let mut users: Vec<Uuid> = groups
            .into_iter()
            .filter(|(_, n)| *n > 1)
            .map(|((user_id, _, _), _)| user_id)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        users.sort();
        Ok(users)
    }

    async fn deactivate(
        &self,
        user_id: Uuid,
        token: &str,
        reason: &str,
    ) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state
            .tokens
            .iter_mut()
            .find(|t| t.user_id == user_id && t.token == token)
        {
            Some(t) if t.is_active => {
                t.is_active = false;
                t.disabled_reason = Some(reason.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn touch(&self, user_id: Uuid, token: &str, at: DateTime<Utc>) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        match state
            .tokens
            .iter_mut()
            .find(|t| t.user_id == user_id && t.token == token)
        {
            Some(t) => {
                t.last_used_at = t.last_used_at.max(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceToken>, AppError> {
        let mut stale: Vec<_> = self
            .state
            .lock()
            .tokens
            .iter()
            .filter(|t| t.is_active && t.last_used_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|t| t.last_used_at);
        Ok(stale)
    }

    async fn delete_inactive_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeviceToken>, AppError> {
        let mut state = self.state.lock();
        let (removed, kept): (Vec<_>, Vec<_>) = state
            .tokens
            .drain(..)
            .partition(|t| !t.is_active && t.last_used_at < cutoff);
        state.tokens = kept;
        Ok(removed)
    }

    async fn stats(&self) -> Result<TokenStats, AppError> {
        let state = self.state.lock();
        let mut stats = TokenStats {
            total: state.tokens.len() as i64,
            ..Default::default()
        };
        for t in state.tokens.iter().filter(|t| t.is_active) {
            stats.active += 1;
            match t.platform {
                Platform::Ios => stats.active_ios += 1,
                Platform::Android => stats.active_android += 1,
                Platform::Web => stats.active_web += 1,
            }
        }
        Ok(stats)
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn get(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<Option<UserNotificationPreference>, AppError> {
        Ok(self
            .state
            .lock()
            .preferences
            .get(&(user_id, notification_type))
            .cloned())
    }

    async fn upsert(
        &self,
        preference: &UserNotificationPreference,
    ) -> Result<UserNotificationPreference, AppError> {
        self.state.lock().preferences.insert(
            (preference.user_id, preference.notification_type),
            preference.clone(),
        );
        Ok(preference.clone())
    }
}

#[async_trait]
impl AchievementStore for MemoryStore {
    async fn list_rules(&self) -> Result<Vec<AchievementRule>, AppError> {
        Ok(self.state.lock().rules.clone())
    }

    async fn awarded_ids(&self, user_id: Uuid) -> Result<HashSet<Uuid>, AppError> {
        Ok(self
            .state
            .lock()
            .awards
            .keys()
            .filter(|(u, _)| *u == user_id)
            .map(|(_, a)| *a)
            .collect())
    }

    async fn insert_award_if_absent(&self, award: &UserAchievement) -> Result<bool, AppError> {
        let mut state = self.state.lock();
        let key = (award.user_id, award.achievement_id);
        if state.awards.contains_key(&key) {
            return Ok(false);
        }
        state.awards.insert(key, award.clone());
        Ok(true)
    }

    async fn remove_award(&self, user_id: Uuid, achievement_id: Uuid) -> Result<bool, AppError> {
        Ok(self
            .state
            .lock()
            .awards
            .remove(&(user_id, achievement_id))
            .is_some())
    }
}

#[async_trait]
impl UserStatisticsProvider for MemoryStore {
    async fn snapshot(&self, user_id: Uuid) -> Result<UserStatistics, AppError> {
        let state = self.state.lock();
        if state.unavailable_users.contains(&user_id) {
            return Err(AppError::Internal(format!(
                "statistics unavailable for user {}",
                user_id
            )));
        }
        state
            .statistics
            .get(&user_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))
    }

    async fn list_user_ids(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let mut ids: Vec<Uuid> = self
            .state
            .lock()
            .users
            .iter()
            .copied()
            .filter(|id| after.is_none_or(|cursor| *id > cursor))
            .collect();
        ids.sort();
        ids.truncate(limit.max(0) as usize);
        Ok(ids)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn email_address(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        Ok(self.state.lock().emails.get(&user_id).cloned())
    }
}
