//! PostgreSQL implementation of the collaborator stores.
//!
//! Idempotency lives in the SQL: awards use `ON CONFLICT DO NOTHING`, status
//! changes carry the expected current status in their `WHERE` clause, and
//! token touches use `GREATEST` so `last_used_at` never moves backwards.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, NaiveTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{
    AchievementRule, ChannelPayload, DeviceToken, NotificationIntent, NotificationStatus,
    NotificationType, OutcomeCounts, QuietHours, Requirement, TokenStats, UserAchievement,
    UserNotificationPreference, UserStatistics,
};

use crate::store::{
    AchievementStore, DeviceTokenStore, NotificationStore, PendingCursor, PreferenceStore,
    UserDirectory, UserStatisticsProvider,
};

/// Postgres-backed store shared by every engine component.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(sqlx::FromRow)]
struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    notification_type: NotificationType,
    title: String,
    body: String,
    action_url: Option<String>,
    icon: Option<String>,
    status: NotificationStatus,
    created_at: DateTime<Utc>,
    sent_at: Option<DateTime<Utc>>,
    read_at: Option<DateTime<Utc>>,
    metadata: serde_json::Value,
}

impl From<NotificationRow> for NotificationIntent {
    fn from(row: NotificationRow) -> Self {
        NotificationIntent {
            id: row.id,
            user_id: row.user_id,
            notification_type: row.notification_type,
            title: row.title,
            body: row.body,
            payload: ChannelPayload {
                action_url: row.action_url,
                icon: row.icon,
            },
            status: row.status,
            created_at: row.created_at,
            sent_at: row.sent_at,
            read_at: row.read_at,
            metadata: row.metadata,
        }
    }
}

#[derive(sqlx::FromRow)]
struct PreferenceRow {
    user_id: Uuid,
    notification_type: NotificationType,
    in_app_enabled: bool,
    push_enabled: bool,
    email_enabled: bool,
    frequency_hours: i32,
    quiet_hours_start: Option<NaiveTime>,
    quiet_hours_end: Option<NaiveTime>,
}

impl From<PreferenceRow> for UserNotificationPreference {
    fn from(row: PreferenceRow) -> Self {
        let quiet_hours = match (row.quiet_hours_start, row.quiet_hours_end) {
            (Some(start), Some(end)) => Some(QuietHours { start, end }),
            _ => None,
        };
        UserNotificationPreference {
            user_id: row.user_id,
            notification_type: row.notification_type,
            in_app_enabled: row.in_app_enabled,
            push_enabled: row.push_enabled,
            email_enabled: row.email_enabled,
            frequency_hours: row.frequency_hours,
            quiet_hours,
        }
    }
}

#[derive(sqlx::FromRow)]
struct StatisticsRow {
    user_id: Uuid,
    study_sessions: i32,
    total_study_minutes: i32,
    current_streak_days: i32,
    longest_streak_days: i32,
    duels_played: i32,
    duels_won: i32,
    tests_completed: i32,
    average_accuracy: f64,
    last_study_at: Option<DateTime<Utc>>,
    weekly_study_minutes: i32,
    weekly_tests_completed: i32,
}

fn non_negative(value: i32) -> u32 {
    value.max(0) as u32
}

impl From<StatisticsRow> for UserStatistics {
    fn from(row: StatisticsRow) -> Self {
        UserStatistics {
            user_id: row.user_id,
            study_sessions: non_negative(row.study_sessions),
            total_study_minutes: non_negative(row.total_study_minutes),
            current_streak_days: non_negative(row.current_streak_days),
            longest_streak_days: non_negative(row.longest_streak_days),
            duels_played: non_negative(row.duels_played),
            duels_won: non_negative(row.duels_won),
            tests_completed: non_negative(row.tests_completed),
            average_accuracy: row.average_accuracy,
            last_study_at: row.last_study_at,
            weekly_study_minutes: non_negative(row.weekly_study_minutes),
            weekly_tests_completed: non_negative(row.weekly_tests_completed),
        }
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert(&self, intent: &NotificationIntent) -> Result<(), AppError> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, notification_type, title, body, action_url, icon, status,
                 created_at, sent_at, read_at, metadata)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(intent.id)
        .bind(intent.user_id)
        .bind(intent.notification_type.to_string())
        .bind(&intent.title)
        .bind(&intent.body)
        .bind(&intent.payload.action_url)
        .bind(&intent.payload.icon)
        .bind(intent.status.to_string())
        .bind(intent.created_at)
        .bind(intent.sent_at)
        .bind(intent.read_at)
        .bind(&intent.metadata)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<NotificationIntent>, AppError> {
        let row: Option<NotificationRow> =
            sqlx::query_as("SELECT * FROM notifications WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.map(Into::into))
    }

    async fn list_pending(
        &self,
        after: Option<PendingCursor>,
        limit: i64,
    ) -> Result<Vec<NotificationIntent>, AppError> {
        let (after_created, after_id) = after.unzip();
        let rows: Vec<NotificationRow> = sqlx::query_as(
            r#"
            SELECT * FROM notifications
            WHERE status = 'pending'
              AND ($1::timestamptz IS NULL OR (created_at, id) > ($1, $2::uuid))
            ORDER BY created_at ASC, id ASC
            LIMIT $3
            "#,
        )
        .bind(after_created)
        .bind(after_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn claim(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        lease_until: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET claimed_until = $3
            WHERE id = $1
              AND status = 'pending'
              AND (claimed_until IS NULL OR claimed_until <= $2)
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(lease_until)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_sent(&self, id: Uuid, sent_at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET status = 'sent', sent_at = $2, claimed_until = NULL
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(sent_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, reason: &str) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications
            SET status = 'failed',
                claimed_until = NULL,
                metadata = metadata || jsonb_build_object('failure_reason', $2::text)
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE notifications SET status = 'delivered' WHERE id = $1 AND status = 'sent'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_read(&self, id: Uuid, read_at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE notifications SET status = 'read', read_at = $2
            WHERE id = $1 AND status IN ('sent', 'delivered')
            "#,
        )
        .bind(id)
        .bind(read_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn last_sent_at(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<Option<DateTime<Utc>>, AppError> {
        let row: (Option<DateTime<Utc>>,) = sqlx::query_as(
            "SELECT MAX(sent_at) FROM notifications WHERE user_id = $1 AND notification_type = $2",
        )
        .bind(user_id)
        .bind(notification_type.to_string())
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    async fn outcome_counts(&self, since: DateTime<Utc>) -> Result<OutcomeCounts, AppError> {
        let (total, sent, pending, failed): (i64, i64, i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COUNT(*) FILTER (WHERE status IN ('sent', 'delivered', 'read')),
                COUNT(*) FILTER (WHERE status = 'pending'),
                COUNT(*) FILTER (WHERE status = 'failed')
            FROM notifications
            WHERE created_at >= $1
            "#,
        )
        .bind(since)
        .fetch_one(&self.pool)
        .await?;

        Ok(OutcomeCounts {
            total,
            sent,
            pending,
            failed,
        })
    }

    async fn delete_created_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<NotificationIntent>, AppError> {
        let rows: Vec<NotificationRow> =
            sqlx::query_as("DELETE FROM notifications WHERE created_at < $1 RETURNING *")
                .bind(cutoff)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(Into::into).collect())
    }
}

#[async_trait]
impl DeviceTokenStore for PgStore {
    async fn upsert(&self, token: &DeviceToken) -> Result<DeviceToken, AppError> {
        let stored: DeviceToken = sqlx::query_as(
            r#"
            INSERT INTO device_tokens
                (user_id, token, platform, device_hint, is_active, registered_at,
                 last_used_at, disabled_reason)
            VALUES ($1, $2, $3, $4, true, $5, $6, NULL)
            ON CONFLICT (user_id, token) DO UPDATE SET
                platform = EXCLUDED.platform,
                device_hint = EXCLUDED.device_hint,
                is_active = true,
                disabled_reason = NULL,
                last_used_at = GREATEST(device_tokens.last_used_at, EXCLUDED.last_used_at)
            RETURNING *
            "#,
        )
        .bind(token.user_id)
        .bind(&token.token)
        .bind(token.platform.to_string())
        .bind(&token.device_hint)
        .bind(token.registered_at)
        .bind(token.last_used_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(stored)
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            "SELECT * FROM device_tokens WHERE user_id = $1 ORDER BY last_used_at DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn list_active_for_user(&self, user_id: Uuid) -> Result<Vec<DeviceToken>, AppError> {
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            r#"
            SELECT * FROM device_tokens
            WHERE user_id = $1 AND is_active
            ORDER BY last_used_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn users_with_duplicate_tokens(&self) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            r#"
            SELECT DISTINCT user_id FROM (
                SELECT user_id
                FROM device_tokens
                WHERE is_active
                GROUP BY user_id, platform, device_hint
                HAVING COUNT(*) > 1
            ) dup
            ORDER BY user_id
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn deactivate(
        &self,
        user_id: Uuid,
        token: &str,
        reason: &str,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE device_tokens SET is_active = false, disabled_reason = $3
            WHERE user_id = $1 AND token = $2 AND is_active
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(reason)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn touch(&self, user_id: Uuid, token: &str, at: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            UPDATE device_tokens SET last_used_at = GREATEST(last_used_at, $3)
            WHERE user_id = $1 AND token = $2
            "#,
        )
        .bind(user_id)
        .bind(token)
        .bind(at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list_stale(&self, cutoff: DateTime<Utc>) -> Result<Vec<DeviceToken>, AppError> {
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            r#"
            SELECT * FROM device_tokens
            WHERE is_active AND last_used_at < $1
            ORDER BY last_used_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn delete_inactive_before(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<DeviceToken>, AppError> {
        let tokens: Vec<DeviceToken> = sqlx::query_as(
            "DELETE FROM device_tokens WHERE NOT is_active AND last_used_at < $1 RETURNING *",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;

        Ok(tokens)
    }

    async fn stats(&self) -> Result<TokenStats, AppError> {
        let (total, active, active_ios, active_android, active_web): (i64, i64, i64, i64, i64) =
            sqlx::query_as(
                r#"
                SELECT
                    COUNT(*),
                    COUNT(*) FILTER (WHERE is_active),
                    COUNT(*) FILTER (WHERE is_active AND platform = 'ios'),
                    COUNT(*) FILTER (WHERE is_active AND platform = 'android'),
                    COUNT(*) FILTER (WHERE is_active AND platform = 'web')
                FROM device_tokens
                "#,
            )
            .fetch_one(&self.pool)
            .await?;

        Ok(TokenStats {
            total,
            active,
            active_ios,
            active_android,
            active_web,
        })
    }
}

#[async_trait]
impl PreferenceStore for PgStore {
    async fn get(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<Option<UserNotificationPreference>, AppError> {
        let row: Option<PreferenceRow> = sqlx::query_as(
            "SELECT * FROM notification_preferences WHERE user_id = $1 AND notification_type = $2",
        )
        .bind(user_id)
        .bind(notification_type.to_string())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Into::into))
    }

    async fn upsert(
        &self,
        preference: &UserNotificationPreference,
    ) -> Result<UserNotificationPreference, AppError> {
        let row: PreferenceRow = sqlx::query_as(
            r#"
            INSERT INTO notification_preferences
                (user_id, notification_type, in_app_enabled, push_enabled, email_enabled,
                 frequency_hours, quiet_hours_start, quiet_hours_end, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
            ON CONFLICT (user_id, notification_type) DO UPDATE SET
                in_app_enabled = EXCLUDED.in_app_enabled,
                push_enabled = EXCLUDED.push_enabled,
                email_enabled = EXCLUDED.email_enabled,
                frequency_hours = EXCLUDED.frequency_hours,
                quiet_hours_start = EXCLUDED.quiet_hours_start,
                quiet_hours_end = EXCLUDED.quiet_hours_end,
                updated_at = NOW()
            RETURNING *
            "#,
        )
        .bind(preference.user_id)
        .bind(preference.notification_type.to_string())
        .bind(preference.in_app_enabled)
        .bind(preference.push_enabled)
        .bind(preference.email_enabled)
        .bind(preference.frequency_hours)
        .bind(preference.quiet_hours.map(|q| q.start))
        .bind(preference.quiet_hours.map(|q| q.end))
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into())
    }
}

#[async_trait]
impl AchievementStore for PgStore {
    async fn list_rules(&self) -> Result<Vec<AchievementRule>, AppError> {
        let rows: Vec<(Uuid, String, String, serde_json::Value)> = sqlx::query_as(
            "SELECT id, name, description, requirements FROM achievements ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut rules = Vec::with_capacity(rows.len());
        for (id, name, description, requirements) in rows {
            match serde_json::from_value::<Requirement>(requirements) {
                Ok(requirements) => rules.push(AchievementRule {
                    id,
                    name,
                    description,
                    requirements,
                }),
                Err(e) => {
                    tracing::warn!(
                        achievement_id = %id,
                        error = %e,
                        "Skipping achievement with malformed requirements"
                    );
                }
            }
        }

        Ok(rules)
    }

    async fn awarded_ids(&self, user_id: Uuid) -> Result<HashSet<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> =
            sqlx::query_as("SELECT achievement_id FROM user_achievements WHERE user_id = $1")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn insert_award_if_absent(&self, award: &UserAchievement) -> Result<bool, AppError> {
        let result = sqlx::query(
            r#"
            INSERT INTO user_achievements (user_id, achievement_id, awarded_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (user_id, achievement_id) DO NOTHING
            "#,
        )
        .bind(award.user_id)
        .bind(award.achievement_id)
        .bind(award.awarded_at)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn remove_award(&self, user_id: Uuid, achievement_id: Uuid) -> Result<bool, AppError> {
        let result = sqlx::query(
            "DELETE FROM user_achievements WHERE user_id = $1 AND achievement_id = $2",
        )
        .bind(user_id)
        .bind(achievement_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl UserStatisticsProvider for PgStore {
    async fn snapshot(&self, user_id: Uuid) -> Result<UserStatistics, AppError> {
        let row: StatisticsRow = sqlx::query_as(
            r#"
            SELECT u.id AS user_id,
                   COALESCE(s.study_sessions, 0) AS study_sessions,
                   COALESCE(s.total_study_minutes, 0) AS total_study_minutes,
                   COALESCE(s.current_streak_days, 0) AS current_streak_days,
                   COALESCE(s.longest_streak_days, 0) AS longest_streak_days,
                   COALESCE(s.duels_played, 0) AS duels_played,
                   COALESCE(s.duels_won, 0) AS duels_won,
                   COALESCE(s.tests_completed, 0) AS tests_completed,
                   COALESCE(s.average_accuracy, 0) AS average_accuracy,
                   s.last_study_at,
                   COALESCE(s.weekly_study_minutes, 0) AS weekly_study_minutes,
                   COALESCE(s.weekly_tests_completed, 0) AS weekly_tests_completed
            FROM users u
            LEFT JOIN user_statistics s ON s.user_id = u.id
            WHERE u.id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("User {} not found", user_id)))?;

        Ok(row.into())
    }

    async fn list_user_ids(&self, after: Option<Uuid>, limit: i64) -> Result<Vec<Uuid>, AppError> {
        let rows: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM users WHERE ($1::uuid IS NULL OR id > $1) ORDER BY id ASC LIMIT $2",
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(|(id,)| id).collect())
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn email_address(&self, user_id: Uuid) -> Result<Option<String>, AppError> {
        let row: Option<(Option<String>,)> =
            sqlx::query_as("SELECT email FROM users WHERE id = $1")
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        Ok(row.and_then(|(email,)| email))
    }
}
