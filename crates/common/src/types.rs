use std::str::FromStr;

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Kinds of notification the platform generates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "text", rename_all = "snake_case")]
pub enum NotificationType {
    StreakReminder,
    StudyReminder,
    Motivational,
    CoachingNote,
    AchievementUnlock,
    DuelChallenge,
    SystemAnnouncement,
}

impl NotificationType {
    pub const ALL: [NotificationType; 7] = [
        NotificationType::StreakReminder,
        NotificationType::StudyReminder,
        NotificationType::Motivational,
        NotificationType::CoachingNote,
        NotificationType::AchievementUnlock,
        NotificationType::DuelChallenge,
        NotificationType::SystemAnnouncement,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationType::StreakReminder => "streak_reminder",
            NotificationType::StudyReminder => "study_reminder",
            NotificationType::Motivational => "motivational",
            NotificationType::CoachingNote => "coaching_note",
            NotificationType::AchievementUnlock => "achievement_unlock",
            NotificationType::DuelChallenge => "duel_challenge",
            NotificationType::SystemAnnouncement => "system_announcement",
        }
    }
}

impl std::fmt::Display for NotificationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NotificationType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NotificationType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation(format!("Unknown notification type '{}'", s)))
    }
}

/// Lifecycle status of a notification intent.
///
/// `Pending → Sent → Delivered → Read` only moves forward; `Failed` is
/// terminal and can only be reached from `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum NotificationStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl NotificationStatus {
    fn rank(&self) -> Option<u8> {
        match self {
            NotificationStatus::Pending => Some(0),
            NotificationStatus::Sent => Some(1),
            NotificationStatus::Delivered => Some(2),
            NotificationStatus::Read => Some(3),
            NotificationStatus::Failed => None,
        }
    }

    /// Whether moving from `self` to `next` respects status monotonicity.
    pub fn can_transition_to(&self, next: NotificationStatus) -> bool {
        match (self.rank(), next.rank()) {
            (Some(from), Some(to)) => to > from,
            (Some(0), None) => true,
            _ => false,
        }
    }

    /// Statuses for which `sent_at` must be set.
    pub fn has_been_sent(&self) -> bool {
        matches!(
            self,
            NotificationStatus::Sent | NotificationStatus::Delivered | NotificationStatus::Read
        )
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationStatus::Pending => write!(f, "pending"),
            NotificationStatus::Sent => write!(f, "sent"),
            NotificationStatus::Delivered => write!(f, "delivered"),
            NotificationStatus::Read => write!(f, "read"),
            NotificationStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Device platform of a push token.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "text", rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Platform::Ios => write!(f, "ios"),
            Platform::Android => write!(f, "android"),
            Platform::Web => write!(f, "web"),
        }
    }
}

impl FromStr for Platform {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ios" => Ok(Platform::Ios),
            "android" => Ok(Platform::Android),
            "web" => Ok(Platform::Web),
            other => Err(AppError::Validation(format!(
                "Invalid platform '{}'. Valid platforms: ios, android, web",
                other
            ))),
        }
    }
}

/// Notification channel type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Push,
    Email,
    InApp,
}

impl std::fmt::Display for ChannelType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelType::Push => write!(f, "push"),
            ChannelType::Email => write!(f, "email"),
            ChannelType::InApp => write!(f, "in_app"),
        }
    }
}

/// Channel-specific extras attached to a notification.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelPayload {
    pub action_url: Option<String>,
    pub icon: Option<String>,
}

/// A recorded decision to notify a user, independent of delivery outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationIntent {
    pub id: Uuid,
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub title: String,
    pub body: String,
    pub payload: ChannelPayload,
    pub status: NotificationStatus,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub read_at: Option<DateTime<Utc>>,
    /// Opaque caller-supplied data; `failure_reason` is written here on failure.
    pub metadata: serde_json::Value,
}

impl NotificationIntent {
    /// Build a fresh intent in `pending` status.
    pub fn pending(
        user_id: Uuid,
        notification_type: NotificationType,
        title: String,
        body: String,
        payload: ChannelPayload,
        metadata: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            notification_type,
            title,
            body,
            payload,
            status: NotificationStatus::Pending,
            created_at,
            sent_at: None,
            read_at: None,
            metadata,
        }
    }
}

/// A registered delivery address for push notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeviceToken {
    pub user_id: Uuid,
    pub token: String,
    pub platform: Platform,
    /// Client-provided hint identifying the physical device, if any.
    pub device_hint: Option<String>,
    pub is_active: bool,
    pub registered_at: DateTime<Utc>,
    pub last_used_at: DateTime<Utc>,
    pub disabled_reason: Option<String>,
}

/// Reason recorded when a token is disabled after a failed probe.
pub const DISABLED_STALE_INVALID: &str = "stale_invalid";

/// Reason recorded when a token loses duplicate consolidation.
pub const DISABLED_DUPLICATE: &str = "duplicate";

/// Time-of-day window (UTC) during which sends are deferred.
///
/// The window is half-open, `[start, end)`. When `start > end` it wraps past
/// midnight; when `start == end` it is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuietHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietHours {
    pub fn contains(&self, time: NaiveTime) -> bool {
        if self.start <= self.end {
            time >= self.start && time < self.end
        } else {
            time >= self.start || time < self.end
        }
    }
}

/// Parse a time-of-day string such as `22:00` or `07:30:00`.
pub fn parse_time_of_day(raw: &str) -> Result<NaiveTime, AppError> {
    let raw = raw.trim();
    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| AppError::Validation(format!("Invalid time of day '{}'", raw)))
}

/// Per-user, per-type notification settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserNotificationPreference {
    pub user_id: Uuid,
    pub notification_type: NotificationType,
    pub in_app_enabled: bool,
    pub push_enabled: bool,
    pub email_enabled: bool,
    /// Minimum spacing, in hours, between two sends of this type. Zero disables the cap.
    pub frequency_hours: i32,
    pub quiet_hours: Option<QuietHours>,
}

impl UserNotificationPreference {
    /// Platform defaults: every channel on, no quiet hours, no frequency cap.
    pub fn defaults(user_id: Uuid, notification_type: NotificationType) -> Self {
        Self {
            user_id,
            notification_type,
            in_app_enabled: true,
            push_enabled: true,
            email_enabled: true,
            frequency_hours: 0,
            quiet_hours: None,
        }
    }

    pub fn enabled_channels(&self) -> Vec<ChannelType> {
        let mut channels = Vec::with_capacity(3);
        if self.push_enabled {
            channels.push(ChannelType::Push);
        }
        if self.email_enabled {
            channels.push(ChannelType::Email);
        }
        if self.in_app_enabled {
            channels.push(ChannelType::InApp);
        }
        channels
    }
}

/// Partial preference update supplied by the owning user.
///
/// Omitted fields keep their current value. Quiet hours are set when both
/// bounds are given and cleared when `clear_quiet_hours` is true.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PreferenceUpdate {
    pub in_app_enabled: Option<bool>,
    pub push_enabled: Option<bool>,
    pub email_enabled: Option<bool>,
    pub frequency_hours: Option<i32>,
    pub quiet_hours_start: Option<String>,
    pub quiet_hours_end: Option<String>,
    #[serde(default)]
    pub clear_quiet_hours: bool,
}

/// Snapshot of a user's learning activity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UserStatistics {
    pub user_id: Uuid,
    pub study_sessions: u32,
    pub total_study_minutes: u32,
    pub current_streak_days: u32,
    pub longest_streak_days: u32,
    pub duels_played: u32,
    pub duels_won: u32,
    pub tests_completed: u32,
    /// Average test accuracy in `[0, 1]`.
    pub average_accuracy: f64,
    pub last_study_at: Option<DateTime<Utc>>,
    /// Minutes studied during the trailing seven days.
    pub weekly_study_minutes: u32,
    /// Tests completed during the trailing seven days.
    pub weekly_tests_completed: u32,
}

/// Structured predicate over [`UserStatistics`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Requirement {
    MinStudySessions(u32),
    MinStudyMinutes(u32),
    MinStreakDays(u32),
    MinDuelsWon(u32),
    MinTestsCompleted(u32),
    MinAccuracy(f64),
    All(Vec<Requirement>),
    Any(Vec<Requirement>),
}

impl Requirement {
    pub fn is_satisfied_by(&self, stats: &UserStatistics) -> bool {
        match self {
            Requirement::MinStudySessions(n) => stats.study_sessions >= *n,
            Requirement::MinStudyMinutes(n) => stats.total_study_minutes >= *n,
            Requirement::MinStreakDays(n) => {
                stats.current_streak_days.max(stats.longest_streak_days) >= *n
            }
            Requirement::MinDuelsWon(n) => stats.duels_won >= *n,
            Requirement::MinTestsCompleted(n) => stats.tests_completed >= *n,
            Requirement::MinAccuracy(min) => {
                stats.tests_completed > 0 && stats.average_accuracy >= *min
            }
            Requirement::All(parts) => parts.iter().all(|r| r.is_satisfied_by(stats)),
            Requirement::Any(parts) => parts.iter().any(|r| r.is_satisfied_by(stats)),
        }
    }
}

/// A named achievement and the predicate that unlocks it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementRule {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub requirements: Requirement,
}

/// An achievement awarded to a user. Created once per pair, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserAchievement {
    pub user_id: Uuid,
    pub achievement_id: Uuid,
    pub awarded_at: DateTime<Utc>,
}

/// Device token counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenStats {
    pub total: i64,
    pub active: i64,
    pub active_ios: i64,
    pub active_android: i64,
    pub active_web: i64,
}

/// Notification outcome counts over a time window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub total: i64,
    /// Sent, delivered or read.
    pub sent: i64,
    pub pending: i64,
    pub failed: i64,
}

/// One failed item inside a batch operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub id: String,
    pub error: String,
}

/// Outcome of the weekly maintenance sweep.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duplicate_tokens_deactivated: u64,
    pub stale_tokens_found: u64,
    pub stale_tokens_disabled: u64,
    pub tokens_deleted: u64,
    pub notifications_purged: u64,
    pub achievements_awarded: u64,
    pub errors: Vec<String>,
}
