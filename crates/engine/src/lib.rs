pub mod achievements;
pub mod channel;
pub mod dispatch;
pub mod gating;
pub mod health;
pub mod memory;
pub mod postgres;
pub mod preferences;
pub mod reminders;
pub mod store;
pub mod templates;
pub mod tokens;

use std::sync::Arc;

use studybell_common::config::AppConfig;

use achievements::AchievementEvaluator;
use channel::ChannelSet;
use dispatch::DispatchPipeline;
use health::HealthAggregator;
use preferences::PreferenceResolver;
use reminders::ReminderPlanner;
use store::{
    AchievementStore, DeviceTokenStore, NotificationStore, PreferenceStore, UserDirectory,
    UserStatisticsProvider,
};
use tokens::DeviceTokenRegistry;

/// Tunables for the engine components and the scheduled tasks built on them.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub token_stale_days: i64,
    pub token_purge_days: i64,
    pub token_probe_sample: usize,
    pub notification_retention_days: i64,
    pub pending_batch_size: i64,
    pub achievement_batch_limit: i64,
    pub inactive_days_for_motivation: i64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            token_stale_days: 30,
            token_purge_days: 90,
            token_probe_sample: 50,
            notification_retention_days: 90,
            pending_batch_size: 500,
            achievement_batch_limit: 1000,
            inactive_days_for_motivation: 3,
        }
    }
}

impl From<&AppConfig> for EngineSettings {
    fn from(config: &AppConfig) -> Self {
        Self {
            token_stale_days: config.token_stale_days,
            token_purge_days: config.token_purge_days,
            token_probe_sample: config.token_probe_sample,
            notification_retention_days: config.notification_retention_days,
            pending_batch_size: config.pending_batch_size,
            achievement_batch_limit: config.achievement_batch_limit,
            inactive_days_for_motivation: config.inactive_days_for_motivation,
        }
    }
}

/// The collaborator stores the engine runs against.
#[derive(Clone)]
pub struct Stores {
    pub notifications: Arc<dyn NotificationStore>,
    pub tokens: Arc<dyn DeviceTokenStore>,
    pub preferences: Arc<dyn PreferenceStore>,
    pub achievements: Arc<dyn AchievementStore>,
    pub statistics: Arc<dyn UserStatisticsProvider>,
    pub directory: Arc<dyn UserDirectory>,
}

impl Stores {
    /// Use one backend for every store.
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: NotificationStore
            + DeviceTokenStore
            + PreferenceStore
            + AchievementStore
            + UserStatisticsProvider
            + UserDirectory
            + 'static,
    {
        Self {
            notifications: store.clone(),
            tokens: store.clone(),
            preferences: store.clone(),
            achievements: store.clone(),
            statistics: store.clone(),
            directory: store,
        }
    }
}

/// Every engine component, wired to one set of stores and channels.
#[derive(Clone)]
pub struct Engine {
    pub settings: EngineSettings,
    pub tokens: DeviceTokenRegistry,
    pub preferences: PreferenceResolver,
    pub dispatch: DispatchPipeline,
    pub achievements: AchievementEvaluator,
    pub reminders: ReminderPlanner,
    pub health: HealthAggregator,
    /// User listing for operations that fan out over every user.
    pub users: Arc<dyn UserStatisticsProvider>,
}

impl Engine {
    pub fn new(stores: Stores, channels: ChannelSet, settings: EngineSettings) -> Self {
        let tokens = DeviceTokenRegistry::new(stores.tokens.clone(), channels.clone());
        let preferences = PreferenceResolver::new(stores.preferences.clone());
        let dispatch = DispatchPipeline::new(
            stores.notifications.clone(),
            preferences.clone(),
            tokens.clone(),
            stores.directory.clone(),
            channels,
            settings.pending_batch_size,
        );
        let achievements = AchievementEvaluator::new(
            stores.achievements.clone(),
            stores.statistics.clone(),
            dispatch.clone(),
        );
        let reminders = ReminderPlanner::new(
            stores.statistics.clone(),
            dispatch.clone(),
            settings.achievement_batch_limit,
        );
        let health = HealthAggregator::new(stores.notifications, stores.tokens);
        let users = stores.statistics;

        Self {
            settings,
            tokens,
            preferences,
            dispatch,
            achievements,
            reminders,
            health,
            users,
        }
    }
}
