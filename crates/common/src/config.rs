use serde::Deserialize;

/// Global application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// PostgreSQL connection string
    pub database_url: String,

    /// Maximum number of PostgreSQL connections in the pool (default: 20)
    pub db_max_connections: u32,

    /// Port the HTTP API listens on (default: 3000)
    pub api_port: u16,

    /// Base URL of the push relay (FCM/APNs gateway). Push is disabled when unset.
    pub push_gateway_url: Option<String>,

    /// Server key sent to the push relay
    pub push_gateway_key: Option<String>,

    /// Resend API key for email delivery. Email is disabled when unset.
    pub resend_api_key: Option<String>,

    /// Email sender address
    pub email_from: Option<String>,

    /// Upper bound for a single channel delivery or token probe, in milliseconds
    pub delivery_timeout_ms: u64,

    /// Days without use after which a device token counts as stale
    pub token_stale_days: i64,

    /// Days after which inactive device tokens are deleted
    pub token_purge_days: i64,

    /// Maximum number of stale tokens probed per run
    pub token_probe_sample: usize,

    /// Days notification records are retained regardless of status
    pub notification_retention_days: i64,

    /// Maximum number of pending intents considered per dispatch pass
    pub pending_batch_size: i64,

    /// Interval between pending-notification passes, in minutes
    pub pending_interval_minutes: u64,

    /// Interval between duplicate-token consolidation runs, in hours
    pub token_maintenance_interval_hours: u64,

    /// Maximum number of users evaluated by one achievement sweep
    pub achievement_batch_limit: i64,

    /// Days of inactivity before a user receives a motivational message
    pub inactive_days_for_motivation: i64,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| anyhow::anyhow!("DATABASE_URL environment variable is required"))?,
            db_max_connections: parse_env("DB_MAX_CONNECTIONS", 20)?,
            api_port: parse_env("API_PORT", 3000)?,
            push_gateway_url: std::env::var("PUSH_GATEWAY_URL").ok(),
            push_gateway_key: std::env::var("PUSH_GATEWAY_KEY").ok(),
            resend_api_key: std::env::var("RESEND_API_KEY").ok(),
            email_from: std::env::var("EMAIL_FROM").ok(),
            delivery_timeout_ms: parse_env("DELIVERY_TIMEOUT_MS", 5000)?,
            token_stale_days: parse_env("TOKEN_STALE_DAYS", 30)?,
            token_purge_days: parse_env("TOKEN_PURGE_DAYS", 90)?,
            token_probe_sample: parse_env("TOKEN_PROBE_SAMPLE", 50)?,
            notification_retention_days: parse_env("NOTIFICATION_RETENTION_DAYS", 90)?,
            pending_batch_size: parse_env("PENDING_BATCH_SIZE", 500)?,
            pending_interval_minutes: parse_env("PENDING_INTERVAL_MINUTES", 5)?,
            token_maintenance_interval_hours: parse_env("TOKEN_MAINTENANCE_INTERVAL_HOURS", 6)?,
            achievement_batch_limit: parse_env("ACHIEVEMENT_BATCH_LIMIT", 1000)?,
            inactive_days_for_motivation: parse_env("INACTIVE_DAYS_FOR_MOTIVATION", 3)?,
        })
    }
}

/// Read an optional numeric variable, falling back to `default` when unset.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> anyhow::Result<T> {
    match std::env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|_| {
            anyhow::anyhow!("{} must be a valid {}", key, std::any::type_name::<T>())
        }),
        Err(_) => Ok(default),
    }
}
