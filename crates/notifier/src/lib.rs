//! Delivery channels: push relay, Resend email and in-app.
//!
//! [`channel_set_from_config`] builds the set the engine dispatches through.
//! Push and email are only registered when their credentials are configured;
//! in-app is always available.

pub mod email;
pub mod in_app;
pub mod push;

use std::sync::Arc;
use std::time::Duration;

use studybell_common::config::AppConfig;
use studybell_engine::channel::{ChannelSet, DeliveryError};

pub use email::EmailChannel;
pub use in_app::{InAppChannel, InAppEvent};
pub use push::PushChannel;

fn http_client(timeout: Duration) -> Result<reqwest::Client, DeliveryError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| DeliveryError::Transport(format!("failed to build HTTP client: {e}")))
}

fn transport_error(err: reqwest::Error) -> DeliveryError {
    DeliveryError::Transport(err.to_string())
}

/// Channels available to the engine, plus the in-app channel for subscribers.
pub struct Channels {
    pub set: ChannelSet,
    pub in_app: Arc<InAppChannel>,
}

pub fn channel_set_from_config(config: &AppConfig) -> anyhow::Result<Channels> {
    let timeout = Duration::from_millis(config.delivery_timeout_ms);
    let in_app = Arc::new(InAppChannel::new());
    let mut set = ChannelSet::new(timeout).with_channel(in_app.clone());

    match &config.push_gateway_url {
        Some(url) => {
            let push = PushChannel::new(url, config.push_gateway_key.clone(), timeout)?;
            set = set.with_channel(Arc::new(push));
            tracing::info!(gateway = %url, "Push channel enabled");
        }
        None => tracing::warn!("PUSH_GATEWAY_URL not set, push delivery disabled"),
    }

    match (&config.resend_api_key, &config.email_from) {
        (Some(key), Some(from)) => {
            let email = EmailChannel::new(key.clone(), from.clone(), timeout)?;
            set = set.with_channel(Arc::new(email));
            tracing::info!(from = %from, "Email channel enabled");
        }
        _ => tracing::warn!("RESEND_API_KEY or EMAIL_FROM not set, email delivery disabled"),
    }

    Ok(Channels { set, in_app })
}
