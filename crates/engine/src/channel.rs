//! Delivery channel seam.
//!
//! Concrete channels (push relay, email, in-app) live in `studybell-notifier`.
//! The engine only sees [`DeliveryChannel`] and always calls it through
//! [`ChannelSet`], which bounds each call with a timeout.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{ChannelPayload, ChannelType, Platform};

/// Errors returned by a delivery channel.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("channel call timed out after {0:?}")]
    Timeout(Duration),

    #[error("no delivery target for channel {0}")]
    NoTarget(ChannelType),

    #[error("channel {0} is not configured")]
    NotConfigured(ChannelType),

    #[error("rejected with HTTP {status}: {detail}")]
    Rejected { status: u16, detail: String },

    #[error("transport error: {0}")]
    Transport(String),
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        AppError::Delivery(err.to_string())
    }
}

/// Where a single delivery attempt goes.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryTarget {
    Device { token: String, platform: Platform },
    Email { address: String },
    InApp { user_id: Uuid },
}

/// Rendered content handed to a channel.
#[derive(Debug, Clone)]
pub struct OutboundMessage<'a> {
    pub notification_id: Uuid,
    pub title: &'a str,
    pub body: &'a str,
    pub payload: &'a ChannelPayload,
}

#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    fn kind(&self) -> ChannelType;

    async fn send(
        &self,
        target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError>;

    /// Lightweight validity check of a device token.
    ///
    /// `Ok(false)` means the channel reported the token as invalid. Channels
    /// without a notion of tokens report every token as valid.
    async fn probe(&self, _token: &str, _platform: Platform) -> Result<bool, DeliveryError> {
        Ok(true)
    }
}

/// Registered channels keyed by type, with a shared per-call timeout.
#[derive(Clone)]
pub struct ChannelSet {
    channels: HashMap<ChannelType, Arc<dyn DeliveryChannel>>,
    timeout: Duration,
}

impl ChannelSet {
    pub fn new(timeout: Duration) -> Self {
        Self {
            channels: HashMap::new(),
            timeout,
        }
    }

    pub fn with_channel(mut self, channel: Arc<dyn DeliveryChannel>) -> Self {
        self.channels.insert(channel.kind(), channel);
        self
    }

    pub fn has(&self, kind: ChannelType) -> bool {
        self.channels.contains_key(&kind)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send through the channel of `kind`; non-response within the timeout is a failure.
    pub async fn send(
        &self,
        kind: ChannelType,
        target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        let channel = self
            .channels
            .get(&kind)
            .ok_or(DeliveryError::NotConfigured(kind))?;

        tokio::time::timeout(self.timeout, channel.send(target, message))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
    }

    /// Probe a device token through the push channel, bounded by the timeout.
    pub async fn probe(&self, token: &str, platform: Platform) -> Result<bool, DeliveryError> {
        let channel = self
            .channels
            .get(&ChannelType::Push)
            .ok_or(DeliveryError::NotConfigured(ChannelType::Push))?;

        tokio::time::timeout(self.timeout, channel.probe(token, platform))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))?
    }
}
