//! In-app delivery.
//!
//! The stored intent already is the user's inbox entry, so delivery only
//! announces it to live listeners (an SSE or websocket layer). Having nobody
//! listening is not a failure.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use studybell_common::types::ChannelType;
use studybell_engine::channel::{DeliveryChannel, DeliveryError, DeliveryTarget, OutboundMessage};

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, Serialize)]
pub struct InAppEvent {
    pub user_id: Uuid,
    pub notification_id: Uuid,
    pub title: String,
    pub body: String,
    pub action_url: Option<String>,
    pub emitted_at: DateTime<Utc>,
}

pub struct InAppChannel {
    events: broadcast::Sender<InAppEvent>,
}

impl InAppChannel {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self { events }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InAppEvent> {
        self.events.subscribe()
    }
}

impl Default for InAppChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeliveryChannel for InAppChannel {
    fn kind(&self) -> ChannelType {
        ChannelType::InApp
    }

    async fn send(
        &self,
        target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        let DeliveryTarget::InApp { user_id } = target else {
            return Err(DeliveryError::NoTarget(ChannelType::InApp));
        };

        let listeners = self
            .events
            .send(InAppEvent {
                user_id: *user_id,
                notification_id: message.notification_id,
                title: message.title.to_string(),
                body: message.body.to_string(),
                action_url: message.payload.action_url.clone(),
                emitted_at: Utc::now(),
            })
            .unwrap_or(0);

        tracing::debug!(
            user_id = %user_id,
            notification_id = %message.notification_id,
            listeners,
            "In-app notification published"
        );
        Ok(())
    }
}
