//! Push delivery through an HTTP push relay that fronts FCM and APNs.
//!
//! The relay accepts `POST {base}/v1/send` with a bearer key. A request with
//! `validate_only: true` checks the token without showing anything on the
//! device, which is what token probing uses. The relay answers 404 or 410 for
//! tokens the platform no longer recognises.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use studybell_common::types::{ChannelType, Platform};
use studybell_engine::channel::{DeliveryChannel, DeliveryError, DeliveryTarget, OutboundMessage};

use crate::{http_client, transport_error};

#[derive(Debug, Serialize)]
struct PushRequest<'a> {
    token: &'a str,
    platform: Platform,
    validate_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    notification: Option<PushNotification<'a>>,
}

#[derive(Debug, Serialize)]
struct PushNotification<'a> {
    title: &'a str,
    body: &'a str,
    data: serde_json::Value,
}

pub struct PushChannel {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl PushChannel {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        Ok(Self {
            client: http_client(timeout)?,
            endpoint: format!("{}/v1/send", base_url.trim_end_matches('/')),
            api_key,
        })
    }

    async fn post(&self, request: &PushRequest<'_>) -> Result<reqwest::StatusCode, DeliveryError> {
        let mut builder = self.client.post(&self.endpoint).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await.map_err(transport_error)?;
        Ok(response.status())
    }
}

/// True when the relay reports the token as unknown to the platform.
fn is_unregistered(status: reqwest::StatusCode) -> bool {
    matches!(status.as_u16(), 404 | 410)
}

#[async_trait]
impl DeliveryChannel for PushChannel {
    fn kind(&self) -> ChannelType {
        ChannelType::Push
    }

    async fn send(
        &self,
        target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        let DeliveryTarget::Device { token, platform } = target else {
            return Err(DeliveryError::NoTarget(ChannelType::Push));
        };

        let request = PushRequest {
            token,
            platform: *platform,
            validate_only: false,
            notification: Some(PushNotification {
                title: message.title,
                body: message.body,
                data: serde_json::json!({
                    "notification_id": message.notification_id,
                    "action_url": message.payload.action_url,
                    "icon": message.payload.icon,
                }),
            }),
        };

        let status = self.post(&request).await?;
        if !status.is_success() {
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                detail: if is_unregistered(status) {
                    "token unregistered".to_string()
                } else {
                    "push relay refused the message".to_string()
                },
            });
        }

        tracing::debug!(
            notification_id = %message.notification_id,
            platform = %platform,
            "Push accepted by relay"
        );
        Ok(())
    }

    async fn probe(&self, token: &str, platform: Platform) -> Result<bool, DeliveryError> {
        let request = PushRequest {
            token,
            platform,
            validate_only: true,
            notification: None,
        };

        let status = self.post(&request).await?;
        if status.is_success() {
            Ok(true)
        } else if is_unregistered(status) {
            Ok(false)
        } else {
            Err(DeliveryError::Rejected {
                status: status.as_u16(),
                detail: "token probe refused".to_string(),
            })
        }
    }
}
