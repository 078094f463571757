//! Email delivery via the Resend HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use studybell_common::types::ChannelType;
use studybell_engine::channel::{DeliveryChannel, DeliveryError, DeliveryTarget, OutboundMessage};

use crate::{http_client, transport_error};

pub const RESEND_API_URL: &str = "https://api.resend.com/emails";

#[derive(Debug, Serialize)]
struct ResendEmail<'a> {
    from: &'a str,
    to: [&'a str; 1],
    subject: &'a str,
    text: String,
}

pub struct EmailChannel {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl EmailChannel {
    pub fn new(
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        Self::with_api_url(RESEND_API_URL, api_key, from, timeout)
    }

    /// Point the channel at a different Resend-compatible endpoint.
    pub fn with_api_url(
        api_url: impl Into<String>,
        api_key: impl Into<String>,
        from: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, DeliveryError> {
        Ok(Self {
            client: http_client(timeout)?,
            api_url: api_url.into(),
            api_key: api_key.into(),
            from: from.into(),
        })
    }
}

/// Plain-text body with the action link appended when there is one.
fn text_body(message: &OutboundMessage<'_>) -> String {
    match &message.payload.action_url {
        Some(url) => format!("{}\n\n{}", message.body, url),
        None => message.body.to_string(),
    }
}

#[async_trait]
impl DeliveryChannel for EmailChannel {
    fn kind(&self) -> ChannelType {
        ChannelType::Email
    }

    async fn send(
        &self,
        target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        let DeliveryTarget::Email { address } = target else {
            return Err(DeliveryError::NoTarget(ChannelType::Email));
        };

        let email = ResendEmail {
            from: &self.from,
            to: [address.as_str()],
            subject: message.title,
            text: text_body(message),
        };

        let response = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&email)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(DeliveryError::Rejected {
                status: status.as_u16(),
                detail,
            });
        }

        tracing::debug!(notification_id = %message.notification_id, "Email accepted by Resend");
        Ok(())
    }
}
