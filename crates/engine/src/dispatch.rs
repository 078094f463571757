//! Dispatch pipeline: turns notification intents into channel deliveries.
//!
//! For every `pending` intent:
//! 1. Resolve the user's preference for the intent's type
//! 2. Evaluate channel toggles, quiet hours and the frequency cap (via `gating`)
//! 3. Claim the intent's delivery lease, then deliver through each allowed channel
//! 4. Move the intent to `sent` on the first success, or `failed` if every channel errored
//!
//! A pass pages through the pending backlog in `(created_at, id)` order and
//! stops once it has handled `batch_size` intents that were not deferred, so
//! a pile of deferred rows never starves newer work. Overlapping passes may
//! both see a row, but only the one holding the lease calls the channels.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{BatchFailure, ChannelType, NotificationIntent, NotificationType};

use crate::channel::{ChannelSet, DeliveryError, DeliveryTarget, OutboundMessage};
use crate::gating::{self, GateDecision};
use crate::preferences::PreferenceResolver;
use crate::store::{NotificationStore, UserDirectory};
use crate::templates::TemplateCatalog;
use crate::tokens::DeviceTokenRegistry;

/// Metadata flag that lets an intent bypass quiet hours and frequency caps.
pub const URGENT_FLAG: &str = "urgent";

/// How long a pass may hold an intent before another pass can take it over.
const CLAIM_LEASE_MINUTES: i64 = 10;

/// What happened to a single intent during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent,
    Failed,
    Deferred(gating::DeferReason),
    /// Another pass claimed or finalized the intent first.
    AlreadyHandled,
}

/// Counts for one `process_pending` pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DispatchSummary {
    pub scanned: u64,
    pub sent: u64,
    pub failed: u64,
    pub deferred: u64,
    pub already_handled: u64,
    pub errors: Vec<BatchFailure>,
}

#[derive(Clone)]
pub struct DispatchPipeline {
    notifications: Arc<dyn NotificationStore>,
    preferences: PreferenceResolver,
    tokens: DeviceTokenRegistry,
    directory: Arc<dyn UserDirectory>,
    channels: ChannelSet,
    templates: TemplateCatalog,
    batch_size: i64,
}

impl DispatchPipeline {
    pub fn new(
        notifications: Arc<dyn NotificationStore>,
        preferences: PreferenceResolver,
        tokens: DeviceTokenRegistry,
        directory: Arc<dyn UserDirectory>,
        channels: ChannelSet,
        batch_size: i64,
    ) -> Self {
        Self {
            notifications,
            preferences,
            tokens,
            directory,
            channels,
            templates: TemplateCatalog::builtin(),
            batch_size,
        }
    }

    /// Render `template_name` and store the result as a `pending` intent.
    pub async fn enqueue(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        template_name: &str,
        variables: &HashMap<String, String>,
    ) -> Result<NotificationIntent, AppError> {
        self.enqueue_with_metadata(
            user_id,
            notification_type,
            template_name,
            variables,
            serde_json::json!({}),
        )
        .await
    }

    pub async fn enqueue_with_metadata(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        template_name: &str,
        variables: &HashMap<String, String>,
        metadata: serde_json::Value,
    ) -> Result<NotificationIntent, AppError> {
        let rendered = self
            .templates
            .render(template_name, notification_type, variables)?;

        let intent = NotificationIntent::pending(
            user_id,
            notification_type,
            rendered.title,
            rendered.body,
            rendered.payload,
            metadata,
            Utc::now(),
        );
        self.notifications.insert(&intent).await?;

        tracing::debug!(
            notification_id = %intent.id,
            user_id = %user_id,
            notification_type = %notification_type,
            "Notification enqueued"
        );

        Ok(intent)
    }

    /// Process pending intents against the current wall clock.
    pub async fn process_pending(&self) -> Result<DispatchSummary, AppError> {
        self.process_pending_at(Utc::now()).await
    }

    /// Process pending intents as if the wall clock read `now`.
    pub async fn process_pending_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<DispatchSummary, AppError> {
        let page_size = self.batch_size.max(1);
        let mut summary = DispatchSummary::default();
        let mut cursor = None;
        let mut handled = 0;

        'scan: loop {
            let page = self.notifications.list_pending(cursor, page_size).await?;
            let exhausted = (page.len() as i64) < page_size;

            for intent in &page {
                cursor = Some((intent.created_at, intent.id));
                summary.scanned += 1;
                match self.process_one(intent, now).await {
                    Ok(DispatchOutcome::Deferred(_)) => {
                        summary.deferred += 1;
                        continue;
                    }
                    Ok(DispatchOutcome::Sent) => summary.sent += 1,
                    Ok(DispatchOutcome::Failed) => summary.failed += 1,
                    Ok(DispatchOutcome::AlreadyHandled) => summary.already_handled += 1,
                    Err(e) => {
                        tracing::warn!(
                            notification_id = %intent.id,
                            error = %e,
                            "Failed to process pending notification"
                        );
                        summary.errors.push(BatchFailure {
                            id: intent.id.to_string(),
                            error: e.to_string(),
                        });
                    }
                }

                handled += 1;
                if handled >= page_size {
                    break 'scan;
                }
            }

            if exhausted {
                break;
            }
        }

        if summary.scanned > 0 {
            tracing::info!(
                scanned = summary.scanned,
                sent = summary.sent,
                failed = summary.failed,
                deferred = summary.deferred,
                errors = summary.errors.len(),
                "Pending notification pass complete"
            );
        }

        Ok(summary)
    }

    async fn process_one(
        &self,
        intent: &NotificationIntent,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome, AppError> {
        let preference = self
            .preferences
            .resolve(intent.user_id, intent.notification_type)
            .await?;
        let last_sent_at = self
            .notifications
            .last_sent_at(intent.user_id, intent.notification_type)
            .await?;

        let urgent = is_urgent(intent);
        let channels = match gating::evaluate(&preference, last_sent_at, now, urgent) {
            GateDecision::Allow(channels) => channels,
            GateDecision::Defer(reason) => {
                tracing::debug!(
                    notification_id = %intent.id,
                    user_id = %intent.user_id,
                    reason = %reason,
                    "Notification deferred"
                );
                return Ok(DispatchOutcome::Deferred(reason));
            }
        };

        let lease_until = now + Duration::minutes(CLAIM_LEASE_MINUTES);
        if !self.notifications.claim(intent.id, now, lease_until).await? {
            tracing::debug!(
                notification_id = %intent.id,
                "Notification claimed by another pass"
            );
            return Ok(DispatchOutcome::AlreadyHandled);
        }

        let message = OutboundMessage {
            notification_id: intent.id,
            title: &intent.title,
            body: &intent.body,
            payload: &intent.payload,
        };

        let mut delivered = false;
        let mut errors = Vec::new();
        for channel in channels {
            match self.deliver(channel, intent.user_id, &message, now).await {
                Ok(()) => delivered = true,
                Err(e) => {
                    tracing::debug!(
                        notification_id = %intent.id,
                        channel = %channel,
                        error = %e,
                        "Channel delivery failed"
                    );
                    errors.push(format!("{}: {}", channel, e));
                }
            }
        }

        if delivered {
            if self.notifications.mark_sent(intent.id, now).await? {
                tracing::info!(
                    notification_id = %intent.id,
                    user_id = %intent.user_id,
                    notification_type = %intent.notification_type,
                    "Notification sent"
                );
                Ok(DispatchOutcome::Sent)
            } else {
                Ok(DispatchOutcome::AlreadyHandled)
            }
        } else {
            let reason = errors.join("; ");
            if self.notifications.mark_failed(intent.id, &reason).await? {
                tracing::warn!(
                    notification_id = %intent.id,
                    user_id = %intent.user_id,
                    reason = %reason,
                    "Notification delivery failed on every channel"
                );
                Ok(DispatchOutcome::Failed)
            } else {
                Ok(DispatchOutcome::AlreadyHandled)
            }
        }
    }

    /// Deliver through one channel. Push succeeds if any active token accepts.
    async fn deliver(
        &self,
        channel: ChannelType,
        user_id: Uuid,
        message: &OutboundMessage<'_>,
        now: DateTime<Utc>,
    ) -> Result<(), AppError> {
        match channel {
            ChannelType::Push => {
                let tokens = self.tokens.active_tokens(user_id).await?;
                if tokens.is_empty() {
                    return Err(DeliveryError::NoTarget(ChannelType::Push).into());
                }

                let mut last_error = None;
                let mut any_ok = false;
                for token in tokens {
                    let target = DeliveryTarget::Device {
                        token: token.token.clone(),
                        platform: token.platform,
                    };
                    match self.channels.send(ChannelType::Push, &target, message).await {
                        Ok(()) => {
                            any_ok = true;
                            if let Err(e) = self.tokens.touch(user_id, &token.token, now).await {
                                tracing::warn!(
                                    user_id = %user_id,
                                    error = %e,
                                    "Failed to record device token use"
                                );
                            }
                        }
                        Err(e) => last_error = Some(e),
                    }
                }

                match (any_ok, last_error) {
                    (true, _) => Ok(()),
                    (false, Some(e)) => Err(e.into()),
                    (false, None) => Err(DeliveryError::NoTarget(ChannelType::Push).into()),
                }
            }
            ChannelType::Email => {
                let address = self
                    .directory
                    .email_address(user_id)
                    .await?
                    .ok_or(DeliveryError::NoTarget(ChannelType::Email))?;
                let target = DeliveryTarget::Email { address };
                Ok(self.channels.send(ChannelType::Email, &target, message).await?)
            }
            ChannelType::InApp => {
                let target = DeliveryTarget::InApp { user_id };
                Ok(self.channels.send(ChannelType::InApp, &target, message).await?)
            }
        }
    }

    /// Delivery receipt from a channel callback: `sent → delivered`.
    pub async fn mark_delivered(&self, id: Uuid) -> Result<bool, AppError> {
        self.require(id).await?;
        self.notifications.mark_delivered(id).await
    }

    /// Read acknowledgement: `sent | delivered → read`.
    pub async fn acknowledge_read(&self, id: Uuid) -> Result<bool, AppError> {
        self.require(id).await?;
        self.notifications.mark_read(id, Utc::now()).await
    }

    async fn require(&self, id: Uuid) -> Result<NotificationIntent, AppError> {
        self.notifications
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Notification {} not found", id)))
    }

    /// Delete intents older than the retention window, whatever their status.
    pub async fn cleanup_old_notifications(
        &self,
        retention_days: i64,
    ) -> Result<Vec<NotificationIntent>, AppError> {
        self.cleanup_old_notifications_at(retention_days, Utc::now())
            .await
    }

    pub async fn cleanup_old_notifications_at(
        &self,
        retention_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationIntent>, AppError> {
        let removed = self
            .notifications
            .delete_created_before(now - Duration::days(retention_days))
            .await?;

        if !removed.is_empty() {
            tracing::info!(removed = removed.len(), retention_days, "Old notifications removed");
        }

        Ok(removed)
    }
}

fn is_urgent(intent: &NotificationIntent) -> bool {
    intent.notification_type == NotificationType::SystemAnnouncement
        || intent
            .metadata
            .get(URGENT_FLAG)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
}
