//! Preference resolver: per-user, per-type notification settings.
//!
//! Absence of a stored preference is never an error: the platform defaults
//! (every channel on, no quiet hours, no frequency cap) apply instead.

use std::sync::Arc;

use uuid::Uuid;

use studybell_common::error::AppError;
use studybell_common::types::{
    NotificationType, PreferenceUpdate, QuietHours, UserNotificationPreference, parse_time_of_day,
};

use crate::store::PreferenceStore;

#[derive(Clone)]
pub struct PreferenceResolver {
    store: Arc<dyn PreferenceStore>,
}

impl PreferenceResolver {
    pub fn new(store: Arc<dyn PreferenceStore>) -> Self {
        Self { store }
    }

    /// Stored preference for `(user_id, notification_type)`, or the defaults.
    pub async fn resolve(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
    ) -> Result<UserNotificationPreference, AppError> {
        Ok(self
            .store
            .get(user_id, notification_type)
            .await?
            .unwrap_or_else(|| UserNotificationPreference::defaults(user_id, notification_type)))
    }

    /// Apply a partial update on top of the current (or default) preference.
    pub async fn update(
        &self,
        user_id: Uuid,
        notification_type: NotificationType,
        update: &PreferenceUpdate,
    ) -> Result<UserNotificationPreference, AppError> {
        let current = self.resolve(user_id, notification_type).await?;
        let merged = Self::merge(current, update)?;
        let stored = self.store.upsert(&merged).await?;

        tracing::info!(
            user_id = %user_id,
            notification_type = %notification_type,
            frequency_hours = stored.frequency_hours,
            quiet_hours = stored.quiet_hours.is_some(),
            "Notification preference updated"
        );

        Ok(stored)
    }

    fn merge(
        mut pref: UserNotificationPreference,
        update: &PreferenceUpdate,
    ) -> Result<UserNotificationPreference, AppError> {
        if let Some(hours) = update.frequency_hours {
            if hours < 0 {
                return Err(AppError::Validation(format!(
                    "frequency_hours must be >= 0, got {}",
                    hours
                )));
            }
            pref.frequency_hours = hours;
        }

        match (&update.quiet_hours_start, &update.quiet_hours_end) {
            (Some(start), Some(end)) => {
                pref.quiet_hours = Some(QuietHours {
                    start: parse_time_of_day(start)?,
                    end: parse_time_of_day(end)?,
                });
            }
            (None, None) => {
                if update.clear_quiet_hours {
                    pref.quiet_hours = None;
                }
            }
            _ => {
                return Err(AppError::validation(
                    "quiet_hours_start and quiet_hours_end must be provided together",
                ));
            }
        }

        if let Some(enabled) = update.in_app_enabled {
            pref.in_app_enabled = enabled;
        }
        if let Some(enabled) = update.push_enabled {
            pref.push_enabled = enabled;
        }
        if let Some(enabled) = update.email_enabled {
            pref.email_enabled = enabled;
        }

        Ok(pref)
    }
}
