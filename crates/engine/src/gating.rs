//! Send gating: decides whether a pending intent may be delivered now.
//!
//! A blocked intent is deferred, never failed: it stays `pending` and is
//! re-evaluated on the next dispatch pass against the wall clock at that time.

use chrono::{DateTime, Duration, Utc};

use studybell_common::types::{ChannelType, UserNotificationPreference};

/// Why an intent was left pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeferReason {
    NoChannelEnabled,
    QuietHours,
    FrequencyCap { next_allowed_at: DateTime<Utc> },
}

impl std::fmt::Display for DeferReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeferReason::NoChannelEnabled => write!(f, "no_channel_enabled"),
            DeferReason::QuietHours => write!(f, "quiet_hours"),
            DeferReason::FrequencyCap { .. } => write!(f, "frequency_cap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Deliver through these channels.
    Allow(Vec<ChannelType>),
    Defer(DeferReason),
}

/// Evaluate the preference gates at `now`.
///
/// `urgent` intents skip quiet hours and the frequency cap; channel toggles
/// always apply.
pub fn evaluate(
    preference: &UserNotificationPreference,
    last_sent_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    urgent: bool,
) -> GateDecision {
    let channels = preference.enabled_channels();
    if channels.is_empty() {
        return GateDecision::Defer(DeferReason::NoChannelEnabled);
    }

    if !urgent {
        if let Some(quiet) = preference.quiet_hours
            && quiet.contains(now.time())
        {
            return GateDecision::Defer(DeferReason::QuietHours);
        }

        if preference.frequency_hours > 0
            && let Some(last) = last_sent_at
        {
            let next_allowed_at = last + Duration::hours(i64::from(preference.frequency_hours));
            if now < next_allowed_at {
                return GateDecision::Defer(DeferReason::FrequencyCap { next_allowed_at });
            }
        }
    }

    GateDecision::Allow(channels)
}
