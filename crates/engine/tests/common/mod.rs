//! Shared fakes for the engine component tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use studybell_common::types::{ChannelType, Platform, UserStatistics};
use studybell_engine::channel::{
    ChannelSet, DeliveryChannel, DeliveryError, DeliveryTarget, OutboundMessage,
};
use studybell_engine::memory::MemoryStore;
use studybell_engine::{Engine, EngineSettings, Stores};

/// A delivery recorded by [`RecordingChannel`].
#[derive(Debug, Clone)]
pub struct Sent {
    pub notification_id: Uuid,
    pub target: DeliveryTarget,
    pub title: String,
}

/// Accepts every send and remembers it. Tokens listed in `invalid` fail probes.
pub struct RecordingChannel {
    kind: ChannelType,
    pub sent: Mutex<Vec<Sent>>,
    pub invalid: Mutex<HashSet<String>>,
}

impl RecordingChannel {
    pub fn new(kind: ChannelType) -> Arc<Self> {
        Arc::new(Self {
            kind,
            sent: Mutex::new(Vec::new()),
            invalid: Mutex::new(HashSet::new()),
        })
    }

    pub fn mark_invalid(&self, token: &str) {
        self.invalid.lock().insert(token.to_string());
    }

    pub fn sent_count(&self) -> usize {
        self.sent.lock().len()
    }
}

#[async_trait]
impl DeliveryChannel for RecordingChannel {
    fn kind(&self) -> ChannelType {
        self.kind
    }

    async fn send(
        &self,
        target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        self.sent.lock().push(Sent {
            notification_id: message.notification_id,
            target: target.clone(),
            title: message.title.to_string(),
        });
        Ok(())
    }

    async fn probe(&self, token: &str, _platform: Platform) -> Result<bool, DeliveryError> {
        Ok(!self.invalid.lock().contains(token))
    }
}

/// In-app channel that takes `delay` per send and counts what it delivered.
pub struct SlowChannel {
    delay: Duration,
    pub delivered: Mutex<Vec<Uuid>>,
}

impl SlowChannel {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            delivered: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl DeliveryChannel for SlowChannel {
    fn kind(&self) -> ChannelType {
        ChannelType::InApp
    }

    async fn send(
        &self,
        _target: &DeliveryTarget,
        message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        tokio::time::sleep(self.delay).await;
        self.delivered.lock().push(message.notification_id);
        Ok(())
    }
}

/// Rejects every send and every probe.
pub struct FailingChannel {
    kind: ChannelType,
}

impl FailingChannel {
    pub fn new(kind: ChannelType) -> Arc<Self> {
        Arc::new(Self { kind })
    }
}

#[async_trait]
impl DeliveryChannel for FailingChannel {
    fn kind(&self) -> ChannelType {
        self.kind
    }

    async fn send(
        &self,
        _target: &DeliveryTarget,
        _message: &OutboundMessage<'_>,
    ) -> Result<(), DeliveryError> {
        Err(DeliveryError::Rejected {
            status: 503,
            detail: "unavailable".to_string(),
        })
    }

    async fn probe(&self, _token: &str, _platform: Platform) -> Result<bool, DeliveryError> {
        Err(DeliveryError::Transport("connection reset".to_string()))
    }
}

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub engine: Engine,
}

pub fn harness(channels: ChannelSet) -> Harness {
    harness_with(channels, EngineSettings::default())
}

pub fn harness_with(channels: ChannelSet, settings: EngineSettings) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(Stores::shared(store.clone()), channels, settings);
    Harness { store, engine }
}

pub fn channels() -> ChannelSet {
    ChannelSet::new(Duration::from_millis(500))
}

/// Monday 2025-03-10 at `hour:minute` UTC.
pub fn at(hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 3, 10, hour, minute, 0).unwrap()
}

pub fn user(store: &MemoryStore, email: Option<&str>) -> Uuid {
    let user_id = Uuid::new_v4();
    store.put_user(
        UserStatistics {
            user_id,
            ..Default::default()
        },
        email,
    );
    user_id
}
