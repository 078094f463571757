//! Device token registry behaviour against the in-memory store.

mod common;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use common::{FailingChannel, RecordingChannel, at, channels, harness};
use studybell_common::error::AppError;
use studybell_common::types::{
    ChannelType, DISABLED_DUPLICATE, DISABLED_STALE_INVALID, DeviceToken, Platform,
};

fn token(
    user_id: Uuid,
    value: &str,
    platform: Platform,
    hint: Option<&str>,
    last_used_at: DateTime<Utc>,
) -> DeviceToken {
    DeviceToken {
        user_id,
        token: value.to_string(),
        platform,
        device_hint: hint.map(str::to_string),
        is_active: true,
        registered_at: last_used_at,
        last_used_at,
        disabled_reason: None,
    }
}

#[tokio::test]
async fn test_register_validates_input() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();

    assert!(matches!(
        h.engine.tokens.register(user_id, "abc", "blackberry", None).await,
        Err(AppError::Validation(_))
    ));
    assert!(matches!(
        h.engine.tokens.register(user_id, "   ", "ios", None).await,
        Err(AppError::Validation(_))
    ));

    let stored = h
        .engine
        .tokens
        .register(user_id, " abc ", "IOS", Some("iphone"))
        .await
        .unwrap();
    assert_eq!(stored.token, "abc");
    assert_eq!(stored.platform, Platform::Ios);
}

#[tokio::test]
async fn test_register_reactivates_disabled_token() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();
    let mut old = token(user_id, "T", Platform::Android, None, at(8, 0));
    old.is_active = false;
    old.disabled_reason = Some(DISABLED_STALE_INVALID.to_string());
    h.store.put_token(old);

    h.engine
        .tokens
        .register_at(user_id, "T", "android", None, at(9, 0))
        .await
        .unwrap();

    let stored = h.store.token(user_id, "T").unwrap();
    assert!(stored.is_active);
    assert!(stored.disabled_reason.is_none());
    assert_eq!(stored.last_used_at, at(9, 0));
}

#[tokio::test]
async fn test_register_keeps_older_token_active_until_dedup() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();

    h.engine
        .tokens
        .register_at(user_id, "old", "ios", None, at(8, 0))
        .await
        .unwrap();
    h.engine
        .tokens
        .register_at(user_id, "new", "ios", None, at(9, 0))
        .await
        .unwrap();

    assert_eq!(h.engine.tokens.active_tokens(user_id).await.unwrap().len(), 2);

    let deactivated = h.engine.tokens.cleanup_duplicate_tokens(user_id).await.unwrap();
    assert_eq!(deactivated, 1);

    let old = h.store.token(user_id, "old").unwrap();
    assert!(!old.is_active);
    assert_eq!(old.disabled_reason.as_deref(), Some(DISABLED_DUPLICATE));
    assert!(h.store.token(user_id, "new").unwrap().is_active);
}

#[tokio::test]
async fn test_dedup_keeps_most_recently_used_per_group() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();

    h.store
        .put_token(token(user_id, "ios-a", Platform::Ios, None, at(6, 0)));
    h.store
        .put_token(token(user_id, "ios-b", Platform::Ios, None, at(10, 0)));
    h.store
        .put_token(token(user_id, "ios-c", Platform::Ios, None, at(8, 0)));
    h.store
        .put_token(token(user_id, "web", Platform::Web, None, at(7, 0)));
    // A second physical device is its own group.
    h.store
        .put_token(token(user_id, "ipad", Platform::Ios, Some("ipad"), at(5, 0)));

    let deactivated = h.engine.tokens.cleanup_duplicate_tokens(user_id).await.unwrap();
    assert_eq!(deactivated, 2);

    let active: Vec<String> = {
        let mut tokens: Vec<_> = h
            .engine
            .tokens
            .active_tokens(user_id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| t.token)
            .collect();
        tokens.sort();
        tokens
    };
    assert_eq!(active, vec!["ios-b", "ipad", "web"]);

    // Running it again is a no-op.
    assert_eq!(h.engine.tokens.cleanup_duplicate_tokens(user_id).await.unwrap(), 0);
}

#[tokio::test]
async fn test_cleanup_all_duplicates_only_visits_affected_users() {
    let h = harness(channels());
    let dup_user = Uuid::new_v4();
    let clean_user = Uuid::new_v4();

    h.store
        .put_token(token(dup_user, "a", Platform::Android, None, at(6, 0)));
    h.store
        .put_token(token(dup_user, "b", Platform::Android, None, at(7, 0)));
    h.store
        .put_token(token(clean_user, "c", Platform::Android, None, at(7, 0)));

    let summary = h.engine.tokens.cleanup_all_duplicates().await.unwrap();
    assert_eq!(summary.users_checked, 1);
    assert_eq!(summary.tokens_deactivated, 1);
    assert!(summary.failures.is_empty());
}

#[tokio::test]
async fn test_detect_stale_is_read_only_and_oldest_first() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();
    let now = at(12, 0);

    h.store
        .put_token(token(user_id, "fresh", Platform::Ios, None, now - Duration::days(2)));
    h.store.put_token(token(
        user_id,
        "stale",
        Platform::Android,
        None,
        now - Duration::days(40),
    ));
    h.store.put_token(token(
        user_id,
        "ancient",
        Platform::Web,
        None,
        now - Duration::days(200),
    ));

    let stale = h.engine.tokens.detect_stale_tokens_at(30, now).await.unwrap();
    let names: Vec<_> = stale.iter().map(|t| t.token.as_str()).collect();
    assert_eq!(names, vec!["ancient", "stale"]);
    assert!(h.store.token(user_id, "stale").unwrap().is_active);
}

#[tokio::test]
async fn test_probe_disables_only_rejected_tokens() {
    let push = RecordingChannel::new(ChannelType::Push);
    push.mark_invalid("gone");
    let h = harness(channels().with_channel(push));
    let user_id = Uuid::new_v4();

    let sample = vec![
        token(user_id, "gone", Platform::Ios, None, at(1, 0)),
        token(user_id, "alive", Platform::Ios, Some("ipad"), at(1, 0)),
    ];
    for t in &sample {
        h.store.put_token(t.clone());
    }

    let summary = h.engine.tokens.probe_and_disable(&sample).await;
    assert_eq!(summary.probed, 2);
    assert_eq!(summary.disabled, 1);
    assert_eq!(summary.still_valid, 1);

    let gone = h.store.token(user_id, "gone").unwrap();
    assert!(!gone.is_active);
    assert_eq!(gone.disabled_reason.as_deref(), Some(DISABLED_STALE_INVALID));
    assert!(h.store.token(user_id, "alive").unwrap().is_active);
}

#[tokio::test]
async fn test_probe_errors_count_as_invalid() {
    let h = harness(channels().with_channel(FailingChannel::new(ChannelType::Push)));
    let user_id = Uuid::new_v4();
    let sample = vec![
        token(user_id, "a", Platform::Web, None, at(1, 0)),
        token(user_id, "b", Platform::Web, Some("laptop"), at(1, 0)),
    ];
    for t in &sample {
        h.store.put_token(t.clone());
    }

    let summary = h.engine.tokens.probe_and_disable(&sample).await;
    assert_eq!(summary.disabled, 2);
    assert!(summary.failures.is_empty());
}

#[tokio::test]
async fn test_probe_without_push_channel_is_skipped() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();
    let t = token(user_id, "a", Platform::Ios, None, at(1, 0));
    h.store.put_token(t.clone());

    let summary = h.engine.tokens.probe_and_disable(&[t]).await;
    assert!(summary.skipped);
    assert_eq!(summary.probed, 0);
    assert!(h.store.token(user_id, "a").unwrap().is_active);
}

#[tokio::test]
async fn test_purge_removes_only_old_inactive_tokens() {
    let h = harness(channels());
    let user_id = Uuid::new_v4();
    let now = at(12, 0);

    let mut old_inactive =
        token(user_id, "old-off", Platform::Ios, None, now - Duration::days(120));
    old_inactive.is_active = false;
    let mut recent_inactive =
        token(user_id, "new-off", Platform::Ios, Some("x"), now - Duration::days(10));
    recent_inactive.is_active = false;
    let old_active = token(user_id, "old-on", Platform::Web, None, now - Duration::days(120));

    h.store.put_token(old_inactive);
    h.store.put_token(recent_inactive);
    h.store.put_token(old_active);

    let removed = h.engine.tokens.purge_old_at(90, now).await.unwrap();
    assert_eq!(removed.len(), 1);
    assert_eq!(removed[0].token, "old-off");
    assert!(h.store.token(user_id, "new-off").is_some());
    assert!(h.store.token(user_id, "old-on").is_some());

    let stats = h.engine.tokens.stats().await.unwrap();
    assert_eq!(stats.total, 2);
    assert_eq!(stats.active, 1);
    assert_eq!(stats.active_web, 1);
}
