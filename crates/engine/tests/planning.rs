//! Reminder planner and health aggregator against the in-memory store.

mod common;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::{RecordingChannel, at, channels, harness, harness_with};
use studybell_common::types::{ChannelType, NotificationStatus, NotificationType, UserStatistics};
use studybell_engine::EngineSettings;
use studybell_engine::health::JobCounts;

fn put(store: &studybell_engine::memory::MemoryStore, stats: UserStatistics) -> Uuid {
    let user_id = stats.user_id;
    store.put_user(stats, None);
    user_id
}

#[tokio::test]
async fn test_streak_reminders_target_only_users_at_risk() {
    let h = harness(channels());
    let now = at(19, 0);

    let at_risk = put(
        &h.store,
        UserStatistics {
            user_id: Uuid::new_v4(),
            current_streak_days: 5,
            last_study_at: Some(now - Duration::days(1)),
            ..Default::default()
        },
    );
    let safe = put(
        &h.store,
        UserStatistics {
            user_id: Uuid::new_v4(),
            current_streak_days: 5,
            last_study_at: Some(now - Duration::hours(3)),
            ..Default::default()
        },
    );
    let no_streak = put(
        &h.store,
        UserStatistics {
            user_id: Uuid::new_v4(),
            ..Default::default()
        },
    );

    let summary = h.engine.reminders.send_streak_reminders(now).await.unwrap();
    assert_eq!(summary.users_scanned, 3);
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.skipped, 2);

    let queued = h.store.notifications_for(at_risk);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].notification_type, NotificationType::StreakReminder);
    assert!(h.store.notifications_for(safe).is_empty());
    assert!(h.store.notifications_for(no_streak).is_empty());
}

#[tokio::test]
async fn test_reminder_pass_reaches_users_beyond_one_batch() {
    let h = harness_with(
        channels(),
        EngineSettings {
            achievement_batch_limit: 2,
            ..Default::default()
        },
    );
    let users: Vec<Uuid> = (0..5)
        .map(|_| {
            put(
                &h.store,
                UserStatistics {
                    user_id: Uuid::new_v4(),
                    ..Default::default()
                },
            )
        })
        .collect();

    let summary = h.engine.reminders.send_study_reminders(at(9, 0)).await.unwrap();
    assert_eq!(summary.users_scanned, 5);
    assert_eq!(summary.enqueued, 5);
    for user_id in users {
        assert_eq!(h.store.notifications_for(user_id).len(), 1);
    }
}

#[tokio::test]
async fn test_reminder_pass_continues_past_failing_user() {
    let h = harness(channels());
    let now = at(9, 0);
    let ok = put(
        &h.store,
        UserStatistics {
            user_id: Uuid::new_v4(),
            ..Default::default()
        },
    );
    let broken = put(
        &h.store,
        UserStatistics {
            user_id: Uuid::new_v4(),
            ..Default::default()
        },
    );
    h.store.mark_unavailable(broken);

    let summary = h.engine.reminders.send_study_reminders(now).await.unwrap();
    assert_eq!(summary.enqueued, 1);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].id, broken.to_string());
    assert_eq!(h.store.notifications_for(ok).len(), 1);
}

#[tokio::test]
async fn test_health_with_no_data_is_100() {
    let h = harness(channels());
    let report = h
        .engine
        .health
        .status_at(JobCounts::default(), at(12, 0))
        .await
        .unwrap();
    assert_eq!(report.health_score, 100);
    assert_eq!(report.recent_notifications.total, 0);
}

#[tokio::test]
async fn test_health_reflects_recent_failures_without_side_effects() {
    let in_app = RecordingChannel::new(ChannelType::InApp);
    let h = harness(channels().with_channel(in_app));
    let user_id = put(
        &h.store,
        UserStatistics {
            user_id: Uuid::new_v4(),
            ..Default::default()
        },
    );

    h.engine
        .reminders
        .send_coaching_notes(Utc::now())
        .await
        .unwrap();

    let jobs = JobCounts {
        running: 3,
        stopped: 1,
    };
    let before = h.engine.health.status(jobs).await.unwrap();
    let after = h.engine.health.status(jobs).await.unwrap();

    assert_eq!(before.recent_notifications.pending, 1);
    assert_eq!(before.health_score, after.health_score);
    // 30 * 1/4 stopped, rounded.
    assert_eq!(before.health_score, 93);
    assert_eq!(
        h.store.notifications_for(user_id)[0].status,
        NotificationStatus::Pending
    );
}
