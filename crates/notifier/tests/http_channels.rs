//! Push and email channels against local stand-in HTTP servers.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use tokio::sync::Mutex;
use uuid::Uuid;

use studybell_common::types::{ChannelPayload, ChannelType, Platform};
use studybell_engine::channel::{DeliveryChannel, DeliveryError, DeliveryTarget, OutboundMessage};
use studybell_notifier::{EmailChannel, PushChannel};

type Captured = Arc<Mutex<Vec<(Option<String>, serde_json::Value)>>>;

/// Stand-in relay: token "gone" is unregistered, token "boom" is a relay failure.
async fn relay(
    State(captured): State<Captured>,
    headers: HeaderMap,
    Json(body): Json<serde_json::Value>,
) -> StatusCode {
    let auth = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let token = body["token"].as_str().unwrap_or_default().to_string();
    captured.lock().await.push((auth, body));

    match token.as_str() {
        "gone" => StatusCode::GONE,
        "boom" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::OK,
    }
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

async fn relay_server() -> (String, Captured) {
    let captured: Captured = Arc::default();
    let router = Router::new()
        .route("/v1/send", post(relay))
        .with_state(captured.clone());
    (serve(router).await, captured)
}

fn device(token: &str) -> DeliveryTarget {
    DeliveryTarget::Device {
        token: token.to_string(),
        platform: Platform::Ios,
    }
}

#[tokio::test]
async fn test_push_send_posts_message_with_key() {
    let (base, captured) = relay_server().await;
    let channel =
        PushChannel::new(&base, Some("secret".to_string()), Duration::from_secs(2)).unwrap();
    let payload = ChannelPayload {
        action_url: Some("/study".to_string()),
        icon: None,
    };
    let message = OutboundMessage {
        notification_id: Uuid::new_v4(),
        title: "Study time",
        body: "Go",
        payload: &payload,
    };

    channel.send(&device("ok"), &message).await.unwrap();

    let captured = captured.lock().await;
    let (auth, body) = &captured[0];
    assert_eq!(auth.as_deref(), Some("Bearer secret"));
    assert_eq!(body["platform"], "ios");
    assert_eq!(body["validate_only"], false);
    assert_eq!(body["notification"]["title"], "Study time");
    assert_eq!(body["notification"]["data"]["action_url"], "/study");
}

#[tokio::test]
async fn test_push_send_surfaces_rejections() {
    let (base, _) = relay_server().await;
    let channel = PushChannel::new(&base, None, Duration::from_secs(2)).unwrap();
    let payload = ChannelPayload::default();
    let message = OutboundMessage {
        notification_id: Uuid::new_v4(),
        title: "t",
        body: "b",
        payload: &payload,
    };

    assert!(matches!(
        channel.send(&device("gone"), &message).await,
        Err(DeliveryError::Rejected { status: 410, .. })
    ));
    assert!(matches!(
        channel
            .send(&DeliveryTarget::InApp { user_id: Uuid::new_v4() }, &message)
            .await,
        Err(DeliveryError::NoTarget(ChannelType::Push))
    ));
}

#[tokio::test]
async fn test_push_probe_classifies_tokens() {
    let (base, captured) = relay_server().await;
    let channel = PushChannel::new(&base, None, Duration::from_secs(2)).unwrap();

    assert!(channel.probe("ok", Platform::Android).await.unwrap());
    assert!(!channel.probe("gone", Platform::Android).await.unwrap());
    assert!(channel.probe("boom", Platform::Android).await.is_err());

    let captured = captured.lock().await;
    assert!(captured.iter().all(|(_, body)| body["validate_only"] == true));
}

#[tokio::test]
async fn test_unreachable_relay_is_transport_error() {
    // Bind and immediately drop to get a port with nothing listening.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel =
        PushChannel::new(&format!("http://{addr}"), None, Duration::from_secs(2)).unwrap();
    assert!(matches!(
        channel.probe("ok", Platform::Web).await,
        Err(DeliveryError::Transport(_))
    ));
}

#[tokio::test]
async fn test_email_posts_to_resend_api() {
    let captured: Captured = Arc::default();
    let router = Router::new()
        .route(
            "/emails",
            post(
                |State(captured): State<Captured>,
                 headers: HeaderMap,
                 Json(body): Json<serde_json::Value>| async move {
                    let auth = headers
                        .get("authorization")
                        .and_then(|v| v.to_str().ok())
                        .map(str::to_string);
                    captured.lock().await.push((auth, body));
                    (StatusCode::OK, Json(serde_json::json!({ "id": "email_1" })))
                },
            ),
        )
        .with_state(captured.clone());
    let base = serve(router).await;

    let channel = EmailChannel::with_api_url(
        format!("{base}/emails"),
        "re_test",
        "Studybell <hello@studybell.app>",
        Duration::from_secs(2),
    )
    .unwrap();

    let payload = ChannelPayload::default();
    let message = OutboundMessage {
        notification_id: Uuid::new_v4(),
        title: "Your week in review",
        body: "Nice work",
        payload: &payload,
    };
    let target = DeliveryTarget::Email {
        address: "ada@example.com".to_string(),
    };

    channel.send(&target, &message).await.unwrap();

    let captured = captured.lock().await;
    let (auth, body) = &captured[0];
    assert_eq!(auth.as_deref(), Some("Bearer re_test"));
    assert_eq!(body["to"][0], "ada@example.com");
    assert_eq!(body["subject"], "Your week in review");
    assert_eq!(body["text"], "Nice work");
}
