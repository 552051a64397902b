//! End-to-end tests over a real listener and WebSocket clients.

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use secrecy::SecretString;
use spark_core::{Frame, FrameType, Role, UserId};
use spark_llm::{MockProvider, MockResponse};
use spark_server::{JwtVerifier, ServerConfig, ServerDeps, ServerHandle, start};
use spark_store::{ChatRepo, Database, NewWebsite, WebsiteRepo};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SECRET: &str = "integration-secret";

struct Harness {
    server: ServerHandle,
    websites: WebsiteRepo,
    chats: ChatRepo,
}

async fn boot(responses: Vec<MockResponse>) -> Harness {
    let db = Database::in_memory().unwrap();
    let websites = WebsiteRepo::new(db.clone());
    let chats = ChatRepo::new(db);

    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..ServerConfig::default()
    };
    let deps = ServerDeps {
        verifier: Arc::new(verifier()),
        provider: Arc::new(MockProvider::new(responses)),
        ownership: Arc::new(websites.clone()),
        turns: Arc::new(chats.clone()),
    };
    Harness {
        server: start(config, deps).await.unwrap(),
        websites,
        chats,
    }
}

fn verifier() -> JwtVerifier {
    JwtVerifier::new(&SecretString::from(SECRET.to_owned()))
}

fn token_for(user: &str) -> String {
    verifier()
        .issue(&UserId::from_raw(user), None, chrono::Duration::hours(1))
        .unwrap()
}

async fn connect(harness: &Harness, user: &str) -> Client {
    let url = format!("ws://{}/ws?token={}", harness.server.addr(), token_for(user));
    let (client, _) = connect_async(url).await.unwrap();
    client
}

async fn send(client: &mut Client, frame: &Frame) {
    client.send(Message::text(frame.encode().unwrap())).await.unwrap();
}

/// Next batch of frames; a single transport message may carry several.
async fn next_frames(client: &mut Client) -> Vec<Frame> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), client.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .unwrap();
        if let Message::Text(text) = msg {
            return text.as_str().split('\n').map(|line| Frame::decode(line).unwrap()).collect();
        }
    }
}

/// Read until a frame satisfies `done`, returning everything seen.
async fn read_until(client: &mut Client, done: impl Fn(&Frame) -> bool) -> Vec<Frame> {
    let mut seen = Vec::new();
    loop {
        for frame in next_frames(client).await {
            let stop = done(&frame);
            seen.push(frame);
            if stop {
                return seen;
            }
        }
    }
}

fn is_final_reply(frame: &Frame) -> bool {
    frame.kind == FrameType::ChatMessage && frame.role == Some(Role::Assistant)
}

#[tokio::test]
async fn connect_receives_connected_frame() {
    let harness = boot(vec![]).await;
    let mut client = connect(&harness, "alice").await;

    let frames = read_until(&mut client, |f| f.kind == FrameType::Connected).await;
    let connected = frames.last().unwrap();
    assert_eq!(connected.user_id.as_deref(), Some("alice"));
    assert!(connected.id.as_deref().unwrap().starts_with("conn_"));
    assert_eq!(harness.server.hub().count(), 1);
}

#[tokio::test]
async fn missing_and_bad_tokens_are_refused_before_upgrade() {
    let harness = boot(vec![]).await;
    for url in [
        format!("ws://{}/ws", harness.server.addr()),
        format!("ws://{}/ws?token=bogus", harness.server.addr()),
    ] {
        let refused = connect_async(url).await;
        assert!(
            matches!(&refused, Err(tungstenite::Error::Http(response)) if response.status() == 401),
            "upgrade was not refused with 401"
        );
    }
    assert_eq!(harness.server.hub().count(), 0);
}

#[tokio::test]
async fn chat_turn_streams_then_finalizes_and_persists() {
    let harness = boot(vec![MockResponse::text(&["Hel", "lo", " world"])]).await;
    let mut client = connect(&harness, "alice").await;
    let _ = read_until(&mut client, |f| f.kind == FrameType::Connected).await;

    send(&mut client, &Frame::new(FrameType::ChatMessage).with_content("Hi there")).await;
    let frames = read_until(&mut client, is_final_reply).await;

    let ack = &frames[0];
    assert_eq!(ack.role, Some(Role::User));
    assert_eq!(ack.content.as_deref(), Some("Hi there"));

    let chunks: String = frames
        .iter()
        .filter(|f| f.kind == FrameType::ChatStream)
        .filter_map(|f| f.chunk.clone())
        .collect();
    assert_eq!(chunks, "Hello world");

    let reply = frames.last().unwrap();
    assert_eq!(reply.content.as_deref(), Some("Hello world"));
    assert!(frames.iter().all(|f| f.kind != FrameType::Error));

    let user = UserId::from_raw("alice");
    let mut rows = Vec::new();
    for _ in 0..50 {
        rows = harness.chats.list_for_user(&user).unwrap();
        if rows.len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].role, Role::User);
    assert_eq!(rows[1].content, "Hello world");
}

#[tokio::test]
async fn upstream_failure_yields_error_frame() {
    let harness = boot(vec![MockResponse::Error(spark_core::CompletionError::RateLimited)]).await;
    let mut client = connect(&harness, "alice").await;
    let _ = read_until(&mut client, |f| f.kind == FrameType::Connected).await;

    send(&mut client, &Frame::new(FrameType::ChatMessage).with_content("Hi")).await;
    let frames = read_until(&mut client, |f| f.kind == FrameType::Error).await;
    assert_eq!(frames.last().unwrap().error.as_deref(), Some("Failed to get AI response"));
    assert!(!frames.iter().any(is_final_reply));
}

#[tokio::test]
async fn second_login_displaces_first() {
    let harness = boot(vec![]).await;
    let mut first = connect(&harness, "alice").await;
    let _ = read_until(&mut first, |f| f.kind == FrameType::Connected).await;

    let mut second = connect(&harness, "alice").await;
    let _ = read_until(&mut second, |f| f.kind == FrameType::Connected).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match first.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok(), "displaced client was not closed");
    assert_eq!(harness.server.hub().count(), 1);

    send(&mut second, &Frame::new(FrameType::ChatTyping).with_typing(true)).await;
    let echo = read_until(&mut second, |f| f.kind == FrameType::ChatTyping).await;
    assert_eq!(echo.last().unwrap().is_typing, Some(true));
}

#[tokio::test]
async fn malformed_frame_does_not_drop_connection() {
    let harness = boot(vec![]).await;
    let mut client = connect(&harness, "alice").await;
    let _ = read_until(&mut client, |f| f.kind == FrameType::Connected).await;

    client.send(Message::text("{not json")).await.unwrap();
    let frames = read_until(&mut client, |f| f.kind == FrameType::Error).await;
    assert_eq!(frames.last().unwrap().error.as_deref(), Some("Invalid message format"));

    send(&mut client, &Frame::new(FrameType::ChatTyping).with_typing(false)).await;
    let echo = read_until(&mut client, |f| f.kind == FrameType::ChatTyping).await;
    assert_eq!(echo.last().unwrap().user_id.as_deref(), Some("alice"));
}

#[tokio::test]
async fn join_checks_ownership() {
    let harness = boot(vec![]).await;
    let owner = UserId::from_raw("alice");
    let site = harness
        .websites
        .create(&NewWebsite {
            user_id: &owner,
            subdomain: "alice-site",
            title: "Alice",
        })
        .unwrap();

    let mut alice = connect(&harness, "alice").await;
    let _ = read_until(&mut alice, |f| f.kind == FrameType::Connected).await;
    send(&mut alice, &Frame::new(FrameType::WebsiteJoin).with_website(site.id.as_str())).await;
    let joined = read_until(&mut alice, |f| f.kind == FrameType::WebsiteJoin).await;
    assert_eq!(joined.last().unwrap().website_id.as_deref(), Some(site.id.as_str()));

    let mut bob = connect(&harness, "bob").await;
    let _ = read_until(&mut bob, |f| f.kind == FrameType::Connected).await;
    send(&mut bob, &Frame::new(FrameType::WebsiteJoin).with_website(site.id.as_str())).await;
    let denied = read_until(&mut bob, |f| f.kind == FrameType::Error).await;
    assert_eq!(
        denied.last().unwrap().error.as_deref(),
        Some("Website not found or access denied")
    );
}

#[tokio::test]
async fn disconnect_evicts_and_health_tracks_count() {
    let harness = boot(vec![]).await;
    let mut client = connect(&harness, "alice").await;
    let _ = read_until(&mut client, |f| f.kind == FrameType::Connected).await;

    let health: serde_json::Value = reqwest::get(format!("http://{}/health", harness.server.addr()))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["connections"], 1);

    client.close(None).await.unwrap();
    for _ in 0..50 {
        if harness.server.hub().count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(harness.server.hub().count(), 0);
}

#[tokio::test]
async fn shutdown_closes_live_clients() {
    let harness = boot(vec![]).await;
    let mut client = connect(&harness, "alice").await;
    let _ = read_until(&mut client, |f| f.kind == FrameType::Connected).await;

    harness.server.shutdown(Some(Duration::from_secs(5))).await;

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match client.next().await {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}
