//! Test helpers and utilities for integration tests

use mqttchat::protocol::{encode, ChatMessage, CHAT_TOPIC};
use mqttchat::session::{ChatSession, SessionSettings, SessionSnapshot, SessionStatus};
use mqttchat::testing::MockBroker;
use std::time::Duration;
use tokio::sync::watch;

/// Upper bound for any single wait in session tests
#[allow(dead_code)]
pub const WAIT: Duration = Duration::from_secs(5);

/// Session settings for the given identity against a stub broker
#[allow(dead_code)]
pub fn test_settings(identity: &str) -> SessionSettings {
    let mut settings = SessionSettings::new("mqtt://localhost:1883");
    settings.identity = identity.to_string();
    settings
}

/// Spawn a session on `broker` and return it with a snapshot receiver
#[allow(dead_code)]
pub fn spawn_session(
    broker: &MockBroker,
    settings: SessionSettings,
) -> (ChatSession, watch::Receiver<SessionSnapshot>) {
    let session = ChatSession::spawn(broker.transport(), settings);
    let snapshots = session.subscribe();
    (session, snapshots)
}

/// Wait until the session reaches `status`
#[allow(dead_code)]
pub async fn wait_for_status(
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    status: SessionStatus,
) -> SessionSnapshot {
    wait_until(snapshots, |s| s.status == status).await
}

/// Wait until the log holds at least `count` messages
#[allow(dead_code)]
pub async fn wait_for_messages(
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    count: usize,
) -> SessionSnapshot {
    wait_until(snapshots, |s| s.messages.len() >= count).await
}

#[allow(dead_code)]
pub async fn wait_until(
    snapshots: &mut watch::Receiver<SessionSnapshot>,
    predicate: impl FnMut(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(WAIT, snapshots.wait_for(predicate))
        .await
        .expect("session state did not arrive in time")
        .expect("session stopped")
        .clone()
}

/// Connect a fresh session and wait for its subscription
#[allow(dead_code)]
pub async fn connected_session(
    broker: &MockBroker,
    settings: SessionSettings,
) -> (ChatSession, watch::Receiver<SessionSnapshot>) {
    let (session, mut snapshots) = spawn_session(broker, settings);
    session.connect();
    wait_for_status(&mut snapshots, SessionStatus::Connected).await;
    session.sync().await;
    (session, snapshots)
}

/// Wire payload as another client would publish it
#[allow(dead_code)]
pub fn chat_payload(id: &str, sender: &str, body: &str) -> Vec<u8> {
    encode(&ChatMessage::new(id, sender, body, 1_700_000_000_000))
}

#[allow(dead_code)]
pub fn chat_topic() -> &'static str {
    CHAT_TOPIC
}
