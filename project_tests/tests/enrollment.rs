//! End-to-end enrollment scenarios, driven over real loopback TLS
//! connections against the dispatch stage.

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{default_server, send_request, spawn_server};
use enrolld_common::core::agent::AgentRecord;
use enrolld_common::core::cluster::{ClusterGrant, ClusterMode, ClusterRpc, ClusterRpcError};
use enrolld_common::core::dispatch::EnrollmentSettings;
use enrolld_common::core::{Keystore, SharedState};

#[tokio::test]
async fn fresh_enrollment_is_granted_a_key() {
    let server = default_server().await;
    let response = send_request(&server, "OSSEC A:'web01' IP:'any'").await;
    assert!(response.starts_with("OSSEC K:'"), "unexpected response: {response}");
    assert!(server.state.lookup_by_name("web01").await.is_some());
}

#[tokio::test]
async fn wrong_enrollment_password_is_rejected() {
    let mut settings = EnrollmentSettings::default();
    settings.password_hash = Some(sha256_hex("correct-horse-battery-staple"));
    let server = spawn_server(ClusterMode::Master, Arc::new(enrolld_common::core::cluster::NullClusterRpc), settings).await;

    let response = send_request(&server, "OSSEC A:'web01' IP:'any' P:'wrong-password'").await;
    assert!(response.starts_with("ERROR"), "expected rejection, got: {response}");
    assert!(server.state.lookup_by_name("web01").await.is_none());
}

#[tokio::test]
async fn correct_enrollment_password_is_granted() {
    let mut settings = EnrollmentSettings::default();
    settings.password_hash = Some(sha256_hex("correct-horse-battery-staple"));
    let server = spawn_server(ClusterMode::Master, Arc::new(enrolld_common::core::cluster::NullClusterRpc), settings).await;

    let response = send_request(&server, "OSSEC A:'web01' IP:'any' P:'correct-horse-battery-staple'").await;
    assert!(response.starts_with("OSSEC K:'"), "expected grant, got: {response}");
    assert!(server.state.lookup_by_name("web01").await.is_some());
}

#[tokio::test]
async fn re_enrollment_with_same_key_is_idempotent() {
    let server = default_server().await;
    let first = send_request(&server, "OSSEC A:'web01' IP:'any'").await;
    let key = first
        .trim_start_matches("OSSEC K:'")
        .trim_end_matches('\'')
        .split_whitespace()
        .nth(2)
        .unwrap()
        .to_string();

    let request = format!("OSSEC A:'web01' IP:'any' K:'{}'", sha256_hex(&key));
    let second = send_request(&server, &request).await;
    assert_eq!(first, second, "identical key should yield the identical grant");
}

#[tokio::test]
async fn name_collision_without_force_is_rejected() {
    let server = default_server().await;
    send_request(&server, "OSSEC A:'web01' IP:'any'").await;

    let response = send_request(&server, "OSSEC A:'web01' IP:'any' K:'not-the-real-hash'").await;
    assert!(response.starts_with("ERROR"), "expected rejection, got: {response}");
}

struct RecordingClusterRpc {
    calls: Arc<tokio::sync::Mutex<Vec<String>>>,
}

#[async_trait]
impl ClusterRpc for RecordingClusterRpc {
    async fn forward_enroll(&self, record: &AgentRecord, _force: bool) -> Result<ClusterGrant, ClusterRpcError> {
        self.calls.lock().await.push(record.name.clone());
        Ok(ClusterGrant { id: "099".to_string(), key: "forwardedkey".to_string() })
    }

    async fn remove(&self, _id: &str) -> Result<(), ClusterRpcError> {
        Ok(())
    }
}

#[tokio::test]
async fn worker_mode_forwards_every_request_to_the_master() {
    let calls = Arc::new(tokio::sync::Mutex::new(Vec::new()));
    let rpc = Arc::new(RecordingClusterRpc { calls: calls.clone() });
    let server = spawn_server(ClusterMode::Worker, rpc, EnrollmentSettings::default()).await;

    let response = send_request(&server, "OSSEC A:'web02' IP:'any'").await;
    assert_eq!(response, "OSSEC K:'099 web02 forwardedkey'");
    assert_eq!(calls.lock().await.as_slice(), ["web02"]);
    // A worker never keeps its own keystore; nothing should become locally visible.
    assert!(server.state.lookup_by_name("web02").await.is_none());
}

#[tokio::test]
async fn journal_entry_survives_until_writer_flush() {
    let state = SharedState::new(Keystore::new());
    state
        .stage_enroll("001".into(), "web01".into(), "any".into(), "deadbeef".into(), None)
        .await
        .unwrap();
    state.commit_enroll("001").await;

    // Visible in memory immediately...
    assert!(state.lookup_by_name("web01").await.is_some());
    assert!(state.has_pending().await);

    // ...but nothing has touched disk yet: a "crash" here would lose the
    // enrollment, which is why the writer's journal-ready notification
    // fires synchronously with the in-memory commit rather than on a timer.
    let dir = tempfile::tempdir().unwrap();
    assert!(!dir.path().join("client.keys").exists());

    tokio::time::sleep(Duration::from_millis(5)).await;
    assert!(state.has_pending().await, "journal only drains via an explicit flush");
}

fn sha256_hex(value: &str) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(value.as_bytes());
    hex::encode(hasher.finalize())
}
