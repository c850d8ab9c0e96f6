// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.
//
// Copyright 2026 Edgecast Cloud LLC.

// Allow expect/unwrap in tests - they provide clear panic messages on failure
#![allow(clippy::expect_used, clippy::unwrap_used)]

//! HTTP API tests for the storage master.
//!
//! Each test starts a master on an ephemeral port. Storage agents are
//! stand-in `wiremock` servers answering `GET /status` and
//! `DELETE /bundles/{id}`.

use std::time::Duration;

use dropshot::{ConfigDropshot, ConfigLogging, ConfigLoggingLevel, HttpServerStarter};
use reqwest::StatusCode;
use serde_json::json;
use storage_master::config::MasterConfig;
use storage_master::context::ApiContext;
use storage_master_api::{AGENT_TOKEN_HEADER, SUBJECT_KEY_HEADER};
use storage_types::{
    AgentRegistration, AgentSummary, BundleLocation, DataBundle, OVERFLOW_VOLUME, StorageVolume,
};
use tokio::sync::watch;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Infrastructure
// ============================================================================

struct TestContext {
    client: reqwest::Client,
    base_url: String,
    config_tx: watch::Sender<MasterConfig>,
}

impl TestContext {
    async fn new() -> Self {
        storage_master::agent_client::install_crypto_provider();
        storage_master::metrics::register_metrics();

        let config = MasterConfig {
            agent_ping_period_secs: 1,
            agent_failure_trip_threshold: 1,
            agent_probe_timeout_secs: 1,
            agent_request_timeout_secs: 5,
            overflow_root_dir: "/data/overflow".to_string(),
            ..Default::default()
        };
        let (config_tx, config_rx) = watch::channel(config);

        let api_context = ApiContext::new(config_rx).expect("failed to create API context");

        let api = storage_master_api::storage_master_api_mod::api_description::<
            storage_master::StorageMasterImpl,
        >()
        .expect("failed to create API description");

        let config_dropshot = ConfigDropshot {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            default_request_body_max_bytes: 1024 * 1024,
            default_handler_task_mode: dropshot::HandlerTaskMode::Detached,
            ..Default::default()
        };

        let config_logging = ConfigLogging::StderrTerminal {
            level: ConfigLoggingLevel::Error,
        };
        let log = config_logging
            .to_logger("test-storage-master")
            .expect("failed to create logger");

        let server = HttpServerStarter::new(&config_dropshot, api, api_context, &log)
            .expect("failed to create server")
            .start();

        let base_url = format!("http://{}", server.local_addr());

        // Keep the server running for the duration of the test
        std::mem::forget(server);

        // Redirects are asserted on, not followed
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("failed to build client");

        Self {
            client,
            base_url,
            config_tx,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn register(&self, agent_url: &str, host: &str, served: &[&str]) -> AgentRegistration {
        let response = self
            .client
            .post(self.url("/agents"))
            .json(&json!({
                "agent_url": agent_url,
                "agent_host": host,
                "served_volumes": served,
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "register failed");
        response.json().await.unwrap()
    }

    async fn create_volume(&self, body: serde_json::Value) -> StorageVolume {
        let response = self
            .client
            .post(self.url("/volumes"))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "create volume failed");
        response.json().await.unwrap()
    }

    async fn allocate(&self, subject: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url("/bundles"))
            .header(SUBJECT_KEY_HEADER, subject)
            .header("authorization", format!("Bearer {}", subject))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    async fn connected_agents(&self) -> Vec<AgentSummary> {
        self.client
            .get(self.url("/agents?connected_only=true"))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }
}

/// Agent stand-in whose status endpoint answers with `status`
async fn mock_agent(status: u16) -> MockServer {
    let agent = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&agent)
        .await;
    agent
}

// ============================================================================
// Agents
// ============================================================================

#[tokio::test]
async fn registration_is_idempotent() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;

    let first = ctx.register(&agent.uri(), "host-a", &["*"]).await;
    let second = ctx
        .register(&format!("{}/", agent.uri()), "host-a", &["*"])
        .await;

    assert_eq!(first.token, second.token);
    assert!(!first.token.is_empty());
    assert_eq!(first.agent.agent_url, agent.uri());

    let agents: Vec<AgentSummary> = ctx
        .client
        .get(ctx.url("/agents"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(agents.len(), 1);
    assert!(agents[0].is_connected());
}

#[tokio::test]
async fn register_rejects_invalid_url() {
    let ctx = TestContext::new().await;

    let response = ctx
        .client
        .post(ctx.url("/agents"))
        .json(&json!({ "agent_url": "not a url", "agent_host": "h" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deregistration_requires_matching_token() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    let registration = ctx.register(&agent.uri(), "host-a", &["*"]).await;
    let target = ctx.url(&format!("/agents?agent_url={}", agent.uri()));

    let response = ctx.client.delete(&target).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .client
        .delete(&target)
        .header(AGENT_TOKEN_HEADER, "wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Still registered after the rejected attempts
    let response = ctx
        .client
        .get(ctx.url(&format!("/agents/lookup?agent_url={}", agent.uri())))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = ctx
        .client
        .delete(&target)
        .header(AGENT_TOKEN_HEADER, &registration.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = ctx
        .client
        .get(ctx.url(&format!("/agents/lookup?agent_url={}", agent.uri())))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = ctx
        .client
        .delete(&target)
        .header(AGENT_TOKEN_HEADER, &registration.token)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failing_agent_is_no_longer_handed_out() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(503).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;

    let mut disconnected = false;
    for _ in 0..50 {
        if ctx.connected_agents().await.is_empty() {
            disconnected = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(disconnected, "agent never disconnected");

    let response = ctx.allocate("alice", json!({ "name": "b1" })).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Bundles
// ============================================================================

#[tokio::test]
async fn allocate_requires_subject() {
    let ctx = TestContext::new().await;

    let response = ctx
        .client
        .post(ctx.url("/bundles"))
        .json(&json!({ "name": "b1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn allocate_without_agents_is_unavailable() {
    let ctx = TestContext::new().await;
    ctx.create_volume(json!({ "name": "shared-1", "root_path": "/data/shared-1", "shared": true }))
        .await;

    let response = ctx.allocate("alice", json!({ "name": "b1" })).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn bundle_lifecycle() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;
    let volume = ctx
        .create_volume(json!({
            "name": "vol-a",
            "root_path": "/data/vol-a",
            "storage_host": "host-a",
        }))
        .await;

    let response = ctx
        .allocate("alice", json!({ "name": "b1", "used_space_bytes": 10 }))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let bundle: DataBundle = response.json().await.unwrap();
    assert_eq!(bundle.owner_key, "alice");
    assert_eq!(bundle.volume_id, volume.id);
    assert_eq!(bundle.path, bundle.id.to_string());
    let placed = bundle.storage_volume.expect("volume attached");
    assert_eq!(placed.storage_service_url.as_deref(), Some(agent.uri().as_str()));

    // Duplicate name for the same owner
    let response = ctx.allocate("alice", json!({ "name": "b1" })).await;
    assert_eq!(response.status(), StatusCode::CONFLICT);

    // Only the owner may read
    let response = ctx
        .client
        .get(ctx.url(&format!("/bundles/{}", bundle.id)))
        .header(SUBJECT_KEY_HEADER, "mallory")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = ctx
        .client
        .get(ctx.url("/bundles?owner=alice&name=b1"))
        .header(SUBJECT_KEY_HEADER, "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let found: DataBundle = response.json().await.unwrap();
    assert_eq!(found.id, bundle.id);

    let response = ctx
        .client
        .put(ctx.url(&format!("/bundles/{}", bundle.id)))
        .header(SUBJECT_KEY_HEADER, "alice")
        .json(&json!({ "used_space_increment_bytes": 5, "checksum": "abc" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: DataBundle = response.json().await.unwrap();
    assert_eq!(updated.used_space_bytes, 15);
    assert_eq!(updated.checksum.as_deref(), Some("abc"));

    let location: BundleLocation = ctx
        .client
        .get(ctx.url(&format!("/bundles/{}/location", bundle.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(location.agent_url, agent.uri());
    assert_eq!(location.bundle_id, Some(bundle.id));

    let response = ctx
        .client
        .get(ctx.url(&format!("/bundles/{}/content", bundle.id)))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(
        response.headers()["location"].to_str().unwrap(),
        format!("{}/bundles/{}/content", agent.uri(), bundle.id)
    );

    let location: BundleLocation = ctx
        .client
        .get(ctx.url(&format!("/locations?path=/data/vol-a/{}/part-0", bundle.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(location.bundle_id, Some(bundle.id));
    assert_eq!(location.relative_path, format!("{}/part-0", bundle.id));

    Mock::given(method("DELETE"))
        .and(path(format!("/bundles/{}", bundle.id)))
        .and(header("authorization", "Bearer alice"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&agent)
        .await;

    let response = ctx
        .client
        .delete(ctx.url(&format!("/bundles/{}", bundle.id)))
        .header(SUBJECT_KEY_HEADER, "alice")
        .header("authorization", "Bearer alice")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let response = ctx
        .client
        .get(ctx.url(&format!("/bundles/{}", bundle.id)))
        .header(SUBJECT_KEY_HEADER, "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_agent_delete_keeps_bundle() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    Mock::given(method("DELETE"))
        .and(path_regex(r"^/bundles/\d+$"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&agent)
        .await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;
    ctx.create_volume(json!({ "name": "shared-1", "root_path": "/data/shared-1", "shared": true }))
        .await;

    let bundle: DataBundle = ctx
        .allocate("alice", json!({ "name": "b1" }))
        .await
        .json()
        .await
        .unwrap();

    let response = ctx
        .client
        .delete(ctx.url(&format!("/bundles/{}", bundle.id)))
        .header(SUBJECT_KEY_HEADER, "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = ctx
        .client
        .get(ctx.url(&format!("/bundles/{}", bundle.id)))
        .header(SUBJECT_KEY_HEADER, "alice")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn overflow_volume_used_when_nothing_else_fits() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;

    let response = ctx.allocate("alice", json!({ "name": "b1" })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let bundle: DataBundle = response.json().await.unwrap();
    let volume = bundle.storage_volume.expect("volume attached");
    assert!(volume.is_overflow());
    assert_eq!(volume.root_path, "/data/overflow");
    assert_eq!(volume.storage_service_url.as_deref(), Some(agent.uri().as_str()));
}

#[tokio::test]
async fn admin_subjects_reload_at_runtime() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;

    let bundle: DataBundle = ctx
        .allocate("alice", json!({ "name": "b1" }))
        .await
        .json()
        .await
        .unwrap();
    let target = ctx.url(&format!("/bundles/{}", bundle.id));

    let response = ctx
        .client
        .get(&target)
        .header(SUBJECT_KEY_HEADER, "ops")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    ctx.config_tx.send_modify(|c| c.admin_subjects = vec!["ops".to_string()]);

    let response = ctx
        .client
        .get(&target)
        .header(SUBJECT_KEY_HEADER, "ops")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn bundle_listing_is_paged_and_scoped() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;
    for (subject, name) in [("alice", "a1"), ("alice", "a2"), ("alice", "a3"), ("bob", "b1")] {
        let response = ctx.allocate(subject, json!({ "name": name })).await;
        assert_eq!(response.status(), StatusCode::CREATED);
    }

    let list = |subject: &'static str, query: &'static str| {
        ctx.client
            .get(ctx.url(&format!("/storage{}", query)))
            .header(SUBJECT_KEY_HEADER, subject)
            .send()
    };

    let first: Vec<DataBundle> = list("alice", "?length=2").await.unwrap().json().await.unwrap();
    let names: Vec<&str> = first.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["a1", "a2"]);
    let second: Vec<DataBundle> = list("alice", "?page=1&length=2")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(second.len(), 1);
    assert_eq!(second[0].name, "a3");

    let count: u64 = list("alice", "/size?owner=bob").await.unwrap().json().await.unwrap();
    assert_eq!(count, 3);
    let on_overflow: u64 = list("alice", "/size?volume_name=OVERFLOW_VOLUME")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(on_overflow, 3);
    let elsewhere: u64 = list("alice", "/size?volume_name=shared-1")
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(elsewhere, 0);

    let response = list("alice", "?length=0").await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let response = ctx.client.get(ctx.url("/storage")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    ctx.config_tx.send_modify(|c| c.admin_subjects = vec!["ops".to_string()]);
    let bobs: Vec<DataBundle> = list("ops", "?owner=bob").await.unwrap().json().await.unwrap();
    assert_eq!(bobs.len(), 1);
    assert_eq!(bobs[0].owner_key, "bob");
}

// ============================================================================
// Volumes and metrics
// ============================================================================

#[tokio::test]
async fn deactivated_volume_leaves_rotation() {
    let ctx = TestContext::new().await;
    let created = ctx
        .create_volume(json!({ "name": "shared-1", "root_path": "/data/shared-1", "shared": true }))
        .await;
    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;

    let response = ctx
        .client
        .put(ctx.url(&format!("/volumes/{}", created.id)))
        .json(&json!({ "active": false, "tags": ["retired"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let updated: StorageVolume = response.json().await.unwrap();
    assert!(!updated.active);
    assert_eq!(updated.tags, vec!["retired"]);
    assert_eq!(updated.root_path, "/data/shared-1");

    let response = ctx.allocate("alice", json!({ "name": "b1" })).await;
    assert_eq!(response.status(), StatusCode::CREATED);
    let bundle: DataBundle = response.json().await.unwrap();
    assert_eq!(bundle.storage_volume.unwrap().name, OVERFLOW_VOLUME);

    let response = ctx
        .client
        .put(ctx.url(&format!("/volumes/{}", created.id)))
        .json(&json!({ "root_path": "" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = ctx
        .client
        .put(ctx.url("/volumes/999"))
        .json(&json!({ "active": true }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn volumes_without_live_agent_are_hidden() {
    let ctx = TestContext::new().await;
    let created = ctx
        .create_volume(json!({ "name": "shared-1", "root_path": "/data/shared-1", "shared": true }))
        .await;
    let again = ctx
        .create_volume(json!({ "name": "shared-1", "root_path": "/elsewhere", "shared": true }))
        .await;
    assert_eq!(created.id, again.id);
    assert_eq!(again.root_path, "/data/shared-1");

    let visible: Vec<StorageVolume> = ctx
        .client
        .get(ctx.url("/volumes"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(visible.is_empty());

    let all: Vec<StorageVolume> = ctx
        .client
        .get(ctx.url("/volumes?include_inaccessible=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(all.len(), 1);

    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["shared-1"]).await;

    let volume: StorageVolume = ctx
        .client
        .get(ctx.url(&format!("/volumes/{}", created.id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(volume.storage_service_url.as_deref(), Some(agent.uri().as_str()));

    let response = ctx.client.get(ctx.url("/volumes/999")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn metrics_are_exposed() {
    let ctx = TestContext::new().await;
    let agent = mock_agent(200).await;
    ctx.register(&agent.uri(), "host-a", &["*"]).await;

    let response = ctx.client.get(ctx.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = response.text().await.unwrap();
    assert!(body.contains("storage_master_registered_agents"));
}
