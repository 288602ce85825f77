#![allow(clippy::unwrap_used, clippy::expect_used)]
#[macro_use]
mod common;

use std::{net::SocketAddr, sync::Arc};

use {
    chatrelay_channels::ConnectorRegistry,
    chatrelay_common::Platform,
    chatrelay_config::{RelayConfig, SupervisorConfig},
    chatrelay_gateway::{AppState, Relay, bind, build_router, serve},
    chatrelay_oauth::{MemoryCredentialStore, OAuthRefresher},
    common::{FakeConnector, Mode},
    serde_json::Value,
    tokio::task::JoinHandle,
    tokio_util::sync::CancellationToken,
};

struct Harness {
    relay: Relay,
    base: String,
    shutdown: CancellationToken,
    server: JoinHandle<()>,
}

impl Harness {
    async fn start(connectors: Vec<Arc<FakeConnector>>) -> Self {
        let mut registry = ConnectorRegistry::new();
        for connector in connectors {
            registry.register(connector);
        }
        let config = RelayConfig {
            supervisor: SupervisorConfig {
                restart_delay_secs: 0,
                ..Default::default()
            },
            ..Default::default()
        };
        let relay = Relay::builder()
            .store(Arc::new(MemoryCredentialStore::new()))
            .refresher(Arc::new(OAuthRefresher::new()))
            .factory(Arc::new(registry))
            .build(config);

        let listener = bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        let router = build_router(AppState::from_relay(&relay));
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let server = tokio::spawn(async move {
            serve(listener, router, token).await.unwrap();
        });

        Self {
            relay,
            base: format!("http://{addr}"),
            shutdown,
            server,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    async fn finish(self) {
        self.shutdown.cancel();
        self.server.await.unwrap();
        self.relay.teardown().await;
    }
}

#[tokio::test]
async fn health_reports_ok() {
    let harness = Harness::start(Vec::new()).await;
    let body: Value = reqwest::get(harness.url("/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
    harness.finish().await;
}

#[tokio::test]
async fn command_is_queued_and_applied() {
    let twitch = FakeConnector::new(Platform::Twitch, Mode::Open);
    let harness = Harness::start(vec![Arc::clone(&twitch)]).await;
    let client = reqwest::Client::new();

    let response = client
        .post(harness.url("/api/platforms/twitch/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::ACCEPTED);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["accepted"], true);
    assert_eq!(body["platform"], "twitch");
    assert_eq!(body["command"], "start");

    let control = harness.relay.control().clone();
    assert!(eventually!(control.is_running(Platform::Twitch).await));
    assert!(eventually!(twitch.connects() == 1));

    let body: Value = client
        .get(harness.url("/api/platforms"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let platforms = body["platforms"].as_array().unwrap();
    assert_eq!(platforms.len(), Platform::ALL.len());
    let entry = platforms
        .iter()
        .find(|p| p["platform"] == "twitch")
        .unwrap();
    assert_eq!(entry["running"], true);
    let youtube = platforms
        .iter()
        .find(|p| p["platform"] == "youtube")
        .unwrap();
    assert_eq!(youtube["running"], false);
    assert_eq!(youtube["status"], "stopped");

    harness.finish().await;
}

#[tokio::test]
async fn rejects_unknown_platform_and_command() {
    let harness = Harness::start(Vec::new()).await;
    let client = reqwest::Client::new();

    let response = client
        .post(harness.url("/api/platforms/myspace/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::NOT_FOUND);

    let response = client
        .post(harness.url("/api/platforms/twitch/explode"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].as_str().unwrap().contains("explode"));

    harness.finish().await;
}

#[tokio::test]
async fn bus_stats_are_exposed() {
    let harness = Harness::start(Vec::new()).await;
    let client = reqwest::Client::new();
    client
        .post(harness.url("/api/platforms/x/stop"))
        .send()
        .await
        .unwrap();

    let stats: Value = client
        .get(harness.url("/api/bus/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(stats["published"].as_u64().unwrap() >= 1);
    assert_eq!(stats["capacity"], 1000);
    assert_eq!(stats["dropped"], 0);

    harness.finish().await;
}

#[tokio::test]
async fn commands_after_shutdown_are_refused() {
    let harness = Harness::start(Vec::new()).await;
    harness.relay.bus().shutdown(std::time::Duration::from_secs(1)).await;

    let response = reqwest::Client::new()
        .post(harness.url("/api/platforms/twitch/start"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);

    harness.finish().await;
}
