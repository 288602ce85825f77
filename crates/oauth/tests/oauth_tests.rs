#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{sync::Arc, time::Duration};

use {
    chatrelay_bus::{EventBus, handler_fn},
    chatrelay_common::{ChangeSource, Event, EventKind, Platform},
    chatrelay_oauth::{
        Credential, CredentialStore, FileCredentialStore, OAuthClient, OAuthRefresher,
        RefreshError, TokenRefresher,
    },
    secrecy::{ExposeSecret, Secret},
    tokio::sync::mpsc,
};

fn refresher_for(server: &mockito::ServerGuard) -> OAuthRefresher {
    OAuthRefresher::new().with_client(Platform::Twitch, OAuthClient {
        client_id: "cid".into(),
        client_secret: Some(Secret::new("csecret".into())),
        token_url: format!("{}/oauth2/token", server.url()),
    })
}

#[tokio::test]
async fn refresh_posts_grant_and_parses_response() {
    let mut server = mockito::Server::new_async().await;
    let mock = server
        .mock("POST", "/oauth2/token")
        .match_body(mockito::Matcher::AllOf(vec![
            mockito::Matcher::UrlEncoded("grant_type".into(), "refresh_token".into()),
            mockito::Matcher::UrlEncoded("refresh_token".into(), "r1".into()),
            mockito::Matcher::UrlEncoded("client_id".into(), "cid".into()),
            mockito::Matcher::UrlEncoded("client_secret".into(), "csecret".into()),
        ]))
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(r#"{"access_token":"a2","refresh_token":"r2","expires_in":14400,"scope":["chat:read","chat:edit"]}"#)
        .create_async()
        .await;

    let old = Credential::new("a1").with_refresh_token("r1").with_login("bot");
    let new = refresher_for(&server)
        .refresh(Platform::Twitch, &old)
        .await
        .unwrap();

    mock.assert_async().await;
    assert_eq!(new.access_token.expose_secret(), "a2");
    assert_eq!(new.refresh_token.as_ref().unwrap().expose_secret(), "r2");
    assert_eq!(new.login.as_deref(), Some("bot"));
    assert!(!new.expires_within(Duration::from_secs(300), chrono::Utc::now()));
}

#[tokio::test]
async fn invalid_grant_is_auth_error() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth2/token")
        .with_status(400)
        .with_body(r#"{"status":400,"message":"Invalid refresh token"}"#)
        .create_async()
        .await;

    let old = Credential::new("a1").with_refresh_token("bad");
    let err = refresher_for(&server)
        .refresh(Platform::Twitch, &old)
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Auth(m) if m == "Invalid refresh token"));
}

#[tokio::test]
async fn server_error_is_transient() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/oauth2/token")
        .with_status(503)
        .create_async()
        .await;

    let old = Credential::new("a1").with_refresh_token("r1");
    let err = refresher_for(&server)
        .refresh(Platform::Twitch, &old)
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Transient(_)));
}

#[tokio::test]
async fn unconfigured_platform_and_missing_refresh_token() {
    let refresher = OAuthRefresher::new();
    let err = refresher
        .refresh(Platform::Youtube, &Credential::new("a").with_refresh_token("r"))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::NotConfigured(Platform::Youtube)));

    let server = mockito::Server::new_async().await;
    let err = refresher_for(&server)
        .refresh(Platform::Twitch, &Credential::new("a"))
        .await
        .unwrap_err();
    assert!(matches!(err, RefreshError::Auth(_)));
}

#[test]
fn from_config_registers_clients() {
    let cfg: chatrelay_config::RelayConfig = toml::from_str(
        "[oauth.youtube]\nclient_id = \"yt\"\n\n[oauth.extension]\nclient_id = \"nope\"\n",
    )
    .unwrap();
    let refresher = OAuthRefresher::from_config(&cfg);
    assert!(refresher.has_client(Platform::Youtube));
    // No public token endpoint for the extension bridge.
    assert!(!refresher.has_client(Platform::Extension));
    assert!(!refresher.has_client(Platform::Twitch));
}

#[tokio::test]
async fn store_writes_publish_settings_changed() {
    let bus = EventBus::new(16);
    let (tx, mut rx) = mpsc::unbounded_channel();
    bus.subscribe(
        EventKind::SettingsChanged,
        handler_fn("capture", move |event: Arc<Event>| {
            let tx = tx.clone();
            async move {
                if let Event::SettingsChanged(change) = event.as_ref() {
                    let _ = tx.send(change.clone());
                }
                Ok(())
            }
        }),
    );

    let dir = tempfile::tempdir().unwrap();
    let store = FileCredentialStore::with_dir(dir.path().to_path_buf()).with_bus(bus.clone());
    store
        .save(
            Platform::Youtube,
            &Credential::new("t"),
            ChangeSource::Supervisor(Platform::Youtube),
        )
        .await
        .unwrap();
    store
        .clear(Platform::Youtube, ChangeSource::External)
        .await
        .unwrap();

    let saved = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(saved.keys, vec!["credentials.youtube".to_string()]);
    assert_eq!(saved.source, ChangeSource::Supervisor(Platform::Youtube));

    let cleared = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(cleared.source, ChangeSource::External);
}
