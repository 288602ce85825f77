use std::collections::BTreeMap;

use {
    async_trait::async_trait,
    chatrelay_common::Platform,
    chatrelay_config::RelayConfig,
    chrono::Utc,
    reqwest::StatusCode,
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, info, warn},
};

#[cfg(feature = "metrics")]
use chatrelay_metrics::{counter, labels, oauth as oauth_metrics};

use crate::{error::RefreshError, types::Credential};

/// Exchanges a credential's refresh token for a new credential.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(
        &self,
        platform: Platform,
        credential: &Credential,
    ) -> Result<Credential, RefreshError>;
}

/// OAuth client used for the refresh-token grant.
#[derive(Debug, Clone)]
pub struct OAuthClient {
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub token_url: String,
}

/// RFC 6749 refresh-token grant against per-platform token endpoints.
pub struct OAuthRefresher {
    clients: BTreeMap<Platform, OAuthClient>,
    http: reqwest::Client,
}

impl OAuthRefresher {
    pub fn new() -> Self {
        Self {
            clients: BTreeMap::new(),
            http: reqwest::Client::new(),
        }
    }

    /// Register every `[oauth.<platform>]` client with a usable token URL.
    pub fn from_config(config: &RelayConfig) -> Self {
        let mut refresher = Self::new();
        for platform in Platform::ALL {
            let Some(client) = config.oauth_client(*platform) else {
                continue;
            };
            let Some(token_url) = client.token_url_for(*platform) else {
                warn!(%platform, "oauth client has no token url, ignoring");
                continue;
            };
            refresher = refresher.with_client(*platform, OAuthClient {
                client_id: client.client_id.clone(),
                client_secret: client.client_secret.clone(),
                token_url,
            });
        }
        refresher
    }

    pub fn with_client(mut self, platform: Platform, client: OAuthClient) -> Self {
        self.clients.insert(platform, client);
        self
    }

    pub fn has_client(&self, platform: Platform) -> bool {
        self.clients.contains_key(&platform)
    }
}

impl Default for OAuthRefresher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(
        &self,
        platform: Platform,
        credential: &Credential,
    ) -> Result<Credential, RefreshError> {
        let client = self
            .clients
            .get(&platform)
            .ok_or(RefreshError::NotConfigured(platform))?;
        let refresh_token = credential
            .refresh_token
            .as_ref()
            .ok_or_else(|| RefreshError::Auth("credential has no refresh token".into()))?;

        #[cfg(feature = "metrics")]
        counter!(oauth_metrics::REFRESH_REQUESTS_TOTAL, labels::PLATFORM => platform.as_str())
            .increment(1);

        let mut form = vec![
            ("grant_type", "refresh_token".to_string()),
            ("refresh_token", refresh_token.expose_secret().clone()),
            ("client_id", client.client_id.clone()),
        ];
        if let Some(secret) = &client.client_secret {
            form.push(("client_secret", secret.expose_secret().clone()));
        }

        debug!(%platform, token_url = %client.token_url, "refreshing credential");
        let result = self.request(&client.token_url, &form).await;
        match result {
            Ok(body) => {
                let refreshed = parse_token_response(&body, credential)?;
                info!(%platform, expires_at = ?refreshed.expires_at, "credential refreshed");
                Ok(refreshed)
            },
            Err(e) => {
                #[cfg(feature = "metrics")]
                counter!(oauth_metrics::REFRESH_ERRORS_TOTAL, labels::PLATFORM => platform.as_str())
                    .increment(1);
                warn!(%platform, error = %e, "credential refresh failed");
                Err(e)
            },
        }
    }
}

impl OAuthRefresher {
    async fn request(
        &self,
        token_url: &str,
        form: &[(&str, String)],
    ) -> Result<serde_json::Value, RefreshError> {
        let resp = self
            .http
            .post(token_url)
            .form(form)
            .send()
            .await
            .map_err(|e| RefreshError::Transient(e.to_string()))?;

        let status = resp.status();
        if status.is_success() {
            return resp
                .json::<serde_json::Value>()
                .await
                .map_err(|e| RefreshError::Transient(format!("invalid token response: {e}")));
        }

        let body = resp.text().await.unwrap_or_default();
        Err(classify_failure(status, &body))
    }
}

/// 400/401/403 mean the grant itself was refused; everything else is worth
/// another try.
fn classify_failure(status: StatusCode, body: &str) -> RefreshError {
    let detail = serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error_description")
                .or_else(|| v.get("message"))
                .or_else(|| v.get("error"))
                .and_then(|e| e.as_str().map(str::to_string))
        })
        .unwrap_or_else(|| status.to_string());

    match status {
        StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            RefreshError::Auth(detail)
        },
        _ => RefreshError::Transient(detail),
    }
}

/// Build the refreshed credential, keeping what the response omits.
fn parse_token_response(
    resp: &serde_json::Value,
    previous: &Credential,
) -> Result<Credential, RefreshError> {
    let access_token = resp["access_token"]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| RefreshError::Transient("missing access_token in response".into()))?;

    let mut refreshed = previous.clone();
    refreshed.access_token = Secret::new(access_token.to_string());
    if let Some(token) = resp["refresh_token"].as_str() {
        refreshed.refresh_token = Some(Secret::new(token.to_string()));
    }
    refreshed.expires_at = resp["expires_in"]
        .as_i64()
        .map(|secs| Utc::now() + chrono::Duration::seconds(secs));

    // Scopes arrive space-delimited (RFC 6749) or as an array.
    match &resp["scope"] {
        serde_json::Value::String(s) => {
            refreshed.scopes = s.split_whitespace().map(str::to_string).collect();
        },
        serde_json::Value::Array(items) => {
            refreshed.scopes = items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect();
        },
        _ => {},
    }
    Ok(refreshed)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_refresh_token_when_omitted() {
        let prev = Credential::new("old")
            .with_refresh_token("keep-me")
            .with_login("bot");
        let resp = serde_json::json!({"access_token": "new", "expires_in": 3600});
        let cred = parse_token_response(&resp, &prev).unwrap();
        assert_eq!(cred.access_token.expose_secret(), "new");
        assert_eq!(
            cred.refresh_token.as_ref().unwrap().expose_secret(),
            "keep-me"
        );
        assert_eq!(cred.login.as_deref(), Some("bot"));
        assert!(cred.expires_at.unwrap() > Utc::now());
    }

    #[test]
    fn scope_formats() {
        let prev = Credential::new("old");
        let resp = serde_json::json!({"access_token": "a", "scope": "chat:read chat:edit"});
        let cred = parse_token_response(&resp, &prev).unwrap();
        assert!(cred.scopes.contains("chat:edit"));

        let resp = serde_json::json!({"access_token": "a", "scope": ["chat:read"]});
        let cred = parse_token_response(&resp, &prev).unwrap();
        assert_eq!(cred.scopes.len(), 1);
    }

    #[test]
    fn missing_access_token_is_transient() {
        let err = parse_token_response(&serde_json::json!({}), &Credential::new("x")).unwrap_err();
        assert!(matches!(err, RefreshError::Transient(_)));
    }

    #[test]
    fn classify() {
        assert!(matches!(
            classify_failure(StatusCode::BAD_REQUEST, r#"{"error":"invalid_grant"}"#),
            RefreshError::Auth(m) if m == "invalid_grant"
        ));
        assert!(matches!(
            classify_failure(StatusCode::SERVICE_UNAVAILABLE, ""),
            RefreshError::Transient(_)
        ));
        assert!(matches!(
            classify_failure(StatusCode::TOO_MANY_REQUESTS, ""),
            RefreshError::Transient(_)
        ));
    }
}
