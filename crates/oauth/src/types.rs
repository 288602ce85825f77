use std::{collections::BTreeSet, time::Duration};

use {
    chrono::{DateTime, Utc},
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Authorization material for one platform account.
///
/// Created by the login flow, replaced on refresh, deleted on logout or when
/// the platform rejects it.
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    #[serde(serialize_with = "serialize_secret")]
    pub access_token: Secret<String>,
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub refresh_token: Option<Secret<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub scopes: BTreeSet<String>,
    /// Platform account identifier (user id, channel id).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login: Option<String>,
    /// Second secret for platforms that sign with a token pair.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub secondary_secret: Option<Secret<String>>,
}

impl Credential {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Secret::new(access_token.into()),
            refresh_token: None,
            expires_at: None,
            scopes: BTreeSet::new(),
            account_id: None,
            login: None,
            secondary_secret: None,
        }
    }

    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(Secret::new(token.into()));
        self
    }

    pub fn with_expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }

    pub fn with_account_id(mut self, id: impl Into<String>) -> Self {
        self.account_id = Some(id.into());
        self
    }

    /// True when the credential expires before `now + margin`.
    ///
    /// Credentials without an expiry never need a refresh.
    pub fn expires_within(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        let Some(expires_at) = self.expires_at else {
            return false;
        };
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::MAX);
        match now.checked_add_signed(margin) {
            Some(deadline) => expires_at <= deadline,
            None => true,
        }
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &"[REDACTED]")
            .field(
                "refresh_token",
                &self.refresh_token.as_ref().map(|_| "[REDACTED]"),
            )
            .field("expires_at", &self.expires_at)
            .field("scopes", &self.scopes)
            .field("account_id", &self.account_id)
            .field("login", &self.login)
            .field(
                "secondary_secret",
                &self.secondary_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .finish()
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

/// Serialize a `Secret<String>` by exposing its inner value.
/// Use only for fields that must round-trip through storage.
pub fn serialize_secret<S: serde::Serializer>(
    secret: &Secret<String>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(secret.expose_secret())
}

/// Serialize an `Option<Secret<String>>` by exposing its inner value.
pub fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expiry_margin() {
        let now = Utc::now();
        let margin = Duration::from_secs(300);
        let soon = Credential::new("a").with_expires_at(now + chrono::Duration::seconds(120));
        let later = Credential::new("a").with_expires_at(now + chrono::Duration::hours(2));
        let expired = Credential::new("a").with_expires_at(now - chrono::Duration::seconds(1));
        assert!(soon.expires_within(margin, now));
        assert!(expired.expires_within(margin, now));
        assert!(!later.expires_within(margin, now));
        assert!(!Credential::new("a").expires_within(margin, now));
    }

    #[test]
    fn debug_redacts_tokens() {
        let cred = Credential::new("access-abc")
            .with_refresh_token("refresh-def")
            .with_login("bot");
        let dbg = format!("{cred:?}");
        assert!(!dbg.contains("access-abc"));
        assert!(!dbg.contains("refresh-def"));
        assert!(dbg.contains("bot"));
    }

    #[test]
    fn serializes_exposed_for_storage() {
        let cred = Credential::new("tok").with_refresh_token("ref");
        let json = serde_json::to_value(&cred).unwrap();
        assert_eq!(json["access_token"], "tok");
        assert_eq!(json["refresh_token"], "ref");
        assert!(json.get("expires_at").is_none());
        let back: Credential = serde_json::from_value(json).unwrap();
        assert_eq!(back.access_token.expose_secret(), "tok");
    }
}
