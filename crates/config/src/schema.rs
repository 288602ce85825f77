/// Config schema types (server, bus, supervisor, oauth clients, platforms).
use std::collections::{BTreeMap, HashMap};

use {
    chatrelay_common::Platform,
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub server: ServerConfig,
    pub bus: BusConfig,
    pub supervisor: SupervisorConfig,
    pub metrics: MetricsConfig,
    /// OAuth client registrations, keyed by platform name.
    pub oauth: BTreeMap<String, OAuthClientConfig>,
    pub twitch: TwitchConfig,
    pub youtube: YoutubeConfig,
    pub x: XConfig,
    pub extension: ExtensionConfig,
}

impl RelayConfig {
    /// Whether the operator enabled `platform` for autostart.
    pub fn is_enabled(&self, platform: Platform) -> bool {
        match platform {
            Platform::Twitch => self.twitch.enabled,
            Platform::Youtube => self.youtube.enabled,
            Platform::X => self.x.enabled,
            Platform::Extension => self.extension.enabled,
        }
    }

    /// Platforms with `enabled = true`, in declaration order.
    pub fn enabled_platforms(&self) -> Vec<Platform> {
        Platform::ALL
            .iter()
            .copied()
            .filter(|p| self.is_enabled(*p))
            .collect()
    }

    /// OAuth client for `platform`, if one is registered.
    pub fn oauth_client(&self, platform: Platform) -> Option<&OAuthClientConfig> {
        self.oauth.get(platform.as_str())
    }
}

/// Operator HTTP server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "127.0.0.1".
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 8490,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Bounded queue size; publishes beyond it are dropped.
    pub queue_capacity: usize,
    /// How long teardown waits for the worker before aborting it.
    pub shutdown_timeout_secs: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1000,
            shutdown_timeout_secs: 5,
        }
    }
}

/// Retry, refresh and control-plane timings shared by every platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// First retry delay; doubles per consecutive failure.
    pub base_delay_secs: u64,
    pub max_delay_secs: u64,
    /// Consecutive failures before the supervisor parks as disabled.
    /// Zero retries forever.
    pub max_attempts: u32,
    /// Refresh credentials expiring within this many seconds.
    pub refresh_margin_secs: u64,
    /// Grace period for a supervisor to stop before it is aborted.
    pub stop_timeout_secs: u64,
    /// Pause between stop and start on restart.
    pub restart_delay_secs: u64,
    /// Per-connection outbound queue size.
    pub outbound_queue: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            base_delay_secs: 5,
            max_delay_secs: 60,
            max_attempts: 10,
            refresh_margin_secs: 300,
            stop_timeout_secs: 5,
            restart_delay_secs: 1,
            outbound_queue: 100,
        }
    }
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Whether metrics collection is enabled.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Whether to expose the `/metrics` Prometheus endpoint.
    #[serde(default = "default_true")]
    pub prometheus_endpoint: bool,
    /// Additional labels to add to all metrics.
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus_endpoint: true,
            labels: HashMap::new(),
        }
    }
}

/// A registered OAuth client used to refresh platform credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthClientConfig {
    pub client_id: String,
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub client_secret: Option<Secret<String>>,
    /// Token endpoint. Falls back to the platform's public endpoint.
    pub token_url: Option<String>,
}

impl OAuthClientConfig {
    pub fn token_url_for(&self, platform: Platform) -> Option<String> {
        self.token_url
            .clone()
            .or_else(|| default_token_url(platform).map(str::to_string))
    }
}

/// Public token endpoints for the OAuth platforms.
pub fn default_token_url(platform: Platform) -> Option<&'static str> {
    match platform {
        Platform::Twitch => Some("https://id.twitch.tv/oauth2/token"),
        Platform::Youtube => Some("https://oauth2.googleapis.com/token"),
        Platform::X => Some("https://api.x.com/2/oauth2/token"),
        Platform::Extension => None,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TwitchConfig {
    pub enabled: bool,
    /// Channels to join, with or without the leading `#`.
    pub channels: Vec<String>,
    pub irc_url: String,
    /// Bot login; falls back to the credential's login.
    pub login: Option<String>,
}

impl Default for TwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            channels: Vec::new(),
            irc_url: "wss://irc-ws.chat.twitch.tv:443".into(),
            login: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct YoutubeConfig {
    pub enabled: bool,
    pub api_base: String,
    /// Fixed live chat to follow; otherwise the active broadcast's chat.
    pub live_chat_id: Option<String>,
    /// Lower bound on the server-suggested polling interval.
    pub min_poll_interval_ms: u64,
}

impl Default for YoutubeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://www.googleapis.com/youtube/v3".into(),
            live_chat_id: None,
            min_poll_interval_ms: 2000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct XConfig {
    pub enabled: bool,
    pub api_base: String,
    pub poll_interval_secs: u64,
}

impl Default for XConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            api_base: "https://api.x.com".into(),
            poll_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtensionConfig {
    pub enabled: bool,
    /// Local websocket address the browser extension connects to.
    pub bind: String,
    /// Shared secret the extension must present in its hello frame.
    #[serde(
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub token: Option<Secret<String>>,
}

impl Default for ExtensionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind: "127.0.0.1:8765".into(),
            token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}
