//! Configuration loading, env substitution and change detection.
//!
//! Config files: `chatrelay.toml`, `chatrelay.yaml`, `chatrelay.yml` or
//! `chatrelay.json`, searched in `./` then the user config directory.
//!
//! Supports `${ENV_VAR}` substitution in all string values.

pub mod diff;
pub mod env_subst;
pub mod loader;
pub mod schema;

pub use {
    diff::changed_keys,
    loader::{
        CONFIG_DIR_ENV, clear_config_dir, config_dir, discover_and_load, find_config_file,
        find_or_default_config_path, load_config, save_config, set_config_dir,
    },
    schema::{
        BusConfig, ExtensionConfig, MetricsConfig, OAuthClientConfig, RelayConfig, ServerConfig,
        SupervisorConfig, TwitchConfig, XConfig, YoutubeConfig, default_token_url,
    },
};
