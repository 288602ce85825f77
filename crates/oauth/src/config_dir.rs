use std::path::PathBuf;

/// Directory holding one credential file per platform.
///
/// Resolution order comes from `chatrelay_config::config_dir()`:
/// 1. programmatic override (`set_config_dir`)
/// 2. `CHATRELAY_CONFIG_DIR`
/// 3. `~/.config/chatrelay`
pub fn credentials_dir() -> PathBuf {
    chatrelay_config::config_dir()
        .unwrap_or_else(|| PathBuf::from(".config/chatrelay"))
        .join("credentials")
}
