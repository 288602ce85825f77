//! Field-level diff between two configs, expressed as settings keys.

use serde_json::Value;

use crate::schema::RelayConfig;

/// Sections whose changes affect a running platform.
const PLATFORM_SECTIONS: &[&str] = &["twitch", "youtube", "x", "extension"];

/// Keys (`<section>.<field>`) whose values differ between `old` and `new`.
///
/// Platform sections are diffed per field; OAuth client changes are reported
/// as `<platform>.oauth` so they route to that platform's supervisor.
pub fn changed_keys(old: &RelayConfig, new: &RelayConfig) -> Vec<String> {
    let (Ok(old), Ok(new)) = (serde_json::to_value(old), serde_json::to_value(new)) else {
        return Vec::new();
    };

    let mut keys = Vec::new();
    for section in PLATFORM_SECTIONS {
        diff_section(section, &old[*section], &new[*section], &mut keys);
    }

    let empty = serde_json::Map::new();
    let old_oauth = old["oauth"].as_object().unwrap_or(&empty);
    let new_oauth = new["oauth"].as_object().unwrap_or(&empty);
    let mut platforms: Vec<&String> = old_oauth.keys().chain(new_oauth.keys()).collect();
    platforms.sort();
    platforms.dedup();
    for platform in platforms {
        if old_oauth.get(platform) != new_oauth.get(platform) {
            keys.push(format!("{platform}.oauth"));
        }
    }
    keys
}

fn diff_section(section: &str, old: &Value, new: &Value, keys: &mut Vec<String>) {
    let empty = serde_json::Map::new();
    let old = old.as_object().unwrap_or(&empty);
    let new = new.as_object().unwrap_or(&empty);
    let mut fields: Vec<&String> = old.keys().chain(new.keys()).collect();
    fields.sort();
    fields.dedup();
    for field in fields {
        if old.get(field) != new.get(field) {
            keys.push(format!("{section}.{field}"));
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, crate::schema::OAuthClientConfig, secrecy::Secret};

    #[test]
    fn identical_configs_have_no_changes() {
        let cfg = RelayConfig::default();
        assert!(changed_keys(&cfg, &cfg.clone()).is_empty());
    }

    #[test]
    fn reports_changed_platform_fields() {
        let old = RelayConfig::default();
        let mut new = old.clone();
        new.twitch.channels = vec!["#a".into()];
        new.x.poll_interval_secs = 30;
        // Supervisor timings are read at start and never restart anything.
        new.supervisor.max_attempts = 9;
        assert_eq!(changed_keys(&old, &new), vec![
            "twitch.channels".to_string(),
            "x.poll_interval_secs".to_string()
        ]);
    }

    #[test]
    fn secret_changes_are_detected() {
        let old = RelayConfig::default();
        let mut new = old.clone();
        new.extension.token = Some(Secret::new("t0ken".into()));
        assert_eq!(changed_keys(&old, &new), vec!["extension.token".to_string()]);
    }

    #[test]
    fn oauth_changes_route_to_platform() {
        let old = RelayConfig::default();
        let mut new = old.clone();
        new.oauth.insert("youtube".into(), OAuthClientConfig {
            client_id: "cid".into(),
            ..Default::default()
        });
        assert_eq!(changed_keys(&old, &new), vec!["youtube.oauth".to_string()]);
    }
}
