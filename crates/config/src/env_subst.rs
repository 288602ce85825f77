//! `${VAR}` expansion for raw config text.
//!
//! Supported forms:
//! - `${VAR}`: the variable's value; left untouched when unset.
//! - `${VAR:-fallback}`: the value, or `fallback` when unset or empty.
//!
//! An unterminated `${` is copied through literally.

/// Expand placeholders against the process environment.
pub fn substitute_env(input: &str) -> String {
    expand(input, |name| std::env::var(name).ok())
}

fn expand(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return out;
        };
        let body = &after[..end];
        match resolve(body, &lookup) {
            Some(value) => out.push_str(&value),
            None => {
                out.push_str("${");
                out.push_str(body);
                out.push('}');
            },
        }
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Value for one placeholder body, or `None` to keep it verbatim.
fn resolve(body: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let (name, fallback) = match body.split_once(":-") {
        Some((name, fallback)) => (name, Some(fallback)),
        None => (body, None),
    };
    if name.is_empty() {
        return None;
    }
    match (lookup(name), fallback) {
        (Some(value), Some(fallback)) if value.is_empty() => Some(fallback.to_string()),
        (Some(value), _) => Some(value),
        (None, Some(fallback)) => Some(fallback.to_string()),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "TWITCH_LOGIN" => Some("relaybot".into()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    #[test]
    fn expands_known_and_keeps_unknown() {
        assert_eq!(
            expand("login = \"${TWITCH_LOGIN}\" token = \"${NOPE}\"", env),
            "login = \"relaybot\" token = \"${NOPE}\""
        );
    }

    #[test]
    fn fallback_applies_when_unset_or_empty() {
        assert_eq!(expand("${NOPE:-8490}", env), "8490");
        assert_eq!(expand("${EMPTY:-x}", env), "x");
        assert_eq!(expand("${TWITCH_LOGIN:-x}", env), "relaybot");
        assert_eq!(expand("${NOPE:-}", env), "");
    }

    #[test]
    fn malformed_placeholders_are_literal() {
        assert_eq!(expand("a ${OPEN", env), "a ${OPEN");
        assert_eq!(expand("${}", env), "${}");
        assert_eq!(expand("$TWITCH_LOGIN", env), "$TWITCH_LOGIN");
    }

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(substitute_env("plain text"), "plain text");
    }
}
