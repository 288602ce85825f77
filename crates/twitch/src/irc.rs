//! Minimal IRCv3 line parsing for Twitch chat.

use std::collections::BTreeMap;

use {
    chatrelay_common::{ChatMessage, Platform},
    chrono::{DateTime, TimeZone, Utc},
};

/// One parsed IRC line.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IrcMessage {
    pub tags: BTreeMap<String, String>,
    /// Source prefix without the leading `:`.
    pub prefix: Option<String>,
    pub command: String,
    /// Middle params followed by the trailing param, if any.
    pub params: Vec<String>,
}

impl IrcMessage {
    /// Parse a single line (without the trailing CRLF).
    ///
    /// Returns `None` for blank lines and lines without a command.
    pub fn parse(line: &str) -> Option<Self> {
        let mut rest = line.trim_end_matches(['\r', '\n']);
        if rest.trim().is_empty() {
            return None;
        }

        let mut msg = Self::default();

        if let Some(stripped) = rest.strip_prefix('@') {
            let (raw_tags, tail) = stripped.split_once(' ')?;
            msg.tags = parse_tags(raw_tags);
            rest = tail.trim_start();
        }

        if let Some(stripped) = rest.strip_prefix(':') {
            let (prefix, tail) = stripped.split_once(' ')?;
            msg.prefix = Some(prefix.to_string());
            rest = tail.trim_start();
        }

        let (command, mut rest) = match rest.split_once(' ') {
            Some((command, tail)) => (command, tail),
            None => (rest, ""),
        };
        if command.is_empty() {
            return None;
        }
        msg.command = command.to_ascii_uppercase();

        while !rest.is_empty() {
            if let Some(trailing) = rest.strip_prefix(':') {
                msg.params.push(trailing.to_string());
                break;
            }
            match rest.split_once(' ') {
                Some((param, tail)) => {
                    if !param.is_empty() {
                        msg.params.push(param.to_string());
                    }
                    rest = tail;
                },
                None => {
                    msg.params.push(rest.to_string());
                    break;
                },
            }
        }
        Some(msg)
    }

    /// Nick part of the prefix (`nick!user@host`).
    pub fn nick(&self) -> Option<&str> {
        let prefix = self.prefix.as_deref()?;
        let nick = prefix.split(['!', '@']).next()?;
        (!nick.is_empty()).then_some(nick)
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.is_empty())
    }

    /// Last parameter, which carries the message body for most commands.
    pub fn trailing(&self) -> Option<&str> {
        self.params.last().map(String::as_str)
    }

    /// Convert a `PRIVMSG` into a generic chat message.
    ///
    /// Returns `None` for other commands and for messages without an author
    /// or text.
    pub fn to_chat_message(&self) -> Option<ChatMessage> {
        if self.command != "PRIVMSG" || self.params.len() < 2 {
            return None;
        }
        let channel = self.params[0].trim_start_matches('#');
        let text = strip_action(self.trailing()?);
        let login = self.nick()?;
        let user_id = self.tag("user-id").unwrap_or(login);

        let mut message = ChatMessage::new(Platform::Twitch, user_id, text)
            .ok()?
            .with_channel(channel)
            .with_login(login);
        if let Some(name) = self.tag("display-name") {
            message = message.with_display_name(name);
        }
        if let Some(id) = self.tag("id") {
            message = message.with_message_id(id);
        }
        if let Some(ts) = self.tag("tmi-sent-ts").and_then(parse_millis) {
            message = message.with_timestamp(ts);
        }
        if !self.tags.is_empty() {
            let tags: serde_json::Map<String, serde_json::Value> = self
                .tags
                .iter()
                .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
                .collect();
            message = message.with_payload(serde_json::json!({ "tags": tags }));
        }
        Some(message)
    }
}

fn parse_tags(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), unescape_tag(v)),
            None => (pair.to_string(), String::new()),
        })
        .collect()
}

/// IRCv3 tag value unescaping.
fn unescape_tag(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some(':') => out.push(';'),
            Some('s') => out.push(' '),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some(other) => out.push(other),
            None => {},
        }
    }
    out
}

/// `/me` messages arrive wrapped in a CTCP ACTION.
fn strip_action(text: &str) -> &str {
    text.strip_prefix("\u{1}ACTION ")
        .map(|t| t.strip_suffix('\u{1}').unwrap_or(t))
        .unwrap_or(text)
}

fn parse_millis(raw: &str) -> Option<DateTime<Utc>> {
    let millis = raw.parse::<i64>().ok()?;
    Utc.timestamp_millis_opt(millis).single()
}

/// Whether a `NOTICE` reports a rejected login.
pub fn is_auth_failure(msg: &IrcMessage) -> bool {
    msg.command == "NOTICE"
        && msg.trailing().is_some_and(|text| {
            text.contains("Login authentication failed")
                || text.contains("Improperly formatted auth")
        })
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    const PRIVMSG: &str = "@badge-info=;display-name=Alice;id=b34ccfc7-4977;tmi-sent-ts=1700000000000;user-id=1337 :alice!alice@alice.tmi.twitch.tv PRIVMSG #streamer :hello there";

    #[test]
    fn parses_tagged_privmsg() {
        let msg = IrcMessage::parse(PRIVMSG).unwrap();
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.nick(), Some("alice"));
        assert_eq!(msg.params, vec!["#streamer", "hello there"]);
        assert_eq!(msg.tag("badge-info"), None);

        let chat = msg.to_chat_message().unwrap();
        assert_eq!(chat.platform, Platform::Twitch);
        assert_eq!(chat.channel.as_deref(), Some("streamer"));
        assert_eq!(chat.user_id, "1337");
        assert_eq!(chat.user_login.as_deref(), Some("alice"));
        assert_eq!(chat.display_name.as_deref(), Some("Alice"));
        assert_eq!(chat.message_id.as_deref(), Some("b34ccfc7-4977"));
        assert_eq!(chat.text, "hello there");
        assert_eq!(chat.timestamp.timestamp_millis(), 1_700_000_000_000);
        assert_eq!(chat.payload["tags"]["user-id"], "1337");
    }

    #[rstest]
    #[case("PING :tmi.twitch.tv", "PING", None, &["tmi.twitch.tv"])]
    #[case(":tmi.twitch.tv 001 bot :Welcome, GLHF!", "001", Some("tmi.twitch.tv"), &["bot", "Welcome, GLHF!"])]
    #[case(":tmi.twitch.tv RECONNECT", "RECONNECT", Some("tmi.twitch.tv"), &[])]
    #[case(":bot!bot@bot.tmi.twitch.tv JOIN #chan", "JOIN", Some("bot!bot@bot.tmi.twitch.tv"), &["#chan"])]
    fn parses_commands(
        #[case] line: &str,
        #[case] command: &str,
        #[case] prefix: Option<&str>,
        #[case] params: &[&str],
    ) {
        let msg = IrcMessage::parse(line).unwrap();
        assert_eq!(msg.command, command);
        assert_eq!(msg.prefix.as_deref(), prefix);
        assert_eq!(msg.params, params);
    }

    #[test]
    fn blank_lines_are_skipped() {
        assert!(IrcMessage::parse("").is_none());
        assert!(IrcMessage::parse("\r\n").is_none());
    }

    #[test]
    fn unescapes_tag_values() {
        let msg = IrcMessage::parse(r"@system-msg=a\sb\:c\\d :tmi.twitch.tv USERNOTICE #c").unwrap();
        assert_eq!(msg.tag("system-msg"), Some(r"a b;c\d"));
    }

    #[test]
    fn action_messages_lose_ctcp_wrapper() {
        let msg =
            IrcMessage::parse(":bob!bob@bob PRIVMSG #c :\u{1}ACTION waves\u{1}").unwrap();
        let chat = msg.to_chat_message().unwrap();
        assert_eq!(chat.text, "waves");
        // Without a user-id tag the login stands in.
        assert_eq!(chat.user_id, "bob");
    }

    #[test]
    fn non_privmsg_is_not_chat() {
        let msg = IrcMessage::parse(":tmi.twitch.tv NOTICE * :Login authentication failed").unwrap();
        assert!(msg.to_chat_message().is_none());
        assert!(is_auth_failure(&msg));
        let other = IrcMessage::parse(":tmi.twitch.tv NOTICE #c :Slow mode").unwrap();
        assert!(!is_auth_failure(&other));
    }
}
