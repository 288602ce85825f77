use {chatrelay_channels::ConnectorError, reqwest::StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The broadcast is over; the chat will not produce more messages.
    #[error("live chat ended")]
    ChatEnded,

    #[error("youtube api {status}: {reason}")]
    Api { status: StatusCode, reason: String },

    #[error("no active live broadcast")]
    NoBroadcast,

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Classify a non-success response from its status and error body.
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let reason = error_reason(body).unwrap_or_else(|| status.to_string());
        if reason == "liveChatEnded" {
            return Self::ChatEnded;
        }
        Self::Api { status, reason }
    }
}

/// `error.errors[0].reason`, falling back to `error.message`.
fn error_reason(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let error = value.get("error")?;
    error
        .pointer("/errors/0/reason")
        .or_else(|| error.get("message"))
        .and_then(|v| v.as_str())
        .map(str::to_string)
}

impl From<Error> for ConnectorError {
    fn from(e: Error) -> Self {
        match &e {
            Error::ChatEnded | Error::NoBroadcast | Error::Http(_) => {
                ConnectorError::transient(e)
            },
            Error::Api { status, reason } => match *status {
                StatusCode::UNAUTHORIZED => ConnectorError::auth(e),
                StatusCode::FORBIDDEN
                    if matches!(
                        reason.as_str(),
                        "quotaExceeded" | "rateLimitExceeded" | "userRateLimitExceeded"
                    ) =>
                {
                    ConnectorError::transient(e)
                },
                StatusCode::FORBIDDEN => ConnectorError::auth(e),
                StatusCode::TOO_MANY_REQUESTS => ConnectorError::transient(e),
                s if s.is_server_error() => ConnectorError::transient(e),
                _ => ConnectorError::config(e),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn classify(status: u16, body: &str) -> ConnectorError {
        Error::from_response(StatusCode::from_u16(status).unwrap(), body).into()
    }

    fn body(reason: &str) -> String {
        format!(r#"{{"error":{{"code":403,"message":"m","errors":[{{"reason":"{reason}"}}]}}}}"#)
    }

    #[test]
    fn classification() {
        assert!(matches!(classify(401, "{}"), ConnectorError::Auth(_)));
        assert!(classify(403, &body("quotaExceeded")).is_transient());
        assert!(matches!(
            classify(403, &body("insufficientPermissions")),
            ConnectorError::Auth(_)
        ));
        assert!(classify(429, "").is_transient());
        assert!(classify(503, "").is_transient());
        assert!(matches!(
            classify(404, &body("liveChatNotFound")),
            ConnectorError::Config(m) if m.contains("liveChatNotFound")
        ));
    }

    #[test]
    fn chat_ended_is_recognized() {
        assert!(matches!(
            Error::from_response(StatusCode::FORBIDDEN, &body("liveChatEnded")),
            Error::ChatEnded
        ));
    }
}
