use {chatrelay_channels::ConnectorError, reqwest::StatusCode};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("x api {status}: {detail}")]
    Api { status: StatusCode, detail: String },

    #[error("unexpected x api response: {0}")]
    Malformed(String),

    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl Error {
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let detail = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|v| {
                v.get("detail")
                    .or_else(|| v.get("title"))
                    .or_else(|| v.pointer("/errors/0/message"))
                    .and_then(|d| d.as_str().map(str::to_string))
            })
            .unwrap_or_else(|| status.to_string());
        Self::Api { status, detail }
    }
}

impl From<Error> for ConnectorError {
    fn from(e: Error) -> Self {
        match &e {
            Error::Api { status, .. } => match *status {
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ConnectorError::auth(e),
                StatusCode::TOO_MANY_REQUESTS => ConnectorError::transient(e),
                s if s.is_server_error() => ConnectorError::transient(e),
                _ => ConnectorError::config(e),
            },
            Error::Malformed(_) | Error::Http(_) => ConnectorError::transient(e),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
