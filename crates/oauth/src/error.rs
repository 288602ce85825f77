use std::error::Error as StdError;

use chatrelay_common::{FromMessage, Platform};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Http(#[from] reqwest::Error),

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message(message.into())
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

impl FromMessage for Error {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

chatrelay_common::impl_context!();

/// Outcome of a failed token refresh.
#[derive(Debug, thiserror::Error)]
pub enum RefreshError {
    /// The token endpoint rejected the refresh token. Terminal for this
    /// credential.
    #[error("refresh rejected: {0}")]
    Auth(String),

    /// Network failure, rate limit or server error. Worth retrying later.
    #[error("refresh failed: {0}")]
    Transient(String),

    /// No OAuth client is registered for the platform.
    #[error("no oauth client configured for {0}")]
    NotConfigured(Platform),
}
