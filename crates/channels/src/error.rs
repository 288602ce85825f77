/// How a connector failed, which decides what the supervisor does next.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectorError {
    /// Network drop, timeout, rate limit, server error. Retried with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// The platform rejected the credential. Never retried with it.
    #[error("authentication rejected: {0}")]
    Auth(String),

    /// Missing or invalid settings. The supervisor parks until they change.
    #[error("configuration: {0}")]
    Config(String),
}

impl ConnectorError {
    #[must_use]
    pub fn transient(message: impl std::fmt::Display) -> Self {
        Self::Transient(message.to_string())
    }

    #[must_use]
    pub fn auth(message: impl std::fmt::Display) -> Self {
        Self::Auth(message.to_string())
    }

    #[must_use]
    pub fn config(message: impl std::fmt::Display) -> Self {
        Self::Config(message.to_string())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, ConnectorError>;
