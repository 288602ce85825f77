//! Metric name and label definitions.
//!
//! All metric names used throughout chatrelay live here so dashboards have a
//! single reference.

/// Event bus metrics
pub mod bus {
    /// Events accepted onto the queue
    pub const EVENTS_PUBLISHED_TOTAL: &str = "chatrelay_bus_events_published_total";
    /// Events dropped because the queue was full or closed
    pub const EVENTS_DROPPED_TOTAL: &str = "chatrelay_bus_events_dropped_total";
    /// Handler invocations that returned an error or panicked
    pub const HANDLER_FAILURES_TOTAL: &str = "chatrelay_bus_handler_failures_total";
    /// Time spent dispatching one event to all matching handlers
    pub const DISPATCH_DURATION_SECONDS: &str = "chatrelay_bus_dispatch_duration_seconds";
}

/// Connection supervisor metrics
pub mod supervisor {
    /// Connection attempts started
    pub const CONNECT_ATTEMPTS_TOTAL: &str = "chatrelay_supervisor_connect_attempts_total";
    /// Connection attempts that failed
    pub const CONNECT_FAILURES_TOTAL: &str = "chatrelay_supervisor_connect_failures_total";
    /// Platforms currently connected
    pub const CONNECTED: &str = "chatrelay_supervisor_connected";
    /// Credential refreshes attempted before connecting
    pub const TOKEN_REFRESH_TOTAL: &str = "chatrelay_supervisor_token_refresh_total";
    /// Credential refreshes that failed
    pub const TOKEN_REFRESH_FAILURES_TOTAL: &str =
        "chatrelay_supervisor_token_refresh_failures_total";
}

/// OAuth token endpoint metrics
pub mod oauth {
    /// Refresh-token grants sent to a token endpoint
    pub const REFRESH_REQUESTS_TOTAL: &str = "chatrelay_oauth_refresh_requests_total";
    /// Refresh-token grants rejected or failed
    pub const REFRESH_ERRORS_TOTAL: &str = "chatrelay_oauth_refresh_errors_total";
}

/// Chat traffic metrics
pub mod chat {
    /// Chat messages received from platforms
    pub const MESSAGES_RECEIVED_TOTAL: &str = "chatrelay_chat_messages_received_total";
    /// Responses delivered to platforms
    pub const MESSAGES_SENT_TOTAL: &str = "chatrelay_chat_messages_sent_total";
    /// Responses that failed to send
    pub const SEND_ERRORS_TOTAL: &str = "chatrelay_chat_send_errors_total";
    /// Responses dropped because the outbound queue was full
    pub const SEND_DROPPED_TOTAL: &str = "chatrelay_chat_send_dropped_total";
}

/// Common label keys
pub mod labels {
    pub const PLATFORM: &str = "platform";
    pub const KIND: &str = "kind";
}
