use std::time::Duration;

use crate::model::{ProviderChannel, SessionId};

/// A single upstream line that could not be decoded into a frame.
///
/// Decode errors never abort a stream; the frame stream logs and drops them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed {channel} frame: {message}")]
pub struct DecodeError {
    pub channel: ProviderChannel,
    pub message: String,
    /// The offending line, as received.
    pub line: String,
}

impl DecodeError {
    pub(crate) fn new(
        channel: ProviderChannel,
        message: impl Into<String>,
        line: impl Into<String>,
    ) -> Self {
        Self {
            channel,
            message: message.into(),
            line: line.into(),
        }
    }
}

/// Errors raised while opening or reading an upstream provider stream.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    /// Transport failed to open, or dropped mid-stream.
    #[error("connection error ({channel}): {message}")]
    Connection {
        channel: ProviderChannel,
        message: String,
    },
    /// Upstream answered the initial request with a non-success status.
    #[error("upstream status {status} ({channel}): {body}")]
    Status {
        channel: ProviderChannel,
        status: u16,
        body: String,
    },
    /// No bytes arrived within the configured idle interval.
    #[error("upstream idle for {}ms ({channel})", .idle.as_millis())]
    IdleTimeout {
        channel: ProviderChannel,
        idle: Duration,
    },
    /// Upstream reported an error inside the stream body.
    #[error("upstream error ({channel}): {message}")]
    Upstream {
        channel: ProviderChannel,
        message: String,
    },
    /// Upstream closed the body before sending its terminal signal.
    #[error("upstream stream ended before a terminal signal ({channel})")]
    Truncated { channel: ProviderChannel },
}

impl ProviderError {
    pub fn connection(channel: ProviderChannel, message: impl Into<String>) -> Self {
        Self::Connection {
            channel,
            message: message.into(),
        }
    }

    pub fn status(channel: ProviderChannel, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            channel,
            status,
            body: body.into(),
        }
    }

    pub fn upstream(channel: ProviderChannel, message: impl Into<String>) -> Self {
        Self::Upstream {
            channel,
            message: message.into(),
        }
    }

    /// Returns the provider channel associated with this error.
    pub fn channel(&self) -> ProviderChannel {
        match self {
            Self::Connection { channel, .. }
            | Self::Status { channel, .. }
            | Self::IdleTimeout { channel, .. }
            | Self::Upstream { channel, .. }
            | Self::Truncated { channel } => *channel,
        }
    }
}

/// Session store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("session not found: {0}")]
    NotFound(SessionId),
    #[error("storage error: {0}")]
    Storage(String),
}

/// Terminal turn failure, sent to the client as the error terminator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, serde::Serialize, serde::Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnFailure {
    #[error("upstream connection failed ({provider}): {message}")]
    UpstreamConnection { provider: String, message: String },
    #[error("upstream returned status {status} ({provider}): {message}")]
    UpstreamStatus {
        provider: String,
        status: u16,
        message: String,
    },
    #[error("upstream error ({provider}): {message}")]
    UpstreamError { provider: String, message: String },
    #[error("upstream idle timeout after {idle_ms}ms ({provider})")]
    IdleTimeout { provider: String, idle_ms: u64 },
    #[error("failed to persist reply: {message}")]
    Persistence { message: String },
    #[error("client disconnected")]
    ClientDisconnected,
    #[error("turn cancelled")]
    Cancelled,
}

/// Top-level error type for the public relay API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RelayError {
    /// Invalid relay or endpoint configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid turn input.
    #[error("validation error: {0}")]
    Validation(String),
    /// Session store failed before the turn started streaming.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Turn started but ended in a failure.
    #[error(transparent)]
    TurnFailed(TurnFailure),
    /// Internal invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl RelayError {
    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

impl From<TurnFailure> for RelayError {
    fn from(value: TurnFailure) -> Self {
        RelayError::TurnFailed(value)
    }
}

pub(crate) fn turn_failure_from_provider_error(err: &ProviderError) -> TurnFailure {
    let provider = err.channel().to_string();
    match err {
        ProviderError::Connection { message, .. } => TurnFailure::UpstreamConnection {
            provider,
            message: message.clone(),
        },
        ProviderError::Truncated { .. } => TurnFailure::UpstreamConnection {
            provider,
            message: "stream ended before a terminal signal".into(),
        },
        ProviderError::Status { status, body, .. } => TurnFailure::UpstreamStatus {
            provider,
            status: *status,
            message: body.clone(),
        },
        ProviderError::Upstream { message, .. } => TurnFailure::UpstreamError {
            provider,
            message: message.clone(),
        },
        ProviderError::IdleTimeout { idle, .. } => TurnFailure::IdleTimeout {
            provider,
            idle_ms: u64::try_from(idle.as_millis()).unwrap_or(u64::MAX),
        },
    }
}
