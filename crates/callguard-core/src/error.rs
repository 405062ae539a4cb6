//! Call-level error types.

use thiserror::Error;

/// gRPC-style status code carried by transport errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Code {
    Ok,
    Canceled,
    Unknown,
    InvalidArgument,
    DeadlineExceeded,
    NotFound,
    AlreadyExists,
    PermissionDenied,
    ResourceExhausted,
    FailedPrecondition,
    Aborted,
    OutOfRange,
    Unimplemented,
    Internal,
    Unavailable,
    DataLoss,
    Unauthenticated,
}

impl Code {
    /// Map a numeric status code. Values outside the known range become `Unknown`.
    pub fn from_u32(value: u32) -> Self {
        match value {
            0 => Self::Ok,
            1 => Self::Canceled,
            3 => Self::InvalidArgument,
            4 => Self::DeadlineExceeded,
            5 => Self::NotFound,
            6 => Self::AlreadyExists,
            7 => Self::PermissionDenied,
            8 => Self::ResourceExhausted,
            9 => Self::FailedPrecondition,
            10 => Self::Aborted,
            11 => Self::OutOfRange,
            12 => Self::Unimplemented,
            13 => Self::Internal,
            14 => Self::Unavailable,
            15 => Self::DataLoss,
            16 => Self::Unauthenticated,
            _ => Self::Unknown,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::Ok => 0,
            Self::Canceled => 1,
            Self::Unknown => 2,
            Self::InvalidArgument => 3,
            Self::DeadlineExceeded => 4,
            Self::NotFound => 5,
            Self::AlreadyExists => 6,
            Self::PermissionDenied => 7,
            Self::ResourceExhausted => 8,
            Self::FailedPrecondition => 9,
            Self::Aborted => 10,
            Self::OutOfRange => 11,
            Self::Unimplemented => 12,
            Self::Internal => 13,
            Self::Unavailable => 14,
            Self::DataLoss => 15,
            Self::Unauthenticated => 16,
        }
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Ok => "OK",
            Self::Canceled => "Canceled",
            Self::Unknown => "Unknown",
            Self::InvalidArgument => "InvalidArgument",
            Self::DeadlineExceeded => "DeadlineExceeded",
            Self::NotFound => "NotFound",
            Self::AlreadyExists => "AlreadyExists",
            Self::PermissionDenied => "PermissionDenied",
            Self::ResourceExhausted => "ResourceExhausted",
            Self::FailedPrecondition => "FailedPrecondition",
            Self::Aborted => "Aborted",
            Self::OutOfRange => "OutOfRange",
            Self::Unimplemented => "Unimplemented",
            Self::Internal => "Internal",
            Self::Unavailable => "Unavailable",
            Self::DataLoss => "DataLoss",
            Self::Unauthenticated => "Unauthenticated",
        };
        f.write_str(s)
    }
}

/// Opaque failure reported by the underlying transport.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct TransportError {
    pub code: Code,
    pub message: String,
}

impl TransportError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Returns `true` if the remote side reported that the deadline elapsed.
    pub fn is_deadline_exceeded(&self) -> bool {
        self.code == Code::DeadlineExceeded
    }
}

/// Which half of a stream session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Send => write!(f, "send"),
            Self::Receive => write!(f, "receive"),
        }
    }
}

/// Errors surfaced to callers of the client.
#[derive(Debug, Error)]
pub enum CallError {
    /// The transport reported a failure.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// The call's deadline elapsed, either locally or as reported by the remote.
    #[error("deadline exceeded")]
    DeadlineExceeded {
        #[source]
        cause: Option<Box<CallError>>,
    },

    /// The caller cancelled the call context.
    #[error("call canceled")]
    Canceled,

    /// No usable credential could be attached to the call.
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    /// Circuit breaker rejected the call; the transport was never invoked.
    #[error("circuit breaker open: {breaker}")]
    CircuitOpen { breaker: String },

    /// One direction of a stream session failed.
    #[error(
        "stream aborted on {direction} path{}",
        .message.map(|n| format!(" at message {n}")).unwrap_or_default()
    )]
    StreamAborted {
        direction: Direction,
        /// 1-based index of the outbound message that failed, for send failures.
        message: Option<u64>,
        #[source]
        cause: Box<CallError>,
        /// Failure of the other direction, if it failed as well.
        secondary: Option<Box<CallError>>,
    },

    /// Invalid client or breaker configuration.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl CallError {
    pub fn deadline_exceeded() -> Self {
        Self::DeadlineExceeded { cause: None }
    }

    /// Status code used when logging the outcome of a call.
    pub fn code(&self) -> Code {
        match self {
            Self::Transport(e) => e.code,
            Self::DeadlineExceeded { .. } => Code::DeadlineExceeded,
            Self::Canceled => Code::Canceled,
            Self::Unauthenticated(_) => Code::Unauthenticated,
            Self::CircuitOpen { .. } => Code::Unavailable,
            Self::StreamAborted { cause, .. } => cause.code(),
            Self::Config(_) => Code::FailedPrecondition,
        }
    }

    /// Returns `true` if the breaker rejected the call locally.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, Self::CircuitOpen { .. })
    }

    /// Returns `true` for a deadline classification, locally or remotely sourced.
    pub fn is_deadline_exceeded(&self) -> bool {
        match self {
            Self::DeadlineExceeded { .. } => true,
            Self::Transport(e) => e.is_deadline_exceeded(),
            _ => false,
        }
    }
}
