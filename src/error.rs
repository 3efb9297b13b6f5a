//! Error taxonomy.
//!
//! [`TransportError`] is what the transport hands back: a status code plus
//! the authority's detail string. [`ClientError`] is what the engine
//! surfaces, after [`ErrorKind::classify`] has decided how a failure is
//! handled.

use std::fmt;

use crate::state::game::InvalidGameConfig;

/// Detail string the authority attaches to an expired access token.
pub const TOKEN_EXPIRED_DETAIL: &str = "Token is expired";

/// Status code reported by the transport for a failed call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    Unauthenticated,
    InvalidArgument,
    NotFound,
    FailedPrecondition,
    Unavailable,
    DeadlineExceeded,
    Aborted,
    ResourceExhausted,
    Cancelled,
    Internal,
    Unknown,
}

impl StatusCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "unauthenticated",
            Self::InvalidArgument => "invalid_argument",
            Self::NotFound => "not_found",
            Self::FailedPrecondition => "failed_precondition",
            Self::Unavailable => "unavailable",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::Aborted => "aborted",
            Self::ResourceExhausted => "resource_exhausted",
            Self::Cancelled => "cancelled",
            Self::Internal => "internal",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed remote call, as decoded by the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {detail}")]
pub struct TransportError {
    pub code: StatusCode,
    pub detail: String,
}

impl TransportError {
    pub fn new(code: StatusCode, detail: impl Into<String>) -> Self {
        Self {
            code,
            detail: detail.into(),
        }
    }

    pub fn token_expired() -> Self {
        Self::new(StatusCode::Unauthenticated, TOKEN_EXPIRED_DETAIL)
    }

    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::Unavailable, detail)
    }

    pub fn not_found(detail: impl Into<String>) -> Self {
        Self::new(StatusCode::NotFound, detail)
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::classify(self)
    }
}

/// How a transport failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Refresh the token pair and retry once
    CredentialsExpired,
    /// Credentials rejected for a reason other than expiry
    Unauthenticated,
    /// Malformed request
    ClientFault,
    /// Network or stream failure; the stream is reopened
    Transient,
    /// The authority no longer knows the session
    SessionGone,
    Unknown,
}

impl ErrorKind {
    pub fn classify(err: &TransportError) -> Self {
        match err.code {
            StatusCode::Unauthenticated if err.detail == TOKEN_EXPIRED_DETAIL => {
                Self::CredentialsExpired
            }
            StatusCode::Unauthenticated => Self::Unauthenticated,
            StatusCode::InvalidArgument => Self::ClientFault,
            // a remote cancel is a dropped connection; only the local token cancels
            StatusCode::Unavailable
            | StatusCode::DeadlineExceeded
            | StatusCode::Aborted
            | StatusCode::ResourceExhausted
            | StatusCode::Cancelled => Self::Transient,
            StatusCode::NotFound => Self::SessionGone,
            StatusCode::FailedPrecondition | StatusCode::Internal | StatusCode::Unknown => {
                Self::Unknown
            }
        }
    }
}

/// Errors surfaced to callers and to the error-notification channel.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Only produced when an expiry escapes the retry policy's scope
    #[error("credentials expired")]
    CredentialsExpired,

    #[error("not authenticated: {0}")]
    Unauthenticated(String),

    /// Expiry reported again right after a refresh; the user must register again
    #[error("re-authentication required: {0}")]
    ReauthenticationRequired(String),

    #[error("rejected request: {0}")]
    ClientFault(String),

    #[error("transient failure: {0}")]
    Transient(String),

    #[error("session no longer available: {0}")]
    SessionGone(String),

    /// The caller's session or client was cancelled locally
    #[error("operation cancelled")]
    Cancelled,

    #[error("no signed-in identity")]
    NoIdentity,

    #[error("no active session")]
    NoSession,

    #[error("invalid game config: {0}")]
    InvalidConfig(#[from] InvalidGameConfig),

    #[error("credential storage failed: {0}")]
    Storage(String),

    #[error("client has shut down")]
    Closed,

    #[error("unexpected failure: {0}")]
    Unknown(String),
}

impl ClientError {
    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{err:#}"))
    }

    /// Recoverable failures: the stream is reopened, a one-shot call may be
    /// retried by the caller.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::CredentialsExpired)
    }

    /// Failures that only re-registering can fix.
    pub fn requires_reauthentication(&self) -> bool {
        matches!(
            self,
            Self::Unauthenticated(_) | Self::ReauthenticationRequired(_) | Self::NoIdentity
        )
    }

    /// Failures caused by the request rather than the network.
    pub fn is_client_fault(&self) -> bool {
        matches!(
            self,
            Self::ClientFault(_) | Self::Unauthenticated(_) | Self::InvalidConfig(_)
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<TransportError> for ClientError {
    fn from(err: TransportError) -> Self {
        match ErrorKind::classify(&err) {
            ErrorKind::CredentialsExpired => Self::CredentialsExpired,
            ErrorKind::Unauthenticated => Self::Unauthenticated(err.detail),
            ErrorKind::ClientFault => Self::ClientFault(err.detail),
            ErrorKind::Transient => Self::Transient(err.to_string()),
            ErrorKind::SessionGone => Self::SessionGone(err.detail),
            ErrorKind::Unknown => Self::Unknown(err.to_string()),
        }
    }
}

pub type Result<T, E = ClientError> = std::result::Result<T, E>;
