use std::fmt;

/// Machine-readable error codes for client-friendly decision making.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InvalidOrExpiredCode,
    SessionNotFound,
    Unauthorized,
    InvalidRequest,
    AlreadyJoined,
    NoEligibleGroup,
    AlreadyAtOrAboveRequestedCount,
    InsufficientPool,
    InternalFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::InvalidOrExpiredCode => "E1001",
            Self::SessionNotFound => "E1002",
            Self::Unauthorized => "E1003",
            Self::InvalidRequest => "E1004",
            Self::AlreadyJoined => "E2001",
            Self::NoEligibleGroup => "E2002",
            Self::AlreadyAtOrAboveRequestedCount => "E3001",
            Self::InsufficientPool => "E3002",
            Self::InternalFailure => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::InvalidOrExpiredCode => "Access code not found or expired",
            Self::SessionNotFound => "Session not found",
            Self::Unauthorized => "Not the host of this session",
            Self::InvalidRequest => "Invalid request",
            Self::AlreadyJoined => "Member already joined",
            Self::NoEligibleGroup => "No eligible group",
            Self::AlreadyAtOrAboveRequestedCount => "Selection quota already met",
            Self::InsufficientPool => "Not enough unselected members",
            Self::InternalFailure => "Internal failure",
        }
    }

    /// Optional remediation hint that can be surfaced to hosts and participants.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::InvalidOrExpiredCode => Some("Ask the host for a fresh access code."),
            Self::SessionNotFound => {
                Some("Check whether the code belongs to a grouping or a selection session.")
            }
            Self::Unauthorized => Some("Run the command as the host who created the session."),
            Self::InvalidRequest => None,
            Self::AlreadyJoined => Some("Each member identifier may join a session once."),
            Self::NoEligibleGroup => None,
            Self::AlreadyAtOrAboveRequestedCount => {
                Some("Request a larger count, or clear selections and run again.")
            }
            Self::InsufficientPool => Some("Wait for more members to join or lower the count."),
            Self::InternalFailure => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Failure returned by every engine operation.
///
/// All variants except [`EngineError::Internal`] are validation failures:
/// they are detected before any write and leave the store untouched.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("access code '{code}' not found or expired")]
    InvalidOrExpiredCode { code: String },

    #[error("no {kind} session is attached to access code '{code}'")]
    SessionNotFound { code: String, kind: &'static str },

    #[error("host '{host_id}' does not own this session")]
    Unauthorized { host_id: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("member '{member_identifier}' already joined this session")]
    AlreadyJoined { member_identifier: String },

    #[error("all groups are either full or would violate preferential grouping rules")]
    NoEligibleGroup,

    #[error(
        "{already_selected} members are already selected, which meets or exceeds the requested {requested}"
    )]
    AlreadyAtOrAboveRequestedCount {
        already_selected: usize,
        requested: usize,
    },

    #[error("cannot select {needed} more members: only {available} unselected members remain")]
    InsufficientPool { needed: usize, available: usize },

    /// The cause chain is for logs only; `Display` stays generic.
    #[error("internal failure")]
    Internal(#[from] anyhow::Error),
}

impl EngineError {
    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidOrExpiredCode { .. } => ErrorCode::InvalidOrExpiredCode,
            Self::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            Self::Unauthorized { .. } => ErrorCode::Unauthorized,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
            Self::AlreadyJoined { .. } => ErrorCode::AlreadyJoined,
            Self::NoEligibleGroup => ErrorCode::NoEligibleGroup,
            Self::AlreadyAtOrAboveRequestedCount { .. } => {
                ErrorCode::AlreadyAtOrAboveRequestedCount
            }
            Self::InsufficientPool { .. } => ErrorCode::InsufficientPool,
            Self::Internal(_) => ErrorCode::InternalFailure,
        }
    }

    /// Optional remediation hint.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// `true` for failures caused by the request rather than the store.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        !matches!(self, Self::Internal(_))
    }

    /// `true` when the store reported lock contention and the whole request
    /// can be replayed.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        let Self::Internal(err) = self else {
            return false;
        };
        err.chain()
            .filter_map(|cause| cause.downcast_ref::<rusqlite::Error>())
            .any(is_locked_error)
    }

    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Internal(err.into())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(err.into())
    }
}

/// Check if a rusqlite error is a lock/busy error.
fn is_locked_error(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => matches!(
            err.code,
            rusqlite::ffi::ErrorCode::DatabaseBusy | rusqlite::ffi::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}
