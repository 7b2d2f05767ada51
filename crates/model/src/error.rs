use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};

/// The kind of error that occurred.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// The engine has no usable context (not loaded or released).
    ContextUnavailable,
    /// The request is malformed, e.g. messages the chat template rejects.
    InvalidInput,
    /// The engine is rate limited. Callers may retry later.
    RateLimitExceeded,
    /// Any other errors.
    Other,
}

impl ErrorKind {
    /// Returns whether a request failing with this kind may succeed if
    /// sent again unchanged.
    #[inline]
    pub fn is_transient(self) -> bool {
        matches!(self, ErrorKind::RateLimitExceeded)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ContextUnavailable => write!(f, "Context unavailable"),
            ErrorKind::InvalidInput => write!(f, "Invalid input"),
            ErrorKind::RateLimitExceeded => write!(f, "Rate limit exceeded"),
            ErrorKind::Other => write!(f, "Other error"),
        }
    }
}
