//! Failure taxonomy for a query submission.

use std::time::Duration;
use thiserror::Error;

/// Everything that can end a submission without results.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    /// Form input rejected before any network call.
    #[error("{0}")]
    Validation(String),

    /// A request is already in flight.
    #[error("a query is already running; cancel it first")]
    Busy,

    /// Connection or transport failure.
    #[error("network error: {0}")]
    Transport(String),

    /// Backend answered with a non-2xx status.
    #[error("backend error (HTTP {status}): {message}")]
    Backend { status: u16, message: String },

    /// Response body could not be read as result rows.
    #[error("invalid response: {0}")]
    Decode(String),

    /// Cancelled by the user.
    #[error("query cancelled")]
    Cancelled,

    /// Client-side deadline expired.
    #[error("query timed out after {}", fmt_duration(.0))]
    Timeout(Duration),
}

fn fmt_duration(d: &Duration) -> humantime::FormattedDuration {
    humantime::format_duration(*d)
}

impl QueryError {
    /// Cancellation is a notice, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, QueryError::Cancelled)
    }
}

impl From<reqwest::Error> for QueryError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            QueryError::Decode(e.to_string())
        } else {
            QueryError::Transport(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message_is_distinct() {
        let msg = QueryError::Timeout(Duration::from_secs(300)).to_string();
        assert_eq!(msg, "query timed out after 5m");
    }

    #[test]
    fn test_only_user_cancel_is_cancellation() {
        assert!(QueryError::Cancelled.is_cancellation());
        assert!(!QueryError::Timeout(Duration::from_secs(1)).is_cancellation());
    }
}
