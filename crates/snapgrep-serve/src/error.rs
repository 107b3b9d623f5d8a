use std::error::Error;
use std::fmt::{self, Display};

/// Typed errors surfaced by the store and the search service.
///
/// Variants carry rendered strings so one error can be delivered to every
/// waiter attached to the same in-flight fetch. `temporary()` marks the
/// class where a retry may help (mapped to 503 at the transport).
#[derive(Debug, Clone)]
pub enum StoreError {
    /// The commit was not a resolved 40-hex identifier, the repo name was
    /// empty, or the pattern failed to compile. Never retried.
    InvalidRequest(String),
    /// Upstream fetch failure; `temporary` distinguishes retryable hiccups
    /// (malformed archive, connection reset) from terminal ones.
    Fetch { message: String, temporary: bool },
    /// The caller's fetch deadline elapsed. The fetch itself keeps running
    /// in the background for later callers.
    FetchTimeout,
    /// A cached snapshot failed to open as a valid container even after
    /// the bounded refetch attempts.
    Corrupt(String),
    /// Disk I/O or an internal invariant failure. Logged, never retried.
    Internal(String),
}

impl StoreError {
    pub fn temporary(&self) -> bool {
        matches!(self, StoreError::Fetch { temporary: true, .. })
    }
}

impl Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::InvalidRequest(s) => write!(f, "invalid request: {}", s),
            StoreError::Fetch { message, temporary } => {
                if *temporary {
                    write!(f, "fetch failed (temporary): {}", message)
                } else {
                    write!(f, "fetch failed: {}", message)
                }
            }
            StoreError::FetchTimeout => write!(f, "timed out waiting for archive fetch"),
            StoreError::Corrupt(s) => write!(f, "corrupt snapshot: {}", s),
            StoreError::Internal(s) => write!(f, "internal error: {}", s),
        }
    }
}

impl Error for StoreError {}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Internal(e.to_string())
    }
}

impl From<anyhow::Error> for StoreError {
    fn from(e: anyhow::Error) -> Self {
        StoreError::Internal(format!("{:#}", e))
    }
}

impl From<snapgrep::CompileError> for StoreError {
    fn from(e: snapgrep::CompileError) -> Self {
        StoreError::InvalidRequest(e.to_string())
    }
}
