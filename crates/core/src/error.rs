//! Error types for lockscope
//!
//! This module defines the error taxonomy used throughout the harness.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! Errors carry messages rather than sources so they are `Clone`: a finished
//! background statement caches its result and may hand it out more than once.

use crate::types::SessionId;
use std::io;
use thiserror::Error;

/// Result type alias for harness operations
pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

/// What kind of statement failure the server reported
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementErrorKind {
    /// Blocked past the server's lock wait timeout
    LockWaitTimeout,
    /// Chosen as a deadlock victim
    Deadlock,
    /// Canceled by a statement/execution timeout
    Canceled,
    /// Anything else: syntax, constraint, permission, ...
    Other,
}

impl StatementErrorKind {
    /// Classify a server error from its SQLSTATE/vendor code and message
    ///
    /// MySQL reports lock wait timeouts as error 1205 with SQLSTATE `HY000`,
    /// so the message is consulted as well as the code.
    pub fn classify(code: Option<&str>, message: &str) -> Self {
        let lower = message.to_ascii_lowercase();
        match code {
            Some("55P03") | Some("1205") => return StatementErrorKind::LockWaitTimeout,
            Some("40P01") | Some("1213") => return StatementErrorKind::Deadlock,
            Some("57014") | Some("3024") => return StatementErrorKind::Canceled,
            _ => {}
        }
        if lower.contains("lock wait timeout") || lower.contains("lock timeout") {
            StatementErrorKind::LockWaitTimeout
        } else if lower.contains("deadlock") {
            StatementErrorKind::Deadlock
        } else if lower.contains("maximum statement execution time")
            || lower.contains("canceling statement due to statement timeout")
        {
            StatementErrorKind::Canceled
        } else {
            StatementErrorKind::Other
        }
    }
}

/// Error types for the harness
#[derive(Debug, Clone, Error)]
pub enum HarnessError {
    /// Server unreachable or authentication failed. Fatal for the test.
    #[error("Connection error ({endpoint}): {message}")]
    Connection {
        /// `engine://user@host:port/database`
        endpoint: String,
        /// Driver message
        message: String,
    },

    /// The server rejected a statement
    #[error("Statement error [{}]: {message}", .code.as_deref().unwrap_or("-"))]
    Statement {
        /// SQLSTATE or vendor error code, when the server sent one
        code: Option<String>,
        /// Classified failure mode
        kind: StatementErrorKind,
        /// Server-reported message
        message: String,
        /// The statement that failed
        sql: String,
    },

    /// Rendered table differs from the expected literal
    #[error("Expected:\n{expected}\n\nActual:\n{actual}")]
    AssertionMismatch {
        /// Whitespace-normalized expected table
        expected: String,
        /// Rendered actual table
        actual: String,
    },

    /// Closing a connection failed during teardown
    #[error("Cleanup error for session {session}: {message}")]
    Cleanup {
        /// Session being closed
        session: SessionId,
        /// What went wrong
        message: String,
    },

    /// The session was already closed
    #[error("Session {0} is closed")]
    SessionClosed(SessionId),

    /// A background statement task panicked or was aborted
    #[error("Background task failed: {0}")]
    TaskFailed(String),

    /// Invalid or missing configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error (config or log files)
    #[error("I/O error: {0}")]
    Io(String),
}

impl HarnessError {
    /// Statement error with its kind derived from code and message
    pub fn statement(
        code: Option<String>,
        message: impl Into<String>,
        sql: impl Into<String>,
    ) -> Self {
        let message = message.into();
        let kind = StatementErrorKind::classify(code.as_deref(), &message);
        HarnessError::Statement {
            code,
            kind,
            message,
            sql: sql.into(),
        }
    }

    /// Connection error
    pub fn connection(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        HarnessError::Connection {
            endpoint: endpoint.into(),
            message: message.into(),
        }
    }

    /// Configuration error
    pub fn config(message: impl Into<String>) -> Self {
        HarnessError::Config(message.into())
    }

    /// Kind of a statement error, `None` for every other variant
    pub fn statement_kind(&self) -> Option<StatementErrorKind> {
        match self {
            HarnessError::Statement { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// True if the server gave up waiting for a lock
    pub fn is_lock_wait_timeout(&self) -> bool {
        self.statement_kind() == Some(StatementErrorKind::LockWaitTimeout)
    }

    /// True if the server picked this statement as a deadlock victim
    pub fn is_deadlock(&self) -> bool {
        self.statement_kind() == Some(StatementErrorKind::Deadlock)
    }

    /// True for connection failures
    pub fn is_connection(&self) -> bool {
        matches!(self, HarnessError::Connection { .. })
    }
}

impl From<io::Error> for HarnessError {
    fn from(e: io::Error) -> Self {
        HarnessError::Io(e.to_string())
    }
}
