//! Error types for sessions and references.
//!
//! [`SessionError`] is the error type of every fallible session operation.
//! It wraps the lower-level failures (connection, stale references, time
//! arithmetic) and adds the navigation-specific ones.

use rtldebug_types::{TimeError, TimePoint};

use crate::connection::ConnectionError;

/// A query named a reference the session cannot vouch for.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceError {
    /// The reference name was never bound in this session.
    #[error("reference {name:?} is not bound")]
    Dangling {
        /// The reference name.
        name: String,
    },

    /// The reference name was rebound after this reference was created.
    #[error("reference {name:?} epoch {epoch} is out of date (current epoch {current})")]
    OutOfDate {
        /// The reference name.
        name: String,
        /// Epoch carried by the stale reference.
        epoch: u64,
        /// Epoch of the latest binding.
        current: u64,
    },
}

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The connection failed or the server rejected a command.
    #[error("connection error: {source}")]
    Connection {
        /// The underlying connection error.
        #[from]
        source: ConnectionError,
    },

    /// A query used a stale or unknown reference.
    #[error("reference error: {source}")]
    Reference {
        /// The underlying reference error.
        #[from]
        source: ReferenceError,
    },

    /// The time cursor was set past the latest simulated time.
    #[error("time cursor {requested} is beyond the latest time {latest}")]
    CursorOutOfRange {
        /// The rejected cursor position.
        requested: TimePoint,
        /// Latest time for which samples exist.
        latest: TimePoint,
    },

    /// Stepping forward found no later sample within the search bound.
    #[error("no sample to step forward to from {from} after {probes} probes")]
    StepSearchExhausted {
        /// Cursor position the search started from.
        from: TimePoint,
        /// Number of queries issued.
        probes: u32,
    },

    /// The server answered a command with the wrong kind of response.
    #[error("unexpected {response} response to {command}")]
    UnexpectedResponse {
        /// Wire name of the command.
        command: &'static str,
        /// Wire name of the response received.
        response: &'static str,
    },

    /// The server sent a response the engine cannot decode.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the violation.
        message: String,
    },

    /// A secondary link greeted with a version the server does not speak.
    #[error("greeting version {requested} does not match server version {server}")]
    GreetingMismatch {
        /// Version sent by the secondary client.
        requested: u32,
        /// Version spoken by the server.
        server: u32,
    },

    /// Simulated time arithmetic failed.
    #[error("time error: {source}")]
    Time {
        /// The underlying time error.
        #[from]
        source: TimeError,
    },

    /// The session or secondary link has been closed.
    #[error("session closed")]
    Closed,
}

impl SessionError {
    /// Build an [`SessionError::UnexpectedResponse`].
    pub(crate) const fn unexpected(command: &'static str, response: &rtldebug_types::Response) -> Self {
        Self::UnexpectedResponse {
            command,
            response: response.name(),
        }
    }
}
