//! The seam between the engine and the transport that talks to the server.
//!
//! The engine never frames, sends or correlates packets itself. A transport
//! implements [`Connection`] (one call per command, each resolving to that
//! command's response) and hands the engine an [`Endpoint`]: the connection
//! plus the stream of unsolicited server events.

use std::sync::Arc;

use async_trait::async_trait;
use rtldebug_types::{ClientGreeting, Command, ErrorPacket, Event, Response, ServerGreeting};
use tokio::sync::mpsc;

/// Errors reported by a [`Connection`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// The connection is gone.
    #[error("connection closed")]
    Closed,

    /// The server answered the command with an error packet.
    #[error("server error {error}: {message}")]
    Server {
        /// Machine-readable error code.
        error: String,
        /// Human-readable explanation.
        message: String,
    },

    /// The transport failed to deliver the command or its response.
    #[error("transport error: {message}")]
    Transport {
        /// Description of the failure.
        message: String,
    },
}

impl From<ErrorPacket> for ConnectionError {
    fn from(packet: ErrorPacket) -> Self {
        Self::Server {
            error: packet.error,
            message: packet.message,
        }
    }
}

/// A request/response channel to the debug server.
///
/// Implementations must resolve every call with the response to that
/// specific command. The engine guarantees at most one call to
/// [`perform`](Connection::perform) is in flight at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Exchange greetings with the server.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError`] if the handshake fails.
    async fn greet(&self, greeting: ClientGreeting) -> Result<ServerGreeting, ConnectionError>;

    /// Send one command and wait for its response.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Server`] when the server replies with an
    /// error packet, or another variant if the transport fails.
    async fn perform(&self, command: Command) -> Result<Response, ConnectionError>;
}

/// Everything a session needs from an established transport.
pub struct Endpoint {
    /// Request/response channel.
    pub connection: Arc<dyn Connection>,
    /// Unsolicited server events, in arrival order. The transport drops the
    /// sender when the server disconnects.
    pub events: mpsc::UnboundedReceiver<Event>,
}

impl Endpoint {
    /// Bundle a connection with its event stream.
    pub fn new(connection: Arc<dyn Connection>, events: mpsc::UnboundedReceiver<Event>) -> Self {
        Self { connection, events }
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint").finish_non_exhaustive()
    }
}
