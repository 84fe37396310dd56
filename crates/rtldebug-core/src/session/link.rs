//! Secondary links: extra protocol clients sharing one session.
//!
//! A waveform viewer or similar tool speaks the debug protocol itself but
//! cannot open a second connection to the server. A [`SecondaryLink`]
//! gives it a packet-level view of the session's connection: commands go
//! through the session's request lane, responses come back only to the
//! link that sent the command, and every server event is copied to every
//! link.

use rtldebug_types::{ClientPacket, Command, ErrorPacket, LinkId, ServerPacket};
use tokio::sync::mpsc;
use tracing::{debug, info};

use super::Session;
use crate::connection::ConnectionError;
use crate::error::SessionError;

impl Session {
    /// Attach a new secondary link.
    ///
    /// A link created on a closed session ends immediately.
    pub fn create_secondary_link(&self) -> SecondaryLink {
        let id = LinkId::new();
        let (sender, inbox) = mpsc::unbounded_channel();
        if self.is_closed() {
            drop(sender);
        } else {
            self.inner.links.lock().insert(id, sender);
            info!(link = %id, "Secondary link attached");
        }
        SecondaryLink {
            id,
            session: self.clone(),
            inbox,
        }
    }

    /// Number of attached secondary links.
    pub fn secondary_link_count(&self) -> usize {
        self.inner.links.lock().len()
    }
}

/// A packet-level client multiplexed onto a session's connection.
///
/// Dropping the link detaches it.
pub struct SecondaryLink {
    id: LinkId,
    session: Session,
    inbox: mpsc::UnboundedReceiver<ServerPacket>,
}

impl SecondaryLink {
    /// Identifier used in log output.
    pub const fn id(&self) -> LinkId {
        self.id
    }

    /// Send a packet on behalf of the secondary client.
    ///
    /// A greeting is answered with the server greeting the session received.
    /// A command is performed through the session's request lane; its
    /// response (or error packet) is delivered to this link's inbox before
    /// this call returns.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::GreetingMismatch`] if the greeting version
    /// differs from the server's, [`SessionError::Closed`] if the link has
    /// ended, or [`SessionError::Connection`] if the transport fails.
    pub async fn send(&self, packet: ClientPacket) -> Result<(), SessionError> {
        match packet {
            ClientPacket::Greeting(greeting) => {
                let server = self.session.server_greeting();
                if greeting.version != server.version {
                    return Err(SessionError::GreetingMismatch {
                        requested: greeting.version,
                        server: server.version,
                    });
                }
                self.deliver(ServerPacket::Greeting(server.clone()))
            }
            ClientPacket::Command(command) => {
                if matches!(command, Command::RunSimulation { .. }) {
                    self.session.note_run_origin();
                }
                debug!(link = %self.id, command = command.name(), "Forwarding link command");
                let reply = match self.session.perform_raw(command).await {
                    Ok(response) => ServerPacket::Response(response),
                    Err(ConnectionError::Server { error, message }) => {
                        ServerPacket::Error(ErrorPacket { error, message })
                    }
                    Err(err) => return Err(err.into()),
                };
                self.deliver(reply)
            }
        }
    }

    /// Wait for the next packet addressed to this link.
    ///
    /// Returns `None` once the session is closed or the server disconnects.
    pub async fn recv(&mut self) -> Option<ServerPacket> {
        self.inbox.recv().await
    }

    fn deliver(&self, packet: ServerPacket) -> Result<(), SessionError> {
        let links = self.session.inner.links.lock();
        let sender = links.get(&self.id).ok_or(SessionError::Closed)?;
        sender.send(packet).map_err(|_closed| SessionError::Closed)
    }
}

impl Drop for SecondaryLink {
    fn drop(&mut self) {
        if self.session.inner.links.lock().remove(&self.id).is_some() {
            info!(link = %self.id, "Secondary link detached");
        }
    }
}

impl std::fmt::Debug for SecondaryLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecondaryLink")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
