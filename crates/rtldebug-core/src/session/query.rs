//! Request lane, reference binding and interval queries.
//!
//! Bindings are synchronous from the caller's point of view: the new epoch
//! is recorded and the `reference_items` command is queued immediately. The
//! lane sends every queued binding before the next command, so a query
//! issued right after a bind always reaches the server after it.

use rtldebug_types::{Command, ITEM_VALUES_ENCODING, Response, TimeInterval};
use tracing::{debug, error};

use super::{PendingBinding, QueryOptions, Session};
use crate::connection::ConnectionError;
use crate::error::{ReferenceError, SessionError};
use crate::reference::{Reference, UnboundReference};
use crate::sample::Sample;

impl Session {
    // -----------------------------------------------------------------------
    // Request lane
    // -----------------------------------------------------------------------

    /// Send one command through the lane, returning connection errors as-is.
    pub(crate) async fn perform_raw(&self, command: Command) -> Result<Response, ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::Closed);
        }
        let _lane = self.inner.lane.lock().await;
        self.send_pending_bindings().await;
        let name = command.name();
        debug!(command = name, "Sending command");
        let result = self.inner.connection.perform(command).await;
        if let Err(err) = &result {
            debug!(command = name, error = %err, "Command failed");
        }
        result
    }

    /// Send one command through the lane.
    pub(crate) async fn perform(&self, command: Command) -> Result<Response, SessionError> {
        if self.is_closed() {
            return Err(SessionError::Closed);
        }
        Ok(self.perform_raw(command).await?)
    }

    /// Send queued bindings. The caller must hold the lane.
    async fn send_pending_bindings(&self) {
        loop {
            let Some(binding) = self.inner.bindings.lock().queue.pop_front() else {
                break;
            };
            let PendingBinding {
                reference,
                epoch,
                items,
            } = binding;
            let unbinding = items.is_none();
            let command = Command::ReferenceItems {
                reference: reference.clone(),
                items,
            };
            match self.inner.connection.perform(command).await {
                Ok(Response::ReferenceItems {}) => {
                    debug!(reference = %reference, epoch, unbinding, "Reference bound");
                }
                Ok(other) => {
                    error!(
                        reference = %reference,
                        epoch,
                        response = other.name(),
                        "Unexpected response to reference binding"
                    );
                }
                Err(err) => {
                    error!(reference = %reference, epoch, error = %err, "Failed to bind reference");
                }
            }
        }
    }

    async fn flush_bindings(&self) {
        if self.is_closed() {
            return;
        }
        let _lane = self.inner.lane.lock().await;
        self.send_pending_bindings().await;
    }

    fn schedule_binding_flush(&self) {
        let session = self.clone();
        self.spawn(async move { session.flush_bindings().await });
    }

    // -----------------------------------------------------------------------
    // References
    // -----------------------------------------------------------------------

    /// Bind `unbound` under `name`, replacing whatever the name was bound to.
    ///
    /// Returns immediately; the binding is sent to the server ahead of the
    /// next command. Every earlier [`Reference`] with this name becomes
    /// stale. Binding failures are logged, not returned.
    pub fn bind_reference(&self, name: &str, unbound: UnboundReference) -> Reference {
        let reference = {
            let mut bindings = self.inner.bindings.lock();
            let epoch = bindings.next_epoch;
            bindings.next_epoch = epoch.saturating_add(1);
            bindings.epochs.insert(name.to_owned(), epoch);
            bindings.queue.push_back(PendingBinding {
                reference: name.to_owned(),
                epoch,
                items: Some(unbound.items()),
            });
            Reference::new(name, epoch, unbound)
        };
        debug!(
            reference = name,
            epoch = reference.epoch(),
            items = reference.unbound().len(),
            "Binding reference"
        );
        self.schedule_binding_flush();
        reference
    }

    /// Release the server-side binding of `name`.
    ///
    /// Every existing [`Reference`] with this name becomes dangling.
    pub fn unbind_reference(&self, name: &str) {
        {
            let mut bindings = self.inner.bindings.lock();
            if bindings.epochs.remove(name).is_none() {
                return;
            }
            let epoch = bindings.next_epoch;
            bindings.next_epoch = epoch.saturating_add(1);
            bindings.queue.push_back(PendingBinding {
                reference: name.to_owned(),
                epoch,
                items: None,
            });
        }
        debug!(reference = name, "Unbinding reference");
        self.schedule_binding_flush();
    }

    /// Check that `reference` is the latest binding of its name.
    ///
    /// # Errors
    ///
    /// Returns [`ReferenceError::Dangling`] if the name is not bound and
    /// [`ReferenceError::OutOfDate`] if it was rebound since.
    pub fn validate_reference(&self, reference: &Reference) -> Result<(), ReferenceError> {
        let current = self.inner.bindings.lock().epochs.get(reference.name()).copied();
        match current {
            None => Err(ReferenceError::Dangling {
                name: reference.name().to_owned(),
            }),
            Some(current) if current != reference.epoch() => Err(ReferenceError::OutOfDate {
                name: reference.name().to_owned(),
                epoch: reference.epoch(),
                current,
            }),
            Some(_) => Ok(()),
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Read samples in `interval`.
    ///
    /// The first sample describes the state at the start of the interval
    /// and carries the time it was recorded at.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Reference`] if the reference is stale (before
    /// or after the query), [`SessionError::Protocol`] if item values do not
    /// decode, or [`SessionError::Connection`] if the command fails.
    pub async fn query_interval(
        &self,
        interval: TimeInterval,
        options: QueryOptions,
    ) -> Result<Vec<Sample>, SessionError> {
        let QueryOptions {
            reference,
            diagnostics,
            collapse,
        } = options;
        if let Some(reference) = &reference {
            self.validate_reference(reference)?;
        }
        let command = Command::QueryInterval {
            interval,
            collapse,
            items: reference.as_ref().map(|r| r.name().to_owned()),
            item_values_encoding: reference.as_ref().map(|_| ITEM_VALUES_ENCODING.to_owned()),
            diagnostics,
        };
        let samples = match self.perform(command).await? {
            Response::QueryInterval { samples } => samples,
            other => return Err(SessionError::unexpected("query_interval", &other)),
        };
        // A rebind while the query was in flight may have changed the layout.
        if let Some(reference) = &reference {
            self.validate_reference(reference)?;
        }
        let unbound = reference.as_ref().map(Reference::shared_unbound);
        samples
            .into_iter()
            .map(|wire| Sample::decode(wire, unbound.as_ref()))
            .collect()
    }

    /// Read the sample at the time cursor.
    ///
    /// # Errors
    ///
    /// As [`query_interval`](Self::query_interval); additionally
    /// [`SessionError::Protocol`] if the server returns no sample.
    pub async fn query_at_cursor(&self, options: QueryOptions) -> Result<Sample, SessionError> {
        let cursor = self.time_cursor();
        let samples = self
            .query_interval(TimeInterval::point(cursor), options)
            .await?;
        samples
            .into_iter()
            .next()
            .ok_or_else(|| SessionError::Protocol {
                message: format!("query at {cursor} returned no samples"),
            })
    }
}
