//! Simulation status, run/pause commands and server events.
//!
//! # Status Tracking
//!
//! A refresh cancels any pending poll, fetches the status and publishes it
//! when it changed. While the simulation runs, the status is re-polled at
//! the configured interval until it stops.
//!
//! Cancelling a poll only ends its wait. A poll whose status command is
//! already on the wire still receives the response; it just does not
//! publish it, since the refresh that superseded it reads a newer status.
//!
//! # Pause Events
//!
//! - `until_time` -- refresh, then publish [`PauseReason::TimeReached`].
//! - `until_diagnostics` -- refresh, search the newly simulated interval for
//!   the breakpoint diagnostic, move the cursor there and publish
//!   [`PauseReason::DiagnosticsReached`].
//! - `simulation_finished` -- refresh, then publish `simulation_finished`.

use std::sync::{Arc, Weak};

use rtldebug_types::{
    Command, Event, PauseCause, Response, ServerPacket, SimulationState, TimeInterval, TimePoint,
};
use tokio::sync::{Notify, mpsc};
use tracing::{debug, error, info, warn};

use super::{PauseReason, RunOptions, Session, SessionInner, SimulationStatus};
use crate::error::SessionError;

impl Session {
    /// Last simulation status received from the server.
    pub fn simulation_status(&self) -> SimulationStatus {
        self.inner.state.lock().status
    }

    /// Whether the simulation is producing samples.
    pub fn is_simulation_running(&self) -> bool {
        self.simulation_status().is_running()
    }

    /// Fetch the simulation status now and publish it if it changed.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the status query fails.
    pub async fn refresh_simulation_status(&self) -> Result<SimulationStatus, SessionError> {
        self.cancel_status_poll();
        let status = self.fetch_status().await?;
        self.publish_status(status, None);
        if status.is_running() {
            self.schedule_status_poll();
        }
        Ok(status)
    }

    /// Start or resume the simulation.
    ///
    /// Item values are always sampled. Completion is reported through
    /// [`SessionSignals::simulation_paused`](super::SessionSignals) or
    /// `simulation_finished`.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the run command or the follow-up status
    /// query fails.
    pub async fn run_simulation(&self, options: RunOptions) -> Result<(), SessionError> {
        let RunOptions {
            until_time,
            until_diagnostics,
        } = options;
        info!(
            until_time = ?until_time.map(|time| time.to_string()),
            until_diagnostics = ?until_diagnostics,
            "Running simulation"
        );
        self.note_run_origin();
        let command = Command::RunSimulation {
            until_time,
            until_diagnostics,
            sample_item_values: true,
        };
        match self.perform(command).await? {
            Response::RunSimulation {} => {}
            other => return Err(SessionError::unexpected("run_simulation", &other)),
        }
        self.refresh_simulation_status().await?;
        self.inner.signals.simulation_ran.emit(&());
        Ok(())
    }

    /// Pause a running simulation and return the time it paused at.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the pause command or the follow-up status
    /// query fails.
    pub async fn pause_simulation(&self) -> Result<TimePoint, SessionError> {
        let time = match self.perform(Command::PauseSimulation).await? {
            Response::PauseSimulation { time } => time,
            other => return Err(SessionError::unexpected("pause_simulation", &other)),
        };
        info!(%time, "Simulation paused on request");
        self.refresh_simulation_status().await?;
        Ok(time)
    }

    /// Wait until the simulation is no longer running.
    ///
    /// Wakes on every status change and re-polls on its own if no change
    /// arrives within the poll interval.
    pub(crate) async fn wait_while_running(&self) -> Result<SimulationStatus, SessionError> {
        let mut changes = self.inner.signals.simulation_status_changed.listen();
        let interval = self.inner.config.session.status_poll_interval();
        loop {
            let status = self.simulation_status();
            if !status.is_running() {
                return Ok(status);
            }
            if self.is_closed() {
                return Err(SessionError::Closed);
            }
            tokio::select! {
                change = changes.next() => {
                    if change.is_none() {
                        return Err(SessionError::Closed);
                    }
                }
                () = tokio::time::sleep(interval) => {
                    self.refresh_simulation_status().await?;
                }
            }
        }
    }

    /// Remember where the simulation stood when a run was requested.
    pub(crate) fn note_run_origin(&self) {
        let mut state = self.inner.state.lock();
        state.run_origin = Some(state.status.latest_time);
    }

    // -----------------------------------------------------------------------
    // Status polling
    // -----------------------------------------------------------------------

    async fn fetch_status(&self) -> Result<SimulationStatus, SessionError> {
        match self.perform(Command::GetSimulationStatus).await? {
            Response::GetSimulationStatus {
                status,
                latest_time,
                next_sample_time,
            } => Ok(SimulationStatus {
                state: status,
                latest_time,
                next_sample_time: if status == SimulationState::Paused {
                    next_sample_time
                } else {
                    None
                },
            }),
            other => Err(SessionError::unexpected("get_simulation_status", &other)),
        }
    }

    /// Record `status` and emit it if it changed.
    ///
    /// A status read by a poll is dropped when `poll` is no longer the
    /// current poll generation. Returns whether the status was recorded.
    fn publish_status(&self, status: SimulationStatus, poll: Option<u64>) -> bool {
        let changed = {
            let mut state = self.inner.state.lock();
            if poll.is_some_and(|generation| generation != state.status_poll) {
                return false;
            }
            let previous = state.status;
            state.status = status;
            previous.state != status.state
                || previous.latest_time != status.latest_time
                || (previous.next_sample_time.is_none() && status.next_sample_time.is_some())
        };
        if changed {
            debug!(
                state = ?status.state,
                latest_time = %status.latest_time,
                "Simulation status changed"
            );
            self.inner.signals.simulation_status_changed.emit(&status);
        }
        true
    }

    fn schedule_status_poll(&self) {
        let generation = {
            let mut state = self.inner.state.lock();
            state.status_poll = state.status_poll.wrapping_add(1);
            state.status_poll
        };
        let weak = Arc::downgrade(&self.inner);
        let interval = self.inner.config.session.status_poll_interval();
        self.spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                let session = Session { inner };
                if !session.is_current_poll(generation) {
                    return;
                }
                match session.fetch_status().await {
                    Ok(status) => {
                        let published = session.publish_status(status, Some(generation));
                        if !(published && status.is_running()) {
                            return;
                        }
                    }
                    Err(SessionError::Closed) => return,
                    Err(err) => {
                        warn!(error = %err, "Simulation status poll failed");
                        return;
                    }
                }
            }
        });
    }

    fn cancel_status_poll(&self) {
        let mut state = self.inner.state.lock();
        state.status_poll = state.status_poll.wrapping_add(1);
    }

    fn is_current_poll(&self, generation: u64) -> bool {
        let state = self.inner.state.lock();
        !state.closed && state.status_poll == generation
    }

    // -----------------------------------------------------------------------
    // Events
    // -----------------------------------------------------------------------

    fn forward_to_links(&self, packet: &ServerPacket) {
        let links = self.inner.links.lock();
        for (id, link) in links.iter() {
            if link.send(packet.clone()).is_err() {
                debug!(link = %id, "Secondary link receiver gone");
            }
        }
    }

    async fn handle_event(&self, event: Event) -> Result<(), SessionError> {
        match event {
            Event::SimulationPaused {
                time,
                cause: PauseCause::UntilTime,
            } => {
                info!(%time, cause = "until_time", "Simulation paused");
                self.clear_run_origin();
                self.refresh_simulation_status().await?;
                self.inner
                    .signals
                    .simulation_paused
                    .emit(&PauseReason::TimeReached);
            }
            Event::SimulationPaused {
                time,
                cause: PauseCause::UntilDiagnostics,
            } => {
                info!(%time, cause = "until_diagnostics", "Simulation paused");
                self.handle_diagnostics_pause().await?;
            }
            Event::SimulationFinished { time } => {
                info!(%time, "Simulation finished");
                self.clear_run_origin();
                self.refresh_simulation_status().await?;
                self.inner.signals.simulation_finished.emit(&());
            }
        }
        Ok(())
    }

    /// Locate the diagnostic that paused the simulation.
    ///
    /// The event time is not where the diagnostic was recorded, so the
    /// interval simulated by the last run is searched instead. When the run
    /// was started elsewhere, the search starts from the latest time known
    /// before the pause.
    async fn handle_diagnostics_pause(&self) -> Result<(), SessionError> {
        let before = {
            let mut state = self.inner.state.lock();
            state.run_origin.take().unwrap_or(state.status.latest_time)
        };
        let after = self.refresh_simulation_status().await?.latest_time;
        let interval = TimeInterval::new(before, after.max(before))?;
        match self.search_for_diagnostic(interval).await? {
            Some(time) => {
                self.set_time_cursor(time)?;
                self.inner
                    .signals
                    .simulation_paused
                    .emit(&PauseReason::DiagnosticsReached);
            }
            None => {
                error!(
                    %before,
                    %after,
                    "Simulation paused on a diagnostic but none was found"
                );
            }
        }
        Ok(())
    }

    fn clear_run_origin(&self) {
        self.inner.state.lock().run_origin = None;
    }
}

/// Consume server events until the server disconnects or the session goes
/// away. Every event is forwarded to secondary links before it is handled.
///
/// Closing the session ends the loop between events; an event already being
/// handled runs to completion.
pub(super) async fn run_event_loop(
    session: Weak<SessionInner>,
    shutdown: Arc<Notify>,
    mut events: mpsc::UnboundedReceiver<Event>,
) {
    loop {
        let event = tokio::select! {
            biased;
            () = shutdown.notified() => return,
            event = events.recv() => event,
        };
        let Some(event) = event else {
            break;
        };
        let Some(inner) = session.upgrade() else {
            return;
        };
        let session = Session { inner };
        session.forward_to_links(&ServerPacket::Event(event.clone()));
        if let Err(err) = session.handle_event(event).await {
            warn!(error = %err, "Failed to handle server event");
        }
    }
    if let Some(inner) = session.upgrade() {
        info!(session = %inner.id, "Server disconnected");
        inner.links.lock().clear();
    }
}
