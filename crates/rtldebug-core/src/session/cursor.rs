//! Time cursor and navigation.
//!
//! The server does not say how far away the next sample is. Stepping
//! forward from inside the recorded history therefore probes a window
//! after the cursor and widens it geometrically until a later sample shows
//! up. The last successful window width is remembered, since simulations
//! tend to advance in steps of a consistent magnitude.

use rtldebug_types::{DiagnosticKind, SimulationState, TimeInterval, TimePoint};
use tracing::debug;

use super::{QueryOptions, RunOptions, Session};
use crate::error::SessionError;

impl Session {
    /// The time point consumers are looking at.
    pub fn time_cursor(&self) -> TimePoint {
        self.inner.state.lock().cursor
    }

    /// Move the time cursor.
    ///
    /// Every accepted assignment notifies `time_cursor_changed`, even when
    /// the cursor does not move.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::CursorOutOfRange`] if `time` is past the
    /// latest simulated time.
    pub fn set_time_cursor(&self, time: TimePoint) -> Result<(), SessionError> {
        {
            let mut state = self.inner.state.lock();
            let latest = state.status.latest_time;
            if time > latest {
                return Err(SessionError::CursorOutOfRange {
                    requested: time,
                    latest,
                });
            }
            state.cursor = time;
        }
        self.inner.signals.time_cursor_changed.emit(&time);
        Ok(())
    }

    /// Move the cursor to the next sample.
    ///
    /// At the end of the recorded history this runs the simulation for one
    /// sample (when paused) and moves there once it has been recorded; when
    /// the simulation is running or finished it does nothing. Inside the
    /// history it searches forward for the next sample.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::StepSearchExhausted`] if no later sample is
    /// found within the search bound, or any error from the queries issued.
    pub async fn step_forward(&self) -> Result<TimePoint, SessionError> {
        let (cursor, status) = {
            let state = self.inner.state.lock();
            (state.cursor, state.status)
        };
        if cursor < status.latest_time {
            return self.search_forward(cursor).await;
        }
        if status.state != SimulationState::Paused {
            return Ok(cursor);
        }
        let Some(next) = status.next_sample_time else {
            debug!(%cursor, "Paused without a next sample time");
            return Ok(cursor);
        };
        self.run_simulation(RunOptions {
            until_time: Some(next),
            ..RunOptions::default()
        })
        .await?;
        let status = self.wait_while_running().await?;
        if next <= status.latest_time {
            self.set_time_cursor(next)?;
        }
        Ok(self.time_cursor())
    }

    /// Move the cursor to the sample before it.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the query fails or returns nothing.
    pub async fn step_backward(&self) -> Result<TimePoint, SessionError> {
        let cursor = self.time_cursor();
        if cursor == TimePoint::ZERO {
            return Ok(cursor);
        }
        let previous = cursor.offset_by_femtos(-1)?;
        let samples = self
            .query_interval(TimeInterval::point(previous), QueryOptions::default())
            .await?;
        let time = samples
            .first()
            .map(crate::sample::Sample::time)
            .ok_or_else(|| SessionError::Protocol {
                message: format!("query at {previous} returned no samples"),
            })?;
        self.set_time_cursor(time)?;
        Ok(time)
    }

    /// Move the cursor to the next breakpoint diagnostic.
    ///
    /// Searches the recorded history after the cursor first. If there is
    /// none, a paused simulation is run until a breakpoint diagnostic fires
    /// (the pause handler then moves the cursor), and a finished one moves
    /// the cursor to its end.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the search or the run command fails.
    pub async fn continue_forward(&self) -> Result<TimePoint, SessionError> {
        let (cursor, status) = {
            let state = self.inner.state.lock();
            (state.cursor, state.status)
        };
        if cursor < status.latest_time {
            let interval = TimeInterval::new(cursor, status.latest_time)?;
            if let Some(time) = self.search_for_diagnostic(interval).await? {
                self.set_time_cursor(time)?;
                return Ok(time);
            }
        }
        match status.state {
            SimulationState::Paused => {
                self.run_simulation(RunOptions {
                    until_time: None,
                    until_diagnostics: DiagnosticKind::BREAKPOINTS.to_vec(),
                })
                .await?;
            }
            SimulationState::Finished => self.set_time_cursor(status.latest_time)?,
            SimulationState::Running => {}
        }
        Ok(self.time_cursor())
    }

    /// Find the first sample strictly after the start of `interval` that
    /// carries a break, assert or assume diagnostic.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if the query fails.
    pub async fn search_for_diagnostic(
        &self,
        interval: TimeInterval,
    ) -> Result<Option<TimePoint>, SessionError> {
        let samples = self
            .query_interval(interval, QueryOptions::default().with_diagnostics(true))
            .await?;
        Ok(samples
            .iter()
            .filter(|sample| sample.time() > interval.begin())
            .find(|sample| sample.has_breakpoint())
            .map(crate::sample::Sample::time))
    }

    async fn search_forward(&self, from: TimePoint) -> Result<TimePoint, SessionError> {
        let navigation = &self.inner.config.navigation;
        let factor = u128::from(navigation.step_growth_factor);
        let mut step = self.inner.state.lock().forward_step;
        let mut growths: u32 = 0;
        let mut probes: u32 = 0;
        loop {
            let Some(end) = i128::try_from(step)
                .ok()
                .and_then(|step| from.checked_offset(step))
            else {
                break;
            };
            probes = probes.saturating_add(1);
            let samples = self
                .query_interval(TimeInterval::new(from, end)?, QueryOptions::default())
                .await?;
            if let Some(next) = samples.get(1) {
                let time = next.time();
                debug!(from = %from, to = %time, step_femtos = %step, probes, "Stepped forward");
                self.set_time_cursor(time)?;
                return Ok(time);
            }
            if growths >= navigation.max_step_growths {
                break;
            }
            let Some(grown) = step.checked_mul(factor) else {
                break;
            };
            step = grown;
            growths = growths.saturating_add(1);
            self.inner.state.lock().forward_step = step;
        }
        Err(SessionError::StepSearchExhausted { from, probes })
    }
}
