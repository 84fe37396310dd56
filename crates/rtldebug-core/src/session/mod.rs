//! Debug session: the client side of one connection to a debug server.
//!
//! A [`Session`] owns everything the engine knows about the remote
//! simulation: the memoized namespace, the reference epochs, the latest
//! simulation status and the time cursor. It is a cheap, cloneable handle;
//! all clones share the same state.
//!
//! # Design Principles
//!
//! - One request lane: every command (from the session, observers or
//!   secondary links) is serialized through a single async mutex, so at
//!   most one command is in flight on the connection.
//! - Shared state lives behind `parking_lot` locks that are never held
//!   across an `.await`.
//! - Background work (event handling, status polling, binding flushes,
//!   observer refreshes) is spawned on the runtime the session was
//!   connected from.
//!
//! # Submodules
//!
//! - `namespace` -- Scope and item discovery
//! - `query` -- Request lane, reference binding and interval queries
//! - `control` -- Simulation status, run/pause and server events
//! - `cursor` -- Time cursor and navigation
//! - `link` -- Secondary links for additional protocol clients

mod control;
mod cursor;
mod link;
mod namespace;
mod query;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use rtldebug_types::{
    ClientGreeting, DiagnosticKind, ITEM_VALUES_ENCODING, ItemDescription, ItemDesignation, LinkId,
    ScopeDescription, ServerGreeting, ServerPacket, SessionId, SimulationState, TimePoint,
};
use tokio::runtime::Handle;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub use link::SecondaryLink;

use crate::config::SessionConfig;
use crate::connection::{Connection, Endpoint};
use crate::error::SessionError;
use crate::reference::Reference;
use crate::signal::Signal;

/// Run state of the simulation as last reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimulationStatus {
    /// Paused, running or finished.
    pub state: SimulationState,
    /// Latest time for which samples exist.
    pub latest_time: TimePoint,
    /// Time a one-step run would reach; only known while paused.
    pub next_sample_time: Option<TimePoint>,
}

impl SimulationStatus {
    /// Status assumed before the server is first asked.
    pub const INITIAL: Self = Self {
        state: SimulationState::Paused,
        latest_time: TimePoint::ZERO,
        next_sample_time: None,
    };

    /// Whether the simulation is producing samples.
    pub const fn is_running(&self) -> bool {
        matches!(self.state, SimulationState::Running)
    }
}

impl Default for SimulationStatus {
    fn default() -> Self {
        Self::INITIAL
    }
}

/// Why the simulation paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PauseReason {
    /// The requested time was reached.
    TimeReached,
    /// A breakpoint diagnostic was recorded; the cursor has been moved to it.
    DiagnosticsReached,
}

/// Options for [`Session::query_interval`].
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Reference whose item values to include.
    pub reference: Option<Reference>,
    /// Include diagnostics.
    pub diagnostics: bool,
    /// Omit samples whose values did not change.
    pub collapse: bool,
}

impl QueryOptions {
    /// Include the item values of `reference`.
    #[must_use]
    pub fn with_reference(mut self, reference: Reference) -> Self {
        self.reference = Some(reference);
        self
    }

    /// Include (or omit) diagnostics.
    #[must_use]
    pub const fn with_diagnostics(mut self, diagnostics: bool) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Collapse (or keep) unchanged samples.
    #[must_use]
    pub const fn with_collapse(mut self, collapse: bool) -> Self {
        self.collapse = collapse;
        self
    }
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            reference: None,
            diagnostics: false,
            collapse: true,
        }
    }
}

/// Options for [`Session::run_simulation`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Pause once this time is reached.
    pub until_time: Option<TimePoint>,
    /// Pause once a diagnostic of one of these kinds is recorded.
    pub until_diagnostics: Vec<DiagnosticKind>,
}

/// Notification channels published by a session.
#[derive(Debug, Default)]
pub struct SessionSignals {
    /// The simulation status changed.
    pub simulation_status_changed: Signal<SimulationStatus>,
    /// A run command was accepted.
    pub simulation_ran: Signal<()>,
    /// The simulation paused on a run condition.
    pub simulation_paused: Signal<PauseReason>,
    /// The simulation finished.
    pub simulation_finished: Signal<()>,
    /// The time cursor was assigned (possibly to the same value).
    pub time_cursor_changed: Signal<TimePoint>,
}

/// A binding waiting to be sent ahead of the next command.
#[derive(Debug)]
struct PendingBinding {
    reference: String,
    epoch: u64,
    items: Option<Vec<ItemDesignation>>,
}

#[derive(Debug)]
struct Bindings {
    next_epoch: u64,
    epochs: HashMap<String, u64>,
    queue: VecDeque<PendingBinding>,
}

#[derive(Debug, Default)]
struct NamespaceCache {
    items: HashMap<String, Arc<BTreeMap<String, ItemDescription>>>,
    scopes: HashMap<String, Arc<BTreeMap<String, ScopeDescription>>>,
    root: Option<ScopeDescription>,
}

#[derive(Debug)]
struct SessionState {
    status: SimulationStatus,
    cursor: TimePoint,
    forward_step: u128,
    run_origin: Option<TimePoint>,
    status_poll: u64,
    closed: bool,
}


struct SessionInner {
    id: SessionId,
    connection: Arc<dyn Connection>,
    config: SessionConfig,
    runtime: Handle,
    greeting: ServerGreeting,
    lane: tokio::sync::Mutex<()>,
    bindings: Mutex<Bindings>,
    namespace: Mutex<NamespaceCache>,
    state: Mutex<SessionState>,
    signals: SessionSignals,
    links: Mutex<HashMap<LinkId, mpsc::UnboundedSender<ServerPacket>>>,
    events_task: Mutex<Option<JoinHandle<()>>>,
    shutdown: Arc<Notify>,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        if let Some(task) = self.events_task.get_mut().take() {
            task.abort();
        }
    }
}

/// Handle on a debug session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    /// Greet the server and start tracking its simulation.
    ///
    /// Performs the greeting exchange, starts consuming server events and
    /// fetches the initial simulation status. Must be called from within a
    /// tokio runtime; background tasks are spawned on that runtime.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Connection`] if the greeting or the initial
    /// status query fails.
    pub async fn connect(endpoint: Endpoint, config: SessionConfig) -> Result<Self, SessionError> {
        let Endpoint { connection, events } = endpoint;
        let greeting = connection
            .greet(ClientGreeting {
                version: config.session.client_version,
            })
            .await?;
        if !greeting
            .features
            .item_values_encoding
            .iter()
            .any(|encoding| encoding == ITEM_VALUES_ENCODING)
        {
            warn!(
                encodings = ?greeting.features.item_values_encoding,
                "Server does not advertise the {ITEM_VALUES_ENCODING} item value encoding"
            );
        }
        let forward_step = u128::from(config.navigation.initial_step_femtos);
        let inner = Arc::new(SessionInner {
            id: SessionId::new(),
            connection,
            config,
            runtime: Handle::current(),
            greeting,
            lane: tokio::sync::Mutex::new(()),
            bindings: Mutex::new(Bindings {
                next_epoch: 1,
                epochs: HashMap::new(),
                queue: VecDeque::new(),
            }),
            namespace: Mutex::new(NamespaceCache::default()),
            state: Mutex::new(SessionState {
                status: SimulationStatus::INITIAL,
                cursor: TimePoint::ZERO,
                forward_step,
                run_origin: None,
                status_poll: 0,
                closed: false,
            }),
            signals: SessionSignals::default(),
            links: Mutex::new(HashMap::new()),
            events_task: Mutex::new(None),
            shutdown: Arc::new(Notify::new()),
        });
        info!(
            session = %inner.id,
            server_version = inner.greeting.version,
            commands = inner.greeting.commands.len(),
            "Connected to debug server"
        );

        let session = Self { inner };
        let event_task = session.spawn(control::run_event_loop(
            Arc::downgrade(&session.inner),
            Arc::clone(&session.inner.shutdown),
            events,
        ));
        *session.inner.events_task.lock() = Some(event_task);
        session.refresh_simulation_status().await?;
        Ok(session)
    }

    /// Stop background work and end every secondary link.
    ///
    /// Subsequent commands fail with [`SessionError::Closed`]. A command
    /// already sent still receives its response. Closing twice is a no-op.
    pub fn close(&self) {
        {
            let mut state = self.inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.status_poll = state.status_poll.wrapping_add(1);
        }
        self.inner.shutdown.notify_one();
        self.inner.bindings.lock().queue.clear();
        self.inner.links.lock().clear();
        info!(session = %self.inner.id, "Session closed");
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Identifier used in log output.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// The server greeting received at connect time.
    pub fn server_greeting(&self) -> &ServerGreeting {
        &self.inner.greeting
    }

    /// Configuration the session was connected with.
    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Notification channels.
    pub fn signals(&self) -> &SessionSignals {
        &self.inner.signals
    }

    /// Spawn background work on the session's runtime.
    pub(crate) fn spawn<F>(&self, future: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.inner.runtime.spawn(future)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("server_version", &self.inner.greeting.version)
            .finish_non_exhaustive()
    }
}
