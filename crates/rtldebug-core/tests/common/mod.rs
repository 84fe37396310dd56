//! In-memory debug server used by the integration tests.
//!
//! The server holds a scripted timeline of recorded states. Entries up to
//! `latest` count as simulated history; the rest is what a run will
//! produce. Values are one 32-bit word per item (or per memory row).

#![allow(
    dead_code,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::indexing_slicing,
    clippy::arithmetic_side_effects
)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use parking_lot::Mutex;
use rtldebug_core::{Connection, ConnectionError, Endpoint, Session, SessionConfig};
use rtldebug_types::{
    ClientGreeting, Command, DiagnosticKind, Event, ITEM_VALUES_ENCODING, ItemDescription,
    ItemDesignation, ItemKind, PauseCause, Response, ScopeDescription, ServerFeatures,
    ServerGreeting, SimulationState, TimeInterval, TimePoint, WireDiagnostic, WireSample,
};
use tokio::sync::mpsc;

/// Shorthand for a time point in femtoseconds.
pub const fn fs(femtos: u128) -> TimePoint {
    TimePoint::from_femtos(femtos)
}

/// One recorded state of the simulation.
#[derive(Debug, Clone)]
pub struct Recorded {
    pub time: TimePoint,
    pub values: BTreeMap<String, u32>,
    pub diagnostics: Vec<WireDiagnostic>,
}

#[derive(Debug, Clone, Copy)]
struct PendingRun {
    latest: TimePoint,
    state: SimulationState,
    event: Option<EventKind>,
    polls_left: u32,
}

#[derive(Debug, Clone, Copy)]
enum EventKind {
    Paused(PauseCause),
    Finished,
}

struct ServerState {
    timeline: Vec<Recorded>,
    latest: TimePoint,
    status: SimulationState,
    run_polls: u32,
    pending_run: Option<PendingRun>,
    references: HashMap<String, Vec<ItemDesignation>>,
    items: BTreeMap<String, ItemDescription>,
    scopes: BTreeMap<String, ScopeDescription>,
    log: Vec<Command>,
}

/// Scripted stand-in for a debug server.
pub struct FakeServer {
    state: Mutex<ServerState>,
    events: Mutex<Option<mpsc::UnboundedSender<Event>>>,
    greeting: ServerGreeting,
    status_delay: Mutex<Duration>,
    status_started: AtomicUsize,
}

/// Builds a [`FakeServer`] timeline entry by entry.
pub struct FakeServerBuilder {
    timeline: Vec<Recorded>,
    latest: Option<TimePoint>,
    items: BTreeMap<String, ItemDescription>,
    scopes: BTreeMap<String, ScopeDescription>,
    run_polls: u32,
}

impl FakeServerBuilder {
    /// Declare a scalar item.
    pub fn item(mut self, name: &str, width: u32) -> Self {
        self.items.insert(name.to_owned(), item_description(ItemKind::Node, width, None));
        self
    }

    /// Declare a memory item.
    pub fn memory(mut self, name: &str, width: u32, depth: u32) -> Self {
        self.items.insert(
            name.to_owned(),
            item_description(ItemKind::Memory, width, Some(depth)),
        );
        self
    }

    /// Declare a scope.
    pub fn scope(mut self, name: &str, module: &str) -> Self {
        let mut description = ScopeDescription::placeholder();
        description.definition.name = Some(module.to_owned());
        description.definition.src = Some(format!("{module}.v:1.1-20.10"));
        self.scopes.insert(name.to_owned(), description);
        self
    }

    /// Record a state at `time`; values not given carry over from the
    /// previous entry.
    pub fn at(mut self, time: u128, values: &[(&str, u32)]) -> Self {
        let mut carried = self
            .timeline
            .last()
            .map(|previous| previous.values.clone())
            .unwrap_or_default();
        for (name, value) in values {
            carried.insert((*name).to_owned(), *value);
        }
        self.timeline.push(Recorded {
            time: fs(time),
            values: carried,
            diagnostics: Vec::new(),
        });
        self
    }

    /// Attach a diagnostic to the last recorded entry.
    pub fn diagnostic(mut self, kind: DiagnosticKind, text: &str) -> Self {
        let entry = self.timeline.last_mut().expect("diagnostic before any entry");
        entry.diagnostics.push(WireDiagnostic {
            kind,
            text: text.to_owned(),
            src: Some("top.v:42.5-42.30".to_owned()),
        });
        self
    }

    /// Treat everything up to `time` as already simulated.
    pub fn latest(mut self, time: u128) -> Self {
        self.latest = Some(fs(time));
        self
    }

    /// Number of status queries that still report `running` after a run.
    pub fn run_polls(mut self, polls: u32) -> Self {
        self.run_polls = polls;
        self
    }

    /// Finish the server and the endpoint a session connects through.
    pub fn build(self) -> (Arc<FakeServer>, Endpoint) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let latest = self
            .latest
            .or_else(|| self.timeline.last().map(|entry| entry.time))
            .unwrap_or(TimePoint::ZERO);
        let server = Arc::new(FakeServer {
            state: Mutex::new(ServerState {
                timeline: self.timeline,
                latest,
                status: SimulationState::Paused,
                run_polls: self.run_polls,
                pending_run: None,
                references: HashMap::new(),
                items: self.items,
                scopes: self.scopes,
                log: Vec::new(),
            }),
            events: Mutex::new(Some(sender)),
            status_delay: Mutex::new(Duration::ZERO),
            status_started: AtomicUsize::new(0),
            greeting: ServerGreeting {
                version: 0,
                commands: [
                    "list_scopes",
                    "list_items",
                    "reference_items",
                    "query_interval",
                    "get_simulation_status",
                    "run_simulation",
                    "pause_simulation",
                ]
                .into_iter()
                .map(str::to_owned)
                .collect(),
                events: vec!["simulation_paused".to_owned(), "simulation_finished".to_owned()],
                features: ServerFeatures {
                    item_values_encoding: vec![ITEM_VALUES_ENCODING.to_owned()],
                },
            },
        });
        let connection: Arc<dyn Connection> = Arc::clone(&server) as Arc<dyn Connection>;
        (server, Endpoint::new(connection, receiver))
    }
}

fn item_description(kind: ItemKind, width: u32, depth: Option<u32>) -> ItemDescription {
    ItemDescription {
        src: Some("top.v:3.10-3.13".to_owned()),
        kind,
        lsb_at: 0,
        width,
        depth,
        zero_at: depth.map(|_| 0),
        settable: false,
        input: false,
        output: false,
        attributes: BTreeMap::new(),
    }
}

impl FakeServer {
    /// Start describing a server.
    pub fn builder() -> FakeServerBuilder {
        FakeServerBuilder {
            timeline: Vec::new(),
            latest: None,
            items: BTreeMap::new(),
            scopes: BTreeMap::new(),
            run_polls: 0,
        }
    }

    /// Every command received so far, in order.
    pub fn commands(&self) -> Vec<Command> {
        self.state.lock().log.clone()
    }

    /// Number of received commands with the given wire name.
    pub fn count(&self, name: &str) -> usize {
        self.state
            .lock()
            .log
            .iter()
            .filter(|command| command.name() == name)
            .count()
    }

    /// Forget the command log.
    pub fn clear_log(&self) {
        self.state.lock().log.clear();
    }

    /// Latest simulated time.
    pub fn latest(&self) -> TimePoint {
        self.state.lock().latest
    }

    /// Items currently bound under `reference`.
    pub fn reference(&self, name: &str) -> Option<Vec<ItemDesignation>> {
        self.state.lock().references.get(name).cloned()
    }

    /// Push an event as if the server sent it.
    pub fn emit(&self, event: Event) {
        if let Some(sender) = self.events.lock().as_ref() {
            let _ = sender.send(event);
        }
    }

    /// Record a further state after the last entry, beyond what has been
    /// simulated so far.
    pub fn extend(&self, time: u128) {
        let mut state = self.state.lock();
        let values = state
            .timeline
            .last()
            .map(|previous| previous.values.clone())
            .unwrap_or_default();
        state.timeline.push(Recorded {
            time: fs(time),
            values,
            diagnostics: Vec::new(),
        });
    }

    /// Answer every later status query only after `delay`.
    pub fn stall_status(&self, delay: Duration) {
        *self.status_delay.lock() = delay;
    }

    /// Number of status queries received, answered or not.
    pub fn status_started(&self) -> usize {
        self.status_started.load(Ordering::SeqCst)
    }

    /// Drop the event stream, as a disconnecting server would.
    pub fn disconnect(&self) {
        self.events.lock().take();
    }

    fn values_at(state: &ServerState, time: TimePoint) -> Option<&Recorded> {
        let time = time.min(state.latest);
        state.timeline.iter().rev().find(|entry| entry.time <= time)
    }

    fn encode(state: &ServerState, entry: Option<&Recorded>, items: &[ItemDesignation]) -> String {
        let mut bytes = Vec::new();
        for item in items {
            let rows: Vec<String> = match item.row_range() {
                Some((first, last)) => (first..=last)
                    .map(|row| format!("{}[{row}]", item.name()))
                    .collect(),
                None => match state.items.get(item.name()).and_then(|desc| desc.depth) {
                    Some(depth) => (0..depth)
                        .map(|row| format!("{}[{row}]", item.name()))
                        .collect(),
                    None => vec![item.name().to_owned()],
                },
            };
            for key in rows {
                let value = entry
                    .and_then(|entry| entry.values.get(&key))
                    .copied()
                    .unwrap_or(0);
                bytes.extend_from_slice(&value.to_le_bytes());
            }
        }
        STANDARD.encode(bytes)
    }

    fn query(
        state: &ServerState,
        interval: TimeInterval,
        collapse: bool,
        items: Option<&str>,
        diagnostics: bool,
    ) -> Result<Response, ConnectionError> {
        let designations = match items {
            Some(name) => Some(state.references.get(name).ok_or_else(|| {
                ConnectionError::Server {
                    error: "invalid_reference".to_owned(),
                    message: format!("reference {name:?} is not bound"),
                }
            })?),
            None => None,
        };
        let end = interval.end().min(state.latest);
        let mut selected: Vec<&Recorded> = Vec::new();
        if let Some(first) = Self::values_at(state, interval.begin()) {
            selected.push(first);
        }
        for entry in &state.timeline {
            if entry.time > interval.begin() && entry.time <= end {
                if collapse && selected.last().is_some_and(|last| last.time == entry.time) {
                    selected.pop();
                }
                selected.push(entry);
            }
        }
        let samples = selected
            .into_iter()
            .map(|entry| WireSample {
                time: entry.time,
                item_values: designations.map(|items| Self::encode(state, Some(entry), items)),
                diagnostics: diagnostics.then(|| entry.diagnostics.clone()),
            })
            .collect();
        Ok(Response::QueryInterval { samples })
    }

    fn next_sample_time(state: &ServerState) -> Option<TimePoint> {
        state
            .timeline
            .iter()
            .map(|entry| entry.time)
            .find(|time| *time > state.latest)
    }

    fn start_run(
        state: &mut ServerState,
        until_time: Option<TimePoint>,
        until_diagnostics: &[DiagnosticKind],
    ) -> PendingRun {
        let end = state
            .timeline
            .last()
            .map_or(state.latest, |entry| entry.time);
        let diagnostic = state
            .timeline
            .iter()
            .filter(|entry| entry.time > state.latest)
            .find(|entry| {
                entry
                    .diagnostics
                    .iter()
                    .any(|diagnostic| until_diagnostics.contains(&diagnostic.kind))
            })
            .map(|entry| entry.time);
        let (latest, state_after, event) = match (diagnostic, until_time) {
            (Some(at), until) if until.is_none_or(|until| at <= until) => (
                at,
                SimulationState::Paused,
                EventKind::Paused(PauseCause::UntilDiagnostics),
            ),
            (_, Some(until)) if until <= end => (
                until,
                SimulationState::Paused,
                EventKind::Paused(PauseCause::UntilTime),
            ),
            _ => (end, SimulationState::Finished, EventKind::Finished),
        };
        PendingRun {
            latest,
            state: state_after,
            event: Some(event),
            polls_left: state.run_polls,
        }
    }

    fn status(&self, state: &mut ServerState) -> Response {
        if let Some(mut run) = state.pending_run.take() {
            if run.polls_left > 0 {
                run.polls_left -= 1;
                state.pending_run = Some(run);
            } else {
                state.latest = run.latest;
                state.status = run.state;
                let time = run.latest;
                match run.event {
                    Some(EventKind::Paused(cause)) => {
                        self.emit(Event::SimulationPaused { time, cause });
                    }
                    Some(EventKind::Finished) => self.emit(Event::SimulationFinished { time }),
                    None => {}
                }
            }
        }
        Response::GetSimulationStatus {
            status: state.status,
            latest_time: state.latest,
            next_sample_time: (state.status == SimulationState::Paused)
                .then(|| Self::next_sample_time(state))
                .flatten(),
        }
    }
}

#[async_trait]
impl Connection for FakeServer {
    async fn greet(&self, greeting: ClientGreeting) -> Result<ServerGreeting, ConnectionError> {
        if greeting.version != self.greeting.version {
            return Err(ConnectionError::Server {
                error: "unsupported_version".to_owned(),
                message: format!("version {} is not supported", greeting.version),
            });
        }
        Ok(self.greeting.clone())
    }

    async fn perform(&self, command: Command) -> Result<Response, ConnectionError> {
        // Yield so concurrent callers interleave as they would on a socket.
        tokio::task::yield_now().await;
        if matches!(command, Command::GetSimulationStatus) {
            self.status_started.fetch_add(1, Ordering::SeqCst);
            let delay = *self.status_delay.lock();
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        let mut state = self.state.lock();
        state.log.push(command.clone());
        match command {
            Command::ListScopes { scope } => {
                let prefix = scope.unwrap_or_default();
                let scopes = state
                    .scopes
                    .iter()
                    .filter(|(name, _)| name.starts_with(&prefix))
                    .map(|(name, description)| (name.clone(), description.clone()))
                    .collect();
                Ok(Response::ListScopes { scopes })
            }
            Command::ListItems { scope } => {
                let items = state
                    .items
                    .iter()
                    .filter(|(name, _)| {
                        scope.as_deref().is_none_or(|scope| {
                            name.rsplit_once(' ').map_or("", |(parent, _)| parent) == scope
                        })
                    })
                    .map(|(name, description)| (name.clone(), description.clone()))
                    .collect();
                Ok(Response::ListItems { items })
            }
            Command::ReferenceItems { reference, items } => {
                match items {
                    Some(items) => {
                        state.references.insert(reference, items);
                    }
                    None => {
                        state.references.remove(&reference);
                    }
                }
                Ok(Response::ReferenceItems {})
            }
            Command::QueryInterval {
                interval,
                collapse,
                items,
                item_values_encoding,
                diagnostics,
            } => {
                if items.is_some() != item_values_encoding.is_some() {
                    return Err(ConnectionError::Server {
                        error: "invalid_args".to_owned(),
                        message: "items and item_values_encoding go together".to_owned(),
                    });
                }
                Self::query(&state, interval, collapse, items.as_deref(), diagnostics)
            }
            Command::GetSimulationStatus => Ok(self.status(&mut state)),
            Command::RunSimulation {
                until_time,
                until_diagnostics,
                sample_item_values,
            } => {
                assert!(sample_item_values, "runs must sample item values");
                if state.status != SimulationState::Paused {
                    return Err(ConnectionError::Server {
                        error: "invalid_status".to_owned(),
                        message: "simulation is not paused".to_owned(),
                    });
                }
                let run = Self::start_run(&mut state, until_time, &until_diagnostics);
                state.status = SimulationState::Running;
                state.pending_run = Some(run);
                Ok(Response::RunSimulation {})
            }
            Command::PauseSimulation => {
                // Paused before the run produced anything.
                if state.pending_run.take().is_some() {
                    state.status = SimulationState::Paused;
                }
                Ok(Response::PauseSimulation { time: state.latest })
            }
        }
    }
}

/// Session config with a short status poll interval.
pub fn test_config() -> SessionConfig {
    let mut config = SessionConfig::default();
    config.session.status_poll_interval_ms = 5;
    config
}

/// Connect a session to `endpoint` with [`test_config`].
pub async fn connect(endpoint: Endpoint) -> Session {
    Session::connect(endpoint, test_config()).await.unwrap()
}

/// Poll `check` until it holds, failing the test after a second.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(1);
    while !check() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached in time"
        );
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}
