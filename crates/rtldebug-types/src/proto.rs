//! Wire protocol packets exchanged with the debug server.
//!
//! Every packet is a JSON object tagged by `type`. Commands, responses and
//! events carry a second tag (`command`, `response`, `event`) naming the
//! operation. The engine never frames or transmits packets itself; the
//! transport that does is an external collaborator.
//!
//! # Packet Shapes
//!
//! - **Client → server:** `greeting`, `command`
//! - **Server → client:** `greeting`, `response`, `error`, `event`

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::diagnostic::{DiagnosticKind, WireDiagnostic};
use crate::time::{TimeInterval, TimePoint};

/// Separator between hierarchy levels in scope and item names.
pub const SCOPE_SEPARATOR: char = ' ';

/// The only item value encoding the engine requests.
pub const ITEM_VALUES_ENCODING: &str = "base64(u32)";

/// Free-form attributes attached to items and scopes by the design.
pub type Attributes = BTreeMap<String, serde_json::Value>;

// -----------------------------------------------------------------------
// Greeting
// -----------------------------------------------------------------------

/// Greeting sent by a client when it connects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientGreeting {
    /// Protocol version requested by the client.
    pub version: u32,
}

/// Greeting sent by the server in reply to the client greeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerGreeting {
    /// Protocol version spoken by the server.
    pub version: u32,
    /// Names of the commands the server accepts.
    #[serde(default)]
    pub commands: Vec<String>,
    /// Names of the events the server may push.
    #[serde(default)]
    pub events: Vec<String>,
    /// Optional protocol features.
    #[serde(default)]
    pub features: ServerFeatures,
}

/// Optional features advertised in the server greeting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFeatures {
    /// Item value encodings the server can produce.
    #[serde(default)]
    pub item_values_encoding: Vec<String>,
}

// -----------------------------------------------------------------------
// Packets
// -----------------------------------------------------------------------

/// A packet sent from a client to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientPacket {
    /// Opening handshake.
    Greeting(ClientGreeting),
    /// A request expecting exactly one response or error.
    Command(Command),
}

/// A packet sent from the server to a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerPacket {
    /// Reply to the client greeting.
    Greeting(ServerGreeting),
    /// Successful reply to a command.
    Response(Response),
    /// Failed reply to a command.
    Error(ErrorPacket),
    /// Unsolicited notification.
    Event(Event),
}

/// Error reply to a command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPacket {
    /// Machine-readable error code.
    pub error: String,
    /// Human-readable explanation.
    pub message: String,
}

// -----------------------------------------------------------------------
// Commands
// -----------------------------------------------------------------------

/// Designation of one item (or a row range of a memory) in a reference.
///
/// Serialized as `["name"]` or `["name", first_row, last_row]`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ItemDesignation {
    /// Rows `first..=last` of a memory.
    Rows(String, u32, u32),
    /// The whole item.
    Whole((String,)),
}

impl ItemDesignation {
    /// Designate a whole item.
    pub fn whole(name: impl Into<String>) -> Self {
        Self::Whole((name.into(),))
    }

    /// Designate rows `first..=last` of a memory.
    pub fn rows(name: impl Into<String>, first: u32, last: u32) -> Self {
        Self::Rows(name.into(), first, last)
    }

    /// Return the full name of the designated item.
    pub fn name(&self) -> &str {
        match self {
            Self::Rows(name, _, _) | Self::Whole((name,)) => name,
        }
    }

    /// Return the designated row range, if any.
    pub const fn row_range(&self) -> Option<(u32, u32)> {
        match self {
            Self::Rows(_, first, last) => Some((*first, *last)),
            Self::Whole(_) => None,
        }
    }
}

/// A request sent to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// List every scope whose name starts with `scope`.
    ListScopes {
        /// Scope prefix; `None` lists everything.
        scope: Option<String>,
    },
    /// List the items directly inside `scope`.
    ListItems {
        /// Scope to list; `None` lists every item.
        scope: Option<String>,
    },
    /// Bind (or unbind, with `None`) a named set of items.
    ReferenceItems {
        /// Reference name.
        reference: String,
        /// Designations in value-array order.
        items: Option<Vec<ItemDesignation>>,
    },
    /// Read samples from the simulation database.
    QueryInterval {
        /// Closed interval to read.
        interval: TimeInterval,
        /// Omit samples whose values did not change.
        collapse: bool,
        /// Reference whose item values to include.
        items: Option<String>,
        /// Encoding of item values; present iff `items` is.
        item_values_encoding: Option<String>,
        /// Include diagnostics recorded at each sample.
        diagnostics: bool,
    },
    /// Read the simulation status.
    GetSimulationStatus,
    /// Start (or resume) the simulation.
    RunSimulation {
        /// Pause once this time is reached.
        until_time: Option<TimePoint>,
        /// Pause once a diagnostic of one of these kinds is recorded.
        until_diagnostics: Vec<DiagnosticKind>,
        /// Record item values while running.
        sample_item_values: bool,
    },
    /// Pause a running simulation.
    PauseSimulation,
}

impl Command {
    /// Return the wire name of the command.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListScopes { .. } => "list_scopes",
            Self::ListItems { .. } => "list_items",
            Self::ReferenceItems { .. } => "reference_items",
            Self::QueryInterval { .. } => "query_interval",
            Self::GetSimulationStatus => "get_simulation_status",
            Self::RunSimulation { .. } => "run_simulation",
            Self::PauseSimulation => "pause_simulation",
        }
    }
}

// -----------------------------------------------------------------------
// Responses
// -----------------------------------------------------------------------

/// A successful reply to a [`Command`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "response", rename_all = "snake_case")]
pub enum Response {
    /// Reply to [`Command::ListScopes`].
    ListScopes {
        /// Scope descriptions keyed by full scope name.
        scopes: BTreeMap<String, ScopeDescription>,
    },
    /// Reply to [`Command::ListItems`].
    ListItems {
        /// Item descriptions keyed by full item name.
        items: BTreeMap<String, ItemDescription>,
    },
    /// Reply to [`Command::ReferenceItems`].
    ReferenceItems {},
    /// Reply to [`Command::QueryInterval`].
    QueryInterval {
        /// Samples in time order.
        samples: Vec<WireSample>,
    },
    /// Reply to [`Command::GetSimulationStatus`].
    GetSimulationStatus {
        /// Current run state.
        status: SimulationState,
        /// Latest time for which samples exist.
        latest_time: TimePoint,
        /// Time of the next sample a one-step run would produce (paused only).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_sample_time: Option<TimePoint>,
    },
    /// Reply to [`Command::RunSimulation`].
    RunSimulation {},
    /// Reply to [`Command::PauseSimulation`].
    PauseSimulation {
        /// Time at which the simulation paused.
        time: TimePoint,
    },
}

impl Response {
    /// Return the wire name of the response.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ListScopes { .. } => "list_scopes",
            Self::ListItems { .. } => "list_items",
            Self::ReferenceItems {} => "reference_items",
            Self::QueryInterval { .. } => "query_interval",
            Self::GetSimulationStatus { .. } => "get_simulation_status",
            Self::RunSimulation {} => "run_simulation",
            Self::PauseSimulation { .. } => "pause_simulation",
        }
    }
}

/// One sample as returned by `query_interval`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireSample {
    /// Time of the sample.
    pub time: TimePoint,
    /// Encoded item values, present when a reference was queried.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_values: Option<String>,
    /// Diagnostics, present when requested.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Vec<WireDiagnostic>>,
}

/// Run state of the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SimulationState {
    /// Not running; can be run or stepped.
    Paused,
    /// Producing new samples.
    Running,
    /// Reached its end; no further samples will be produced.
    Finished,
}

// -----------------------------------------------------------------------
// Events
// -----------------------------------------------------------------------

/// Why the simulation paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseCause {
    /// The `until_time` of the run was reached.
    UntilTime,
    /// A diagnostic listed in `until_diagnostics` was recorded.
    UntilDiagnostics,
}

/// A notification pushed by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// The simulation stopped because a run condition was met.
    SimulationPaused {
        /// Reported pause time.
        time: TimePoint,
        /// The condition that was met.
        cause: PauseCause,
    },
    /// The simulation ran to completion.
    SimulationFinished {
        /// Final simulation time.
        time: TimePoint,
    },
}

// -----------------------------------------------------------------------
// Namespace descriptions
// -----------------------------------------------------------------------

/// Kind of an item in the design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// A wire or register.
    Node,
    /// A memory with one or more rows.
    Memory,
}

/// Description of an item as returned by `list_items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDescription {
    /// Yosys source location attribute.
    #[serde(default)]
    pub src: Option<String>,
    /// Item kind.
    #[serde(rename = "type")]
    pub kind: ItemKind,
    /// Index of the least significant bit.
    #[serde(default)]
    pub lsb_at: i64,
    /// Width in bits.
    pub width: u32,
    /// Number of rows (memories only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
    /// Index of the first row (memories only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub zero_at: Option<i64>,
    /// Whether the value can be changed from the client.
    #[serde(default)]
    pub settable: bool,
    /// Whether the item is a top-level input.
    #[serde(default)]
    pub input: bool,
    /// Whether the item is a top-level output.
    #[serde(default)]
    pub output: bool,
    /// Design attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// Kind of a scope in the design hierarchy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// An instance of a module.
    Module,
}

/// Description of a scope as returned by `list_scopes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDescription {
    /// Scope kind.
    #[serde(rename = "type")]
    pub kind: ScopeKind,
    /// Where the module is defined.
    pub definition: ScopeDefinition,
    /// Where the module is instantiated.
    pub instantiation: ScopeInstantiation,
}

impl ScopeDescription {
    /// Placeholder description for a scope the server never defined.
    ///
    /// Used for the root scope of simulations whose top level is
    /// synthesized by the agent rather than present in the design.
    pub fn placeholder() -> Self {
        Self {
            kind: ScopeKind::Module,
            definition: ScopeDefinition {
                src: None,
                name: None,
                attributes: Attributes::new(),
            },
            instantiation: ScopeInstantiation {
                src: None,
                attributes: Attributes::new(),
            },
        }
    }
}

/// Module definition part of a [`ScopeDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeDefinition {
    /// Yosys source location of the module definition.
    #[serde(default)]
    pub src: Option<String>,
    /// Module name.
    #[serde(default)]
    pub name: Option<String>,
    /// Module attributes.
    #[serde(default)]
    pub attributes: Attributes,
}

/// Instantiation part of a [`ScopeDescription`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScopeInstantiation {
    /// Yosys source location of the instance.
    #[serde(default)]
    pub src: Option<String>,
    /// Instance attributes.
    #[serde(default)]
    pub attributes: Attributes,
}
