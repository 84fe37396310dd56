//! Shared type definitions for the RTL debug engine.
//!
//! This crate holds the pure data side of the debug protocol: packets as
//! they travel over the wire, the simulated time model, diagnostics and the
//! design-level descriptions of items and scopes. Nothing here is async and
//! nothing here talks to a server.
//!
//! # Modules
//!
//! - [`time`] -- Femtosecond time points and closed intervals
//! - [`proto`] -- Client/server packets, commands, responses and events
//! - [`diagnostic`] -- Prints, assertions, assumptions and breakpoints
//! - [`source`] -- Source locations parsed from Yosys `src` attributes
//! - [`variable`] -- Simulation items as consumers see them
//! - [`ids`] -- Type-safe UUID wrappers for engine handles

pub mod diagnostic;
pub mod ids;
pub mod proto;
pub mod source;
pub mod time;
pub mod variable;

// Re-export all public types at crate root for convenience.
pub use diagnostic::{Diagnostic, DiagnosticKind, WireDiagnostic};
pub use ids::{LinkId, ObserverId, SessionId};
pub use proto::{
    Attributes, ClientGreeting, ClientPacket, Command, ErrorPacket, Event, ITEM_VALUES_ENCODING,
    ItemDescription, ItemDesignation, ItemKind, PauseCause, Response, SCOPE_SEPARATOR,
    ScopeDefinition, ScopeDescription, ScopeInstantiation, ScopeKind, ServerFeatures,
    ServerGreeting, ServerPacket, SimulationState, WireSample,
};
pub use source::Location;
pub use time::{FEMTOS_PER_SECOND, TimeError, TimeInterval, TimePoint};
pub use variable::{Variable, VariableKind, WORD_BITS, words_for_width};
