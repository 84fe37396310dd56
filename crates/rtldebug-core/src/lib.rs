//! Client-side engine for debugging RTL simulations over the debug protocol.
//!
//! A [`Session`] talks to one debug server through a [`Connection`]. It
//! discovers the design hierarchy, binds references (named item lists the
//! server samples), queries recorded history, drives the simulation and
//! maintains a time cursor. [`Observer`]s follow the values of chosen
//! designations at that cursor, and [`SecondaryLink`]s let other protocol
//! clients share the same connection.
//!
//! # Modules
//!
//! - [`config`] -- YAML session configuration with environment overrides
//! - [`connection`] -- Transport seam and its errors
//! - [`designation`] -- Typed views of items and memory rows
//! - [`reference`] -- Item lists and their word layout
//! - [`sample`] -- Decoded query results
//! - [`scope`] -- Lazily expanded hierarchy nodes
//! - [`session`] -- The session itself
//! - [`observer`] -- Change notifications at the time cursor
//! - [`signal`] -- Subscribe/emit notification channels
//! - [`error`] -- Session and reference errors

pub mod config;
pub mod connection;
pub mod designation;
pub mod error;
pub mod observer;
pub mod reference;
pub mod sample;
pub mod scope;
pub mod session;
pub mod signal;

pub use config::{ConfigError, NavigationConfig, SessionConfig, SessionSettings};
pub use connection::{Connection, ConnectionError, Endpoint};
pub use designation::{BitValue, Designation};
pub use error::{ReferenceError, SessionError};
pub use observer::{Observer, ObserverError, RefreshState};
pub use reference::{Reference, Slot, UnboundReference};
pub use sample::Sample;
pub use scope::Scope;
pub use session::{
    PauseReason, QueryOptions, RunOptions, SecondaryLink, Session, SessionSignals,
    SimulationStatus,
};
pub use signal::{Listener, Signal, Subscription};
