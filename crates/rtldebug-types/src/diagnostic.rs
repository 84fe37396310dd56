//! Diagnostics recorded by the simulation.
//!
//! A diagnostic is emitted by `$display`, `assert`, `assume` and
//! breakpoint cells in the simulated design and stored alongside the sample
//! at which it fired.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::source::Location;

/// Kind of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    /// An explicit breakpoint cell.
    Break,
    /// A `$display`-style print.
    Print,
    /// A failed assertion.
    Assert,
    /// A failed assumption.
    Assume,
}

impl DiagnosticKind {
    /// Kinds that stop a continue-forward run.
    pub const BREAKPOINTS: [Self; 3] = [Self::Assert, Self::Assume, Self::Break];

    /// Whether this kind stops navigation (everything except prints).
    pub const fn is_breakpoint(self) -> bool {
        matches!(self, Self::Break | Self::Assert | Self::Assume)
    }

    /// Return the wire name of the kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Break => "break",
            Self::Print => "print",
            Self::Assert => "assert",
            Self::Assume => "assume",
        }
    }
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A diagnostic as it appears in a `query_interval` sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireDiagnostic {
    /// Diagnostic kind.
    #[serde(rename = "type")]
    pub kind: DiagnosticKind,
    /// Message text.
    pub text: String,
    /// Yosys source location attribute of the emitting cell.
    #[serde(default)]
    pub src: Option<String>,
}

/// A decoded diagnostic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    /// Diagnostic kind.
    pub kind: DiagnosticKind,
    /// Message text.
    pub text: String,
    /// Where the emitting cell is in the design sources, when known.
    pub location: Option<Location>,
}

impl Diagnostic {
    /// Whether this diagnostic stops navigation.
    pub const fn is_breakpoint(&self) -> bool {
        self.kind.is_breakpoint()
    }
}

impl From<WireDiagnostic> for Diagnostic {
    fn from(wire: WireDiagnostic) -> Self {
        Self {
            kind: wire.kind,
            text: wire.text,
            location: wire.src.as_deref().and_then(Location::parse),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.location {
            Some(location) => write!(f, "{}: {} ({location})", self.kind, self.text),
            None => write!(f, "{}: {}", self.kind, self.text),
        }
    }
}
