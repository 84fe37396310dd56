//! Simulation items as seen by consumers.

use crate::proto::{ItemDescription, ItemKind, SCOPE_SEPARATOR};
use crate::source::Location;

/// Number of bits in one word of an encoded item value.
pub const WORD_BITS: u32 = 32;

/// Shape of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariableKind {
    /// A single value (wire or register).
    Scalar,
    /// An array of rows.
    Memory {
        /// Number of rows.
        depth: u32,
        /// Index of the first row.
        zero_at: i64,
    },
}

/// A named simulation item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    full_name: String,
    width: u32,
    lsb_at: i64,
    kind: VariableKind,
    input: bool,
    output: bool,
    settable: bool,
    location: Option<Location>,
}

impl Variable {
    /// Build a variable from its full name and `list_items` description.
    pub fn from_description(full_name: impl Into<String>, description: &ItemDescription) -> Self {
        let kind = match description.kind {
            ItemKind::Node => VariableKind::Scalar,
            ItemKind::Memory => VariableKind::Memory {
                depth: description.depth.unwrap_or(0),
                zero_at: description.zero_at.unwrap_or(0),
            },
        };
        Self {
            full_name: full_name.into(),
            width: description.width,
            lsb_at: description.lsb_at,
            kind,
            input: description.input,
            output: description.output,
            settable: description.settable,
            location: description.src.as_deref().and_then(Location::parse),
        }
    }

    /// Full hierarchical name, levels separated by a space.
    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    /// Name of the enclosing scope (empty for top-level items).
    pub fn scope_name(&self) -> &str {
        self.full_name
            .rsplit_once(SCOPE_SEPARATOR)
            .map_or("", |(scope, _)| scope)
    }

    /// Name of the item inside its scope.
    pub fn name(&self) -> &str {
        self.full_name
            .rsplit_once(SCOPE_SEPARATOR)
            .map_or(self.full_name.as_str(), |(_, leaf)| leaf)
    }

    /// Width in bits.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Index of the least significant bit.
    pub const fn lsb_at(&self) -> i64 {
        self.lsb_at
    }

    /// Shape of the variable.
    pub const fn kind(&self) -> VariableKind {
        self.kind
    }

    /// Whether the variable is a memory.
    pub const fn is_memory(&self) -> bool {
        matches!(self.kind, VariableKind::Memory { .. })
    }

    /// Whether the variable is a top-level input.
    pub const fn is_input(&self) -> bool {
        self.input
    }

    /// Whether the variable is a top-level output.
    pub const fn is_output(&self) -> bool {
        self.output
    }

    /// Whether the value can be changed from the client.
    pub const fn is_settable(&self) -> bool {
        self.settable
    }

    /// Where the variable is declared, when known.
    pub const fn location(&self) -> Option<&Location> {
        self.location.as_ref()
    }

    /// Number of 32-bit words in one value (one row, for memories).
    pub const fn words_per_value(&self) -> usize {
        words_for_width(self.width)
    }
}

/// Number of 32-bit words needed to hold `width` bits.
pub const fn words_for_width(width: u32) -> usize {
    width.div_ceil(WORD_BITS) as usize
}
