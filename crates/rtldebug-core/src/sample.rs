//! Decoded query results.

use std::sync::Arc;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use rtldebug_types::{Diagnostic, TimePoint, WireSample};

use crate::designation::Designation;
use crate::error::SessionError;
use crate::reference::{Slot, UnboundReference};

/// The simulation state at one point in time.
#[derive(Debug, Clone)]
pub struct Sample {
    time: TimePoint,
    item_values: Option<Vec<u32>>,
    diagnostics: Option<Vec<Diagnostic>>,
    reference: Option<Arc<UnboundReference>>,
}

impl Sample {
    /// Decode a wire sample against the reference it was queried with.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError::Protocol`] if the item values are not valid
    /// base64, are not a whole number of words, or do not match the
    /// reference's word count.
    pub(crate) fn decode(
        wire: WireSample,
        reference: Option<&Arc<UnboundReference>>,
    ) -> Result<Self, SessionError> {
        let item_values = match (wire.item_values.as_deref(), reference) {
            (Some(encoded), Some(reference)) => {
                let words = decode_words(encoded)?;
                if words.len() != reference.word_count() {
                    return Err(SessionError::Protocol {
                        message: format!(
                            "sample at {} has {} words, reference expects {}",
                            wire.time,
                            words.len(),
                            reference.word_count()
                        ),
                    });
                }
                Some(words)
            }
            (Some(_), None) => {
                return Err(SessionError::Protocol {
                    message: format!("sample at {} carries unrequested item values", wire.time),
                });
            }
            (None, _) => None,
        };
        Ok(Self {
            time: wire.time,
            item_values,
            diagnostics: wire
                .diagnostics
                .map(|list| list.into_iter().map(Diagnostic::from).collect()),
            reference: reference.map(Arc::clone),
        })
    }

    /// Time of the sample.
    pub const fn time(&self) -> TimePoint {
        self.time
    }

    /// Raw item values, when a reference was queried.
    pub fn item_values(&self) -> Option<&[u32]> {
        self.item_values.as_deref()
    }

    /// Diagnostics, when requested.
    pub fn diagnostics(&self) -> Option<&[Diagnostic]> {
        self.diagnostics.as_deref()
    }

    /// Whether the sample carries a break, assert or assume diagnostic.
    pub fn has_breakpoint(&self) -> bool {
        self.diagnostics
            .as_ref()
            .is_some_and(|list| list.iter().any(Diagnostic::is_breakpoint))
    }

    /// Words of one slot.
    pub fn extract(&self, slot: Slot) -> Option<&[u32]> {
        slot.extract(self.item_values.as_deref()?)
    }

    /// Decode the value of a designation that was part of the queried
    /// reference.
    pub fn value<T>(&self, designation: &Designation<T>) -> Option<T> {
        let slot = self.reference.as_ref()?.slot(designation.key())?;
        self.extract(slot).map(|words| designation.decode(words))
    }
}

/// Decode `base64(u32)` item values into little-endian words.
fn decode_words(encoded: &str) -> Result<Vec<u32>, SessionError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| SessionError::Protocol {
            message: format!("item values are not valid base64: {e}"),
        })?;
    let chunks = bytes.chunks_exact(4);
    if !chunks.remainder().is_empty() {
        return Err(SessionError::Protocol {
            message: format!("item values have {} bytes, not a multiple of 4", bytes.len()),
        });
    }
    chunks
        .map(|chunk| {
            <[u8; 4]>::try_from(chunk)
                .map(u32::from_le_bytes)
                .map_err(|e| SessionError::Protocol {
                    message: format!("item value word: {e}"),
                })
        })
        .collect()
}
