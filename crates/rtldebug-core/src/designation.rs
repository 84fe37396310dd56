//! Typed designations of simulation items.
//!
//! A [`Designation`] names something the server can report a value for (a
//! whole item, one memory row, a range of rows) together with the function
//! that turns the raw 32-bit words into a consumer-facing value. Two
//! designations are the same when their canonical keys are equal,
//! whatever their decoders.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use rtldebug_types::{ItemDesignation, Variable, WORD_BITS, words_for_width};

type Decoder<T> = Arc<dyn Fn(&[u32]) -> T + Send + Sync>;

/// A typed handle on one value the server can report.
pub struct Designation<T> {
    key: String,
    item: ItemDesignation,
    words: usize,
    decode: Decoder<T>,
}

impl<T> Designation<T> {
    /// Create a designation with a custom decoder.
    ///
    /// `key` must identify the designated value uniquely; `words` is the
    /// number of 32-bit words the server sends for it.
    pub fn new(
        key: impl Into<String>,
        item: ItemDesignation,
        words: usize,
        decode: impl Fn(&[u32]) -> T + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.into(),
            item,
            words,
            decode: Arc::new(decode),
        }
    }

    /// Canonical key; equal keys designate the same value.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// How the value is requested on the wire.
    pub const fn item(&self) -> &ItemDesignation {
        &self.item
    }

    /// Number of 32-bit words in the encoded value.
    pub const fn words(&self) -> usize {
        self.words
    }

    /// Decode raw words into a value.
    pub fn decode(&self, words: &[u32]) -> T {
        (self.decode)(words)
    }
}

impl Designation<BitValue> {
    /// Designate the whole value of a variable.
    ///
    /// For memories this is every row concatenated, row zero in the least
    /// significant words.
    pub fn variable(variable: &Variable) -> Self {
        let rows = match variable.kind() {
            rtldebug_types::VariableKind::Scalar => 1,
            rtldebug_types::VariableKind::Memory { depth, .. } => depth,
        };
        let width = variable.width().saturating_mul(rows);
        let words = variable.words_per_value().saturating_mul(rows as usize);
        Self::new(
            variable.full_name(),
            ItemDesignation::whole(variable.full_name()),
            words,
            move |raw| BitValue::new(width, raw.to_vec()),
        )
    }

    /// Designate one row of a memory.
    pub fn memory_row(variable: &Variable, row: u32) -> Self {
        let width = variable.width();
        Self::new(
            format!("{}[{row}]", variable.full_name()),
            ItemDesignation::rows(variable.full_name(), row, row),
            variable.words_per_value(),
            move |raw| BitValue::new(width, raw.to_vec()),
        )
    }
}

impl Designation<Vec<BitValue>> {
    /// Designate rows `first..=last` of a memory, decoded row by row.
    ///
    /// The bounds are swapped if given in descending order.
    pub fn memory_range(variable: &Variable, first: u32, last: u32) -> Self {
        let (first, last) = if first <= last {
            (first, last)
        } else {
            (last, first)
        };
        let width = variable.width();
        let row_words = variable.words_per_value();
        let rows = (last.abs_diff(first) as usize).saturating_add(1);
        Self::new(
            format!("{}[{first}:{last}]", variable.full_name()),
            ItemDesignation::rows(variable.full_name(), first, last),
            row_words.saturating_mul(rows),
            move |raw| {
                raw.chunks(row_words.max(1))
                    .map(|row| BitValue::new(width, row.to_vec()))
                    .collect()
            },
        )
    }
}

impl<T> Clone for Designation<T> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            item: self.item.clone(),
            words: self.words,
            decode: Arc::clone(&self.decode),
        }
    }
}

impl<T> PartialEq for Designation<T> {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl<T> Eq for Designation<T> {}

impl<T> Hash for Designation<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl<T> fmt::Debug for Designation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Designation")
            .field("key", &self.key)
            .field("item", &self.item)
            .field("words", &self.words)
            .finish_non_exhaustive()
    }
}

/// A bit vector value, stored as little-endian 32-bit words.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BitValue {
    width: u32,
    words: Vec<u32>,
}

impl BitValue {
    /// Create a value from its width and raw words (least significant first).
    pub const fn new(width: u32, words: Vec<u32>) -> Self {
        Self { width, words }
    }

    /// Width in bits.
    pub const fn width(&self) -> u32 {
        self.width
    }

    /// Raw words, least significant first.
    pub fn words(&self) -> &[u32] {
        &self.words
    }

    /// Whether every bit is zero.
    pub fn is_zero(&self) -> bool {
        self.words.iter().all(|word| *word == 0)
    }

    /// Return the value as a `u64` if it fits.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_u128().and_then(|value| u64::try_from(value).ok())
    }

    /// Return the value as a `u128` if it fits.
    pub fn as_u128(&self) -> Option<u128> {
        let mut value: u128 = 0;
        for (index, word) in self.words.iter().enumerate() {
            if *word == 0 {
                continue;
            }
            let shift = u32::try_from(index).ok()?.checked_mul(WORD_BITS)?;
            if shift >= u128::BITS {
                return None;
            }
            value |= u128::from(*word) << shift;
        }
        Some(value)
    }

    /// Return bit `index` (bit zero is the least significant).
    pub fn bit(&self, index: u32) -> bool {
        let word = (index / WORD_BITS) as usize;
        self.words
            .get(word)
            .is_some_and(|word| word & (1 << (index % WORD_BITS)) != 0)
    }

    /// Number of words a value of this width occupies.
    pub const fn expected_words(&self) -> usize {
        words_for_width(self.width)
    }
}

impl fmt::LowerHex for BitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut significant = self.words.iter().rev().skip_while(|word| **word == 0);
        match significant.next() {
            None => f.write_str("0"),
            Some(top) => {
                write!(f, "{top:x}")?;
                for word in significant {
                    write!(f, "{word:08x}")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for BitValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}'h{:x}", self.width, self)
    }
}
