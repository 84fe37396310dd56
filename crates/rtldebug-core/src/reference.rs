//! Ordered sets of designations and their bound form.
//!
//! An [`UnboundReference`] collects designations and lays their values out
//! back to back in one word array, in insertion order. Binding it under a
//! name produces a [`Reference`], stamped with the epoch of that binding;
//! every later binding of the same name makes it stale.

use std::collections::HashMap;
use std::sync::Arc;

use rtldebug_types::ItemDesignation;

use crate::designation::Designation;

/// Position of one designation's words in a value array.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot {
    /// Index of the first word.
    pub offset: usize,
    /// Number of words.
    pub len: usize,
}

impl Slot {
    /// Return this slot's words from a value array.
    ///
    /// Returns `None` if the array is too short.
    pub fn extract<'a>(&self, words: &'a [u32]) -> Option<&'a [u32]> {
        let end = self.offset.checked_add(self.len)?;
        words.get(self.offset..end)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    item: ItemDesignation,
    slot: Slot,
}

/// An ordered, append-only collection of designations.
#[derive(Debug, Clone, Default)]
pub struct UnboundReference {
    entries: Vec<Entry>,
    slots: HashMap<String, Slot>,
    words: usize,
}

impl UnboundReference {
    /// Create an empty collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a designation and return where its words will be.
    ///
    /// Adding a designation whose key is already present returns the
    /// existing slot and changes nothing.
    pub fn add<T>(&mut self, designation: &Designation<T>) -> Slot {
        if let Some(slot) = self.slots.get(designation.key()) {
            return *slot;
        }
        let slot = Slot {
            offset: self.words,
            len: designation.words(),
        };
        self.words = self.words.saturating_add(slot.len);
        self.entries.push(Entry {
            item: designation.item().clone(),
            slot,
        });
        self.slots.insert(designation.key().to_owned(), slot);
        slot
    }

    /// Slot of a previously added key.
    pub fn slot(&self, key: &str) -> Option<Slot> {
        self.slots.get(key).copied()
    }

    /// Wire designations in slot order.
    pub fn items(&self) -> Vec<ItemDesignation> {
        self.entries.iter().map(|entry| entry.item.clone()).collect()
    }

    /// Total number of words in a value array for this collection.
    pub const fn word_count(&self) -> usize {
        self.words
    }

    /// Number of distinct designations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing has been added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A named, epoch-stamped binding of an [`UnboundReference`].
///
/// Immutable and cheap to clone.
#[derive(Debug, Clone)]
pub struct Reference {
    name: Arc<str>,
    epoch: u64,
    unbound: Arc<UnboundReference>,
}

impl Reference {
    pub(crate) fn new(name: &str, epoch: u64, unbound: UnboundReference) -> Self {
        Self {
            name: Arc::from(name),
            epoch,
            unbound: Arc::new(unbound),
        }
    }

    /// Name the reference is bound under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Epoch of the binding that produced this reference.
    pub const fn epoch(&self) -> u64 {
        self.epoch
    }

    /// The bound designations.
    pub fn unbound(&self) -> &UnboundReference {
        &self.unbound
    }

    pub(crate) fn shared_unbound(&self) -> Arc<UnboundReference> {
        Arc::clone(&self.unbound)
    }
}
