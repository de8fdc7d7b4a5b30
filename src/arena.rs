//! The arena protection stack: a bounded stack of roots that
//! keeps newly allocated, not-yet-rooted objects alive across nested
//! allocation calls that might themselves trigger a collection.

use crate::error::GcError;
use crate::value::{GcRef, Value};

/// A bounded LIFO stack of protected references.
///
/// `save`/`restore` bracket a scope: code that allocates several objects
/// before wiring them together protects each one as it's created, then
/// restores to the saved index once they're reachable some other way
/// (assigned into a parent object, pushed onto the execution stack, etc).
pub struct Arena {
    entries: Vec<GcRef>,
    capacity: usize,
}

impl Arena {
    pub fn new(capacity: usize) -> Arena {
        Arena {
            entries: Vec::with_capacity(capacity.min(64)),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current index, to be handed back to [`Arena::restore`] later.
    pub fn save(&self) -> usize {
        self.entries.len()
    }

    /// Pop back down to a previously saved index. Entries above `index` stop
    /// being roots; whatever they still point at must be reachable some
    /// other way by now, or the next collection will reclaim it.
    pub fn restore(&mut self, index: usize) {
        debug_assert!(index <= self.entries.len());
        self.entries.truncate(index);
    }

    /// Push `ptr` onto the stack. On overflow, truncate the index
    /// to `capacity - 4` (evicting the four most recently pushed entries)
    /// and raise [`GcError::ArenaOverflow`] rather than growing unbounded —
    /// a collector with an ever-growing root set can never reclaim its own
    /// bookkeeping.
    pub fn protect_ptr(&mut self, ptr: GcRef) -> Result<GcRef, GcError> {
        if self.entries.len() >= self.capacity {
            let truncated = self.capacity.saturating_sub(4);
            log::warn!(
                "dynrt-gc: arena overflow at capacity {}, truncating to {}",
                self.capacity,
                truncated
            );
            self.entries.truncate(truncated);
            return Err(GcError::ArenaOverflow);
        }
        self.entries.push(ptr);
        Ok(ptr)
    }

    /// Convenience form taking a [`Value`]: immediates pass through
    /// untouched and are never pushed, since they need no protection.
    pub fn protect(&mut self, value: Value) -> Result<Value, GcError> {
        match value.as_gc_ref() {
            Some(ptr) => {
                self.protect_ptr(ptr)?;
                Ok(value)
            }
            None => Ok(value),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = GcRef> + '_ {
        self.entries.iter().copied()
    }
}
