//! Snapshot history storage indexed by sequence id.

use std::num::NonZeroUsize;

use crate::SequenceId;

/// A fixed-capacity ring of serialized snapshots, indexed by sequence id.
///
/// `put(id)` always writes slot `id % capacity`, replacing whatever that slot
/// held. Each slot remembers which id it holds, so [`get`](Self::get) never
/// hands out bytes that belong to a different id. Callers still check
/// recoverability with [`SequenceId::within_window`] before relying on an
/// older id being present.
#[derive(Debug)]
pub struct SnapshotRing {
    slots: Vec<Slot>,
    len: usize,
}

#[derive(Debug, Default)]
struct Slot {
    id: Option<SequenceId>,
    bytes: Vec<u8>,
}

impl SnapshotRing {
    /// Creates a new ring with the given capacity.
    #[must_use]
    pub fn new(capacity: NonZeroUsize) -> Self {
        let cap = capacity.get();
        let mut slots = Vec::with_capacity(cap);
        slots.resize_with(cap, Slot::default);
        Self { slots, len: 0 }
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if no snapshot has been stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores `bytes` as the snapshot for `id`.
    ///
    /// The slot's previous contents are gone once this returns. The slot's
    /// allocation is reused when it is large enough.
    pub fn put(&mut self, id: SequenceId, bytes: &[u8]) {
        let index = id.slot(self.slots.len());
        let slot = &mut self.slots[index];
        if slot.id.is_none() {
            self.len += 1;
        }
        slot.id = Some(id);
        slot.bytes.clear();
        slot.bytes.extend_from_slice(bytes);
    }

    /// Returns the snapshot for `id` if its slot still holds it.
    #[must_use]
    pub fn get(&self, id: SequenceId) -> Option<&[u8]> {
        let slot = &self.slots[id.slot(self.slots.len())];
        (slot.id == Some(id)).then_some(slot.bytes.as_slice())
    }

    /// Returns the id currently held by the slot `id` maps to.
    #[must_use]
    pub fn occupant(&self, id: SequenceId) -> Option<SequenceId> {
        self.slots[id.slot(self.slots.len())].id
    }
}
