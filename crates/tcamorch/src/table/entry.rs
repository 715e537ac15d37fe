//! Rule entries and the arena that owns them.
//!
//! Entries are addressed by stable integer handles and carry intrusive
//! next/prev indices for the global priority chain and the per-prefix
//! chain. The arena recycles freed slots through a free list, so handles
//! stay dense without invalidating live ones.

use crate::types::{EntryId, Row, RuleKey, SliceId};

/// One installed (or mid-placement) rule.
#[derive(Debug, Clone)]
pub struct RuleEntry {
    /// Identity of the caller's route object.
    pub key: RuleKey,
    /// Match prefix length.
    pub prefix_len: u8,
    /// Raw secondary ordering key from classification.
    pub tie_break: u32,
    /// Tie-break normalized to the category comparator (ascending order).
    pub order_key: u32,
    /// Pre-encoded per-bank match fields.
    pub match_fields: Vec<u32>,
    /// Resolved action reference.
    pub action: u32,
    /// Virtual router offset.
    pub vroff: u32,
    /// Whether the hardware valid bit is set.
    pub active: bool,

    /// Owning slice, `None` while unplaced.
    pub slice: Option<SliceId>,
    /// Row within the owning slice (meaningful only when placed).
    pub row: Row,

    /// Priority chain toward lower priority.
    pub prio_next: Option<EntryId>,
    /// Priority chain toward higher priority.
    pub prio_prev: Option<EntryId>,
    /// Per-prefix chain, comparator order.
    pub pfx_next: Option<EntryId>,
    pub pfx_prev: Option<EntryId>,
}

impl RuleEntry {
    pub fn is_placed(&self) -> bool {
        self.slice.is_some()
    }
}

/// Dense arena of rule entries with a free list.
#[derive(Debug, Clone, Default)]
pub struct RuleArena {
    slots: Vec<Option<RuleEntry>>,
    free: Vec<EntryId>,
    len: usize,
}

impl RuleArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores an entry, recycling a freed slot when one exists.
    pub fn insert(&mut self, entry: RuleEntry) -> EntryId {
        self.len += 1;
        if let Some(id) = self.free.pop() {
            self.slots[id.index()] = Some(entry);
            id
        } else {
            self.slots.push(Some(entry));
            EntryId::new(self.slots.len() - 1)
        }
    }

    /// Removes an entry, returning it and recycling its slot.
    pub fn remove(&mut self, id: EntryId) -> Option<RuleEntry> {
        let entry = self.slots.get_mut(id.index())?.take()?;
        self.free.push(id);
        self.len -= 1;
        Some(entry)
    }

    pub fn get(&self, id: EntryId) -> Option<&RuleEntry> {
        self.slots.get(id.index())?.as_ref()
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut RuleEntry> {
        self.slots.get_mut(id.index())?.as_mut()
    }

    /// Iterates live entries with their handles.
    pub fn iter(&self) -> impl Iterator<Item = (EntryId, &RuleEntry)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|e| (EntryId::new(i), e)))
    }
}
