//! Per-category routing tables and cascade allocation.
//!
//! A routing table owns its rule-entry arena, its slices, and three
//! orderings over the installed rules: the global priority chain, the
//! identity index, and the per-prefix chains. All cross-structure
//! surgery happens here so the orderings can never drift apart.

use log::{debug, info};
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;

use crate::context::SwitchRoutingContext;
use crate::error::{Result, TcamError};
use crate::hw::RuleProgrammer;
use crate::table::entry::{RuleArena, RuleEntry};
use crate::table::prefix::PrefixBucket;
use crate::table::slice::RouteSlice;
use crate::types::{
    Bank, CascadeRange, ClassifiedRoute, EntryId, PlacementWindow, Position, RouteCategory, Row,
    RuleKey, SliceId,
};

/// The ordered collection of installed rules for one category.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    /// Category this table serves.
    pub category: RouteCategory,
    /// Rule-entry arena.
    pub arena: RuleArena,
    /// Identity index: caller's route object -> entry.
    pub by_key: HashMap<RuleKey, EntryId>,
    /// Position index, ascending priority order.
    pub by_position: BTreeMap<Position, EntryId>,
    /// Prefix buckets keyed by prefix length.
    pub buckets: BTreeMap<u8, PrefixBucket>,

    slices: Vec<Option<RouteSlice>>,
    slice_free: Vec<SliceId>,
    /// Slice handles ordered highest bank first.
    slice_order: Vec<SliceId>,

    /// Priority chain head (highest priority rule).
    pub prio_head: Option<EntryId>,
    /// Priority chain tail (lowest priority rule).
    pub prio_tail: Option<EntryId>,

    /// Set while a repartition walk owns this category's rules.
    pub locked: bool,
    /// Set while eviction may park this category's rules outside its
    /// authorized range.
    pub use_unauthorized_slices: bool,
}

impl RoutingTable {
    pub fn new(category: RouteCategory) -> Self {
        Self {
            category,
            arena: RuleArena::new(),
            by_key: HashMap::new(),
            by_position: BTreeMap::new(),
            buckets: BTreeMap::new(),
            slices: Vec::new(),
            slice_free: Vec::new(),
            slice_order: Vec::new(),
            prio_head: None,
            prio_tail: None,
            locked: false,
            use_unauthorized_slices: false,
        }
    }

    /// Number of installed rules.
    pub fn rule_count(&self) -> usize {
        self.arena.len()
    }

    pub fn slice(&self, id: SliceId) -> Option<&RouteSlice> {
        self.slices.get(id.index())?.as_ref()
    }

    pub fn slice_mut(&mut self, id: SliceId) -> Option<&mut RouteSlice> {
        self.slices.get_mut(id.index())?.as_mut()
    }

    /// Slice handles, highest bank first.
    pub fn slice_ids_desc(&self) -> Vec<SliceId> {
        self.slice_order.clone()
    }

    /// Number of allocated cascades.
    pub fn slice_count(&self) -> usize {
        self.slice_order.len()
    }

    /// The slice whose cascade starts at the given bank.
    pub fn slice_at_bank(&self, first_bank: Bank) -> Option<SliceId> {
        self.slice_order
            .iter()
            .copied()
            .find(|id| self.slice(*id).is_some_and(|s| s.first_bank == first_bank))
    }

    /// The slice whose cascade spans the given bank.
    pub fn slice_covering(&self, bank: Bank) -> Option<SliceId> {
        self.slice_order
            .iter()
            .copied()
            .find(|id| self.slice(*id).is_some_and(|s| s.range().contains(bank)))
    }

    /// Stores a slice and links it into the bank-descending order.
    pub fn insert_slice(&mut self, mut slice: RouteSlice) -> SliceId {
        let id = if let Some(id) = self.slice_free.pop() {
            slice.id = id;
            self.slices[id.index()] = Some(slice);
            id
        } else {
            let id = SliceId::new(self.slices.len());
            slice.id = id;
            self.slices.push(Some(slice));
            id
        };
        let first_bank = self.slice(id).map(|s| s.first_bank).unwrap_or(0);
        let at = self
            .slice_order
            .iter()
            .position(|s| self.slice(*s).is_some_and(|sl| sl.first_bank < first_bank))
            .unwrap_or(self.slice_order.len());
        self.slice_order.insert(at, id);
        id
    }

    /// Unlinks and frees a slice.
    pub fn remove_slice(&mut self, id: SliceId) -> Option<RouteSlice> {
        self.slice_order.retain(|s| *s != id);
        let slice = self.slices.get_mut(id.index())?.take()?;
        self.slice_free.push(id);
        Some(slice)
    }

    pub fn entry(&self, id: EntryId) -> Option<&RuleEntry> {
        self.arena.get(id)
    }

    pub fn entry_mut(&mut self, id: EntryId) -> Option<&mut RuleEntry> {
        self.arena.get_mut(id)
    }

    /// Priority position of a placed entry.
    pub fn entry_position(&self, id: EntryId) -> Option<Position> {
        let entry = self.entry(id)?;
        let slice = self.slice(entry.slice?)?;
        Some(slice.position(entry.row))
    }

    /// Creates an unplaced entry and links it into the identity index and
    /// its prefix bucket.
    pub fn create_entry(&mut self, route: &ClassifiedRoute, order_key: u32) -> EntryId {
        let id = self.arena.insert(RuleEntry {
            key: route.key,
            prefix_len: route.prefix_len,
            tie_break: route.tie_break,
            order_key,
            match_fields: route.match_fields.clone(),
            action: route.action,
            vroff: route.vroff,
            active: true,
            slice: None,
            row: 0,
            prio_next: None,
            prio_prev: None,
            pfx_next: None,
            pfx_prev: None,
        });
        self.by_key.insert(route.key, id);
        self.link_prefix_chain(id, route.prefix_len, order_key);
        id
    }

    /// Destroys an entry. It must already be unplaced.
    pub fn destroy_entry(&mut self, id: EntryId) -> Result<RuleEntry> {
        let (prefix_len, order_key, placed, key) = {
            let entry = self.entry(id).ok_or(TcamError::RuleNotFound)?;
            (entry.prefix_len, entry.order_key, entry.is_placed(), entry.key)
        };
        if placed {
            return Err(TcamError::InvalidArgument(
                "cannot destroy a placed rule entry".to_string(),
            ));
        }
        self.unlink_prefix_chain(id, prefix_len, order_key);
        self.by_key.remove(&key);
        self.arena
            .remove(id)
            .ok_or(TcamError::RuleNotFound)
    }

    fn link_prefix_chain(&mut self, id: EntryId, prefix_len: u8, order_key: u32) {
        let bucket = self
            .buckets
            .entry(prefix_len)
            .or_insert_with(|| PrefixBucket::new(prefix_len));
        let pred = bucket.insert(order_key, id);
        let old_head = bucket.head;

        match pred {
            Some(p) => {
                let p_next = self.arena.get(p).and_then(|e| e.pfx_next);
                if let Some(e) = self.arena.get_mut(id) {
                    e.pfx_prev = Some(p);
                    e.pfx_next = p_next;
                }
                if let Some(e) = self.arena.get_mut(p) {
                    e.pfx_next = Some(id);
                }
                match p_next {
                    Some(n) => {
                        if let Some(e) = self.arena.get_mut(n) {
                            e.pfx_prev = Some(id);
                        }
                    }
                    None => {
                        if let Some(b) = self.buckets.get_mut(&prefix_len) {
                            b.tail = Some(id);
                        }
                    }
                }
            }
            None => {
                if let Some(e) = self.arena.get_mut(id) {
                    e.pfx_prev = None;
                    e.pfx_next = old_head;
                }
                match old_head {
                    Some(h) => {
                        if let Some(e) = self.arena.get_mut(h) {
                            e.pfx_prev = Some(id);
                        }
                    }
                    None => {
                        if let Some(b) = self.buckets.get_mut(&prefix_len) {
                            b.tail = Some(id);
                        }
                    }
                }
                if let Some(b) = self.buckets.get_mut(&prefix_len) {
                    b.head = Some(id);
                }
            }
        }
    }

    fn unlink_prefix_chain(&mut self, id: EntryId, prefix_len: u8, order_key: u32) {
        let (prev, next) = {
            let entry = match self.arena.get(id) {
                Some(e) => e,
                None => return,
            };
            (entry.pfx_prev, entry.pfx_next)
        };
        match prev {
            Some(p) => {
                if let Some(e) = self.arena.get_mut(p) {
                    e.pfx_next = next;
                }
            }
            None => {
                if let Some(b) = self.buckets.get_mut(&prefix_len) {
                    b.head = next;
                }
            }
        }
        match next {
            Some(n) => {
                if let Some(e) = self.arena.get_mut(n) {
                    e.pfx_prev = prev;
                }
            }
            None => {
                if let Some(b) = self.buckets.get_mut(&prefix_len) {
                    b.tail = prev;
                }
            }
        }
        if let Some(e) = self.arena.get_mut(id) {
            e.pfx_prev = None;
            e.pfx_next = None;
        }
        let empty = {
            let bucket = self.buckets.get_mut(&prefix_len);
            match bucket {
                Some(b) => {
                    b.remove(order_key, id);
                    b.is_empty()
                }
                None => false,
            }
        };
        if empty {
            self.buckets.remove(&prefix_len);
        }
    }

    /// Records a placement: row map, position index, priority chain.
    pub fn link_placement(&mut self, id: EntryId, sid: SliceId, row: Row) {
        let pos = {
            let slice = self.slice_mut(sid).expect("placement into live slice");
            slice.set_row(row, id);
            slice.position(row)
        };
        if let Some(e) = self.arena.get_mut(id) {
            e.slice = Some(sid);
            e.row = row;
        }
        self.by_position.insert(pos, id);
        self.link_priority_chain(id, pos);
    }

    /// Clears a placement, returning where the rule used to live.
    pub fn unlink_placement(&mut self, id: EntryId) -> Option<(SliceId, Row)> {
        let (sid, row) = {
            let entry = self.arena.get(id)?;
            (entry.slice?, entry.row)
        };
        let pos = self.slice(sid)?.position(row);
        self.unlink_priority_chain(id);
        self.by_position.remove(&pos);
        if let Some(slice) = self.slice_mut(sid) {
            slice.clear_row(row);
        }
        if let Some(e) = self.arena.get_mut(id) {
            e.slice = None;
            e.row = 0;
        }
        Some((sid, row))
    }

    fn link_priority_chain(&mut self, id: EntryId, pos: Position) {
        let higher = self
            .by_position
            .range((Bound::Excluded(pos), Bound::Unbounded))
            .next()
            .map(|(_, e)| *e);
        let lower = self.by_position.range(..pos).next_back().map(|(_, e)| *e);

        if let Some(e) = self.arena.get_mut(id) {
            e.prio_prev = higher;
            e.prio_next = lower;
        }
        match higher {
            Some(h) => {
                if let Some(e) = self.arena.get_mut(h) {
                    e.prio_next = Some(id);
                }
            }
            None => self.prio_head = Some(id),
        }
        match lower {
            Some(l) => {
                if let Some(e) = self.arena.get_mut(l) {
                    e.prio_prev = Some(id);
                }
            }
            None => self.prio_tail = Some(id),
        }
    }

    fn unlink_priority_chain(&mut self, id: EntryId) {
        let (prev, next) = {
            let entry = match self.arena.get(id) {
                Some(e) => e,
                None => return,
            };
            (entry.prio_prev, entry.prio_next)
        };
        match prev {
            Some(p) => {
                if let Some(e) = self.arena.get_mut(p) {
                    e.prio_next = next;
                }
            }
            None => self.prio_head = next,
        }
        match next {
            Some(n) => {
                if let Some(e) = self.arena.get_mut(n) {
                    e.prio_prev = prev;
                }
            }
            None => self.prio_tail = prev,
        }
        if let Some(e) = self.arena.get_mut(id) {
            e.prio_prev = None;
            e.prio_next = None;
        }
    }

    /// The highest-priority placed rule with a shorter prefix.
    pub fn highest_shorter(&self, prefix_len: u8) -> Option<EntryId> {
        self.by_position
            .iter()
            .rev()
            .find(|(_, id)| {
                self.entry(**id)
                    .is_some_and(|e| e.prefix_len < prefix_len)
            })
            .map(|(_, id)| *id)
    }

    /// The lowest-priority placed rule with a longer prefix.
    pub fn lowest_longer(&self, prefix_len: u8) -> Option<EntryId> {
        self.by_position
            .iter()
            .find(|(_, id)| {
                self.entry(**id)
                    .is_some_and(|e| e.prefix_len > prefix_len)
            })
            .map(|(_, id)| *id)
    }

    /// The priority window a rule of this prefix length must land in:
    /// strictly below every longer prefix, strictly above every shorter.
    pub fn window_for_prefix(&self, prefix_len: u8) -> PlacementWindow {
        PlacementWindow {
            upper: self
                .lowest_longer(prefix_len)
                .and_then(|id| self.entry_position(id)),
            lower: self
                .highest_shorter(prefix_len)
                .and_then(|id| self.entry_position(id)),
        }
    }

    /// Lowest and highest priority positions currently held by a bucket.
    pub fn bucket_band(&self, prefix_len: u8) -> Option<(Position, Position)> {
        let bucket = self.buckets.get(&prefix_len)?;
        let mut band: Option<(Position, Position)> = None;
        for id in bucket.iter() {
            if let Some(pos) = self.entry_position(id) {
                band = Some(match band {
                    None => (pos, pos),
                    Some((lo, hi)) => (lo.min(pos), hi.max(pos)),
                });
            }
        }
        band
    }

    /// Neighboring bucket with a shorter prefix and at least one placed rule.
    pub fn next_shorter_bucket(&self, prefix_len: u8) -> Option<u8> {
        self.buckets
            .range(..prefix_len)
            .rev()
            .find(|(_, b)| b.iter().any(|id| self.entry(id).is_some_and(|e| e.is_placed())))
            .map(|(p, _)| *p)
    }

    /// Neighboring bucket with a longer prefix and at least one placed rule.
    pub fn next_longer_bucket(&self, prefix_len: u8) -> Option<u8> {
        self.buckets
            .range((Bound::Excluded(prefix_len), Bound::Unbounded))
            .find(|(_, b)| b.iter().any(|id| self.entry(id).is_some_and(|e| e.is_placed())))
            .map(|(p, _)| *p)
    }

    /// The bucket member at the low-priority edge of its band.
    pub fn bucket_lowest(&self, prefix_len: u8) -> Option<EntryId> {
        let bucket = self.buckets.get(&prefix_len)?;
        bucket
            .iter()
            .filter_map(|id| self.entry_position(id).map(|p| (p, id)))
            .min_by_key(|(p, _)| *p)
            .map(|(_, id)| id)
    }

    /// The bucket member at the high-priority edge of its band.
    pub fn bucket_highest(&self, prefix_len: u8) -> Option<EntryId> {
        let bucket = self.buckets.get(&prefix_len)?;
        bucket
            .iter()
            .filter_map(|id| self.entry_position(id).map(|p| (p, id)))
            .max_by_key(|(p, _)| *p)
            .map(|(_, id)| id)
    }
}

/// Allocates one cascade for a category starting at `first_bank`.
///
/// Validates authorization (unless the caller is parking displaced rules
/// outside the authorized range) and case-slot availability in every bank,
/// stamps the hardware case slots and enables the cascade.
pub fn allocate_cascade(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    first_bank: Bank,
    require_authorized: bool,
    prog: &dyn RuleProgrammer,
) -> Result<SliceId> {
    let width = ctx.catalog.width(category);
    let case = ctx.catalog.case_index(category);
    let field_selects = ctx.catalog.entry(category).field_selects.clone();
    let range = CascadeRange::new(first_bank, width);

    if range.last_bank() >= ctx.hw.num_banks() {
        return Err(TcamError::InvalidRange(format!(
            "{} outside the {}-bank table",
            range,
            ctx.hw.num_banks()
        )));
    }
    let authorized = range
        .banks()
        .all(|b| ctx.ownership.is_bank_authorized(category, b));
    if require_authorized && !authorized {
        return Err(TcamError::InvalidRange(format!(
            "{} not authorized for {}",
            range, category
        )));
    }
    for bank in range.banks() {
        if ctx.hw.case_slot(bank, case).is_some() {
            return Err(TcamError::CaseSlotOccupied { bank });
        }
    }

    let rows = ctx.hw.rows_per_bank();
    let slice = RouteSlice::new(category, first_bank, width, rows, field_selects, authorized);
    let sid = ctx.table_mut(category).insert_slice(slice);

    if let Err(e) = ctx.hw.bind_case(range, case, category, sid) {
        ctx.table_mut(category).remove_slice(sid);
        return Err(e);
    }
    if let Err(e) = prog.enable_cascade(range) {
        let _ = ctx.hw.unbind_case(range, case);
        ctx.table_mut(category).remove_slice(sid);
        return Err(e);
    }

    debug!("{}: allocated cascade {} ({})", category, sid, range);
    Ok(sid)
}

/// Scans the authorized range and creates every missing cascade.
///
/// During a repartition the scan tolerates banks still occupied by a
/// category that is no longer authorized there; those ranges are picked
/// up by a later pass once defragmentation empties them.
pub fn preallocate(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    during_repartition: bool,
    prog: &dyn RuleProgrammer,
) -> Result<usize> {
    let Some(auth) = ctx.ownership.authorized_range(category) else {
        return Ok(0);
    };
    let width = ctx.catalog.width(category);
    let case = ctx.catalog.case_index(category);
    let mut created = 0;
    let mut start = auth.first;

    while start + width - 1 <= auth.last {
        if let Some(sid) = ctx.table(category).slice_at_bank(start) {
            if let Some(slice) = ctx.table_mut(category).slice_mut(sid) {
                slice.usable = true;
                slice.temporary = false;
            }
            start += width;
            continue;
        }
        let range = CascadeRange::new(start, width);
        let busy = range.banks().find(|b| ctx.hw.case_slot(*b, case).is_some());
        if let Some(bank) = busy {
            if during_repartition {
                debug!(
                    "{}: {} still occupied at bank {}, deferring",
                    category, range, bank
                );
                start += width;
                continue;
            }
            return Err(TcamError::CaseSlotOccupied { bank });
        }
        allocate_cascade(ctx, category, start, true, prog)?;
        created += 1;
        start += width;
    }
    if created > 0 {
        info!("{}: preallocated {} cascades", category, created);
    }
    Ok(created)
}

/// Retires an empty cascade: disables it, clears its case slots, frees it.
pub fn retire_cascade(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    sid: SliceId,
    prog: &dyn RuleProgrammer,
) -> Result<()> {
    let (range, count) = {
        let slice = ctx
            .table(category)
            .slice(sid)
            .ok_or_else(|| TcamError::InvalidArgument(format!("unknown slice {}", sid)))?;
        (slice.range(), slice.rule_count)
    };
    if count > 0 {
        return Err(TcamError::InvalidArgument(format!(
            "cascade {} still holds {} rules",
            sid, count
        )));
    }
    let case = ctx.catalog.case_index(category);
    prog.disable_cascade(range)?;
    ctx.hw.unbind_case(range, case)?;
    ctx.table_mut(category).remove_slice(sid);
    debug!("{}: retired cascade {} ({})", category, sid, range);
    Ok(())
}
