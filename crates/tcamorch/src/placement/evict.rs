//! Forced row clearing across sharing categories.
//!
//! When a category's window has no free row left, the engine may clear
//! one by relocating the other case's rules out of a chosen row, bank by
//! bank. Free banks of the target row are pre-reserved so a relocation
//! triggered here can never land back inside the row being cleared.

use log::{debug, info, warn};

use crate::context::SwitchRoutingContext;
use crate::error::{Result, TcamError};
use crate::hw::{RowStatus, RuleProgrammer};
use crate::placement::moves::{move_route_down_within_prefix, move_route_up_within_prefix};
use crate::placement::search::row_bounds_in_slice;
use crate::table::{allocate_cascade, retire_cascade};
use crate::types::{CascadeRange, EntryId, PlacementWindow, RouteCategory, Row, SliceId};

/// Forces a row free inside `window` for `category` by relocating the
/// sharing categories' rules out of it.
///
/// The requesting category is locked for the duration so relocations can
/// never recurse back into its own rules. Returns the freed slot, or
/// `None` when no candidate row could be fully cleared.
pub fn clear_cascade_row(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    window: &PlacementWindow,
    prog: &dyn RuleProgrammer,
) -> Option<(SliceId, Row)> {
    let was_locked = ctx.table(category).locked;
    ctx.table_mut(category).locked = true;
    let cleared = clear_row_locked(ctx, category, window, prog);
    ctx.table_mut(category).locked = was_locked;
    if let Some((sid, row)) = cleared {
        debug!("{}: cleared row {} in slice {}", category, row, sid);
    }
    cleared
}

fn clear_row_locked(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    window: &PlacementWindow,
    prog: &dyn RuleProgrammer,
) -> Option<(SliceId, Row)> {
    // Categories that already failed a relocation are not retried for
    // later candidate rows.
    let mut failed: Vec<RouteCategory> = Vec::new();
    let allow_unauthorized = ctx.table(category).use_unauthorized_slices;

    for sid in ctx.table(category).slice_ids_desc() {
        let (range, bounds) = {
            let Some(slice) = ctx.table(category).slice(sid) else {
                continue;
            };
            if !slice.usable && !allow_unauthorized {
                continue;
            }
            match row_bounds_in_slice(slice, window) {
                Some(b) => (slice.range(), b),
                None => continue,
            }
        };
        let (lo, hi) = bounds;
        for row in lo..=hi {
            let own = ctx
                .table(category)
                .slice(sid)
                .and_then(|s| s.rule_at(row));
            if own.is_some() {
                continue;
            }
            if try_clear_row(ctx, category, range, row, &mut failed, prog) {
                return Some((sid, row));
            }
        }
    }
    None
}

/// Attempts to empty one physical row across a cascade.
fn try_clear_row(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    range: CascadeRange,
    row: Row,
    failed: &mut Vec<RouteCategory>,
    prog: &dyn RuleProgrammer,
) -> bool {
    // Viability first: every occupied bank must hold a relocatable rule.
    let mut occupants: Vec<(RouteCategory, SliceId)> = Vec::new();
    for bank in range.banks() {
        match ctx.hw.row_status(bank, row) {
            RowStatus::Free => {}
            RowStatus::Reserved => return false,
            _ => {
                let Some((cat2, sid2)) = ctx.hw.occupant(bank, row) else {
                    return false;
                };
                if cat2 == category
                    || failed.contains(&cat2)
                    || ctx.table(cat2).locked
                    || !ctx.table(cat2).slice(sid2).is_some_and(|s| s.movable)
                {
                    return false;
                }
                if !occupants.contains(&(cat2, sid2)) {
                    occupants.push((cat2, sid2));
                }
            }
        }
    }
    if occupants.is_empty() {
        return false;
    }

    // Hold the free banks so the relocations below cannot circle back
    // into the row being cleared.
    let mut reserved = ctx.hw.reserve_free_banks(range, row);
    for (cat2, sid2) in occupants {
        let occupant = ctx.table(cat2).slice(sid2).and_then(|s| s.rule_at(row));
        let Some(id2) = occupant else {
            // Already vacated by an earlier relocation of a wider cascade.
            continue;
        };
        if !relocate_occupant(ctx, cat2, id2, prog) {
            warn!(
                "{}: cannot relocate a {} rule out of row {}, giving up on that category",
                category, cat2, row
            );
            failed.push(cat2);
            ctx.hw.release_reserved(&reserved, row);
            return false;
        }
        reserved.extend(ctx.hw.reserve_free_banks(range, row));
    }
    ctx.hw.release_reserved(&reserved, row);
    ctx.hw.cascade_row_free(range, row)
}

/// Moves one sharing-category rule anywhere legal for its prefix, allowing
/// unauthorized slices and, as a last resort, a freshly parked cascade.
fn relocate_occupant(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    id: EntryId,
    prog: &dyn RuleProgrammer,
) -> bool {
    let prev = ctx.table(category).use_unauthorized_slices;
    ctx.table_mut(category).use_unauthorized_slices = true;

    let mut moved = move_route_down_within_prefix(ctx, category, id, false, prog).is_ok()
        || move_route_up_within_prefix(ctx, category, id, false, prog).is_ok();
    if !moved {
        if let Ok(tmp) = allocate_temporary_cascade(ctx, category, prog) {
            moved = move_route_down_within_prefix(ctx, category, id, false, prog).is_ok()
                || move_route_up_within_prefix(ctx, category, id, false, prog).is_ok();
            if !moved && ctx.table(category).slice(tmp).is_some_and(|s| s.is_vacant()) {
                let _ = retire_cascade(ctx, category, tmp, prog);
            }
        }
    }

    ctx.table_mut(category).use_unauthorized_slices = prev;
    moved
}

/// Allocates a park cascade for displaced rules, outside the category's
/// authorized range if need be. Scans from the top of the routing span
/// for a bank run with the category's case slot free everywhere.
pub fn allocate_temporary_cascade(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    prog: &dyn RuleProgrammer,
) -> Result<SliceId> {
    let width = ctx.catalog.width(category);
    let case = ctx.catalog.case_index(category);
    let span = ctx.ownership.span();
    if span.len() < width {
        return Err(TcamError::NoSpace(category));
    }

    for first in (span.first..=span.last + 1 - width).rev() {
        let range = CascadeRange::new(first, width);
        if range.banks().any(|b| ctx.hw.case_slot(b, case).is_some()) {
            continue;
        }
        let sid = allocate_cascade(ctx, category, first, false, prog)?;
        if let Some(slice) = ctx.table_mut(category).slice_mut(sid) {
            slice.usable = false;
            slice.temporary = true;
        }
        info!("{}: parked displaced rules in temporary cascade {}", category, range);
        return Ok(sid);
    }
    Err(TcamError::NoSpace(category))
}
