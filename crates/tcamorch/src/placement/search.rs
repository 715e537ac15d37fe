//! Free-row search inside a priority window.
//!
//! The search walks one category's slices in priority order and probes
//! rows against the hardware mirror, so a row counts as free only when
//! every bank of the cascade agrees across both case slots. Optimized
//! searches prefer banks the category has to itself, then banks whose
//! sharing partner is already squeezed everywhere, before burning rows
//! in contested banks.

use crate::context::SwitchRoutingContext;
use crate::table::RouteSlice;
use crate::types::{PlacementWindow, Row, RouteCategory, SearchDirection, SliceId};

/// Bank-sharing preference tiers for an optimized search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SharePass {
    /// Slices whose banks carry no other category.
    Unshared,
    /// Shared slices whose partners have no unshared banks of their own.
    SharedSafe,
    /// Any slice.
    Any,
}

/// Finds a free row for `category` strictly inside `window`.
///
/// `direction` picks which end of the window the search starts from.
/// With `optimize`, unshared banks are preferred over shared ones.
/// Slices outside the category's authorized range are skipped unless
/// `allow_unauthorized`, and even then only used when nothing
/// authorized fits.
pub fn find_free_row(
    ctx: &SwitchRoutingContext,
    category: RouteCategory,
    window: &PlacementWindow,
    direction: SearchDirection,
    optimize: bool,
    allow_unauthorized: bool,
) -> Option<(SliceId, Row)> {
    let passes: &[SharePass] = if optimize {
        &[SharePass::Unshared, SharePass::SharedSafe, SharePass::Any]
    } else {
        &[SharePass::Any]
    };

    let table = ctx.table(category);
    let mut order = table.slice_ids_desc();
    if direction == SearchDirection::Up {
        order.reverse();
    }

    let mut unauthorized_fallback: Option<(SliceId, Row)> = None;

    for pass in passes {
        for sid in &order {
            let slice = match table.slice(*sid) {
                Some(s) => s,
                None => continue,
            };
            if !slice.usable {
                if allow_unauthorized && unauthorized_fallback.is_none() {
                    if let Some(row) = probe_slice(ctx, slice, window, direction) {
                        unauthorized_fallback = Some((*sid, row));
                    }
                }
                continue;
            }
            if *pass != SharePass::Any && !pass_admits(ctx, category, slice, *pass) {
                continue;
            }
            if let Some(row) = probe_slice(ctx, slice, window, direction) {
                return Some((*sid, row));
            }
        }
    }
    unauthorized_fallback
}

/// Row bounds a window imposes on one slice, or `None` if the slice lies
/// entirely outside the window.
pub(crate) fn row_bounds_in_slice(
    slice: &RouteSlice,
    window: &PlacementWindow,
) -> Option<(Row, Row)> {
    let mut lo: Row = 0;
    let mut hi: Row = slice.rows_per_bank() - 1;

    if let Some(upper) = window.upper {
        if slice.first_bank > upper.bank {
            return None;
        }
        if slice.first_bank == upper.bank {
            // Rows below the bound in priority are the higher indices.
            if upper.row >= hi {
                return None;
            }
            lo = upper.row + 1;
        }
    }
    if let Some(lower) = window.lower {
        if slice.first_bank < lower.bank {
            return None;
        }
        if slice.first_bank == lower.bank {
            if lower.row == 0 {
                return None;
            }
            hi = hi.min(lower.row - 1);
        }
    }
    if lo > hi {
        return None;
    }
    Some((lo, hi))
}

/// Probes one slice for a free row inside the window.
fn probe_slice(
    ctx: &SwitchRoutingContext,
    slice: &RouteSlice,
    window: &PlacementWindow,
    direction: SearchDirection,
) -> Option<Row> {
    let (lo, hi) = row_bounds_in_slice(slice, window)?;
    let range = slice.range();
    let rows: Box<dyn Iterator<Item = Row>> = match direction {
        SearchDirection::Down => Box::new(lo..=hi),
        SearchDirection::Up => Box::new((lo..=hi).rev()),
    };
    for row in rows {
        if slice.rule_at(row).is_none() && ctx.hw.cascade_row_free(range, row) {
            return Some(row);
        }
    }
    None
}

fn pass_admits(
    ctx: &SwitchRoutingContext,
    category: RouteCategory,
    slice: &RouteSlice,
    pass: SharePass,
) -> bool {
    let shared = slice_is_shared(ctx, category, slice);
    match pass {
        SharePass::Unshared => !shared,
        SharePass::SharedSafe => {
            shared
                && sharing_partners(ctx, category, slice)
                    .into_iter()
                    .all(|p| category_fully_shared(ctx, p))
        }
        SharePass::Any => true,
    }
}

/// True if any bank of the slice also carries another category's cascade.
fn slice_is_shared(
    ctx: &SwitchRoutingContext,
    category: RouteCategory,
    slice: &RouteSlice,
) -> bool {
    let other = 1 - ctx.catalog.case_index(category);
    slice
        .range()
        .banks()
        .any(|b| ctx.hw.case_slot(b, other).is_some())
}

/// Categories sharing banks with this slice through the other case slot.
fn sharing_partners(
    ctx: &SwitchRoutingContext,
    category: RouteCategory,
    slice: &RouteSlice,
) -> Vec<RouteCategory> {
    let other = 1 - ctx.catalog.case_index(category);
    let mut partners = Vec::new();
    for bank in slice.range().banks() {
        if let Some(slot) = ctx.hw.case_slot(bank, other) {
            if !partners.contains(&slot.category) {
                partners.push(slot.category);
            }
        }
    }
    partners
}

/// True if every cascade of the category shares at least one bank, so
/// taking rows from one of its shared banks costs it nothing it could
/// have kept private.
fn category_fully_shared(ctx: &SwitchRoutingContext, category: RouteCategory) -> bool {
    let table = ctx.table(category);
    let ids = table.slice_ids_desc();
    if ids.is_empty() {
        return true;
    }
    ids.iter().all(|sid| {
        table
            .slice(*sid)
            .map(|s| slice_is_shared(ctx, category, s))
            .unwrap_or(true)
    })
}
