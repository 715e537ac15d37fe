//! Bank repartitioning: moving the ownership boundaries between
//! categories while every installed rule stays reachable.
//!
//! A repartition is validated first, taken down a cheap path when no
//! rule sits in a bank it is about to lose, and otherwise run as a
//! full defragmentation. The full run can be simulated against a clone
//! of the whole context with a no-op programmer, so callers can ask
//! "would this fit" without risking live state.

use log::{debug, info, warn};
use std::fmt;

use crate::context::SwitchRoutingContext;
use crate::error::{Result, TcamError};
use crate::hw::{BankRange, NoopProgrammer, OwnershipRanges, RuleProgrammer};
use crate::placement::{clear_cascade_row, find_free_row, move_route};
use crate::table::{preallocate, retire_cascade};
use crate::types::{EntryId, RouteCategory, SearchDirection};

/// Where a repartition run got to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepartitionPhase {
    /// No repartition in progress.
    Idle,
    /// Requested ranges being validated and normalized.
    Validating,
    /// Running against a cloned context.
    Cloned,
    /// Running against live state.
    Live,
    /// Creating cascades in the newly authorized ranges.
    Preallocating,
    /// Walking rules out of de-authorized banks.
    Defragmenting,
    /// Finished; new ownership is in force.
    Committed,
    /// Simulation failed; live state was never touched.
    RolledBack,
}

impl fmt::Display for RepartitionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Validating => "validating",
            Self::Cloned => "cloned",
            Self::Live => "live",
            Self::Preallocating => "preallocating",
            Self::Defragmenting => "defragmenting",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        f.write_str(name)
    }
}

/// Outcome of one `plan_repartition` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepartitionReport {
    /// True when the run happened against a cloned context.
    pub simulated: bool,
    /// True when no rule had to move.
    pub cheap_path: bool,
    /// Terminal phase of the run.
    pub phase: RepartitionPhase,
    /// Rule relocations performed.
    pub moves: usize,
    /// The capacity error a failed simulation ended with.
    pub failure: Option<TcamError>,
}

/// Re-plans bank ownership.
///
/// With `simulate`, a full run happens against a clone and the report
/// carries the outcome; live state is untouched either way. Without it,
/// the run mutates live state, and an `Err` leaves the ownership
/// transition open for the caller to re-plan.
pub fn plan_repartition(
    ctx: &mut SwitchRoutingContext,
    prog: &dyn RuleProgrammer,
    ranges: &OwnershipRanges,
    simulate: bool,
) -> Result<RepartitionReport> {
    let normalized = ctx.ownership.validate(&ctx.catalog, ranges)?;

    if !needs_defrag(ctx, &normalized) {
        if simulate {
            return Ok(RepartitionReport {
                simulated: true,
                cheap_path: true,
                phase: RepartitionPhase::Committed,
                moves: 0,
                failure: None,
            });
        }
        ctx.ownership.apply(normalized);
        ctx.refresh_usability();
        retire_vacant_unusable(ctx, prog)?;
        for cat in ctx.catalog.widest_first() {
            preallocate(ctx, cat, false, prog)?;
        }
        info!("repartition applied without moving any rule");
        return Ok(RepartitionReport {
            simulated: false,
            cheap_path: true,
            phase: RepartitionPhase::Committed,
            moves: 0,
            failure: None,
        });
    }

    if simulate {
        let mut sim = ctx.clone_for_simulation();
        let noop = NoopProgrammer;
        return Ok(match run_repartition(&mut sim, &noop, normalized) {
            Ok(moves) => RepartitionReport {
                simulated: true,
                cheap_path: false,
                phase: RepartitionPhase::Committed,
                moves,
                failure: None,
            },
            Err(e) => {
                debug!("repartition simulation failed: {}", e);
                RepartitionReport {
                    simulated: true,
                    cheap_path: false,
                    phase: RepartitionPhase::RolledBack,
                    moves: 0,
                    failure: Some(e),
                }
            }
        });
    }

    let moves = run_repartition(ctx, prog, normalized)?;
    info!("repartition committed after {} rule moves", moves);
    Ok(RepartitionReport {
        simulated: false,
        cheap_path: false,
        phase: RepartitionPhase::Committed,
        moves,
        failure: None,
    })
}

/// True if any placed rule sits in a bank its category is about to lose.
fn needs_defrag(ctx: &SwitchRoutingContext, normalized: &[Option<BankRange>; 4]) -> bool {
    for cat in RouteCategory::ALL {
        let new_range = normalized[cat.index()];
        let table = ctx.table(cat);
        for sid in table.slice_ids_desc() {
            let Some(slice) = table.slice(sid) else {
                continue;
            };
            if slice.is_vacant() {
                continue;
            }
            let stays = new_range
                .is_some_and(|r| slice.range().banks().all(|b| r.contains(b)));
            if !stays {
                return true;
            }
        }
    }
    false
}

/// The full repartition: transition, preallocate, defragment, verify.
fn run_repartition(
    ctx: &mut SwitchRoutingContext,
    prog: &dyn RuleProgrammer,
    normalized: [Option<BankRange>; 4],
) -> Result<usize> {
    ctx.ownership.begin_transition(normalized);
    ctx.refresh_usability();
    retire_vacant_unusable(ctx, prog)?;
    for cat in ctx.catalog.widest_first() {
        preallocate(ctx, cat, true, prog)?;
    }

    let mut moves = 0;
    for cat in ctx.catalog.widest_first() {
        moves += migrate_category(ctx, cat, prog)?;
    }

    // Banks emptied late in the walk may now fit cascades that were
    // deferred during the first preallocation pass.
    for cat in ctx.catalog.widest_first() {
        preallocate(ctx, cat, true, prog)?;
    }
    verify_all_usable(ctx)?;

    ctx.ownership.finalize_transition();
    ctx.refresh_usability();
    Ok(moves)
}

/// Retires every empty cascade stranded outside its authorized range.
fn retire_vacant_unusable(ctx: &mut SwitchRoutingContext, prog: &dyn RuleProgrammer) -> Result<()> {
    for cat in RouteCategory::ALL {
        for sid in ctx.table(cat).slice_ids_desc() {
            let stale = ctx
                .table(cat)
                .slice(sid)
                .is_some_and(|s| s.is_vacant() && !s.usable);
            if stale {
                retire_cascade(ctx, cat, sid, prog)?;
            }
        }
    }
    Ok(())
}

/// Walks one category's rules out of its de-authorized banks.
///
/// Rules are migrated lowest priority first with an upward search, so
/// the surviving range fills bottom-up and the priority invariant holds
/// at every intermediate step. The category is locked for the walk so a
/// forced eviction on behalf of another category cannot interleave.
fn migrate_category(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    prog: &dyn RuleProgrammer,
) -> Result<usize> {
    let pending: Vec<EntryId> = {
        let table = ctx.table(category);
        table
            .by_position
            .values()
            .copied()
            .filter(|id| {
                table
                    .entry(*id)
                    .and_then(|e| e.slice)
                    .and_then(|sid| table.slice(sid))
                    .is_some_and(|s| !s.usable)
            })
            .collect()
    };
    if pending.is_empty() {
        return Ok(0);
    }
    debug!("{}: migrating {} rules out of de-authorized banks", category, pending.len());

    ctx.table_mut(category).locked = true;
    let result = migrate_entries(ctx, category, &pending, prog);
    ctx.table_mut(category).locked = false;
    result
}

fn migrate_entries(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    pending: &[EntryId],
    prog: &dyn RuleProgrammer,
) -> Result<usize> {
    let mut moves = 0;
    for &id in pending {
        let (src_sid, prefix_len) = {
            let table = ctx.table(category);
            let Some(entry) = table.entry(id) else {
                continue;
            };
            let Some(sid) = entry.slice else { continue };
            (sid, entry.prefix_len)
        };
        let window = ctx.table(category).window_for_prefix(prefix_len);
        let dest = find_free_row(ctx, category, &window, SearchDirection::Up, true, false)
            .or_else(|| clear_cascade_row(ctx, category, &window, prog));
        let Some((sid, row)) = dest else {
            warn!("{}: no room left in the new range for {}", category, id);
            return Err(TcamError::insufficient_space(category));
        };
        move_route(ctx, category, id, sid, row, prog).map_err(|e| match e {
            TcamError::NoSpace(c) => TcamError::insufficient_space(c),
            other => other,
        })?;
        moves += 1;

        // An emptied stranded cascade frees its banks right away, so a
        // deferred preallocation can claim them mid-walk.
        let vacated = ctx
            .table(category)
            .slice(src_sid)
            .is_some_and(|s| s.is_vacant() && !s.usable);
        if vacated {
            retire_cascade(ctx, category, src_sid, prog)?;
            preallocate(ctx, category, true, prog)?;
        }
    }
    Ok(moves)
}

/// Every rule must end up placed in a usable cascade.
fn verify_all_usable(ctx: &SwitchRoutingContext) -> Result<()> {
    for cat in RouteCategory::ALL {
        let table = ctx.table(cat);
        for (_, entry) in table.arena.iter() {
            let ok = entry
                .slice
                .and_then(|sid| table.slice(sid))
                .is_some_and(|s| s.usable);
            if !ok {
                return Err(TcamError::insufficient_space(cat));
            }
        }
    }
    Ok(())
}
