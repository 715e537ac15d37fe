//! Rule installation and relocation.
//!
//! Every relocation is make-before-break: the destination slot is
//! written and only then is the source invalidated, so a lookup racing
//! the move always hits exactly one valid copy. A failure at any step
//! leaves the original placement untouched.

use log::{debug, trace};

use crate::context::SwitchRoutingContext;
use crate::error::{Result, TcamError};
use crate::hw::{ProgrammedRule, RuleProgrammer};
use crate::placement::evict::clear_cascade_row;
use crate::placement::search::find_free_row;
use crate::table::{retire_cascade, RuleEntry};
use crate::types::{EntryId, PlacementWindow, Position, RouteCategory, Row, SearchDirection, SliceId};

fn rule_image(entry: &RuleEntry) -> ProgrammedRule {
    ProgrammedRule {
        valid: entry.active,
        vroff: entry.vroff,
        key: entry.match_fields.clone(),
        action: entry.action,
    }
}

/// Writes a not-yet-placed rule into a slot and links the indices.
pub fn install_rule(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    id: EntryId,
    sid: SliceId,
    row: Row,
    prog: &dyn RuleProgrammer,
) -> Result<()> {
    let (range, image) = {
        let table = ctx.table(category);
        let slice = table
            .slice(sid)
            .ok_or_else(|| TcamError::InvalidArgument(format!("unknown slice {}", sid)))?;
        let entry = table.entry(id).ok_or(TcamError::RuleNotFound)?;
        (slice.range(), rule_image(entry))
    };
    let case = ctx.catalog.case_index(category);

    ctx.hw.occupy_row(range, row, case)?;
    if let Err(e) = prog.write_rule(range, row, &image) {
        let _ = ctx.hw.clear_row(range, row);
        return Err(e);
    }
    ctx.table_mut(category).link_placement(id, sid, row);
    trace!("{}: installed {} at {} row {}", category, id, range, row);
    Ok(())
}

/// Relocates a placed rule to a specific destination slot.
///
/// The destination is written before the source is invalidated. On any
/// failure the original placement stays valid and linked.
pub fn move_route(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    id: EntryId,
    dest_sid: SliceId,
    dest_row: Row,
    prog: &dyn RuleProgrammer,
) -> Result<()> {
    let (src_sid, src_row, src_range, dest_range, image) = {
        let table = ctx.table(category);
        let entry = table.entry(id).ok_or(TcamError::RuleNotFound)?;
        let src_sid = entry.slice.ok_or_else(|| {
            TcamError::InvalidArgument(format!("cannot move unplaced rule {}", id))
        })?;
        let src_range = table
            .slice(src_sid)
            .ok_or(TcamError::RuleNotFound)?
            .range();
        let dest_range = table
            .slice(dest_sid)
            .ok_or_else(|| TcamError::InvalidArgument(format!("unknown slice {}", dest_sid)))?
            .range();
        (src_sid, entry.row, src_range, dest_range, rule_image(entry))
    };
    if src_sid == dest_sid && src_row == dest_row {
        return Ok(());
    }
    let case = ctx.catalog.case_index(category);

    // On live hardware the copy is read back from the source slot, so the
    // moved image is bit-exact even if software state has drifted.
    let image = if ctx.ownership.live() {
        prog.read_rule(src_range, src_row)?
    } else {
        image
    };

    ctx.hw.occupy_row(dest_range, dest_row, case)?;
    if let Err(e) = prog.write_rule(dest_range, dest_row, &image) {
        let _ = ctx.hw.clear_row(dest_range, dest_row);
        return Err(e);
    }
    if let Err(e) = prog.invalidate_rule(src_range, src_row) {
        let _ = prog.invalidate_rule(dest_range, dest_row);
        let _ = ctx.hw.clear_row(dest_range, dest_row);
        return Err(e);
    }
    ctx.hw.clear_row(src_range, src_row)?;

    let table = ctx.table_mut(category);
    table.unlink_placement(id);
    table.link_placement(id, dest_sid, dest_row);
    trace!(
        "{}: moved {} from {} row {} to {} row {}",
        category,
        id,
        src_range,
        src_row,
        dest_range,
        dest_row
    );

    // A park cascade is torn down as soon as its last rule leaves.
    let vacated_temp = ctx
        .table(category)
        .slice(src_sid)
        .is_some_and(|s| s.temporary && s.is_vacant());
    if vacated_temp {
        retire_cascade(ctx, category, src_sid, prog)?;
    }
    Ok(())
}

fn lower_bound(ctx: &SwitchRoutingContext, category: RouteCategory, prefix_len: u8) -> Option<Position> {
    let table = ctx.table(category);
    table
        .highest_shorter(prefix_len)
        .and_then(|id| table.entry_position(id))
}

fn upper_bound(ctx: &SwitchRoutingContext, category: RouteCategory, prefix_len: u8) -> Option<Position> {
    let table = ctx.table(category);
    table
        .lowest_longer(prefix_len)
        .and_then(|id| table.entry_position(id))
}

/// Moves a placed rule to a strictly lower-priority slot still legal for
/// its prefix length, returning the vacated position.
///
/// When no such slot is free the shorter-prefix rule bounding the window
/// is itself pushed down first, recursively. `evict` additionally allows
/// forcing a row free in a sharing category's banks.
pub fn move_route_down_within_prefix(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    id: EntryId,
    evict: bool,
    prog: &dyn RuleProgrammer,
) -> Result<Position> {
    let (pos, prefix_len) = {
        let table = ctx.table(category);
        let entry = table.entry(id).ok_or(TcamError::RuleNotFound)?;
        let pos = table.entry_position(id).ok_or(TcamError::RuleNotFound)?;
        (pos, entry.prefix_len)
    };
    let allow_unauthorized = ctx.table(category).use_unauthorized_slices;
    let mut window = PlacementWindow {
        upper: Some(pos),
        lower: lower_bound(ctx, category, prefix_len),
    };

    let mut dest = find_free_row(
        ctx,
        category,
        &window,
        SearchDirection::Up,
        false,
        allow_unauthorized,
    );
    if dest.is_none() {
        if let Some(victim) = ctx.table(category).highest_shorter(prefix_len) {
            if move_route_down_within_prefix(ctx, category, victim, evict, prog).is_ok() {
                window.lower = lower_bound(ctx, category, prefix_len);
                dest = find_free_row(
                    ctx,
                    category,
                    &window,
                    SearchDirection::Up,
                    false,
                    allow_unauthorized,
                );
            }
        }
    }
    if dest.is_none() && evict {
        dest = clear_cascade_row(ctx, category, &window, prog);
    }
    let (sid, row) = dest.ok_or(TcamError::NoSpace(category))?;
    move_route(ctx, category, id, sid, row, prog)?;
    debug!("{}: pushed {} down from {}", category, id, pos);
    Ok(pos)
}

/// Moves a placed rule to a strictly higher-priority slot still legal for
/// its prefix length, returning the vacated position.
pub fn move_route_up_within_prefix(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    id: EntryId,
    evict: bool,
    prog: &dyn RuleProgrammer,
) -> Result<Position> {
    let (pos, prefix_len) = {
        let table = ctx.table(category);
        let entry = table.entry(id).ok_or(TcamError::RuleNotFound)?;
        let pos = table.entry_position(id).ok_or(TcamError::RuleNotFound)?;
        (pos, entry.prefix_len)
    };
    let allow_unauthorized = ctx.table(category).use_unauthorized_slices;
    let mut window = PlacementWindow {
        upper: upper_bound(ctx, category, prefix_len),
        lower: Some(pos),
    };

    let mut dest = find_free_row(
        ctx,
        category,
        &window,
        SearchDirection::Down,
        false,
        allow_unauthorized,
    );
    if dest.is_none() {
        if let Some(victim) = ctx.table(category).lowest_longer(prefix_len) {
            if move_route_up_within_prefix(ctx, category, victim, evict, prog).is_ok() {
                window.upper = upper_bound(ctx, category, prefix_len);
                dest = find_free_row(
                    ctx,
                    category,
                    &window,
                    SearchDirection::Down,
                    false,
                    allow_unauthorized,
                );
            }
        }
    }
    if dest.is_none() && evict {
        dest = clear_cascade_row(ctx, category, &window, prog);
    }
    let (sid, row) = dest.ok_or(TcamError::NoSpace(category))?;
    move_route(ctx, category, id, sid, row, prog)?;
    debug!("{}: pushed {} up from {}", category, id, pos);
    Ok(pos)
}

/// Places a freshly created rule entry, making room if necessary.
///
/// Tried in order: an optimized free-row search inside the prefix window,
/// pushing the shorter-prefix boundary down, pushing the longer-prefix
/// boundary up, and finally forcing a row free in a sharing category's
/// banks. Exhausting all four is a genuine capacity failure.
pub fn place_new_rule(
    ctx: &mut SwitchRoutingContext,
    category: RouteCategory,
    id: EntryId,
    prog: &dyn RuleProgrammer,
) -> Result<(SliceId, Row)> {
    let prefix_len = ctx
        .table(category)
        .entry(id)
        .ok_or(TcamError::RuleNotFound)?
        .prefix_len;

    let mut window = ctx.table(category).window_for_prefix(prefix_len);
    if let Some((sid, row)) = find_free_row(
        ctx,
        category,
        &window,
        SearchDirection::Down,
        true,
        false,
    ) {
        install_rule(ctx, category, id, sid, row, prog)?;
        return Ok((sid, row));
    }

    if let Some(victim) = ctx.table(category).highest_shorter(prefix_len) {
        if move_route_down_within_prefix(ctx, category, victim, true, prog).is_ok() {
            window = ctx.table(category).window_for_prefix(prefix_len);
            if let Some((sid, row)) =
                find_free_row(ctx, category, &window, SearchDirection::Down, true, false)
            {
                install_rule(ctx, category, id, sid, row, prog)?;
                return Ok((sid, row));
            }
        }
    }

    if let Some(victim) = ctx.table(category).lowest_longer(prefix_len) {
        if move_route_up_within_prefix(ctx, category, victim, true, prog).is_ok() {
            window = ctx.table(category).window_for_prefix(prefix_len);
            if let Some((sid, row)) =
                find_free_row(ctx, category, &window, SearchDirection::Down, true, false)
            {
                install_rule(ctx, category, id, sid, row, prog)?;
                return Ok((sid, row));
            }
        }
    }

    if let Some((sid, row)) = clear_cascade_row(ctx, category, &window, prog) {
        install_rule(ctx, category, id, sid, row, prog)?;
        return Ok((sid, row));
    }
    Err(TcamError::NoSpace(category))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::RouteTypeCatalog;
    use crate::hw::{FailingProgrammer, NoopProgrammer, OwnershipRanges, RowStatus};
    use crate::table::preallocate;
    use crate::types::{ClassifiedRoute, RuleKey};
    use pretty_assertions::assert_eq;

    fn route(key: u64, prefix_len: u8) -> ClassifiedRoute {
        ClassifiedRoute {
            category: RouteCategory::Ipv4Unicast,
            key: RuleKey(key),
            prefix_len,
            tie_break: 0,
            match_fields: vec![key as u32],
            action: 1,
            vroff: 0,
        }
    }

    fn ctx() -> SwitchRoutingContext {
        let mut ctx = SwitchRoutingContext::new(RouteTypeCatalog::default(), 4, 4);
        let ranges = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3);
        ctx.set_ownership(&ranges).unwrap();
        ctx.ownership.set_live(false);
        preallocate(&mut ctx, RouteCategory::Ipv4Unicast, false, &NoopProgrammer).unwrap();
        ctx
    }

    fn add(ctx: &mut SwitchRoutingContext, key: u64, prefix_len: u8) -> EntryId {
        let cat = RouteCategory::Ipv4Unicast;
        let r = route(key, prefix_len);
        let order_key = ctx.catalog.order_key(cat, r.tie_break);
        let id = ctx.table_mut(cat).create_entry(&r, order_key);
        place_new_rule(ctx, cat, id, &NoopProgrammer).unwrap();
        id
    }

    #[test]
    fn test_first_rule_lands_top_of_table() {
        let mut ctx = ctx();
        let id = add(&mut ctx, 1, 24);
        assert_eq!(
            ctx.table(RouteCategory::Ipv4Unicast).entry_position(id),
            Some(Position::new(3, 0))
        );
        // Hardware mirror agrees.
        assert_eq!(ctx.hw.row_status(3, 0), RowStatus::Case0);
    }

    #[test]
    fn test_longer_prefix_always_outranks_shorter() {
        let mut ctx = ctx();
        let cat = RouteCategory::Ipv4Unicast;
        let short = add(&mut ctx, 1, 8);
        let long = add(&mut ctx, 2, 24);
        let mid = add(&mut ctx, 3, 16);

        let table = ctx.table(cat);
        let p_short = table.entry_position(short).unwrap();
        let p_long = table.entry_position(long).unwrap();
        let p_mid = table.entry_position(mid).unwrap();
        assert!(p_long > p_mid);
        assert!(p_mid > p_short);
    }

    #[test]
    fn test_move_route_updates_all_indices() {
        let mut ctx = ctx();
        let cat = RouteCategory::Ipv4Unicast;
        let id = add(&mut ctx, 1, 24);
        let dest_sid = ctx.table(cat).slice_at_bank(1).unwrap();

        move_route(&mut ctx, cat, id, dest_sid, 2, &NoopProgrammer).unwrap();

        let table = ctx.table(cat);
        assert_eq!(table.entry_position(id), Some(Position::new(1, 2)));
        assert_eq!(table.by_position.len(), 1);
        assert_eq!(table.prio_head, Some(id));
        assert_eq!(ctx.hw.row_status(3, 0), RowStatus::Free);
        assert_eq!(ctx.hw.row_status(1, 2), RowStatus::Case0);
    }

    #[test]
    fn test_failed_move_leaves_original_placed() {
        let mut ctx = ctx();
        let cat = RouteCategory::Ipv4Unicast;
        let id = add(&mut ctx, 1, 24);
        let before = ctx.table(cat).entry_position(id).unwrap();
        let dest_sid = ctx.table(cat).slice_at_bank(0).unwrap();

        let err = move_route(&mut ctx, cat, id, dest_sid, 0, &FailingProgrammer);
        assert!(err.is_err());
        assert_eq!(ctx.table(cat).entry_position(id), Some(before));
        // The probed destination was rolled back in the mirror.
        assert_eq!(ctx.hw.row_status(0, 0), RowStatus::Free);
    }

    #[test]
    fn test_boundary_pushed_down_when_window_full() {
        // One bank, 4 rows: fill with a shorter prefix, then insert a
        // longer one; the shorter boundary rule must give way downward.
        let mut ctx = SwitchRoutingContext::new(RouteTypeCatalog::default(), 2, 4);
        let ranges = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 0);
        ctx.set_ownership(&ranges).unwrap();
        ctx.ownership.set_live(false);
        preallocate(&mut ctx, RouteCategory::Ipv4Unicast, false, &NoopProgrammer).unwrap();
        let cat = RouteCategory::Ipv4Unicast;

        let a = add(&mut ctx, 1, 8); // (0,0)
        let _b = add(&mut ctx, 2, 8); // (0,1)
        assert_eq!(ctx.table(cat).entry_position(a), Some(Position::new(0, 0)));

        let long = add(&mut ctx, 3, 24);
        let p_long = ctx.table(cat).entry_position(long).unwrap();
        let p_a = ctx.table(cat).entry_position(a).unwrap();
        assert!(p_long > p_a);
        assert_eq!(ctx.table(cat).rule_count(), 3);
    }

    #[test]
    fn test_place_fails_when_table_full() {
        let mut ctx = SwitchRoutingContext::new(RouteTypeCatalog::default(), 2, 2);
        let ranges = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 0);
        ctx.set_ownership(&ranges).unwrap();
        ctx.ownership.set_live(false);
        preallocate(&mut ctx, RouteCategory::Ipv4Unicast, false, &NoopProgrammer).unwrap();
        let cat = RouteCategory::Ipv4Unicast;

        add(&mut ctx, 1, 16);
        add(&mut ctx, 2, 16);

        let r = route(3, 16);
        let id = ctx.table_mut(cat).create_entry(&r, 0);
        let err = place_new_rule(&mut ctx, cat, id, &NoopProgrammer).unwrap_err();
        assert_eq!(err, TcamError::NoSpace(cat));
    }
}
