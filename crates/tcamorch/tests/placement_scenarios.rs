//! End-to-end placement scenarios driven through the public facade.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use tcamorch::{
    ClassifiedRoute, OwnershipRanges, Position, RecordingProgrammer, RepartitionPhase,
    RouteCategory, RouteTypeCatalog, RowStatus, RuleKey, SwitchRoutingContext, TcamError,
    TcamOrch, TcamOrchConfig,
};

fn route(category: RouteCategory, key: u64, prefix_len: u8, tie_break: u32) -> ClassifiedRoute {
    ClassifiedRoute {
        category,
        key: RuleKey(key),
        prefix_len,
        tie_break,
        match_fields: vec![key as u32, (key >> 32) as u32],
        action: key as u32 + 1,
        vroff: 0,
    }
}

fn orch(num_banks: u16, rows_per_bank: u16, ranges: OwnershipRanges) -> TcamOrch {
    let config = TcamOrchConfig {
        num_banks,
        rows_per_bank,
        catalog: RouteTypeCatalog::default(),
        initial_ranges: Some(ranges),
    };
    TcamOrch::new(config, Arc::new(RecordingProgrammer::new())).unwrap()
}

/// Walking placed rules by ascending priority must never see the match
/// prefix length decrease.
fn assert_prefix_ordered(ctx: &SwitchRoutingContext, category: RouteCategory) {
    let table = ctx.table(category);
    let mut last: Option<(u8, Position)> = None;
    for (pos, id) in table.by_position.iter() {
        let prefix_len = table.entry(*id).unwrap().prefix_len;
        if let Some((prev_len, prev_pos)) = last {
            assert!(
                prefix_len >= prev_len,
                "{}: /{} at {} outranked by /{} at {}",
                category,
                prefix_len,
                pos,
                prev_len,
                prev_pos
            );
        }
        last = Some((prefix_len, *pos));
    }
}

/// Every placed rule must agree with the hardware mirror, across every
/// bank of its cascade.
fn assert_mirror_consistent(ctx: &SwitchRoutingContext) {
    for category in RouteCategory::ALL {
        let case = ctx.catalog.case_index(category);
        let table = ctx.table(category);
        for sid in table.slice_ids_desc() {
            let slice = table.slice(sid).unwrap();
            for (row, id) in slice.occupied_rows() {
                let entry = table.entry(id).expect("occupied row points at a live entry");
                assert_eq!(entry.slice, Some(sid));
                assert_eq!(entry.row, row);
                for bank in slice.range().banks() {
                    assert_eq!(
                        ctx.hw.row_status(bank, row),
                        RowStatus::for_case(case),
                        "bank {} row {} out of sync for {}",
                        bank,
                        row,
                        category
                    );
                }
            }
        }
    }
}

#[test]
fn first_route_takes_the_top_of_the_table() {
    let mut orch = orch(
        4,
        8,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3),
    );
    let handle = orch
        .add_route(RouteCategory::Ipv4Unicast, route(RouteCategory::Ipv4Unicast, 1, 24, 0))
        .unwrap();

    // Row 0 of the highest-numbered authorized cascade is the single
    // highest-priority slot available.
    assert_eq!(
        orch.context()
            .table(RouteCategory::Ipv4Unicast)
            .entry_position(handle.id),
        Some(Position::new(3, 0))
    );
    assert_mirror_consistent(orch.context());
}

#[test]
fn multicast_insert_evicts_unicast_from_shared_banks() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new()
            .with(RouteCategory::Ipv4Unicast, 2, 3)
            .with(RouteCategory::Ipv4Multicast, 2, 3),
    );
    for key in 0..8 {
        orch.add_route(
            RouteCategory::Ipv4Unicast,
            route(RouteCategory::Ipv4Unicast, key, 24, 0),
        )
        .unwrap();
    }

    // Grow unicast into banks 0..=1; no rule is stranded, so this is the
    // cheap path, but it preallocates the spare banks the eviction needs.
    let grown = OwnershipRanges::new()
        .with(RouteCategory::Ipv4Unicast, 0, 3)
        .with(RouteCategory::Ipv4Multicast, 2, 3);
    let report = orch.plan_repartition(&grown, false).unwrap();
    assert!(report.cheap_path);

    // Every row of the multicast cascade is occupied by unicast rules;
    // inserting multicast must relocate some of them.
    let mc = orch
        .add_route(
            RouteCategory::Ipv4Multicast,
            route(RouteCategory::Ipv4Multicast, 100, 32, 0),
        )
        .unwrap();

    let ctx = orch.context();
    let pos = ctx
        .table(RouteCategory::Ipv4Multicast)
        .entry_position(mc.id)
        .unwrap();
    assert_eq!(ctx.hw.row_status(2, pos.row), RowStatus::Case1);
    assert_eq!(ctx.hw.row_status(3, pos.row), RowStatus::Case1);
    assert_eq!(orch.rule_count(RouteCategory::Ipv4Unicast), 8);
    assert_prefix_ordered(ctx, RouteCategory::Ipv4Unicast);
    assert_mirror_consistent(ctx);
}

#[test]
fn unicast_insert_evicts_multicast_from_shared_banks() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new()
            .with(RouteCategory::Ipv4Unicast, 2, 3)
            .with(RouteCategory::Ipv4Multicast, 2, 3),
    );
    let mc_a = orch
        .add_route(
            RouteCategory::Ipv4Multicast,
            route(RouteCategory::Ipv4Multicast, 200, 32, 1),
        )
        .unwrap();
    let mc_b = orch
        .add_route(
            RouteCategory::Ipv4Multicast,
            route(RouteCategory::Ipv4Multicast, 201, 32, 2),
        )
        .unwrap();

    // The multicast rows block rows 0 and 1 of banks 2 and 3, leaving
    // exactly four unicast slots. Fill them all.
    for key in 0..4 {
        orch.add_route(
            RouteCategory::Ipv4Unicast,
            route(RouteCategory::Ipv4Unicast, key, 24, 0),
        )
        .unwrap();
    }

    // Grow multicast into banks 0..1 without touching placed rules, so the
    // shared rows stay where they are but a relocation target now exists.
    let grown = OwnershipRanges::new()
        .with(RouteCategory::Ipv4Unicast, 2, 3)
        .with(RouteCategory::Ipv4Multicast, 0, 3);
    let report = orch.plan_repartition(&grown, false).unwrap();
    assert!(report.cheap_path);

    // One more unicast rule forces a multicast rule out of the shared row.
    orch.add_route(
        RouteCategory::Ipv4Unicast,
        route(RouteCategory::Ipv4Unicast, 99, 24, 0),
    )
    .unwrap();

    assert_eq!(orch.rule_count(RouteCategory::Ipv4Unicast), 5);
    assert_eq!(orch.rule_count(RouteCategory::Ipv4Multicast), 2);
    let ctx = orch.context();
    assert!(ctx.table(RouteCategory::Ipv4Multicast).entry_position(mc_a.id).is_some());
    assert!(ctx.table(RouteCategory::Ipv4Multicast).entry_position(mc_b.id).is_some());
    assert_prefix_ordered(ctx, RouteCategory::Ipv4Unicast);
    assert_prefix_ordered(ctx, RouteCategory::Ipv4Multicast);
    assert_mirror_consistent(ctx);
}

#[test]
fn removing_every_bank_from_a_loaded_category_fails() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new()
            .with(RouteCategory::Ipv4Unicast, 0, 1)
            .with(RouteCategory::Ipv6Unicast, 2, 3),
    );
    let v6 = orch
        .add_route(
            RouteCategory::Ipv6Unicast,
            route(RouteCategory::Ipv6Unicast, 1, 64, 0),
        )
        .unwrap();
    let before = orch
        .context()
        .table(RouteCategory::Ipv6Unicast)
        .entry_position(v6.id);

    // The new plan gives IPv6 unicast nothing.
    let stripped = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 1);
    let report = orch.plan_repartition(&stripped, true).unwrap();
    assert_eq!(report.failure, Some(TcamError::InsufficientUnicastSpace));

    let err = orch.plan_repartition(&stripped, false).unwrap_err();
    assert_eq!(err, TcamError::InsufficientUnicastSpace);
    // The rule never left its bank and row.
    assert_eq!(
        orch.context()
            .table(RouteCategory::Ipv6Unicast)
            .entry_position(v6.id),
        before
    );
    assert_mirror_consistent(orch.context());
}

#[test]
fn committing_the_same_ranges_twice_is_a_no_op() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3),
    );
    for key in 0..4 {
        orch.add_route(
            RouteCategory::Ipv4Unicast,
            route(RouteCategory::Ipv4Unicast, key, 24, 0),
        )
        .unwrap();
    }

    let shrunk = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 1);
    orch.plan_repartition(&shrunk, false).unwrap();
    let snapshot = serde_json::to_string(&orch.bank_occupancy()).unwrap();

    let report = orch.plan_repartition(&shrunk, false).unwrap();
    assert!(report.cheap_path);
    assert_eq!(report.moves, 0);
    assert_eq!(serde_json::to_string(&orch.bank_occupancy()).unwrap(), snapshot);
}

#[test]
fn shrinking_ownership_defragments_the_survivors() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3),
    );
    for key in 0..6 {
        orch.add_route(
            RouteCategory::Ipv4Unicast,
            route(RouteCategory::Ipv4Unicast, key, 24, 0),
        )
        .unwrap();
    }

    let shrunk = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 1);
    let report = orch.plan_repartition(&shrunk, false).unwrap();
    assert_eq!(report.phase, RepartitionPhase::Committed);
    assert_eq!(report.moves, 6);

    let ctx = orch.context();
    let table = ctx.table(RouteCategory::Ipv4Unicast);
    assert_eq!(table.rule_count(), 6);
    for (pos, _) in table.by_position.iter() {
        assert!(pos.bank <= 1);
    }
    // The abandoned banks released their case slots.
    assert_eq!(ctx.hw.case_slot(2, 0), None);
    assert_eq!(ctx.hw.case_slot(3, 0), None);
    assert_prefix_ordered(ctx, RouteCategory::Ipv4Unicast);
    assert_mirror_consistent(ctx);
}

#[test]
fn failed_simulation_never_touches_live_state() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3),
    );
    let mut handles = Vec::new();
    for key in 0..6 {
        handles.push(
            orch.add_route(
                RouteCategory::Ipv4Unicast,
                route(RouteCategory::Ipv4Unicast, key, 24, 0),
            )
            .unwrap(),
        );
    }

    // Six rules cannot fit one 4-row bank; the simulation says so and
    // live state stays exactly as it was.
    let too_small = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 0);
    let report = orch.plan_repartition(&too_small, true).unwrap();
    assert_eq!(report.phase, RepartitionPhase::RolledBack);
    assert_eq!(report.failure, Some(TcamError::InsufficientUnicastSpace));
    assert!(!orch.context().ownership.transition_open());
    assert_eq!(orch.rule_count(RouteCategory::Ipv4Unicast), 6);
    assert_eq!(orch.context().table(RouteCategory::Ipv4Unicast).slice_count(), 4);

    // After trimming to 4 rules the same plan simulates clean, and the
    // live run then commits it.
    orch.delete_route(handles[0]).unwrap();
    orch.delete_route(handles[1]).unwrap();
    let report = orch.plan_repartition(&too_small, true).unwrap();
    assert_eq!(report.phase, RepartitionPhase::Committed);
    assert!(report.failure.is_none());

    let report = orch.plan_repartition(&too_small, false).unwrap();
    assert_eq!(report.phase, RepartitionPhase::Committed);
    assert_eq!(orch.rule_count(RouteCategory::Ipv4Unicast), 4);
    assert_prefix_ordered(orch.context(), RouteCategory::Ipv4Unicast);
    assert_mirror_consistent(orch.context());
}

#[test]
fn prefix_order_survives_interleaved_adds_and_deletes() {
    let mut orch = orch(
        4,
        8,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3),
    );
    let cat = RouteCategory::Ipv4Unicast;
    let prefixes = [24, 8, 16, 32, 24, 16, 8, 30, 12, 28, 20, 4, 32, 16];

    let mut handles = Vec::new();
    for (key, prefix_len) in prefixes.iter().enumerate() {
        let h = orch
            .add_route(cat, route(cat, key as u64, *prefix_len, key as u32))
            .unwrap();
        handles.push(h);
        assert_prefix_ordered(orch.context(), cat);
        assert_mirror_consistent(orch.context());
    }

    for h in handles.iter().step_by(3) {
        orch.delete_route(*h).unwrap();
        assert_prefix_ordered(orch.context(), cat);
        assert_mirror_consistent(orch.context());
    }

    // Refill with fresh keys; order must still hold.
    for (key, prefix_len) in prefixes.iter().enumerate().take(5) {
        orch.add_route(cat, route(cat, 100 + key as u64, *prefix_len, 0))
            .unwrap();
        assert_prefix_ordered(orch.context(), cat);
        assert_mirror_consistent(orch.context());
    }
}

#[test]
fn boundary_rules_give_way_in_a_single_bank() {
    // One bank, eight rows: inserting ever-longer prefixes keeps pushing
    // the shorter boundary rules down.
    let mut orch = orch(
        2,
        8,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 0),
    );
    let cat = RouteCategory::Ipv4Unicast;
    for (key, prefix_len) in [8u8, 8, 16, 16, 24, 24, 32].iter().enumerate().map(|(k, p)| (k as u64, *p)) {
        orch.add_route(cat, route(cat, key, prefix_len, 0)).unwrap();
        assert_prefix_ordered(orch.context(), cat);
    }
    assert_eq!(orch.rule_count(cat), 7);
    assert_mirror_consistent(orch.context());
}

#[test]
fn multicast_tie_break_orders_descending() {
    let mut orch = orch(
        4,
        4,
        OwnershipRanges::new().with(RouteCategory::Ipv4Multicast, 0, 3),
    );
    let cat = RouteCategory::Ipv4Multicast;
    let low = orch.add_route(cat, route(cat, 1, 32, 10)).unwrap();
    let high = orch.add_route(cat, route(cat, 2, 32, 20)).unwrap();

    // The per-prefix chain leads with the larger tie-break for multicast.
    let table = orch.context().table(cat);
    let bucket = table.buckets.get(&32).unwrap();
    assert_eq!(bucket.head, Some(high.id));
    assert_eq!(bucket.tail, Some(low.id));
}

#[test]
fn capacity_failure_is_clean_and_recoverable() {
    let mut orch = orch(
        2,
        2,
        OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 1),
    );
    let cat = RouteCategory::Ipv4Unicast;
    let mut handles = Vec::new();
    for key in 0..4 {
        handles.push(orch.add_route(cat, route(cat, key, 24, 0)).unwrap());
    }

    let err = orch.add_route(cat, route(cat, 99, 24, 0)).unwrap_err();
    assert_eq!(err, TcamError::NoSpace(cat));
    assert_eq!(orch.rule_count(cat), 4);
    assert_mirror_consistent(orch.context());

    // Freeing one slot makes the same insert succeed.
    orch.delete_route(handles[0]).unwrap();
    orch.add_route(cat, route(cat, 99, 24, 0)).unwrap();
    assert_eq!(orch.rule_count(cat), 4);
    assert_mirror_consistent(orch.context());
}

#[test]
fn simulation_emits_no_hardware_ops() {
    let prog = Arc::new(RecordingProgrammer::new());
    let config = TcamOrchConfig {
        num_banks: 4,
        rows_per_bank: 4,
        catalog: RouteTypeCatalog::default(),
        initial_ranges: Some(OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3)),
    };
    let mut orch = TcamOrch::new(config, prog.clone()).unwrap();
    let cat = RouteCategory::Ipv4Unicast;
    for key in 0..6 {
        orch.add_route(cat, route(cat, key, 24, 0)).unwrap();
    }

    // The whole migration runs against the clone; not one register access
    // reaches the real programmer.
    let before = prog.op_count();
    let shrunk = OwnershipRanges::new().with(cat, 0, 1);
    let report = orch.plan_repartition(&shrunk, true).unwrap();
    assert_eq!(report.moves, 6);
    assert_eq!(prog.op_count(), before);
}
