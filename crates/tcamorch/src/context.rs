//! The shared engine state: catalog, hardware mirror, ownership record
//! and the four per-category routing tables.
//!
//! The context is plain cloneable data. Repartition simulation clones
//! the whole context, flips it to non-live and replays the plan against
//! the clone, so a failed simulation never touches real state.

use log::debug;
use serde::Serialize;

use crate::catalog::RouteTypeCatalog;
use crate::error::Result;
use crate::hw::{BankRange, HardwareSliceTable, OwnershipRanges, SliceOwnershipState};
use crate::table::RoutingTable;
use crate::types::{Bank, Position, RouteCategory};

/// All mutable state of one switch's routing TCAM.
#[derive(Debug, Clone)]
pub struct SwitchRoutingContext {
    /// Immutable per-category route type descriptions.
    pub catalog: RouteTypeCatalog,
    /// Ground-truth mirror of the physical banks.
    pub hw: HardwareSliceTable,
    /// Administrative bank ownership.
    pub ownership: SliceOwnershipState,
    /// One routing table per category, in catalog order.
    pub tables: Vec<RoutingTable>,
}

impl SwitchRoutingContext {
    pub fn new(catalog: RouteTypeCatalog, num_banks: u16, rows_per_bank: u16) -> Self {
        Self {
            catalog,
            hw: HardwareSliceTable::new(num_banks, rows_per_bank),
            ownership: SliceOwnershipState::new(BankRange::new(0, num_banks - 1), true),
            tables: RouteCategory::ALL.iter().map(|c| RoutingTable::new(*c)).collect(),
        }
    }

    pub fn table(&self, category: RouteCategory) -> &RoutingTable {
        &self.tables[category.index()]
    }

    pub fn table_mut(&mut self, category: RouteCategory) -> &mut RoutingTable {
        &mut self.tables[category.index()]
    }

    pub fn rows_per_bank(&self) -> u16 {
        self.hw.rows_per_bank()
    }

    /// Validates and applies new ownership ranges outside any transition,
    /// then refreshes per-slice usability.
    pub fn set_ownership(&mut self, ranges: &OwnershipRanges) -> Result<()> {
        let normalized = self.ownership.validate(&self.catalog, ranges)?;
        self.ownership.apply(normalized);
        self.refresh_usability();
        Ok(())
    }

    /// Recomputes `usable` on every slice from the current ownership.
    ///
    /// A temporary park cascade that ends up fully inside its category's
    /// authorized range is promoted to a regular slice.
    pub fn refresh_usability(&mut self) {
        for cat in RouteCategory::ALL {
            let ids = self.tables[cat.index()].slice_ids_desc();
            for sid in ids {
                let authorized = {
                    let slice = match self.tables[cat.index()].slice(sid) {
                        Some(s) => s,
                        None => continue,
                    };
                    slice
                        .range()
                        .banks()
                        .all(|b| self.ownership.is_bank_authorized(cat, b))
                };
                if let Some(slice) = self.tables[cat.index()].slice_mut(sid) {
                    slice.usable = authorized;
                    if authorized && slice.temporary {
                        debug!("{}: park cascade {} promoted to regular slice", cat, sid);
                        slice.temporary = false;
                    }
                }
            }
        }
    }

    /// Deep copy flagged non-live, for repartition what-if runs.
    pub fn clone_for_simulation(&self) -> Self {
        let mut clone = self.clone();
        clone.ownership.set_live(false);
        clone
    }

    /// Per-bank occupancy dump for operator introspection.
    pub fn bank_occupancy(&self) -> Vec<BankOccupancy> {
        let span = self.ownership.span();
        (span.first..=span.last)
            .map(|bank| {
                let state = self.hw.bank(bank);
                let cases = [0u8, 1].map(|case| {
                    self.hw.case_slot(bank, case).map(|slot| CaseOccupancy {
                        category: slot.category,
                        rows: state.count_rows(crate::hw::RowStatus::for_case(case)),
                    })
                });
                BankOccupancy {
                    bank,
                    in_use: state.in_use,
                    free_rows: state.count_rows(crate::hw::RowStatus::Free),
                    cases,
                }
            })
            .collect()
    }

    /// Per-category rule and slice counts.
    pub fn category_summary(&self) -> Vec<CategorySummary> {
        RouteCategory::ALL
            .iter()
            .map(|cat| {
                let table = self.table(*cat);
                CategorySummary {
                    category: *cat,
                    authorized: self.ownership.authorized_range(*cat),
                    rules: table.rule_count(),
                    slices: table.slice_count(),
                }
            })
            .collect()
    }

    /// Per-prefix-length placement bands for one category.
    pub fn prefix_summary(&self, category: RouteCategory) -> Vec<PrefixSummary> {
        let table = self.table(category);
        table
            .buckets
            .iter()
            .rev()
            .map(|(prefix_len, bucket)| {
                let band = table.bucket_band(*prefix_len);
                PrefixSummary {
                    prefix_len: *prefix_len,
                    rules: bucket.len(),
                    highest: band.map(|(_, hi)| hi),
                    lowest: band.map(|(lo, _)| lo),
                }
            })
            .collect()
    }
}

/// One stamped case slot in a bank dump.
#[derive(Debug, Clone, Serialize)]
pub struct CaseOccupancy {
    /// Category whose cascade owns the slot.
    pub category: RouteCategory,
    /// Rows this case currently occupies in the bank.
    pub rows: usize,
}

/// Occupancy of one bank.
#[derive(Debug, Clone, Serialize)]
pub struct BankOccupancy {
    pub bank: Bank,
    pub in_use: bool,
    pub free_rows: usize,
    pub cases: [Option<CaseOccupancy>; 2],
}

/// Rule and slice counts for one category.
#[derive(Debug, Clone, Serialize)]
pub struct CategorySummary {
    pub category: RouteCategory,
    pub authorized: Option<BankRange>,
    pub rules: usize,
    pub slices: usize,
}

/// Placement band of one prefix bucket, longest prefix first.
#[derive(Debug, Clone, Serialize)]
pub struct PrefixSummary {
    pub prefix_len: u8,
    pub rules: usize,
    /// Highest-priority position held by the bucket.
    pub highest: Option<Position>,
    /// Lowest-priority position held by the bucket.
    pub lowest: Option<Position>,
}
