//! The TCAM route orchestrator: the public surface tying the placement
//! engine, the repartition coordinator and the hardware programmer
//! together for one switch.

use log::{debug, info};
use std::sync::Arc;

use crate::catalog::RouteTypeCatalog;
use crate::context::{BankOccupancy, CategorySummary, PrefixSummary, SwitchRoutingContext};
use crate::error::{Result, TcamError};
use crate::hw::{OwnershipRanges, ProgrammedRule, RuleProgrammer};
use crate::placement::place_new_rule;
use crate::repartition::{plan_repartition, RepartitionReport};
use crate::table::{preallocate, retire_cascade};
use crate::types::{CascadeRange, ClassifiedRoute, RouteCategory, Row, RuleHandle, SliceId};

/// Static sizing and initial layout for one switch's routing TCAM.
#[derive(Debug, Clone)]
pub struct TcamOrchConfig {
    /// Physical banks owned by routing.
    pub num_banks: u16,
    /// Rows per bank.
    pub rows_per_bank: u16,
    /// Per-category route type descriptions.
    pub catalog: RouteTypeCatalog,
    /// Ownership applied (and preallocated) at startup, if any.
    pub initial_ranges: Option<OwnershipRanges>,
}

impl Default for TcamOrchConfig {
    fn default() -> Self {
        Self {
            num_banks: 8,
            rows_per_bank: 1024,
            catalog: RouteTypeCatalog::default(),
            initial_ranges: None,
        }
    }
}

/// Orchestrates route rule placement for one switch.
pub struct TcamOrch {
    ctx: SwitchRoutingContext,
    programmer: Arc<dyn RuleProgrammer>,
}

impl TcamOrch {
    pub fn new(config: TcamOrchConfig, programmer: Arc<dyn RuleProgrammer>) -> Result<Self> {
        if config.num_banks == 0 || config.rows_per_bank == 0 {
            return Err(TcamError::InvalidArgument(
                "bank and row counts must be non-zero".to_string(),
            ));
        }
        let ctx =
            SwitchRoutingContext::new(config.catalog, config.num_banks, config.rows_per_bank);
        let mut orch = Self { ctx, programmer };
        if let Some(ranges) = config.initial_ranges {
            orch.set_ownership(&ranges)?;
        }
        info!(
            "routing TCAM ready: {} banks of {} rows",
            config.num_banks, config.rows_per_bank
        );
        Ok(orch)
    }

    /// Applies ownership ranges outside any repartition and preallocates
    /// every authorized cascade. Intended for initial configuration;
    /// later changes go through [`TcamOrch::plan_repartition`].
    pub fn set_ownership(&mut self, ranges: &OwnershipRanges) -> Result<()> {
        self.ctx.set_ownership(ranges)?;
        for cat in self.ctx.catalog.widest_first() {
            preallocate(&mut self.ctx, cat, false, self.programmer.as_ref())?;
        }
        Ok(())
    }

    /// Installs one classified route, relocating other rules if needed.
    ///
    /// On any failure nothing stays installed and nothing else has been
    /// lost; `NoSpace` after the full effort is a genuine capacity limit.
    pub fn add_route(&mut self, category: RouteCategory, route: ClassifiedRoute) -> Result<RuleHandle> {
        if route.category != category {
            return Err(TcamError::InvalidCategory {
                expected: category,
                got: route.category,
            });
        }
        if route.prefix_len > category.max_prefix_len() {
            return Err(TcamError::InvalidArgument(format!(
                "prefix length {} exceeds /{} for {}",
                route.prefix_len,
                category.max_prefix_len(),
                category
            )));
        }
        if self.ctx.table(category).by_key.contains_key(&route.key) {
            return Err(TcamError::AlreadyExists(route.key));
        }

        let order_key = self.ctx.catalog.order_key(category, route.tie_break);
        let id = self.ctx.table_mut(category).create_entry(&route, order_key);
        match place_new_rule(&mut self.ctx, category, id, self.programmer.as_ref()) {
            Ok(_) => {
                debug!("{}: added route {}", category, route.key);
                Ok(RuleHandle { category, id })
            }
            Err(e) => {
                let _ = self.ctx.table_mut(category).destroy_entry(id);
                Err(e)
            }
        }
    }

    /// Removes an installed route: the hardware slot is invalidated first,
    /// then the indices are torn down.
    pub fn delete_route(&mut self, handle: RuleHandle) -> Result<()> {
        let category = handle.category;
        let (sid, row, range) = self.placed_slot(handle)?;

        self.programmer
            .invalidate_rule(range, row)
            .map_err(|e| TcamError::CannotInvalidate {
                bank: range.first_bank,
                row,
                reason: e.to_string(),
            })?;
        self.ctx.hw.clear_row(range, row)?;
        self.ctx.table_mut(category).unlink_placement(handle.id);
        self.ctx.table_mut(category).destroy_entry(handle.id)?;

        let vacated_temp = self
            .ctx
            .table(category)
            .slice(sid)
            .is_some_and(|s| s.temporary && s.is_vacant());
        if vacated_temp {
            retire_cascade(&mut self.ctx, category, sid, self.programmer.as_ref())?;
        }
        debug!("{}: deleted route {}", category, handle.id);
        Ok(())
    }

    /// Flips the valid bit of an installed route without moving it.
    pub fn set_route_active(&mut self, handle: RuleHandle, active: bool) -> Result<()> {
        let (_, row, range) = self.placed_slot(handle)?;
        let image = {
            let entry = self
                .ctx
                .table(handle.category)
                .entry(handle.id)
                .ok_or(TcamError::RuleNotFound)?;
            if entry.active == active {
                return Ok(());
            }
            ProgrammedRule {
                valid: active,
                vroff: entry.vroff,
                key: entry.match_fields.clone(),
                action: entry.action,
            }
        };
        self.programmer.write_rule(range, row, &image)?;
        if let Some(entry) = self.ctx.table_mut(handle.category).entry_mut(handle.id) {
            entry.active = active;
        }
        Ok(())
    }

    /// Repoints an installed route at a new action without moving it.
    pub fn set_route_action(&mut self, handle: RuleHandle, action: u32) -> Result<()> {
        let (_, row, range) = self.placed_slot(handle)?;
        let image = {
            let entry = self
                .ctx
                .table(handle.category)
                .entry(handle.id)
                .ok_or(TcamError::RuleNotFound)?;
            ProgrammedRule {
                valid: entry.active,
                vroff: entry.vroff,
                key: entry.match_fields.clone(),
                action,
            }
        };
        self.programmer.write_rule(range, row, &image)?;
        if let Some(entry) = self.ctx.table_mut(handle.category).entry_mut(handle.id) {
            entry.action = action;
        }
        Ok(())
    }

    /// Re-plans bank ownership, optionally as a pure simulation.
    pub fn plan_repartition(
        &mut self,
        ranges: &OwnershipRanges,
        simulate: bool,
    ) -> Result<RepartitionReport> {
        plan_repartition(&mut self.ctx, self.programmer.as_ref(), ranges, simulate)
    }

    /// Installed rules for one category.
    pub fn rule_count(&self, category: RouteCategory) -> usize {
        self.ctx.table(category).rule_count()
    }

    /// Per-bank occupancy dump.
    pub fn bank_occupancy(&self) -> Vec<BankOccupancy> {
        self.ctx.bank_occupancy()
    }

    /// Per-category rule and slice counts.
    pub fn category_summary(&self) -> Vec<CategorySummary> {
        self.ctx.category_summary()
    }

    /// Per-prefix placement bands for one category.
    pub fn prefix_summary(&self, category: RouteCategory) -> Vec<PrefixSummary> {
        self.ctx.prefix_summary(category)
    }

    /// Read-only view of the whole engine state.
    pub fn context(&self) -> &SwitchRoutingContext {
        &self.ctx
    }

    fn placed_slot(&self, handle: RuleHandle) -> Result<(SliceId, Row, CascadeRange)> {
        let table = self.ctx.table(handle.category);
        let entry = table.entry(handle.id).ok_or(TcamError::RuleNotFound)?;
        let sid = entry.slice.ok_or(TcamError::RuleNotFound)?;
        let range = table.slice(sid).ok_or(TcamError::RuleNotFound)?.range();
        Ok((sid, entry.row, range))
    }
}
