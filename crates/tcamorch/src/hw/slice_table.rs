//! Ground-truth mirror of the physical TCAM banks.
//!
//! One entry per bank records which of the two in-bank rule-sets ("cases")
//! is stamped for which category, plus a per-row occupancy code. Every
//! cross-bank mutation validates the whole cascade first and only then
//! writes, so the banks of a cascade always agree.

use serde::Serialize;

use crate::error::{Result, TcamError};
use crate::types::{Bank, CascadeRange, RouteCategory, Row, SliceId};

/// Per-row occupancy code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RowStatus {
    /// Row is free in this bank.
    Free,
    /// Row is pre-reserved by an in-flight eviction.
    Reserved,
    /// Row is in use by the rule-set in case slot 0.
    Case0,
    /// Row is in use by the rule-set in case slot 1.
    Case1,
}

impl RowStatus {
    /// The in-use code for a case slot.
    pub fn for_case(case: u8) -> RowStatus {
        if case == 0 {
            RowStatus::Case0
        } else {
            RowStatus::Case1
        }
    }

    /// Returns the occupying case slot, if any.
    pub fn case_index(self) -> Option<u8> {
        match self {
            RowStatus::Case0 => Some(0),
            RowStatus::Case1 => Some(1),
            _ => None,
        }
    }
}

/// One stamped case slot: which category's cascade owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaseSlot {
    /// Owning route category.
    pub category: RouteCategory,
    /// Owning route slice inside that category's table.
    pub slice: SliceId,
}

/// State of one physical bank.
#[derive(Debug, Clone)]
pub struct BankState {
    /// True while at least one case slot is stamped.
    pub in_use: bool,
    /// The two independent rule-set slots.
    pub cases: [Option<CaseSlot>; 2],
    /// Per-row occupancy codes.
    rows: Vec<RowStatus>,
}

impl BankState {
    fn new(rows_per_bank: u16) -> Self {
        Self {
            in_use: false,
            cases: [None, None],
            rows: vec![RowStatus::Free; rows_per_bank as usize],
        }
    }

    /// Occupancy code of one row.
    pub fn row(&self, row: Row) -> RowStatus {
        self.rows[row as usize]
    }

    /// Counts rows matching a status.
    pub fn count_rows(&self, status: RowStatus) -> usize {
        self.rows.iter().filter(|s| **s == status).count()
    }
}

/// The shared hardware slice table: one entry per physical bank.
#[derive(Debug, Clone)]
pub struct HardwareSliceTable {
    banks: Vec<BankState>,
    rows_per_bank: u16,
}

impl HardwareSliceTable {
    /// Builds a zeroed mirror, as done at switch initialization.
    pub fn new(num_banks: u16, rows_per_bank: u16) -> Self {
        Self {
            banks: (0..num_banks).map(|_| BankState::new(rows_per_bank)).collect(),
            rows_per_bank,
        }
    }

    pub fn num_banks(&self) -> u16 {
        self.banks.len() as u16
    }

    pub fn rows_per_bank(&self) -> u16 {
        self.rows_per_bank
    }

    /// Read-only view of one bank.
    pub fn bank(&self, bank: Bank) -> &BankState {
        &self.banks[bank as usize]
    }

    fn check_range(&self, range: CascadeRange, row: Option<Row>) -> Result<()> {
        if range.width == 0 || range.last_bank() >= self.num_banks() {
            return Err(TcamError::InvalidArgument(format!(
                "{} outside the {}-bank table",
                range,
                self.num_banks()
            )));
        }
        if let Some(row) = row {
            if row >= self.rows_per_bank {
                return Err(TcamError::InvalidArgument(format!(
                    "row {} outside the {}-row bank",
                    row, self.rows_per_bank
                )));
            }
        }
        Ok(())
    }

    /// The case slot binding of one bank, if stamped.
    pub fn case_slot(&self, bank: Bank, case: u8) -> Option<CaseSlot> {
        self.banks[bank as usize].cases[case as usize]
    }

    /// Stamps a case slot across every bank of a cascade.
    ///
    /// All banks must have the slot free, or nothing is written.
    pub fn bind_case(
        &mut self,
        range: CascadeRange,
        case: u8,
        category: RouteCategory,
        slice: SliceId,
    ) -> Result<()> {
        self.check_range(range, None)?;
        for bank in range.banks() {
            if self.banks[bank as usize].cases[case as usize].is_some() {
                return Err(TcamError::CaseSlotOccupied { bank });
            }
        }
        for bank in range.banks() {
            let state = &mut self.banks[bank as usize];
            state.cases[case as usize] = Some(CaseSlot { category, slice });
            state.in_use = true;
        }
        Ok(())
    }

    /// Clears a case slot across every bank of a cascade.
    pub fn unbind_case(&mut self, range: CascadeRange, case: u8) -> Result<()> {
        self.check_range(range, None)?;
        for bank in range.banks() {
            let state = &mut self.banks[bank as usize];
            state.cases[case as usize] = None;
            state.in_use = state.cases.iter().any(|c| c.is_some());
        }
        Ok(())
    }

    /// Occupancy code of one (bank, row).
    pub fn row_status(&self, bank: Bank, row: Row) -> RowStatus {
        self.banks[bank as usize].row(row)
    }

    /// Returns the category and slice occupying a (bank, row), if any.
    pub fn occupant(&self, bank: Bank, row: Row) -> Option<(RouteCategory, SliceId)> {
        let case = self.row_status(bank, row).case_index()?;
        self.case_slot(bank, case)
            .map(|slot| (slot.category, slot.slice))
    }

    /// True if the row is free in every bank of the cascade.
    pub fn cascade_row_free(&self, range: CascadeRange, row: Row) -> bool {
        range
            .banks()
            .all(|b| self.row_status(b, row) == RowStatus::Free)
    }

    /// Marks a row in use by a case slot across a whole cascade.
    ///
    /// Every bank must report the row free, or nothing is written.
    pub fn occupy_row(&mut self, range: CascadeRange, row: Row, case: u8) -> Result<()> {
        self.check_range(range, Some(row))?;
        for bank in range.banks() {
            if self.row_status(bank, row) != RowStatus::Free {
                return Err(TcamError::InvalidArgument(format!(
                    "row {} not free at bank {}",
                    row, bank
                )));
            }
        }
        for bank in range.banks() {
            self.banks[bank as usize].rows[row as usize] = RowStatus::for_case(case);
        }
        Ok(())
    }

    /// Frees a row across a whole cascade.
    ///
    /// Every bank must report the row in use, or nothing is written.
    pub fn clear_row(&mut self, range: CascadeRange, row: Row) -> Result<()> {
        self.check_range(range, Some(row))?;
        for bank in range.banks() {
            if self.row_status(bank, row).case_index().is_none() {
                return Err(TcamError::InvalidArgument(format!(
                    "row {} not occupied at bank {}",
                    row, bank
                )));
            }
        }
        for bank in range.banks() {
            self.banks[bank as usize].rows[row as usize] = RowStatus::Free;
        }
        Ok(())
    }

    /// Pre-reserves every currently-free bank of a row, returning the banks
    /// actually reserved so the caller can unwind exactly those.
    pub fn reserve_free_banks(&mut self, range: CascadeRange, row: Row) -> Vec<Bank> {
        let mut reserved = Vec::new();
        for bank in range.banks() {
            if self.row_status(bank, row) == RowStatus::Free {
                self.banks[bank as usize].rows[row as usize] = RowStatus::Reserved;
                reserved.push(bank);
            }
        }
        reserved
    }

    /// Releases reservations taken by `reserve_free_banks`.
    pub fn release_reserved(&mut self, banks: &[Bank], row: Row) {
        for bank in banks {
            let slot = &mut self.banks[*bank as usize].rows[row as usize];
            if *slot == RowStatus::Reserved {
                *slot = RowStatus::Free;
            }
        }
    }
}
