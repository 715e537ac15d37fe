//! Route slices: one allocated cascade and its row occupancy.

use crate::types::{Bank, CascadeRange, EntryId, Position, RouteCategory, Row, SliceId};

/// One allocated cascade: a contiguous run of banks sized to the
/// category's width, with a row-to-rule map.
#[derive(Debug, Clone)]
pub struct RouteSlice {
    /// Handle inside the owning table's slice arena.
    pub id: SliceId,
    /// Owning category.
    pub category: RouteCategory,
    /// First (lowest-numbered) bank of the cascade.
    pub first_bank: Bank,
    /// Banks spanned.
    pub width: u16,
    /// Field-select layout programmed into the cascade's banks.
    pub field_selects: Vec<u8>,

    rows: Vec<Option<EntryId>>,
    /// Installed rules in this cascade.
    pub rule_count: u16,
    /// Smallest occupied row index, if any.
    pub lowest_row: Option<Row>,
    /// Largest occupied row index, if any.
    pub highest_row: Option<Row>,

    /// True while the cascade lies inside the category's authorized range.
    pub usable: bool,
    /// False pins the cascade's rules during defragmentation.
    pub movable: bool,
    /// True for short-lived park cascades created by forced eviction.
    pub temporary: bool,
}

impl RouteSlice {
    pub fn new(
        category: RouteCategory,
        first_bank: Bank,
        width: u16,
        rows_per_bank: u16,
        field_selects: Vec<u8>,
        usable: bool,
    ) -> Self {
        Self {
            id: SliceId::new(0), // assigned on table insert
            category,
            first_bank,
            width,
            field_selects,
            rows: vec![None; rows_per_bank as usize],
            rule_count: 0,
            lowest_row: None,
            highest_row: None,
            usable,
            movable: true,
            temporary: false,
        }
    }

    /// The bank range this cascade spans.
    pub fn range(&self) -> CascadeRange {
        CascadeRange::new(self.first_bank, self.width)
    }

    pub fn last_bank(&self) -> Bank {
        self.range().last_bank()
    }

    /// Priority position of a row in this cascade.
    pub fn position(&self, row: Row) -> Position {
        Position::new(self.first_bank, row)
    }

    /// The rule occupying a row, if any.
    pub fn rule_at(&self, row: Row) -> Option<EntryId> {
        self.rows[row as usize]
    }

    pub fn is_vacant(&self) -> bool {
        self.rule_count == 0
    }

    pub fn rows_per_bank(&self) -> u16 {
        self.rows.len() as u16
    }

    /// Records a rule in a row. The row must be empty.
    pub fn set_row(&mut self, row: Row, id: EntryId) {
        debug_assert!(self.rows[row as usize].is_none());
        self.rows[row as usize] = Some(id);
        self.rule_count += 1;
        self.lowest_row = Some(self.lowest_row.map_or(row, |r| r.min(row)));
        self.highest_row = Some(self.highest_row.map_or(row, |r| r.max(row)));
    }

    /// Clears a row, returning its former occupant.
    pub fn clear_row(&mut self, row: Row) -> Option<EntryId> {
        let id = self.rows[row as usize].take()?;
        self.rule_count -= 1;
        if self.rule_count == 0 {
            self.lowest_row = None;
            self.highest_row = None;
        } else {
            // Recompute the occupancy bounds by scanning.
            if self.lowest_row == Some(row) {
                self.lowest_row = self
                    .rows
                    .iter()
                    .position(|r| r.is_some())
                    .map(|i| i as Row);
            }
            if self.highest_row == Some(row) {
                self.highest_row = self
                    .rows
                    .iter()
                    .rposition(|r| r.is_some())
                    .map(|i| i as Row);
            }
        }
        Some(id)
    }

    /// Iterates (row, rule) pairs in ascending row order.
    pub fn occupied_rows(&self) -> impl Iterator<Item = (Row, EntryId)> + '_ {
        self.rows
            .iter()
            .enumerate()
            .filter_map(|(row, id)| id.map(|e| (row as Row, e)))
    }
}
