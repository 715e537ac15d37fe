//! Static per-category route type descriptions.
//!
//! The catalog is immutable configuration data: cascade width, per-bank
//! field-select layout and the hardware case index used for key steering.
//! Everything else in the engine is derived from it.

use crate::error::{Result, TcamError};
use crate::types::RouteCategory;

/// Immutable description of one route category.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTypeInfo {
    /// Category this entry describes.
    pub category: RouteCategory,
    /// Cascade width in banks.
    pub width: u16,
    /// Which of the two in-bank rule-sets this category's keys steer to.
    pub case_index: u8,
    /// Field-select value programmed into each bank of a cascade.
    pub field_selects: Vec<u8>,
    /// Whether the per-prefix tie-break orders descending.
    pub tie_break_descending: bool,
}

impl RouteTypeInfo {
    pub fn new(
        category: RouteCategory,
        width: u16,
        case_index: u8,
        field_selects: Vec<u8>,
    ) -> Self {
        Self {
            category,
            width,
            case_index,
            field_selects,
            tie_break_descending: category.is_multicast(),
        }
    }
}

/// The per-category route type catalog, indexed by category.
#[derive(Debug, Clone)]
pub struct RouteTypeCatalog {
    entries: [RouteTypeInfo; 4],
}

impl RouteTypeCatalog {
    /// Builds a catalog from one entry per category.
    ///
    /// Entries may be given in any order; widths must be non-zero, case
    /// indices must be 0 or 1, and field selects must cover the width.
    pub fn new(mut entries: Vec<RouteTypeInfo>) -> Result<Self> {
        if entries.len() != RouteCategory::ALL.len() {
            return Err(TcamError::InvalidArgument(format!(
                "catalog needs {} entries, got {}",
                RouteCategory::ALL.len(),
                entries.len()
            )));
        }
        entries.sort_by_key(|e| e.category.index());
        for (i, entry) in entries.iter().enumerate() {
            if entry.category.index() != i {
                return Err(TcamError::InvalidArgument(format!(
                    "duplicate catalog entry for {}",
                    entry.category
                )));
            }
            if entry.width == 0 {
                return Err(TcamError::InvalidArgument(format!(
                    "zero cascade width for {}",
                    entry.category
                )));
            }
            if entry.case_index > 1 {
                return Err(TcamError::InvalidArgument(format!(
                    "case index {} out of range for {}",
                    entry.case_index, entry.category
                )));
            }
            if entry.field_selects.len() != entry.width as usize {
                return Err(TcamError::InvalidArgument(format!(
                    "field selects must cover {} banks for {}",
                    entry.width, entry.category
                )));
            }
        }
        let entries: [RouteTypeInfo; 4] = entries
            .try_into()
            .map_err(|_| TcamError::InvalidArgument("catalog entry count".to_string()))?;
        Ok(Self { entries })
    }

    /// Returns the catalog entry for a category.
    pub fn entry(&self, category: RouteCategory) -> &RouteTypeInfo {
        &self.entries[category.index()]
    }

    /// Cascade width in banks for a category.
    pub fn width(&self, category: RouteCategory) -> u16 {
        self.entry(category).width
    }

    /// Hardware case index for a category.
    pub fn case_index(&self, category: RouteCategory) -> u8 {
        self.entry(category).case_index
    }

    /// Normalizes a tie-break value so ascending set order matches the
    /// category's comparator.
    pub fn order_key(&self, category: RouteCategory, tie_break: u32) -> u32 {
        if self.entry(category).tie_break_descending {
            !tie_break
        } else {
            tie_break
        }
    }

    /// Categories ordered widest cascade first (repartition walk order).
    pub fn widest_first(&self) -> Vec<RouteCategory> {
        let mut cats = RouteCategory::ALL.to_vec();
        cats.sort_by(|a, b| {
            self.width(*b)
                .cmp(&self.width(*a))
                .then(a.index().cmp(&b.index()))
        });
        cats
    }
}

impl Default for RouteTypeCatalog {
    /// The baseline four-category layout: single-bank IPv4 unicast keys,
    /// double-width IPv6 unicast and IPv4 multicast, quad-width IPv6
    /// multicast. Unicast steers to case 0, multicast to case 1.
    fn default() -> Self {
        Self::new(vec![
            RouteTypeInfo::new(RouteCategory::Ipv4Unicast, 1, 0, vec![0x1]),
            RouteTypeInfo::new(RouteCategory::Ipv6Unicast, 2, 0, vec![0x2, 0x3]),
            RouteTypeInfo::new(RouteCategory::Ipv4Multicast, 2, 1, vec![0x4, 0x5]),
            RouteTypeInfo::new(RouteCategory::Ipv6Multicast, 4, 1, vec![0x6, 0x7, 0x8, 0x9]),
        ])
        .expect("default catalog is well-formed")
    }
}
