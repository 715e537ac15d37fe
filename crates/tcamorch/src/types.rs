//! Core identifiers and coordinate types for the TCAM placement engine.
//!
//! These replace raw pointers and magic integers with type-safe handles:
//! rule entries and route slices are addressed by stable arena indices,
//! and physical coordinates carry their priority ordering with them.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Physical bank index inside the TCAM (the unit of ownership).
pub type Bank = u16;

/// Row index inside a bank (the unit of rule placement).
pub type Row = u16;

/// Route traffic category.
///
/// The category drives cascade width, per-bank field selects and the
/// hardware case index used for key steering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RouteCategory {
    /// IPv4 unicast routes.
    Ipv4Unicast,
    /// IPv6 unicast routes.
    Ipv6Unicast,
    /// IPv4 multicast routes.
    Ipv4Multicast,
    /// IPv6 multicast routes.
    Ipv6Multicast,
}

impl RouteCategory {
    /// All categories, in catalog order.
    pub const ALL: [RouteCategory; 4] = [
        RouteCategory::Ipv4Unicast,
        RouteCategory::Ipv6Unicast,
        RouteCategory::Ipv4Multicast,
        RouteCategory::Ipv6Multicast,
    ];

    /// Dense index used by per-category arrays.
    pub fn index(self) -> usize {
        match self {
            Self::Ipv4Unicast => 0,
            Self::Ipv6Unicast => 1,
            Self::Ipv4Multicast => 2,
            Self::Ipv6Multicast => 3,
        }
    }

    /// Returns the human-readable name for this category.
    pub fn name(self) -> &'static str {
        match self {
            Self::Ipv4Unicast => "ipv4_unicast",
            Self::Ipv6Unicast => "ipv6_unicast",
            Self::Ipv4Multicast => "ipv4_multicast",
            Self::Ipv6Multicast => "ipv6_multicast",
        }
    }

    /// Returns true for the multicast categories.
    pub fn is_multicast(self) -> bool {
        matches!(self, Self::Ipv4Multicast | Self::Ipv6Multicast)
    }

    /// Maximum meaningful prefix length for this category's address family.
    pub fn max_prefix_len(self) -> u8 {
        match self {
            Self::Ipv4Unicast | Self::Ipv4Multicast => 32,
            Self::Ipv6Unicast | Self::Ipv6Multicast => 128,
        }
    }
}

impl fmt::Display for RouteCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name().to_uppercase())
    }
}

impl FromStr for RouteCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ipv4_unicast" | "ipv4" | "v4u" => Ok(Self::Ipv4Unicast),
            "ipv6_unicast" | "ipv6" | "v6u" => Ok(Self::Ipv6Unicast),
            "ipv4_multicast" | "v4m" => Ok(Self::Ipv4Multicast),
            "ipv6_multicast" | "v6m" => Ok(Self::Ipv6Multicast),
            _ => Err(format!("Unknown route category: {}", s)),
        }
    }
}

/// Stable handle to a rule entry inside one category's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u32);

impl EntryId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "e{}", self.0)
    }
}

/// Stable handle to a route slice (cascade) inside one category's table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SliceId(pub(crate) u32);

impl SliceId {
    pub(crate) fn new(index: usize) -> Self {
        Self(index as u32)
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SliceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "s{}", self.0)
    }
}

/// Identity of the caller's route object.
///
/// Opaque to the engine; used only for the identity index and for
/// duplicate detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleKey(pub u64);

impl fmt::Display for RuleKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Public handle to an installed rule, returned by `add_route`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RuleHandle {
    /// Owning route category.
    pub category: RouteCategory,
    /// Arena handle inside that category's routing table.
    pub id: EntryId,
}

impl fmt::Display for RuleHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.category, self.id)
    }
}

/// A contiguous run of banks wide enough to hold one category's key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CascadeRange {
    /// First (lowest-numbered) bank of the cascade.
    pub first_bank: Bank,
    /// Number of banks spanned.
    pub width: u16,
}

impl CascadeRange {
    pub fn new(first_bank: Bank, width: u16) -> Self {
        Self { first_bank, width }
    }

    /// Last (highest-numbered) bank of the cascade.
    pub fn last_bank(&self) -> Bank {
        self.first_bank + self.width - 1
    }

    /// Iterates the banks of the cascade in ascending order.
    pub fn banks(&self) -> impl Iterator<Item = Bank> {
        self.first_bank..=self.last_bank()
    }

    /// Returns true if the cascade spans the given bank.
    pub fn contains(&self, bank: Bank) -> bool {
        bank >= self.first_bank && bank <= self.last_bank()
    }
}

impl fmt::Display for CascadeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "banks[{}..={}]", self.first_bank, self.last_bank())
    }
}

/// Physical position of a rule, ordered by lookup priority.
///
/// Priority is bank-major descending, row-minor ascending: row 0 of the
/// highest-numbered bank is the highest-priority slot in the array. The
/// `Ord` impl compares by priority, so `a > b` means "a wins lookup over b".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Position {
    /// First bank of the cascade holding the rule.
    pub bank: Bank,
    /// Row within that cascade.
    pub row: Row,
}

impl Position {
    pub fn new(bank: Bank, row: Row) -> Self {
        Self { bank, row }
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.bank
            .cmp(&other.bank)
            .then_with(|| other.row.cmp(&self.row))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bank {} row {}", self.bank, self.row)
    }
}

/// Exclusive priority bounds for a placement search.
///
/// `upper` caps the search strictly below the lowest longer-prefix rule;
/// `lower` floors it strictly above the highest shorter-prefix rule.
/// `None` means unbounded on that side.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlacementWindow {
    /// Exclusive upper priority bound.
    pub upper: Option<Position>,
    /// Exclusive lower priority bound.
    pub lower: Option<Position>,
}

impl PlacementWindow {
    /// A window covering the whole table.
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Returns true if `pos` lies strictly inside the window.
    pub fn contains(&self, pos: Position) -> bool {
        self.upper.map_or(true, |u| pos < u) && self.lower.map_or(true, |l| pos > l)
    }
}

/// Direction of a row search, in priority terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchDirection {
    /// From the high-priority edge of the window toward the low edge.
    Down,
    /// From the low-priority edge toward the high edge.
    Up,
}

/// A route already classified by the route-classification collaborator.
///
/// The engine never parses addresses itself; it consumes the category,
/// prefix length, pre-built match fields and resolved action reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedRoute {
    /// Traffic category the rule belongs to.
    pub category: RouteCategory,
    /// Identity of the caller's route object.
    pub key: RuleKey,
    /// Match prefix length (drives priority ordering).
    pub prefix_len: u8,
    /// Secondary ordering key within one prefix length.
    pub tie_break: u32,
    /// Pre-encoded per-bank match fields.
    pub match_fields: Vec<u32>,
    /// Resolved action (next-hop / ECMP reference).
    pub action: u32,
    /// Virtual router offset folded into the hardware key.
    pub vroff: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_category_roundtrip() {
        for cat in RouteCategory::ALL {
            let parsed: RouteCategory = cat.name().parse().unwrap();
            assert_eq!(parsed, cat);
        }
        assert!("bogus".parse::<RouteCategory>().is_err());
    }

    #[test]
    fn test_category_index_dense() {
        for (i, cat) in RouteCategory::ALL.iter().enumerate() {
            assert_eq!(cat.index(), i);
        }
    }

    #[test]
    fn test_position_priority_order() {
        // Higher bank wins.
        assert!(Position::new(3, 5) > Position::new(2, 0));
        // Same bank: lower row wins.
        assert!(Position::new(3, 0) > Position::new(3, 1));
        assert_eq!(Position::new(1, 1), Position::new(1, 1));
    }

    #[test]
    fn test_cascade_range() {
        let range = CascadeRange::new(4, 2);
        assert_eq!(range.last_bank(), 5);
        assert_eq!(range.banks().collect::<Vec<_>>(), vec![4, 5]);
        assert!(range.contains(5));
        assert!(!range.contains(6));
    }

    #[test]
    fn test_placement_window() {
        let window = PlacementWindow {
            upper: Some(Position::new(3, 0)),
            lower: Some(Position::new(1, 2)),
        };
        assert!(window.contains(Position::new(2, 0)));
        assert!(window.contains(Position::new(3, 1)));
        assert!(!window.contains(Position::new(3, 0)));
        assert!(!window.contains(Position::new(1, 2)));
        assert!(!window.contains(Position::new(0, 0)));
        assert!(PlacementWindow::unbounded().contains(Position::new(0, 0)));
    }
}
