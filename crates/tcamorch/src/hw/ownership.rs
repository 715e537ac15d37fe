//! Administrative slice ownership: which banks each category may use.
//!
//! Holds the current authorized range per category plus, while a
//! repartition transition is open, the previous range as a scratch area.
//! Validation and normalization happen here before any state is mutated.

use serde::Serialize;
use std::fmt;

use crate::catalog::RouteTypeCatalog;
use crate::error::{Result, TcamError};
use crate::types::{Bank, RouteCategory};

/// An inclusive, contiguous range of banks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BankRange {
    /// First authorized bank.
    pub first: Bank,
    /// Last authorized bank (inclusive).
    pub last: Bank,
}

impl BankRange {
    pub fn new(first: Bank, last: Bank) -> Self {
        Self { first, last }
    }

    /// Number of banks covered.
    pub fn len(&self) -> u16 {
        self.last - self.first + 1
    }

    /// Returns true if the range covers the bank.
    pub fn contains(&self, bank: Bank) -> bool {
        bank >= self.first && bank <= self.last
    }
}

impl fmt::Display for BankRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.first, self.last)
    }
}

/// Requested per-category authorized ranges, as fed to `set_ownership`
/// and `plan_repartition`. `None` removes every bank from a category.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipRanges {
    ranges: [Option<BankRange>; 4],
}

impl OwnershipRanges {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style range assignment.
    pub fn with(mut self, category: RouteCategory, first: Bank, last: Bank) -> Self {
        self.ranges[category.index()] = Some(BankRange::new(first, last));
        self
    }

    /// Builder-style range removal.
    pub fn without(mut self, category: RouteCategory) -> Self {
        self.ranges[category.index()] = None;
        self
    }

    pub fn get(&self, category: RouteCategory) -> Option<BankRange> {
        self.ranges[category.index()]
    }

    pub fn set(&mut self, category: RouteCategory, range: Option<BankRange>) {
        self.ranges[category.index()] = range;
    }
}

/// The administratively authorized bank ranges, current and previous.
#[derive(Debug, Clone)]
pub struct SliceOwnershipState {
    current: [Option<BankRange>; 4],
    previous: [Option<BankRange>; 4],
    /// The whole bank span owned by routing at all.
    span: BankRange,
    /// True when this state mirrors real hardware (vs a simulation clone).
    live: bool,
    transition_open: bool,
}

impl SliceOwnershipState {
    pub fn new(span: BankRange, live: bool) -> Self {
        Self {
            current: [None; 4],
            previous: [None; 4],
            span,
            live,
            transition_open: false,
        }
    }

    /// The global routing-owned bank span.
    pub fn span(&self) -> BankRange {
        self.span
    }

    /// True when this state is hardware-backed.
    pub fn live(&self) -> bool {
        self.live
    }

    pub(crate) fn set_live(&mut self, live: bool) {
        self.live = live;
    }

    /// True while a repartition transition keeps the previous ranges open.
    pub fn transition_open(&self) -> bool {
        self.transition_open
    }

    /// Current authorized range for a category.
    pub fn authorized_range(&self, category: RouteCategory) -> Option<BankRange> {
        self.current[category.index()]
    }

    /// Previous authorized range, available only mid-transition.
    pub fn previous_range(&self, category: RouteCategory) -> Option<BankRange> {
        if self.transition_open {
            self.previous[category.index()]
        } else {
            None
        }
    }

    /// True if the category may currently use the bank.
    pub fn is_bank_authorized(&self, category: RouteCategory, bank: Bank) -> bool {
        self.current[category.index()].is_some_and(|r| r.contains(bank))
    }

    /// Validates and normalizes requested ranges without mutating anything.
    ///
    /// Normalization rounds each range down to a whole number of cascades.
    /// Rejected outright: inverted or out-of-span ranges, ranges shorter
    /// than one cascade, and any bank demanded by two categories steering
    /// to the same case slot (a third rule-set in one bank).
    pub fn validate(
        &self,
        catalog: &RouteTypeCatalog,
        ranges: &OwnershipRanges,
    ) -> Result<[Option<BankRange>; 4]> {
        let mut normalized = [None; 4];
        for cat in RouteCategory::ALL {
            let Some(range) = ranges.get(cat) else {
                continue;
            };
            if range.first > range.last {
                return Err(TcamError::InvalidRange(format!(
                    "inverted range {} for {}",
                    range, cat
                )));
            }
            if range.first < self.span.first || range.last > self.span.last {
                return Err(TcamError::InvalidRange(format!(
                    "range {} for {} outside routing span {}",
                    range, cat, self.span
                )));
            }
            let width = catalog.width(cat);
            let cascades = range.len() / width;
            if cascades == 0 {
                return Err(TcamError::InvalidRange(format!(
                    "range {} for {} shorter than one {}-bank cascade",
                    range, cat, width
                )));
            }
            // Round down to whole cascades.
            normalized[cat.index()] =
                Some(BankRange::new(range.first, range.first + cascades * width - 1));
        }

        for bank in self.span.first..=self.span.last {
            let mut owners: Vec<RouteCategory> = Vec::new();
            for cat in RouteCategory::ALL {
                if normalized[cat.index()].is_some_and(|r| r.contains(bank)) {
                    owners.push(cat);
                }
            }
            if owners.len() > 2 {
                return Err(TcamError::TooManyCategoriesPerBank { bank });
            }
            for i in 0..owners.len() {
                for j in i + 1..owners.len() {
                    if catalog.case_index(owners[i]) == catalog.case_index(owners[j]) {
                        return Err(TcamError::TooManyCategoriesPerBank { bank });
                    }
                }
            }
        }
        Ok(normalized)
    }

    /// Replaces the current ranges outside any transition.
    pub(crate) fn apply(&mut self, normalized: [Option<BankRange>; 4]) {
        self.current = normalized;
        self.previous = [None; 4];
        self.transition_open = false;
    }

    /// Opens a transition: the old ranges stay available as scratch space.
    pub(crate) fn begin_transition(&mut self, normalized: [Option<BankRange>; 4]) {
        self.previous = self.current;
        self.current = normalized;
        self.transition_open = true;
    }

    /// Closes the transition, dropping the previous ranges.
    pub(crate) fn finalize_transition(&mut self) {
        self.previous = [None; 4];
        self.transition_open = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn state() -> SliceOwnershipState {
        SliceOwnershipState::new(BankRange::new(0, 7), true)
    }

    #[test]
    fn test_validate_normalizes_to_whole_cascades() {
        let catalog = RouteTypeCatalog::default();
        let st = state();
        // IPv6 unicast cascades are 2 banks wide; [0,4] has 5 banks.
        let ranges = OwnershipRanges::new().with(RouteCategory::Ipv6Unicast, 0, 4);
        let normalized = st.validate(&catalog, &ranges).unwrap();
        assert_eq!(
            normalized[RouteCategory::Ipv6Unicast.index()],
            Some(BankRange::new(0, 3))
        );
    }

    #[test]
    fn test_validate_rejects_bad_ranges() {
        let catalog = RouteTypeCatalog::default();
        let st = state();

        let inverted = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 3, 1);
        assert!(matches!(
            st.validate(&catalog, &inverted),
            Err(TcamError::InvalidRange(_))
        ));

        let outside = OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 4, 9);
        assert!(matches!(
            st.validate(&catalog, &outside),
            Err(TcamError::InvalidRange(_))
        ));

        // One bank cannot hold a 2-bank IPv6 unicast cascade.
        let short = OwnershipRanges::new().with(RouteCategory::Ipv6Unicast, 0, 0);
        assert!(matches!(
            st.validate(&catalog, &short),
            Err(TcamError::InvalidRange(_))
        ));
    }

    #[test]
    fn test_validate_rejects_case_conflicts() {
        let catalog = RouteTypeCatalog::default();
        let st = state();
        // IPv4 and IPv6 unicast both steer to case 0; overlapping them
        // would demand a third rule-set in banks 0..=1.
        let ranges = OwnershipRanges::new()
            .with(RouteCategory::Ipv4Unicast, 0, 3)
            .with(RouteCategory::Ipv6Unicast, 0, 1);
        assert!(matches!(
            st.validate(&catalog, &ranges),
            Err(TcamError::TooManyCategoriesPerBank { bank: 0 })
        ));
    }

    #[test]
    fn test_shared_bank_across_cases_allowed() {
        let catalog = RouteTypeCatalog::default();
        let st = state();
        // Unicast (case 0) and multicast (case 1) may share banks.
        let ranges = OwnershipRanges::new()
            .with(RouteCategory::Ipv4Unicast, 0, 3)
            .with(RouteCategory::Ipv4Multicast, 0, 3);
        assert!(st.validate(&catalog, &ranges).is_ok());
    }

    #[test]
    fn test_transition_keeps_previous_ranges() {
        let catalog = RouteTypeCatalog::default();
        let mut st = state();
        let first = st
            .validate(
                &catalog,
                &OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 0, 3),
            )
            .unwrap();
        st.apply(first);
        assert!(st.is_bank_authorized(RouteCategory::Ipv4Unicast, 3));
        assert_eq!(st.previous_range(RouteCategory::Ipv4Unicast), None);

        let second = st
            .validate(
                &catalog,
                &OwnershipRanges::new().with(RouteCategory::Ipv4Unicast, 4, 7),
            )
            .unwrap();
        st.begin_transition(second);
        assert!(st.transition_open());
        assert!(!st.is_bank_authorized(RouteCategory::Ipv4Unicast, 3));
        assert_eq!(
            st.previous_range(RouteCategory::Ipv4Unicast),
            Some(BankRange::new(0, 3))
        );

        st.finalize_transition();
        assert_eq!(st.previous_range(RouteCategory::Ipv4Unicast), None);
    }
}
