//! Error taxonomy for the placement engine.
//!
//! Configuration errors are rejected synchronously before any state is
//! mutated; capacity errors surface only after a bounded, exhaustive
//! search; hardware errors are fatal to the specific operation only.

use crate::types::{Bank, Row, RouteCategory, RuleKey};

/// Error type for TCAM placement operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TcamError {
    /// The classified route does not belong to the requested category.
    #[error("route category mismatch: expected {expected}, got {got}")]
    InvalidCategory {
        expected: RouteCategory,
        got: RouteCategory,
    },

    /// A rule with the same identity is already installed.
    #[error("route already exists: {0}")]
    AlreadyExists(RuleKey),

    /// No free row could be found or created for the rule.
    #[error("no TCAM space available for {0}")]
    NoSpace(RouteCategory),

    /// The rule handle does not refer to an installed rule.
    #[error("route not found")]
    RuleNotFound,

    /// The hardware refused to invalidate a rule row.
    #[error("cannot invalidate rule at bank {bank} row {row}: {reason}")]
    CannotInvalidate {
        bank: Bank,
        row: Row,
        reason: String,
    },

    /// An authorized bank range is malformed.
    #[error("invalid bank range: {0}")]
    InvalidRange(String),

    /// The requested ownership would demand a third case slot in one bank.
    #[error("bank {bank} would host more than two rule-sets")]
    TooManyCategoriesPerBank { bank: Bank },

    /// A repartition could not fit every unicast rule into its new range.
    #[error("insufficient unicast route space")]
    InsufficientUnicastSpace,

    /// A repartition could not fit every multicast rule into its new range.
    #[error("insufficient multicast route space")]
    InsufficientMulticastSpace,

    /// A cascade allocation found its case slot already stamped.
    #[error("case slot already occupied at bank {bank}")]
    CaseSlotOccupied { bank: Bank },

    /// A hardware register access failed.
    #[error("hardware access failed: {0}")]
    Hardware(String),

    /// Caller passed an argument outside the declared ranges.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl TcamError {
    /// Maps a capacity failure to the category-specific repartition error.
    pub(crate) fn insufficient_space(category: RouteCategory) -> Self {
        if category.is_multicast() {
            Self::InsufficientMulticastSpace
        } else {
            Self::InsufficientUnicastSpace
        }
    }
}

/// Result type for TCAM placement operations.
pub type Result<T> = std::result::Result<T, TcamError>;
