//! Per-category routing tables: rule entries, prefix buckets, route
//! slices and the indices tying them together.

mod entry;
mod prefix;
mod slice;
#[allow(clippy::module_inception)]
mod table;

pub use entry::{RuleArena, RuleEntry};
pub use prefix::PrefixBucket;
pub use slice::RouteSlice;
pub use table::{allocate_cascade, preallocate, retire_cascade, RoutingTable};
