//! The placement engine: free-row search, relocation and forced eviction.

mod evict;
mod moves;
mod search;

pub use evict::{allocate_temporary_cascade, clear_cascade_row};
pub use moves::{
    install_rule, move_route, move_route_down_within_prefix, move_route_up_within_prefix,
    place_new_rule,
};
pub use search::find_free_row;
