//! TCAM Route Placement Engine
//!
//! This crate manages rule placement for the routing TCAM of a hardware
//! switch: which banks each route category may use, where every rule sits,
//! and how rules are shuffled when space runs out or ownership changes.
//!
//! # Architecture
//!
//! ```text
//! [route classification] ──> [TcamOrch] ──> [RuleProgrammer] ──> registers
//!                                │
//!                                ├── SwitchRoutingContext (cloneable state)
//!                                │     ├── RouteTypeCatalog
//!                                │     ├── HardwareSliceTable
//!                                │     ├── SliceOwnershipState
//!                                │     └── RoutingTable x 4
//!                                ├── placement (search / moves / eviction)
//!                                └── repartition (clone-and-simulate)
//! ```
//!
//! # Key Components
//!
//! - [`TcamOrch`]: public facade — add/delete routes, repartition, dumps
//! - [`placement`]: free-row search, make-before-break relocation, forced
//!   eviction across sharing categories
//! - [`repartition`]: ownership changes with whole-state simulation
//!
//! The one invariant everything here serves: a rule with a longer match
//! prefix always occupies a higher-priority position than every rule with
//! a shorter one, at every intermediate step of every operation.

pub mod catalog;
pub mod context;
pub mod error;
pub mod hw;
pub mod orch;
pub mod placement;
pub mod repartition;
pub mod table;
pub mod types;

pub use catalog::{RouteTypeCatalog, RouteTypeInfo};
pub use context::SwitchRoutingContext;
pub use error::{Result, TcamError};
pub use hw::{
    BankRange, HardwareSliceTable, NoopProgrammer, OwnershipRanges, ProgrammedRule,
    RecordingProgrammer, RowStatus, RuleProgrammer, SliceOwnershipState,
};
pub use orch::{TcamOrch, TcamOrchConfig};
pub use repartition::{RepartitionPhase, RepartitionReport};
pub use types::{
    Bank, CascadeRange, ClassifiedRoute, PlacementWindow, Position, RouteCategory, Row,
    RuleHandle, RuleKey, SearchDirection,
};
