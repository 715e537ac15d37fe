//! Ownership repartitioning with clone-and-simulate planning.

mod coordinator;

pub use coordinator::{plan_repartition, RepartitionPhase, RepartitionReport};
