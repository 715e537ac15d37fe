//! Hardware-facing state: the per-bank slice table, the administrative
//! ownership record, and the rule-programming collaborator seam.

mod ownership;
mod programmer;
mod slice_table;

pub use ownership::{BankRange, OwnershipRanges, SliceOwnershipState};
pub use programmer::{
    FailingProgrammer, NoopProgrammer, ProgrammedRule, ProgrammerOp, RecordingProgrammer,
    RuleProgrammer,
};
pub use slice_table::{BankState, CaseSlot, HardwareSliceTable, RowStatus};
