//! The hardware rule-programming collaborator seam.
//!
//! The engine never touches registers itself; it drives this trait, which
//! the platform layer implements with synchronous, bounded-time register
//! access. Simulation clones run against [`NoopProgrammer`].

use std::sync::Mutex;

use crate::error::{Result, TcamError};
use crate::types::{CascadeRange, Row};

/// Contents of one programmed rule slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgrammedRule {
    /// Master-valid bit for the slot.
    pub valid: bool,
    /// Virtual router offset folded into the key.
    pub vroff: u32,
    /// Pre-encoded per-bank match fields.
    pub key: Vec<u32>,
    /// Resolved action reference.
    pub action: u32,
}

/// Synchronous hardware access for rule slots and cascade enables.
pub trait RuleProgrammer: Send + Sync {
    /// Reads one rule slot back from hardware.
    fn read_rule(&self, range: CascadeRange, row: Row) -> Result<ProgrammedRule>;

    /// Writes one rule slot.
    fn write_rule(&self, range: CascadeRange, row: Row, rule: &ProgrammedRule) -> Result<()>;

    /// Clears the valid bit of one rule slot.
    fn invalidate_rule(&self, range: CascadeRange, row: Row) -> Result<()>;

    /// Raises the master-valid bitmask for a bank range.
    fn enable_cascade(&self, range: CascadeRange) -> Result<()>;

    /// Lowers the master-valid bitmask for a bank range.
    fn disable_cascade(&self, range: CascadeRange) -> Result<()>;
}

/// A programmer that discards every access. Used by simulation clones,
/// where no hardware write may ever become visible.
#[derive(Debug, Default)]
pub struct NoopProgrammer;

impl RuleProgrammer for NoopProgrammer {
    fn read_rule(&self, _range: CascadeRange, _row: Row) -> Result<ProgrammedRule> {
        Ok(ProgrammedRule {
            valid: false,
            vroff: 0,
            key: Vec::new(),
            action: 0,
        })
    }

    fn write_rule(&self, _range: CascadeRange, _row: Row, _rule: &ProgrammedRule) -> Result<()> {
        Ok(())
    }

    fn invalidate_rule(&self, _range: CascadeRange, _row: Row) -> Result<()> {
        Ok(())
    }

    fn enable_cascade(&self, _range: CascadeRange) -> Result<()> {
        Ok(())
    }

    fn disable_cascade(&self, _range: CascadeRange) -> Result<()> {
        Ok(())
    }
}

/// One recorded hardware access.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgrammerOp {
    Write {
        range: CascadeRange,
        row: Row,
        rule: ProgrammedRule,
    },
    Invalidate {
        range: CascadeRange,
        row: Row,
    },
    Enable(CascadeRange),
    Disable(CascadeRange),
}

/// An in-memory programmer that keeps a faithful shadow of every slot.
///
/// Backs bring-up diagnostics and the engine's own tests: reads return
/// the last written contents, and the op log can be asserted against.
#[derive(Debug, Default)]
pub struct RecordingProgrammer {
    state: Mutex<RecordingState>,
}

#[derive(Debug, Default)]
struct RecordingState {
    ops: Vec<ProgrammerOp>,
    slots: std::collections::HashMap<(u16, Row), ProgrammedRule>,
}

impl RecordingProgrammer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every access made so far.
    pub fn ops(&self) -> Vec<ProgrammerOp> {
        self.state.lock().expect("programmer lock").ops.clone()
    }

    /// Number of accesses made so far.
    pub fn op_count(&self) -> usize {
        self.state.lock().expect("programmer lock").ops.len()
    }
}

impl RuleProgrammer for RecordingProgrammer {
    fn read_rule(&self, range: CascadeRange, row: Row) -> Result<ProgrammedRule> {
        let state = self.state.lock().expect("programmer lock");
        Ok(state
            .slots
            .get(&(range.first_bank, row))
            .cloned()
            .unwrap_or(ProgrammedRule {
                valid: false,
                vroff: 0,
                key: Vec::new(),
                action: 0,
            }))
    }

    fn write_rule(&self, range: CascadeRange, row: Row, rule: &ProgrammedRule) -> Result<()> {
        let mut state = self.state.lock().expect("programmer lock");
        state.slots.insert((range.first_bank, row), rule.clone());
        state.ops.push(ProgrammerOp::Write {
            range,
            row,
            rule: rule.clone(),
        });
        Ok(())
    }

    fn invalidate_rule(&self, range: CascadeRange, row: Row) -> Result<()> {
        let mut state = self.state.lock().expect("programmer lock");
        state.slots.remove(&(range.first_bank, row));
        state.ops.push(ProgrammerOp::Invalidate { range, row });
        Ok(())
    }

    fn enable_cascade(&self, range: CascadeRange) -> Result<()> {
        let mut state = self.state.lock().expect("programmer lock");
        state.ops.push(ProgrammerOp::Enable(range));
        Ok(())
    }

    fn disable_cascade(&self, range: CascadeRange) -> Result<()> {
        let mut state = self.state.lock().expect("programmer lock");
        state.ops.push(ProgrammerOp::Disable(range));
        Ok(())
    }
}

/// A programmer that fails every slot write. Test helper for the
/// no-partial-relocation guarantees.
#[derive(Debug, Default)]
pub struct FailingProgrammer;

impl RuleProgrammer for FailingProgrammer {
    fn read_rule(&self, range: CascadeRange, row: Row) -> Result<ProgrammedRule> {
        Err(TcamError::Hardware(format!(
            "read {} row {} refused",
            range, row
        )))
    }

    fn write_rule(&self, range: CascadeRange, row: Row, _rule: &ProgrammedRule) -> Result<()> {
        Err(TcamError::Hardware(format!(
            "write {} row {} refused",
            range, row
        )))
    }

    fn invalidate_rule(&self, range: CascadeRange, row: Row) -> Result<()> {
        Err(TcamError::Hardware(format!(
            "invalidate {} row {} refused",
            range, row
        )))
    }

    fn enable_cascade(&self, _range: CascadeRange) -> Result<()> {
        Ok(())
    }

    fn disable_cascade(&self, _range: CascadeRange) -> Result<()> {
        Ok(())
    }
}
