//! The operand contract between a fragment and the host register allocator.
//!
//! Every register a fragment touches has exactly one role:
//! * `alive`: an input that is read and must stay intact until the end of the fragment.
//! * `defs`: an output, written by the fragment.
//! * `inout`: an input whose register also carries an output. The forwarding-aware CAS uses this
//!   for the expected value, which comes back as the witness.
//! * `temps`: scratch registers, dead on entry and exit.
//!
//! Outputs are written early: a def or in/out register may be written before the last use of a
//! temp. The allocator must therefore keep every temp in a register of its own, distinct from
//! alive inputs, defs, in/out registers and the other temps. Violations are code generator bugs
//! and are fatal.

use itertools::Itertools;
use strum_macros::Display;

use super::ir::{Block, Location, VReg};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum OperandRole {
    Alive,
    Def,
    InOut,
    Temp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperandContract {
    pub alive: Vec<Location>,
    pub defs: Vec<VReg>,
    pub inout: Vec<VReg>,
    pub temps: Vec<VReg>,
}

impl OperandContract {
    pub fn role_of(&self, loc: Location) -> Option<OperandRole> {
        if self.alive.contains(&loc) {
            return Some(OperandRole::Alive);
        }
        let reg = loc.as_reg()?;
        if self.defs.contains(&reg) {
            Some(OperandRole::Def)
        } else if self.inout.contains(&reg) {
            Some(OperandRole::InOut)
        } else if self.temps.contains(&reg) {
            Some(OperandRole::Temp)
        } else {
            None
        }
    }

    /// Registers that are live on entry.
    pub fn inputs(&self) -> impl Iterator<Item = Location> + '_ {
        self.alive
            .iter()
            .copied()
            .chain(self.inout.iter().map(|r| Location::Reg(*r)))
    }

    /// Registers that are live on exit.
    pub fn outputs(&self) -> impl Iterator<Item = VReg> + '_ {
        self.defs.iter().chain(self.inout.iter()).copied()
    }

    /// Check that every location has exactly one role. Panics otherwise.
    pub fn validate(&self) {
        let all = self
            .alive
            .iter()
            .copied()
            .chain(self.defs.iter().map(|r| Location::Reg(*r)))
            .chain(self.inout.iter().map(|r| Location::Reg(*r)))
            .chain(self.temps.iter().map(|r| Location::Reg(*r)));
        let duplicates: Vec<Location> = all.duplicates().collect();
        assert!(
            duplicates.is_empty(),
            "Operand contract violation: {} used in more than one role ({:?})",
            duplicates.iter().join(", "),
            self
        );
    }

    /// Check that the blocks only touch registers named in the contract, and never write an alive
    /// input. Panics otherwise.
    pub fn check_blocks(&self, blocks: &[Block]) {
        for block in blocks {
            let uses = block
                .insts
                .iter()
                .flat_map(|inst| inst.uses())
                .chain(block.terminator.uses());
            for loc in uses {
                assert!(
                    self.role_of(loc).is_some() || matches!(loc, Location::Context(_)),
                    "Operand contract violation: {} reads {} which has no role",
                    block.id,
                    loc
                );
            }
            for inst in &block.insts {
                for def in inst.defs() {
                    match self.role_of(Location::Reg(def)) {
                        Some(OperandRole::Alive) => panic!(
                            "Operand contract violation: `{}` in {} writes alive input {}",
                            inst, block.id, def
                        ),
                        Some(_) => {}
                        None => panic!(
                            "Operand contract violation: `{}` in {} writes {} which has no role",
                            inst, block.id, def
                        ),
                    }
                }
            }
        }
    }
}
