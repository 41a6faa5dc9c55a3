//! The load reference barrier.
//!
//! A reference loaded from the heap may point to the from-space copy of an object the collector
//! is relocating. The barrier canonicalizes it: the result is the to-space copy if the object has
//! been (or is about to be) relocated, and the loaded value otherwise. Weak and phantom loads also
//! take the slow path while weak roots are processed, where the runtime reports referents that
//! were not marked as null.
//!
//! Shape of the emitted code:
//!
//! ```text
//! entry:          result = object
//!                 if result == null goto done           (unless known non-null)
//!                 state = heap_state
//!                 strong:  if state & HAS_FORWARDED goto cset_check
//!                 weak:    if state & (HAS_FORWARDED | WEAK_ROOTS) goto slow
//! done:           ...
//!
//! cset_check:     if cset_map[result >> region_shift] == 0 goto done
//! slow:           result = lrb_resolve(result, load_address)
//!                 goto done
//! ```

use super::{load_heap_state, BarrierContext, ReferenceStrength};
use crate::codegen::{AluOp, Cond, FragmentBuilder, Inst, Location, Operand, RuntimeEntry, VReg, Width};
use crate::util::{BarrierConfig, HeapStateFlags};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LrbOperands {
    /// The (uncompressed) reference that was loaded. May be `result` itself.
    pub object: Location,
    /// The address it was loaded from. The runtime may heal the slot.
    pub load_address: Location,
    pub result: VReg,
}

pub struct LoadReferenceBarrierEmitter<'a> {
    config: &'a BarrierConfig,
}

impl<'a> LoadReferenceBarrierEmitter<'a> {
    pub fn new(config: &'a BarrierConfig) -> Self {
        LoadReferenceBarrierEmitter { config }
    }

    /// Uses shared scratch register 0.
    pub fn emit(
        &self,
        b: &mut FragmentBuilder,
        ctx: &BarrierContext,
        operands: LrbOperands,
        strength: ReferenceStrength,
        known_non_null: bool,
    ) {
        let LrbOperands {
            object,
            load_address,
            result,
        } = operands;
        b.input(object);
        b.input(load_address);
        b.def(result);

        let done = b.join_point("lrb_done");
        if object != Location::Reg(result) {
            b.emit(Inst::Move {
                dst: result,
                src: object.into(),
            });
        }
        if !known_non_null {
            b.branch(Cond::Eq, result, Operand::Imm(0), done);
        }

        let state = b.scratch(0);
        load_heap_state(b, self.config, ctx, state);
        let mask = HeapStateFlags::lrb_slow_path_mask(strength.is_weak_or_phantom());
        let slow = b.out_of_line("lrb_slow");
        if strength.is_weak_or_phantom() {
            b.branch(
                Cond::TestNonZero,
                state,
                Operand::Imm(mask.to_byte() as usize),
                slow,
            );
            b.jump(done);
        } else {
            let cset_check = b.out_of_line("lrb_cset_check");
            b.branch(
                Cond::TestNonZero,
                state,
                Operand::Imm(mask.to_byte() as usize),
                cset_check,
            );
            b.jump(done);

            // Only objects in regions that are being evacuated can move.
            b.bind(cset_check);
            let region = b.scratch(0);
            b.emit(Inst::Alu {
                op: AluOp::Shr,
                dst: region,
                lhs: result.into(),
                rhs: Operand::Imm(self.config.region_shift as usize),
            });
            b.emit(Inst::Alu {
                op: AluOp::Add,
                dst: region,
                lhs: region.into(),
                rhs: Operand::Imm(self.config.cset_map_base.as_usize()),
            });
            b.emit(Inst::Load {
                dst: region,
                base: region.into(),
                offset: 0,
                width: Width::Byte,
            });
            b.branch(Cond::Eq, region, Operand::Imm(0), done);
            b.jump(slow);
        }

        b.bind(slow);
        b.emit(Inst::CallRuntime {
            entry: RuntimeEntry::lrb_resolve(strength),
            args: vec![result.into(), load_address],
            result: Some(result),
        });
        b.jump(done);

        b.bind(done);
        trace!(
            "Load reference barrier ({}) on {} loaded from {}",
            strength,
            object,
            load_address
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{BlockKind, Fragment, VRegAllocator};
    use strum::IntoEnumIterator;

    fn lrb(strength: ReferenceStrength, known_non_null: bool) -> Fragment {
        let config = BarrierConfig::default();
        let mut vregs = VRegAllocator::new();
        let object = vregs.fresh();
        let address = vregs.fresh();
        let result = vregs.fresh();
        let mut b = FragmentBuilder::new("lrb", &mut vregs);
        LoadReferenceBarrierEmitter::new(&config).emit(
            &mut b,
            &BarrierContext::default(),
            LrbOperands {
                object: object.into(),
                load_address: address.into(),
                result,
            },
            strength,
            known_non_null,
        );
        b.finish()
    }

    #[test]
    fn slow_paths_are_out_of_line() {
        for strength in ReferenceStrength::iter() {
            let fragment = lrb(strength, false);
            assert!(!fragment.calls_runtime_inline());
            assert_eq!(
                fragment.runtime_calls(),
                vec![RuntimeEntry::lrb_resolve(strength)]
            );
            assert_eq!(fragment.atomic_count(), 0);
        }
    }

    #[test]
    fn cset_check_only_for_strong() {
        let labels = |f: &Fragment| -> Vec<&'static str> {
            f.blocks()
                .iter()
                .filter(|b| b.kind == BlockKind::OutOfLine)
                .map(|b| b.label)
                .collect()
        };
        assert!(labels(&lrb(ReferenceStrength::Strong, false)).contains(&"lrb_cset_check"));
        assert!(!labels(&lrb(ReferenceStrength::Weak, false)).contains(&"lrb_cset_check"));
        assert!(!labels(&lrb(ReferenceStrength::Phantom, true)).contains(&"lrb_cset_check"));
    }

    #[test]
    fn result_is_def_and_inputs_alive() {
        let fragment = lrb(ReferenceStrength::Strong, true);
        let contract = fragment.contract();
        assert_eq!(contract.defs, vec![VReg(2)]);
        assert!(contract.alive.contains(&Location::Reg(VReg(0))));
        assert!(contract.alive.contains(&Location::Reg(VReg(1))));
        // No null check: the first branch tests the heap state.
        let entry = fragment.block(fragment.entry());
        assert!(matches!(
            entry.terminator,
            crate::codegen::Terminator::Branch {
                cond: Cond::TestNonZero,
                ..
            }
        ));
    }
}
