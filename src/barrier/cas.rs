//! Compare-and-swap on reference slots while objects may be relocated concurrently.
//!
//! A plain CAS compares bits. The slot may still hold the from-space copy of the object the
//! caller expects, because the collector (or another mutator) has not updated the slot yet. The
//! plain CAS then fails although the slot refers to the expected object. This emitter detects that
//! false negative through the forwarding pointer of the witness and retries, with at most three
//! atomic attempts in total:
//!
//! 1. `CAS(address, E0, new)`. Success is final.
//! 2. The witness `W` is null or not forwarded, or forwards to something other than `E0`: fail.
//! 3. `CAS(address, W, new)`, replacing the stale alias. Success is final.
//! 4. Somebody healed the slot between 1 and 3, so it may now hold `E0`: `CAS(address, E0, new)`
//!    and return its outcome.
//!
//! The expected register is in/out: it holds the witness of the last attempt on exit.

use itertools::Itertools;

use super::{BarrierContext, ForwardingResolver};
use crate::codegen::{Cond, FragmentBuilder, Inst, Location, Operand, VReg, Width};
use crate::util::BarrierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasOperands {
    /// The slot address.
    pub address: Location,
    /// Comparison value on entry, witness on exit. In the slot's representation.
    pub expected: VReg,
    /// In the slot's representation.
    pub new_value: Location,
    /// Set to 1 on success and 0 on failure.
    pub success: VReg,
}

pub struct ForwardingAwareCompareAndSwap<'a> {
    config: &'a BarrierConfig,
}

impl<'a> ForwardingAwareCompareAndSwap<'a> {
    pub fn new(config: &'a BarrierConfig) -> Self {
        ForwardingAwareCompareAndSwap { config }
    }

    /// A single CAS without forwarding awareness, for configurations without a relocating
    /// collector phase.
    pub fn emit_plain(&self, b: &mut FragmentBuilder, operands: CasOperands, compressed: bool) {
        declare(b, &operands);
        b.emit(cas(&operands, Width::of_reference(compressed)));
    }

    /// Uses shared scratch registers 0 to 2.
    ///
    /// The witness is always null checked before its header is read. Knowing that the expected
    /// value is non-null says nothing about what the slot holds.
    pub fn emit(
        &self,
        b: &mut FragmentBuilder,
        ctx: &BarrierContext,
        operands: CasOperands,
        compressed: bool,
    ) {
        declare(b, &operands);
        let original = b.scratch(0);
        let forwardee = b.scratch(1);
        let tmp = b.scratch(2);
        let locations: Vec<Location> = [
            operands.address,
            operands.new_value,
            operands.expected.into(),
            operands.success.into(),
            original.into(),
            forwardee.into(),
            tmp.into(),
            ctx.thread,
            ctx.heap_base,
        ]
        .into_iter()
        .collect();
        assert!(
            locations.iter().all_unique(),
            "Forwarding-aware CAS operands must be pairwise distinct: {}",
            locations.iter().join(", ")
        );

        let width = Width::of_reference(compressed);
        let expected = operands.expected;
        let done = b.join_point("cas_done");
        let retry = b.out_of_line("cas_retry");
        let failed = b.out_of_line("cas_failed");

        b.emit(Inst::Move {
            dst: original,
            src: expected.into(),
        });
        b.emit(cas(&operands, width));
        b.branch(Cond::Eq, operands.success, Operand::Imm(0), retry);
        b.jump(done);

        // `expected` holds the witness of the failed attempt.
        b.bind(retry);
        b.branch(Cond::Eq, expected, Operand::Imm(0), failed);
        let object: Location = if compressed {
            b.input(ctx.heap_base);
            b.emit(Inst::UncompressRef {
                dst: forwardee,
                src: expected.into(),
                heap_base: ctx.heap_base,
                shift: self.config.compressed.shift,
            });
            forwardee.into()
        } else {
            expected.into()
        };
        ForwardingResolver::new(&self.config.header).emit_decode(b, object, forwardee, tmp, failed);
        if compressed {
            b.emit(Inst::CompressRef {
                dst: forwardee,
                src: forwardee.into(),
                heap_base: ctx.heap_base,
                shift: self.config.compressed.shift,
            });
        }
        b.branch(Cond::Ne, forwardee, original, failed);
        // The witness is a from-space alias of the expected object. Replace it.
        b.emit(cas(&operands, width));
        b.branch(Cond::Ne, operands.success, Operand::Imm(0), done);
        // The slot was healed concurrently. Try once more with the original value.
        b.emit(Inst::Move {
            dst: expected,
            src: original.into(),
        });
        b.emit(cas(&operands, width));
        b.jump(done);

        b.bind(failed);
        b.emit(Inst::Move {
            dst: operands.success,
            src: Operand::Imm(0),
        });
        b.jump(done);

        b.bind(done);
        trace!("Forwarding-aware CAS on {} ({})", operands.address, width);
    }
}

fn declare(b: &mut FragmentBuilder, operands: &CasOperands) {
    b.input(operands.address);
    b.input(operands.new_value);
    b.inout(operands.expected);
    b.def(operands.success);
}

fn cas(operands: &CasOperands, width: Width) -> Inst {
    Inst::CompareAndSwap {
        address: operands.address,
        expected: operands.expected,
        new_value: operands.new_value,
        width,
        success: operands.success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{Fragment, Terminator, VRegAllocator};

    struct Regs {
        address: VReg,
        expected: VReg,
        new_value: VReg,
        success: VReg,
    }

    fn operands(regs: &Regs) -> CasOperands {
        CasOperands {
            address: regs.address.into(),
            expected: regs.expected,
            new_value: regs.new_value.into(),
            success: regs.success,
        }
    }

    fn forwarding_cas(compressed: bool) -> (Fragment, Regs) {
        let config = BarrierConfig::default();
        let mut vregs = VRegAllocator::new();
        let regs = Regs {
            address: vregs.fresh(),
            expected: vregs.fresh(),
            new_value: vregs.fresh(),
            success: vregs.fresh(),
        };
        let mut b = FragmentBuilder::new("cas", &mut vregs);
        ForwardingAwareCompareAndSwap::new(&config).emit(
            &mut b,
            &BarrierContext::default(),
            operands(&regs),
            compressed,
        );
        (b.finish(), regs)
    }

    #[test]
    fn bounded_to_three_attempts() {
        for compressed in [false, true] {
            let (fragment, _) = forwarding_cas(compressed);
            assert_eq!(fragment.atomic_count(), 3);
            assert!(fragment.runtime_calls().is_empty());
            // Only the first attempt is on the inline path.
            let inline_atomics = fragment
                .inline_blocks()
                .flat_map(|b| b.insts.iter())
                .filter(|i| i.is_atomic())
                .count();
            assert_eq!(inline_atomics, 1);
        }
    }

    #[test]
    fn expected_is_inout() {
        let (fragment, regs) = forwarding_cas(false);
        let contract = fragment.contract();
        assert_eq!(contract.inout, vec![regs.expected]);
        assert_eq!(contract.defs, vec![regs.success]);
        assert_eq!(contract.temps.len(), 3);
    }

    #[test]
    fn compressed_witness_is_reencoded() {
        let (fragment, _) = forwarding_cas(true);
        let insts: Vec<&Inst> = fragment.instructions().collect();
        assert!(insts.iter().any(|i| matches!(i, Inst::UncompressRef { .. })));
        assert!(insts.iter().any(|i| matches!(i, Inst::CompressRef { .. })));
        assert!(insts.iter().all(|i| !matches!(
            i,
            Inst::CompareAndSwap {
                width: Width::Word,
                ..
            }
        )));
    }

    #[test]
    fn witness_is_null_checked_before_decode() {
        let (fragment, regs) = forwarding_cas(false);
        let retry = fragment
            .blocks()
            .iter()
            .filter(|b| b.label == "cas_retry")
            .min_by_key(|b| b.id.0)
            .unwrap();
        // No header load may precede the null test of the witness.
        assert!(retry.insts.is_empty());
        assert!(matches!(
            &retry.terminator,
            Terminator::Branch {
                cond: Cond::Eq,
                lhs,
                rhs: Operand::Imm(0),
                ..
            } if *lhs == Location::from(regs.expected)
        ));
    }

    #[test]
    #[should_panic(expected = "must be pairwise distinct")]
    fn aliased_operands_are_fatal() {
        let config = BarrierConfig::default();
        let mut vregs = VRegAllocator::new();
        let address = vregs.fresh();
        let expected = vregs.fresh();
        let mut b = FragmentBuilder::new("cas", &mut vregs);
        ForwardingAwareCompareAndSwap::new(&config).emit(
            &mut b,
            &BarrierContext::default(),
            CasOperands {
                address: address.into(),
                expected,
                new_value: expected.into(),
                success: VReg(100),
            },
            false,
        );
    }

    #[test]
    fn plain_cas_is_one_attempt() {
        let config = BarrierConfig::default();
        let mut vregs = VRegAllocator::new();
        let regs = Regs {
            address: vregs.fresh(),
            expected: vregs.fresh(),
            new_value: vregs.fresh(),
            success: vregs.fresh(),
        };
        let mut b = FragmentBuilder::new("cas", &mut vregs);
        ForwardingAwareCompareAndSwap::new(&config).emit_plain(&mut b, operands(&regs), false);
        let fragment = b.finish();
        assert_eq!(fragment.atomic_count(), 1);
        assert_eq!(fragment.blocks().len(), 2);
    }
}
