use crate::codegen::{AluOp, BlockId, Cond, FragmentBuilder, Inst, Location, Operand, VReg, Width};
use crate::util::ObjectHeaderLayout;

/// Emits the decode of an object's forwarding state. The runtime-side counterpart is
/// [`ForwardingRecord::decode`](crate::util::ForwardingRecord::decode); both must agree.
pub struct ForwardingResolver<'a> {
    layout: &'a ObjectHeaderLayout,
}

impl<'a> ForwardingResolver<'a> {
    pub fn new(layout: &'a ObjectHeaderLayout) -> Self {
        ForwardingResolver { layout }
    }

    /// Load the header of `object` and branch to `not_forwarded` unless it is forwarded. On the
    /// fall-through path `dst` holds the forwardee.
    ///
    /// `object` must be an uncompressed reference and may be `dst` itself. `scratch` is only
    /// written when the forwarded pattern differs from the lock mask.
    pub fn emit_decode(
        &self,
        b: &mut FragmentBuilder,
        object: Location,
        dst: VReg,
        scratch: VReg,
        not_forwarded: BlockId,
    ) {
        let mask = self.layout.lock_mask;
        b.emit(Inst::Load {
            dst,
            base: object,
            offset: self.layout.header_offset,
            width: Width::Word,
        });
        if self.layout.uses_inverted_test() {
            // Forwarded iff all lock bits are set, i.e. iff no lock bit is set in the inverse.
            b.emit(Inst::Not {
                dst,
                src: dst.into(),
            });
            b.branch(Cond::TestNonZero, dst, Operand::Imm(mask), not_forwarded);
            // !(!header | mask) == header & !mask
            b.emit(Inst::Alu {
                op: AluOp::Or,
                dst,
                lhs: dst.into(),
                rhs: Operand::Imm(mask),
            });
            b.emit(Inst::Not {
                dst,
                src: dst.into(),
            });
        } else {
            assert_ne!(dst, scratch, "Forwarding decode needs a separate scratch register");
            b.emit(Inst::Alu {
                op: AluOp::And,
                dst: scratch,
                lhs: dst.into(),
                rhs: Operand::Imm(mask),
            });
            b.branch(
                Cond::Ne,
                scratch,
                Operand::Imm(self.layout.forwarded_pattern),
                not_forwarded,
            );
            b.emit(Inst::Alu {
                op: AluOp::And,
                dst,
                lhs: dst.into(),
                rhs: Operand::Imm(!mask),
            });
        }
        trace!(
            "Forwarding decode of {} into {} ({} test)",
            object,
            dst,
            if self.layout.uses_inverted_test() {
                "inverted"
            } else {
                "masked"
            }
        );
    }
}
