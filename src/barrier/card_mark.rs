use super::BarrierContext;
use crate::codegen::{AluOp, Cond, FragmentBuilder, Inst, Location, Operand, Width};
use crate::util::{BarrierConfig, CardTableBase};

/// Post-write barrier: dirties the card that covers a stored-to slot.
///
/// Card writes need no atomicity and no ordering. Racing mutators write the same dirty value, and
/// a barrier never cleans a card.
pub struct CardMarkEmitter<'a> {
    config: &'a BarrierConfig,
    conditional: bool,
}

impl<'a> CardMarkEmitter<'a> {
    pub fn new(config: &'a BarrierConfig, conditional: bool) -> Self {
        CardMarkEmitter {
            config,
            conditional,
        }
    }

    /// Mark the card of `address` dirty. Uses shared scratch registers 0 and 1.
    pub fn emit(&self, b: &mut FragmentBuilder, ctx: &BarrierContext, address: Location) {
        b.input(address);
        let card = b.scratch(0);
        b.emit(Inst::Alu {
            op: AluOp::Shr,
            dst: card,
            lhs: address,
            rhs: Operand::Imm(self.config.card_shift as usize),
        });
        match self.config.card_table_base {
            CardTableBase::Fixed(base) => b.emit(Inst::Alu {
                op: AluOp::Add,
                dst: card,
                lhs: card.into(),
                rhs: Operand::Imm(base.as_usize()),
            }),
            CardTableBase::ThreadLocal(offset) => {
                b.input(ctx.thread);
                let base = b.scratch(1);
                b.emit(Inst::Load {
                    dst: base,
                    base: ctx.thread,
                    offset,
                    width: Width::Word,
                });
                b.emit(Inst::Alu {
                    op: AluOp::Add,
                    dst: card,
                    lhs: card.into(),
                    rhs: base.into(),
                });
            }
        }

        let dirty = Operand::Imm(self.config.dirty_card as usize);
        if self.conditional {
            let done = b.join_point("card_done");
            let value = b.scratch(1);
            b.emit(Inst::Load {
                dst: value,
                base: card.into(),
                offset: 0,
                width: Width::Byte,
            });
            b.branch(Cond::Eq, value, dirty, done);
            b.emit(Inst::Store {
                base: card.into(),
                offset: 0,
                src: dirty,
                width: Width::Byte,
            });
            b.bind(done);
        } else {
            b.emit(Inst::Store {
                base: card.into(),
                offset: 0,
                src: dirty,
                width: Width::Byte,
            });
        }
        trace!(
            "Card mark of {} ({:?}, conditional: {})",
            address,
            self.config.card_table_base,
            self.conditional
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{Fragment, VRegAllocator};

    fn card_mark(config: &BarrierConfig, conditional: bool) -> Fragment {
        let mut vregs = VRegAllocator::new();
        let address = vregs.fresh();
        let mut b = FragmentBuilder::new("card", &mut vregs);
        CardMarkEmitter::new(config, conditional).emit(
            &mut b,
            &BarrierContext::default(),
            address.into(),
        );
        b.finish()
    }

    #[test]
    fn unconditional_is_straight_line() {
        let fragment = card_mark(&BarrierConfig::default(), false);
        assert_eq!(fragment.out_of_line_blocks().count(), 0);
        assert_eq!(fragment.instructions().count(), 3);
        assert!(fragment.runtime_calls().is_empty());
    }

    #[test]
    fn conditional_reads_the_card() {
        let fragment = card_mark(&BarrierConfig::default(), true);
        let loads = fragment
            .instructions()
            .filter(|i| matches!(i, Inst::Load { width: Width::Byte, .. }))
            .count();
        assert_eq!(loads, 1);
        assert_eq!(fragment.atomic_count(), 0);
    }

    #[test]
    fn thread_local_base() {
        let config = BarrierConfig {
            card_table_base: CardTableBase::ThreadLocal(0x40),
            ..BarrierConfig::default()
        };
        let fragment = card_mark(&config, false);
        assert!(fragment.instructions().any(|i| matches!(
            i,
            Inst::Load {
                offset: 0x40,
                width: Width::Word,
                ..
            }
        )));
        assert!(!fragment.instructions().any(|i| matches!(
            i,
            Inst::Alu {
                rhs: Operand::Imm(0x0800_0000),
                ..
            }
        )));
    }
}
