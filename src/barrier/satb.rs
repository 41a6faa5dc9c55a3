//! The snapshot-at-the-beginning pre-write barrier.
//!
//! While concurrent marking is active, every reference that is about to be overwritten is
//! recorded in the mutator's SATB queue, so that the marker sees the object graph as it was when
//! marking started. The queue is a thread-local buffer filled from the top: the index is a byte
//! offset into the buffer, decremented by one word per entry. An index of zero means the buffer is
//! full and the runtime has to hand it to the collector first.

use super::{load_heap_state, BarrierContext};
use crate::codegen::{
    AluOp, Cond, FragmentBuilder, Inst, Location, Operand, RuntimeEntry, Width,
};
use crate::util::constants::BYTES_IN_WORD;
use crate::util::{BarrierConfig, HeapStateFlags};

/// Where the value to record comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreviousValue {
    /// Load it from the slot at this address before the store happens.
    Load { address: Location },
    /// The caller already has it in this location.
    Provided(Location),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SatbOperands {
    pub previous: PreviousValue,
    /// The previous value is (or will be loaded as) a compressed reference.
    pub compressed: bool,
    pub known_non_null: bool,
}

pub struct PreWriteMarkBarrierEmitter<'a> {
    config: &'a BarrierConfig,
    verify: bool,
}

impl<'a> PreWriteMarkBarrierEmitter<'a> {
    pub fn new(config: &'a BarrierConfig, verify: bool) -> Self {
        PreWriteMarkBarrierEmitter { config, verify }
    }

    /// Record the previous value if marking is active. Uses shared scratch registers 0 to 2.
    pub fn emit(&self, b: &mut FragmentBuilder, ctx: &BarrierContext, operands: SatbOperands) {
        let config = self.config;
        let done = b.join_point("satb_done");
        let runtime = b.out_of_line("satb_runtime");

        let state = b.scratch(0);
        load_heap_state(b, config, ctx, state);
        b.branch(
            Cond::TestZero,
            state,
            Operand::Imm(HeapStateFlags::MARKING.to_byte() as usize),
            done,
        );

        let previous: Location = match operands.previous {
            PreviousValue::Load { address } => {
                b.input(address);
                let prev = b.scratch(1);
                b.emit(Inst::Load {
                    dst: prev,
                    base: address,
                    offset: 0,
                    width: Width::of_reference(operands.compressed),
                });
                prev.into()
            }
            PreviousValue::Provided(loc) => {
                b.input(loc);
                loc
            }
        };
        if !operands.known_non_null {
            b.branch(Cond::Eq, previous, Operand::Imm(0), done);
        }
        let previous: Location = if operands.compressed {
            b.input(ctx.heap_base);
            let prev = b.scratch(1);
            b.emit(Inst::UncompressRef {
                dst: prev,
                src: previous,
                heap_base: ctx.heap_base,
                shift: config.compressed.shift,
            });
            prev.into()
        } else {
            previous
        };
        if self.verify {
            b.emit(Inst::VerifyObject { object: previous });
        }

        // Fast enqueue.
        let index = b.scratch(0);
        b.emit(Inst::Load {
            dst: index,
            base: ctx.thread,
            offset: config.satb_index_offset,
            width: Width::Word,
        });
        b.branch(Cond::Eq, index, Operand::Imm(0), runtime);
        b.emit(Inst::Alu {
            op: AluOp::Sub,
            dst: index,
            lhs: index.into(),
            rhs: Operand::Imm(BYTES_IN_WORD),
        });
        b.emit(Inst::Store {
            base: ctx.thread,
            offset: config.satb_index_offset,
            src: index.into(),
            width: Width::Word,
        });
        let buffer = b.scratch(2);
        b.emit(Inst::Load {
            dst: buffer,
            base: ctx.thread,
            offset: config.satb_buffer_offset,
            width: Width::Word,
        });
        b.emit(Inst::Alu {
            op: AluOp::Add,
            dst: buffer,
            lhs: buffer.into(),
            rhs: index.into(),
        });
        b.emit(Inst::Store {
            base: buffer.into(),
            offset: 0,
            src: previous.into(),
            width: Width::Word,
        });
        b.jump(done);

        b.bind(runtime);
        b.emit(Inst::CallRuntime {
            entry: RuntimeEntry::SatbEnqueue,
            args: vec![previous],
            result: None,
        });
        b.jump(done);

        b.bind(done);
        trace!("SATB pre-write barrier for {:?}", operands);
    }
}
