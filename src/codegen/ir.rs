//! The target-neutral instruction set that barrier fragments are written in.
//!
//! The instruction set is deliberately small: it is what a backend needs to lower to a handful
//! of machine instructions per operation. Registers are virtual; the host register allocator maps
//! them using the fragment's [`OperandContract`](super::OperandContract). Context values (the
//! thread pointer and the compressed-reference heap base) are dedicated machine registers in most
//! backends and are read-only for barrier code.

use std::fmt;

use strum_macros::{Display, EnumIter};

use super::runtime::RuntimeEntry;
use crate::util::constants::*;
use crate::util::ByteOffset;

/// A virtual register.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct VReg(pub u32);

impl fmt::Display for VReg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

/// Values that are live in dedicated registers for the whole compiled method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum ContextValue {
    /// The current mutator thread. Thread-local collector data (heap state, SATB queue, ...) is
    /// addressed relative to it.
    #[strum(serialize = "%thread")]
    ThreadPointer,
    /// The base of the compressed-reference heap.
    #[strum(serialize = "%heapbase")]
    HeapBase,
}

/// A register location an instruction can read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(VReg),
    Context(ContextValue),
}

impl From<VReg> for Location {
    fn from(reg: VReg) -> Self {
        Location::Reg(reg)
    }
}

impl From<ContextValue> for Location {
    fn from(value: ContextValue) -> Self {
        Location::Context(value)
    }
}

impl Location {
    pub fn as_reg(self) -> Option<VReg> {
        match self {
            Location::Reg(reg) => Some(reg),
            Location::Context(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Reg(reg) => write!(f, "{}", reg),
            Location::Context(value) => write!(f, "{}", value),
        }
    }
}

/// A source operand: a location or an immediate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operand {
    Loc(Location),
    Imm(usize),
}

impl From<VReg> for Operand {
    fn from(reg: VReg) -> Self {
        Operand::Loc(Location::Reg(reg))
    }
}

impl From<Location> for Operand {
    fn from(loc: Location) -> Self {
        Operand::Loc(loc)
    }
}

impl From<usize> for Operand {
    fn from(imm: usize) -> Self {
        Operand::Imm(imm)
    }
}

impl Operand {
    pub fn as_location(self) -> Option<Location> {
        match self {
            Operand::Loc(loc) => Some(loc),
            Operand::Imm(_) => None,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Operand::Loc(loc) => write!(f, "{}", loc),
            Operand::Imm(imm) => write!(f, "#{:#x}", imm),
        }
    }
}

/// Memory access width.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Width {
    #[strum(serialize = "u8")]
    Byte,
    /// 32 bits, the width of a compressed reference slot.
    #[strum(serialize = "u32")]
    Int,
    /// Machine word, the width of an uncompressed reference slot.
    #[strum(serialize = "word")]
    Word,
}

impl Width {
    pub const fn bytes(self) -> usize {
        match self {
            Width::Byte => BYTES_IN_BYTE,
            Width::Int => BYTES_IN_INT,
            Width::Word => BYTES_IN_WORD,
        }
    }

    /// Truncate a register value to this width, as a load or store of this width would.
    pub const fn truncate(self, value: usize) -> usize {
        match self {
            Width::Byte => value & 0xff,
            Width::Int => value & 0xffff_ffff,
            Width::Word => value,
        }
    }

    /// The slot width for references, compressed or not.
    pub const fn of_reference(compressed: bool) -> Width {
        if compressed {
            Width::Int
        } else {
            Width::Word
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AluOp {
    Add,
    Sub,
    And,
    Or,
    Xor,
    Shl,
    Shr,
}

impl AluOp {
    pub fn apply(self, lhs: usize, rhs: usize) -> usize {
        match self {
            AluOp::Add => lhs.wrapping_add(rhs),
            AluOp::Sub => lhs.wrapping_sub(rhs),
            AluOp::And => lhs & rhs,
            AluOp::Or => lhs | rhs,
            AluOp::Xor => lhs ^ rhs,
            AluOp::Shl => lhs.wrapping_shl(rhs as u32),
            AluOp::Shr => lhs.wrapping_shr(rhs as u32),
        }
    }
}

/// Branch conditions. `Test*` conditions branch on `lhs & rhs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum Cond {
    Eq,
    Ne,
    TestZero,
    TestNonZero,
}

impl Cond {
    pub fn holds(self, lhs: usize, rhs: usize) -> bool {
        match self {
            Cond::Eq => lhs == rhs,
            Cond::Ne => lhs != rhs,
            Cond::TestZero => lhs & rhs == 0,
            Cond::TestNonZero => lhs & rhs != 0,
        }
    }

    pub fn negate(self) -> Cond {
        match self {
            Cond::Eq => Cond::Ne,
            Cond::Ne => Cond::Eq,
            Cond::TestZero => Cond::TestNonZero,
            Cond::TestNonZero => Cond::TestZero,
        }
    }
}

/// A non-terminating instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inst {
    /// `dst = src`
    Move { dst: VReg, src: Operand },
    /// `dst = zero_extend(load.width [base + offset])`
    Load {
        dst: VReg,
        base: Location,
        offset: ByteOffset,
        width: Width,
    },
    /// `store.width [base + offset], src`
    Store {
        base: Location,
        offset: ByteOffset,
        src: Operand,
        width: Width,
    },
    /// `dst = lhs op rhs`
    Alu {
        op: AluOp,
        dst: VReg,
        lhs: Location,
        rhs: Operand,
    },
    /// `dst = !src`
    Not { dst: VReg, src: Location },
    /// `dst = src == 0 ? 0 : (src - heap_base) >> shift`
    CompressRef {
        dst: VReg,
        src: Location,
        heap_base: Location,
        shift: u8,
    },
    /// `dst = src == 0 ? 0 : heap_base + (src << shift)`
    UncompressRef {
        dst: VReg,
        src: Location,
        heap_base: Location,
        shift: u8,
    },
    /// Atomic compare-and-exchange on `[address]` with acquire/release semantics. Reads
    /// `expected`, writes the value found in memory (the witness) back into `expected`, and sets
    /// `success` to 1 or 0.
    CompareAndSwap {
        address: Location,
        expected: VReg,
        new_value: Location,
        width: Width,
        success: VReg,
    },
    /// Call into the runtime. The arguments must match the entry's signature.
    CallRuntime {
        entry: RuntimeEntry,
        args: Vec<Location>,
        result: Option<VReg>,
    },
    /// Debug check that `object` refers to a plausible object. Traps otherwise.
    VerifyObject { object: Location },
}

impl Inst {
    /// Locations read by this instruction.
    pub fn uses(&self) -> Vec<Location> {
        fn loc(op: &Operand) -> Option<Location> {
            op.as_location()
        }
        match self {
            Inst::Move { src, .. } => loc(src).into_iter().collect(),
            Inst::Load { base, .. } => vec![*base],
            Inst::Store { base, src, .. } => std::iter::once(*base).chain(loc(src)).collect(),
            Inst::Alu { lhs, rhs, .. } => std::iter::once(*lhs).chain(loc(rhs)).collect(),
            Inst::Not { src, .. } => vec![*src],
            Inst::CompressRef { src, heap_base, .. } | Inst::UncompressRef { src, heap_base, .. } => {
                vec![*src, *heap_base]
            }
            Inst::CompareAndSwap {
                address,
                expected,
                new_value,
                ..
            } => vec![*address, Location::Reg(*expected), *new_value],
            Inst::CallRuntime { args, .. } => args.clone(),
            Inst::VerifyObject { object } => vec![*object],
        }
    }

    /// Registers written by this instruction.
    pub fn defs(&self) -> Vec<VReg> {
        match self {
            Inst::Move { dst, .. }
            | Inst::Load { dst, .. }
            | Inst::Alu { dst, .. }
            | Inst::Not { dst, .. }
            | Inst::CompressRef { dst, .. }
            | Inst::UncompressRef { dst, .. } => vec![*dst],
            Inst::CompareAndSwap {
                expected, success, ..
            } => vec![*expected, *success],
            Inst::CallRuntime { result, .. } => result.iter().copied().collect(),
            Inst::Store { .. } | Inst::VerifyObject { .. } => vec![],
        }
    }

    pub fn is_atomic(&self) -> bool {
        matches!(self, Inst::CompareAndSwap { .. })
    }
}

fn fmt_mem(f: &mut fmt::Formatter, base: &Location, offset: ByteOffset) -> fmt::Result {
    if offset == 0 {
        write!(f, "[{}]", base)
    } else if offset < 0 {
        write!(f, "[{} - {:#x}]", base, offset.unsigned_abs())
    } else {
        write!(f, "[{} + {:#x}]", base, offset)
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Inst::Move { dst, src } => write!(f, "{} = mov {}", dst, src),
            Inst::Load {
                dst,
                base,
                offset,
                width,
            } => {
                write!(f, "{} = load.{} ", dst, width)?;
                fmt_mem(f, base, *offset)
            }
            Inst::Store {
                base,
                offset,
                src,
                width,
            } => {
                write!(f, "store.{} ", width)?;
                fmt_mem(f, base, *offset)?;
                write!(f, ", {}", src)
            }
            Inst::Alu { op, dst, lhs, rhs } => write!(f, "{} = {} {}, {}", dst, op, lhs, rhs),
            Inst::Not { dst, src } => write!(f, "{} = not {}", dst, src),
            Inst::CompressRef {
                dst,
                src,
                heap_base,
                shift,
            } => write!(f, "{} = compress {}, {}, {}", dst, src, heap_base, shift),
            Inst::UncompressRef {
                dst,
                src,
                heap_base,
                shift,
            } => write!(f, "{} = uncompress {}, {}, {}", dst, src, heap_base, shift),
            Inst::CompareAndSwap {
                address,
                expected,
                new_value,
                width,
                success,
            } => write!(
                f,
                "{}, {} = cas.{} [{}], {}, {}",
                success, expected, width, address, expected, new_value
            ),
            Inst::CallRuntime {
                entry,
                args,
                result,
            } => {
                if let Some(result) = result {
                    write!(f, "{} = ", result)?;
                }
                write!(f, "call {}(", entry)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Inst::VerifyObject { object } => write!(f, "verify_object {}", object),
        }
    }
}

/// A basic block identifier, unique within a fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// The last instruction of a basic block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Terminator {
    Jump(BlockId),
    Branch {
        cond: Cond,
        lhs: Location,
        rhs: Operand,
        taken: BlockId,
        not_taken: BlockId,
    },
    /// Leave the fragment. Exactly one block of a fragment exits.
    Exit,
}

impl Terminator {
    pub fn successors(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump(target) => vec![*target],
            Terminator::Branch {
                taken, not_taken, ..
            } => vec![*taken, *not_taken],
            Terminator::Exit => vec![],
        }
    }

    pub fn uses(&self) -> Vec<Location> {
        match self {
            Terminator::Branch { lhs, rhs, .. } => {
                std::iter::once(*lhs).chain(rhs.as_location()).collect()
            }
            Terminator::Jump(_) | Terminator::Exit => vec![],
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Terminator::Jump(target) => write!(f, "jump {}", target),
            Terminator::Branch {
                cond,
                lhs,
                rhs,
                taken,
                not_taken,
            } => write!(
                f,
                "br.{} {}, {} -> {} else {}",
                cond, lhs, rhs, taken, not_taken
            ),
            Terminator::Exit => write!(f, "exit"),
        }
    }
}

/// Whether a block is laid out with the fast path or out of line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[strum(serialize_all = "snake_case")]
pub enum BlockKind {
    Inline,
    OutOfLine,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub id: BlockId,
    pub kind: BlockKind,
    /// A short name for listings, e.g. `lrb_cset_check`.
    pub label: &'static str,
    pub insts: Vec<Inst>,
    pub terminator: Terminator,
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "{}: ; {} ({})", self.id, self.label, self.kind)?;
        for inst in &self.insts {
            writeln!(f, "    {}", inst)?;
        }
        writeln!(f, "    {}", self.terminator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cond_negation() {
        for cond in [Cond::Eq, Cond::Ne, Cond::TestZero, Cond::TestNonZero] {
            for (lhs, rhs) in [(0, 0), (1, 0), (0b110, 0b010), (0b100, 0b010)] {
                assert_eq!(cond.holds(lhs, rhs), !cond.negate().holds(lhs, rhs));
            }
        }
    }

    #[test]
    fn width_truncation() {
        assert_eq!(Width::Byte.truncate(0x1ff), 0xff);
        assert_eq!(Width::Int.truncate(0x1_0000_0001), 1);
        assert_eq!(Width::Word.truncate(usize::MAX), usize::MAX);
        assert_eq!(Width::of_reference(true), Width::Int);
        assert_eq!(Width::of_reference(false), Width::Word);
    }

    #[test]
    fn listing() {
        let inst = Inst::Load {
            dst: VReg(3),
            base: ContextValue::ThreadPointer.into(),
            offset: 0x20,
            width: Width::Byte,
        };
        assert_eq!(inst.to_string(), "v3 = load.u8 [%thread + 0x20]");
        let store = Inst::Store {
            base: VReg(1).into(),
            offset: -8,
            src: Operand::Imm(0),
            width: Width::Word,
        };
        assert_eq!(store.to_string(), "store.word [v1 - 0x8], #0x0");
        let alu = Inst::Alu {
            op: AluOp::Shr,
            dst: VReg(2),
            lhs: VReg(1).into(),
            rhs: Operand::Imm(9),
        };
        assert_eq!(alu.to_string(), "v2 = shr v1, #0x9");
    }

    #[test]
    fn uses_and_defs() {
        let cas = Inst::CompareAndSwap {
            address: VReg(0).into(),
            expected: VReg(1),
            new_value: VReg(2).into(),
            width: Width::Word,
            success: VReg(3),
        };
        assert_eq!(cas.uses().len(), 3);
        assert_eq!(cas.defs(), vec![VReg(1), VReg(3)]);
        assert!(cas.is_atomic());
    }
}
