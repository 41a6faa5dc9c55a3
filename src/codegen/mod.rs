//! Target-neutral code representation for barrier fragments.
//!
//! Emitters write [`Inst`]s into a [`FragmentBuilder`], which keeps an explicit basic-block graph
//! with inline and out-of-line blocks and records the [`OperandContract`] for the host register
//! allocator. A backend lowers the resulting [`Fragment`] to machine code; the reference executor
//! in [`crate::sim`] interprets it directly.

mod builder;
mod contract;
mod fragment;
mod ir;
mod runtime;

pub use self::builder::{FragmentBuilder, VRegAllocator};
pub use self::contract::{OperandContract, OperandRole};
pub use self::fragment::Fragment;
pub use self::ir::{
    AluOp, Block, BlockId, BlockKind, Cond, ContextValue, Inst, Location, Operand, Terminator,
    VReg, Width,
};
pub use self::runtime::{RuntimeEntry, RuntimeSignature};
