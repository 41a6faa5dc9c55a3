//! gcbarrier synthesizes the mutator-side barriers of a concurrent, relocating garbage collector.
//!
//! Given a [`MemoryAccessDescriptor`](barrier::MemoryAccessDescriptor) for a load, store or
//! compare-and-swap of an object reference, the [`BarrierPlanner`](barrier::BarrierPlanner) emits
//! a [`Fragment`](codegen::Fragment): a small basic-block graph in a target-neutral instruction
//! set, together with an [`OperandContract`](codegen::OperandContract) that tells the host
//! register allocator which locations are inputs, outputs and scratch. The host compiler owns
//! scheduling, register allocation and final encoding.
//!
//! The crate is organized as follows:
//! * [`util`]: addresses, constants, heap-state flags, object header layout and forwarding decode,
//!   barrier configuration and options.
//! * [`codegen`]: the instruction set, the fragment builder that emitters use to request scratch
//!   registers and out-of-line blocks, and the operand contract.
//! * [`barrier`]: the individual barrier emitters and the planner that selects them.
//! * [`sim`]: a reference executor that runs fragments against a simulated heap. It is what the
//!   tests use to check the barrier protocol, and a host may use it to validate its own lowering.

#[macro_use]
extern crate lazy_static;
#[macro_use]
extern crate log;
#[macro_use]
extern crate static_assertions;

pub mod util;
pub mod barrier;
pub mod codegen;
pub mod sim;

pub use crate::barrier::{
    AccessKind, AccessOperands, BarrierContext, BarrierPlanner, MemoryAccessDescriptor,
    ReferenceStrength,
};
pub use crate::codegen::{Fragment, FragmentBuilder, OperandContract, VRegAllocator};
pub use crate::util::{Address, BarrierConfig, BarrierOptions, ObjectReference};
