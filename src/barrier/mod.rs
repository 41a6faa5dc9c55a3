//! Barrier emitters and the planner that selects them.
//!
//! A host compiler describes each reference access with a [`MemoryAccessDescriptor`] and asks the
//! [`BarrierPlanner`] for a fragment. The planner emits the access itself, surrounded by the
//! barriers it needs:
//!
//! | access | before                 | after                                  |
//! |--------|------------------------|----------------------------------------|
//! | load   |                        | load reference barrier, weak keep-alive |
//! | store  | SATB pre-write barrier | card mark                              |
//! | CAS    | SATB pre-write barrier | card mark (the CAS is forwarding-aware) |
//!
//! Each emitter can also be used on its own through [`FragmentBuilder`](crate::codegen::FragmentBuilder).

mod card_mark;
mod cas;
mod forwarding;
mod load_reference;
mod planner;
mod satb;

pub use self::card_mark::CardMarkEmitter;
pub use self::cas::{CasOperands, ForwardingAwareCompareAndSwap};
pub use self::forwarding::ForwardingResolver;
pub use self::load_reference::{LoadReferenceBarrierEmitter, LrbOperands};
pub use self::planner::BarrierPlanner;
pub use self::satb::{PreWriteMarkBarrierEmitter, PreviousValue, SatbOperands};

use enum_map::Enum;
use strum_macros::{Display, EnumIter};

use crate::codegen::{ContextValue, FragmentBuilder, Inst, Location, VReg, Width};
use crate::util::BarrierConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum AccessKind {
    Load,
    Store,
    CompareAndSwap,
}

/// The strength of the reference being accessed. Loads of weak and phantom references must not
/// resurrect objects the collector has found unreachable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum ReferenceStrength {
    Strong,
    Weak,
    Phantom,
}

impl ReferenceStrength {
    pub fn is_weak_or_phantom(self) -> bool {
        !matches!(self, ReferenceStrength::Strong)
    }
}

/// Describes one reference access site. Created by the host compiler per access.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemoryAccessDescriptor {
    pub kind: AccessKind,
    pub strength: ReferenceStrength,
    /// The reference is known not to be null: the loaded value for loads, the expected value
    /// for CAS. For CAS this only drops the null check of the pre-write barrier. The slot may
    /// still hold null, so the witness is always checked. Stores always null check the previous
    /// value.
    pub known_non_null: bool,
    /// The slot holds a compressed reference.
    pub compressed: bool,
}

impl MemoryAccessDescriptor {
    pub const fn load(strength: ReferenceStrength) -> Self {
        MemoryAccessDescriptor {
            kind: AccessKind::Load,
            strength,
            known_non_null: false,
            compressed: false,
        }
    }

    pub const fn store() -> Self {
        MemoryAccessDescriptor {
            kind: AccessKind::Store,
            strength: ReferenceStrength::Strong,
            known_non_null: false,
            compressed: false,
        }
    }

    pub const fn compare_and_swap() -> Self {
        MemoryAccessDescriptor {
            kind: AccessKind::CompareAndSwap,
            strength: ReferenceStrength::Strong,
            known_non_null: false,
            compressed: false,
        }
    }

    pub const fn non_null(self) -> Self {
        MemoryAccessDescriptor {
            known_non_null: true,
            ..self
        }
    }

    pub const fn compressed(self) -> Self {
        MemoryAccessDescriptor {
            compressed: true,
            ..self
        }
    }

    /// The width of the reference slot.
    pub const fn slot_width(&self) -> Width {
        Width::of_reference(self.compressed)
    }
}

/// The context values a fragment may read. Hosts that keep them somewhere other than the
/// dedicated registers can pass any other read-only location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierContext {
    pub thread: Location,
    pub heap_base: Location,
}

impl Default for BarrierContext {
    fn default() -> Self {
        BarrierContext {
            thread: ContextValue::ThreadPointer.into(),
            heap_base: ContextValue::HeapBase.into(),
        }
    }
}

/// The host registers of an access. Reference values are uncompressed, except for the expected
/// and new values of a compressed CAS, which are in the slot's representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessOperands {
    Load {
        /// The slot address.
        address: VReg,
        /// Receives the canonical reference.
        result: VReg,
    },
    Store {
        address: VReg,
        value: VReg,
    },
    CompareAndSwap {
        address: VReg,
        /// The comparison value on entry, the witness on exit.
        expected: VReg,
        new_value: VReg,
        /// 1 if the swap happened, 0 otherwise.
        success: VReg,
    },
}

impl AccessOperands {
    pub fn kind(&self) -> AccessKind {
        match self {
            AccessOperands::Load { .. } => AccessKind::Load,
            AccessOperands::Store { .. } => AccessKind::Store,
            AccessOperands::CompareAndSwap { .. } => AccessKind::CompareAndSwap,
        }
    }

    pub fn address(&self) -> VReg {
        match *self {
            AccessOperands::Load { address, .. }
            | AccessOperands::Store { address, .. }
            | AccessOperands::CompareAndSwap { address, .. } => address,
        }
    }
}

/// The barrier families the planner can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
pub enum BarrierKind {
    /// SATB pre-write barrier.
    Satb,
    LoadReference,
    CardMark,
    /// SATB keep-alive of a weak or phantom referent after a load.
    KeepAlive,
    ForwardingAwareCas,
}

/// Load the heap-state byte into `dst`.
fn load_heap_state(b: &mut FragmentBuilder, config: &BarrierConfig, ctx: &BarrierContext, dst: VReg) {
    b.input(ctx.thread);
    b.emit(Inst::Load {
        dst,
        base: ctx.thread,
        offset: config.heap_state_offset,
        width: Width::Byte,
    });
}
