//! Runtime entry points that barrier slow paths may call.
//!
//! The runtime implements these; barrier code only needs their signatures. The card-marking
//! barrier and the CAS fast path never call the runtime.

use enum_map::{enum_map, Enum, EnumMap};
use strum_macros::{Display, EnumIter};

use crate::barrier::ReferenceStrength;

/// A runtime entry point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Enum, Display, EnumIter)]
pub enum RuntimeEntry {
    /// `lrbResolve(object, load_address) -> resolved` for strong loads.
    #[strum(serialize = "lrb_resolve")]
    LrbResolveStrong,
    /// `lrbResolve(object, load_address) -> resolved` for weak loads. Returns null for referents
    /// that are unreachable while weak roots are processed.
    #[strum(serialize = "lrb_resolve_weak")]
    LrbResolveWeak,
    /// `lrbResolve(object, load_address) -> resolved` for phantom loads.
    #[strum(serialize = "lrb_resolve_phantom")]
    LrbResolvePhantom,
    /// `satbEnqueue(previous_value)`. Flushes the thread's full SATB queue and records the value.
    #[strum(serialize = "satb_enqueue")]
    SatbEnqueue,
}

/// The calling convention of a runtime entry point, as far as barrier code is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RuntimeSignature {
    pub args: usize,
    pub has_result: bool,
}

lazy_static! {
    static ref SIGNATURES: EnumMap<RuntimeEntry, RuntimeSignature> = enum_map! {
        RuntimeEntry::LrbResolveStrong
        | RuntimeEntry::LrbResolveWeak
        | RuntimeEntry::LrbResolvePhantom => RuntimeSignature { args: 2, has_result: true },
        RuntimeEntry::SatbEnqueue => RuntimeSignature { args: 1, has_result: false },
    };
}

impl RuntimeEntry {
    pub fn signature(self) -> RuntimeSignature {
        SIGNATURES[self]
    }

    /// The load-reference-barrier entry for loads of the given strength.
    pub fn lrb_resolve(strength: ReferenceStrength) -> RuntimeEntry {
        match strength {
            ReferenceStrength::Strong => RuntimeEntry::LrbResolveStrong,
            ReferenceStrength::Weak => RuntimeEntry::LrbResolveWeak,
            ReferenceStrength::Phantom => RuntimeEntry::LrbResolvePhantom,
        }
    }

    /// The reference strength an LRB entry resolves for, or `None` for other entries.
    pub fn lrb_strength(self) -> Option<ReferenceStrength> {
        match self {
            RuntimeEntry::LrbResolveStrong => Some(ReferenceStrength::Strong),
            RuntimeEntry::LrbResolveWeak => Some(ReferenceStrength::Weak),
            RuntimeEntry::LrbResolvePhantom => Some(ReferenceStrength::Phantom),
            RuntimeEntry::SatbEnqueue => None,
        }
    }
}
