//! The collector phase bits that barrier fast paths test.
//!
//! The collector publishes a small bitmask in a thread-local byte (at
//! [`BarrierConfig::heap_state_offset`](crate::util::BarrierConfig::heap_state_offset) from the
//! thread pointer). Mutators read it without synchronization. A read may lag behind the collector,
//! but the collector only clears a bit after every mutator has observed the state in which the
//! corresponding barrier work is no longer needed, so a stale read can only send a mutator into
//! a redundant slow path, never skip a required one.

use bitflags::bitflags;

bitflags! {
    /// Collector phase bits, as stored in the thread-local heap-state byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct HeapStateFlags: u8 {
        /// The heap may contain forwarded objects (evacuation or reference updating in progress).
        const HAS_FORWARDED = 1 << 0;
        /// Concurrent marking is active. SATB pre-write barriers must record overwritten values.
        const MARKING = 1 << 1;
        /// Weak roots are being processed. Weak and phantom loads must not resurrect unreachable
        /// referents.
        const WEAK_ROOTS = 1 << 2;
    }
}

impl HeapStateFlags {
    /// The bits a load-reference barrier tests to decide whether it can stay on the fast path.
    /// Strong loads only care about forwarding. Weak and phantom loads also leave the fast path
    /// while weak roots are processed, so that the runtime can report dead referents as null.
    pub const fn lrb_slow_path_mask(weak_or_phantom: bool) -> HeapStateFlags {
        if weak_or_phantom {
            HeapStateFlags::HAS_FORWARDED.union(HeapStateFlags::WEAK_ROOTS)
        } else {
            HeapStateFlags::HAS_FORWARDED
        }
    }

    /// The raw byte as the collector stores it.
    pub const fn to_byte(self) -> u8 {
        self.bits()
    }

    /// Interpret a raw heap-state byte. Unknown bits are dropped.
    pub const fn from_byte(byte: u8) -> HeapStateFlags {
        HeapStateFlags::from_bits_truncate(byte)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lrb_masks() {
        assert_eq!(
            HeapStateFlags::lrb_slow_path_mask(false),
            HeapStateFlags::HAS_FORWARDED
        );
        let weak = HeapStateFlags::lrb_slow_path_mask(true);
        assert!(weak.contains(HeapStateFlags::HAS_FORWARDED));
        assert!(weak.contains(HeapStateFlags::WEAK_ROOTS));
        assert!(!weak.contains(HeapStateFlags::MARKING));
    }

    #[test]
    fn byte_round_trip_drops_unknown_bits() {
        let flags = HeapStateFlags::from_byte(0b1000_0011);
        assert_eq!(flags, HeapStateFlags::HAS_FORWARDED | HeapStateFlags::MARKING);
        assert_eq!(flags.to_byte(), 0b011);
    }
}
