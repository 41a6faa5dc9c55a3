use enum_map::EnumMap;

use super::heap::SimHeap;
use crate::barrier::ReferenceStrength;
use crate::util::{Address, HeapStateFlags, ObjectReference};

/// The runtime side of barrier slow paths, as the reference executor calls it. Arguments are
/// decoded from the registers the fragment passes; see
/// [`RuntimeEntry`](crate::codegen::RuntimeEntry) for the signatures.
pub trait SlowPathRuntimeBridge {
    /// Resolve `object`, which was loaded from `load_address`, to its canonical copy.
    fn lrb_resolve(
        &mut self,
        heap: &mut SimHeap,
        strength: ReferenceStrength,
        object: ObjectReference,
        load_address: Address,
    ) -> ObjectReference;

    /// Record `previous` after the SATB fast path found the queue full.
    fn satb_enqueue(&mut self, heap: &mut SimHeap, previous: ObjectReference);
}

/// A runtime that behaves like a concurrent evacuating collector's:
/// * A forwarded object resolves to its forwardee.
/// * An object in the collection set that has not been copied yet is evacuated by the mutator.
/// * The slot the reference was loaded from is healed to the canonical copy.
/// * While weak roots are processed, weak and phantom loads of unreachable referents return null.
/// * A full SATB queue is drained before the value is recorded.
#[derive(Debug, Default)]
pub struct ReferenceRuntime {
    /// Slow-path resolves, by the strength of the load.
    pub resolves: EnumMap<ReferenceStrength, usize>,
    pub evacuations: usize,
    pub heals: usize,
}

impl ReferenceRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn heal(&mut self, heap: &mut SimHeap, slot: Address, from: ObjectReference, to: ObjectReference) {
        let Some(width) = heap.slot_width(slot) else {
            return;
        };
        // Only replace the value the mutator loaded. Someone else may have stored to the slot.
        let current = heap.memory.read_width(slot, width);
        if current == heap.encode(width, from) {
            let healed = heap.encode(width, to);
            heap.memory.write_width(slot, width, healed);
            self.heals += 1;
        }
    }
}

impl SlowPathRuntimeBridge for ReferenceRuntime {
    fn lrb_resolve(
        &mut self,
        heap: &mut SimHeap,
        strength: ReferenceStrength,
        object: ObjectReference,
        load_address: Address,
    ) -> ObjectReference {
        self.resolves[strength] += 1;
        if object.is_null() {
            return object;
        }
        let state = heap.heap_state();
        if strength.is_weak_or_phantom()
            && state.contains(HeapStateFlags::WEAK_ROOTS)
            && heap.is_unreachable(heap.resolve(object))
        {
            trace!("{} load of unreachable {} returns null", strength, object);
            return ObjectReference::NULL;
        }
        let mut resolved = heap.resolve(object);
        if resolved == object && state.contains(HeapStateFlags::HAS_FORWARDED) && heap.in_cset(object)
        {
            resolved = heap.forward(object);
            self.evacuations += 1;
        }
        if resolved != object && !load_address.is_zero() {
            self.heal(heap, load_address, object, resolved);
        }
        resolved
    }

    fn satb_enqueue(&mut self, heap: &mut SimHeap, previous: ObjectReference) {
        if heap.satb_index() == 0 {
            heap.drain_satb_queue();
        }
        heap.satb_push(previous);
    }
}
