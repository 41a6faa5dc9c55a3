use std::collections::{HashMap, HashSet};

use super::memory::SimMemory;
use crate::codegen::Width;
use crate::util::constants::*;
use crate::util::conversions::{address_to_card_index, address_to_region_index};
use crate::util::{
    Address, BarrierConfig, CardTableBase, ForwardingRecord, HeapStateFlags, ObjectReference,
};

/// Thread-local area of the simulated mutator.
const THREAD_AREA: Address = Address::from_usize(0x0010_0000);
/// SATB queue buffer of the simulated mutator.
const SATB_BUFFER: Address = Address::from_usize(0x0020_0000);
/// Thread-local card table base, for configurations that load it from the thread.
const THREAD_LOCAL_CARD_TABLE: Address = Address::from_usize(0x0900_0000);
/// Base of the simulated heap, also the base for compressed references.
const HEAP_BASE: Address = Address::from_usize(0x4000_0000);

/// Objects have a header word and this many reference fields.
pub const FIELDS_PER_OBJECT: usize = 3;
const BYTES_IN_OBJECT: usize = (1 + FIELDS_PER_OBJECT) * BYTES_IN_WORD;

/// Simulated heap areas. Each is one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Area {
    /// Newly allocated objects.
    Objects = 0,
    /// Copies made by evacuation.
    ToSpace = 1,
    /// Holder objects for slots handed out by [`SimHeap::alloc_slot`].
    Slots = 2,
}

const AREAS: usize = 3;

/// A simulated heap with one mutator thread: objects with forwarding headers, a collection-set
/// map, a card table, and the thread-local heap state and SATB queue.
///
/// Everything barrier code reads lives in [`SimMemory`] at the addresses the [`BarrierConfig`]
/// says. The bookkeeping on the side (which objects exist, which are unreachable) is what the
/// reference runtime and the tests consult.
pub struct SimHeap {
    config: BarrierConfig,
    pub memory: SimMemory,
    cursors: [Address; AREAS],
    objects: HashSet<ObjectReference>,
    slot_widths: HashMap<Address, Width>,
    unreachable: HashSet<ObjectReference>,
    satb_capacity: usize,
    satb_drained: Vec<ObjectReference>,
}

impl SimHeap {
    pub fn new(config: BarrierConfig) -> Self {
        let mut heap = SimHeap {
            config,
            memory: SimMemory::new(),
            cursors: [0, 1, 2].map(|i| Self::area_start(i) + BYTES_IN_OBJECT),
            objects: HashSet::new(),
            slot_widths: HashMap::new(),
            unreachable: HashSet::new(),
            satb_capacity: 0,
            satb_drained: vec![],
        };
        if let CardTableBase::ThreadLocal(offset) = heap.config.card_table_base {
            heap.memory
                .write::<usize>(THREAD_AREA.offset(offset), THREAD_LOCAL_CARD_TABLE.as_usize());
        }
        heap.clean_cards();
        heap.init_satb_queue(16);
        heap
    }

    fn area_start(index: usize) -> Address {
        HEAP_BASE + index * BYTES_IN_REGION
    }

    pub fn config(&self) -> &BarrierConfig {
        &self.config
    }

    /// The value of the thread-pointer context register.
    pub fn thread(&self) -> Address {
        THREAD_AREA
    }

    /// The value of the heap-base context register.
    pub fn heap_base(&self) -> Address {
        HEAP_BASE
    }

    // Objects

    pub fn alloc_object(&mut self) -> ObjectReference {
        self.alloc_in(Area::Objects)
    }

    fn alloc_in(&mut self, area: Area) -> ObjectReference {
        let cursor = &mut self.cursors[area as usize];
        let object = ObjectReference::from_raw_address(*cursor);
        *cursor += BYTES_IN_OBJECT;
        assert!(
            *cursor <= Self::area_start(area as usize) + BYTES_IN_REGION,
            "Simulated heap area {:?} is full",
            area
        );
        let header = self.config.header.plain_header(object.value() << 8);
        self.memory
            .write::<usize>(self.config.header.header_address(object), header);
        self.objects.insert(object);
        object
    }

    pub fn is_valid_object(&self, object: ObjectReference) -> bool {
        self.objects.contains(&object)
    }

    pub fn header(&self, object: ObjectReference) -> usize {
        self.memory.read(self.config.header.header_address(object))
    }

    pub fn forwarding(&self, object: ObjectReference) -> ForwardingRecord {
        ForwardingRecord::decode(self.header(object), &self.config.header)
    }

    /// The canonical copy of `object`.
    pub fn resolve(&self, object: ObjectReference) -> ObjectReference {
        if object.is_null() {
            return object;
        }
        self.forwarding(object).resolve(object)
    }

    fn field_address(object: ObjectReference, field: usize) -> Address {
        debug_assert!(field < FIELDS_PER_OBJECT);
        object.to_raw_address() + (field + 1) * BYTES_IN_WORD
    }

    /// Copy `object` to to-space and install the forwarding pointer. Returns the existing copy if
    /// the object is already forwarded.
    pub fn forward(&mut self, object: ObjectReference) -> ObjectReference {
        if let ForwardingRecord::ForwardedTo(to) = self.forwarding(object) {
            return to;
        }
        let to = self.alloc_in(Area::ToSpace);
        for field in 0..FIELDS_PER_OBJECT {
            let value: usize = self.memory.read(Self::field_address(object, field));
            self.memory.write(Self::field_address(to, field), value);
        }
        if self.unreachable.contains(&object) {
            self.unreachable.insert(to);
        }
        let header = self.config.header.forwarding_header(to);
        self.memory
            .write::<usize>(self.config.header.header_address(object), header);
        trace!("Forwarded {} to {}", object, to);
        to
    }

    /// Mark the region of `object` as (not) being evacuated.
    pub fn set_in_cset(&mut self, object: ObjectReference, in_cset: bool) {
        let entry = self.cset_entry(object);
        self.memory.write_u8(entry, in_cset as u8);
    }

    pub fn in_cset(&self, object: ObjectReference) -> bool {
        self.memory.read_u8(self.cset_entry(object)) != 0
    }

    fn cset_entry(&self, object: ObjectReference) -> Address {
        self.config.cset_map_base
            + address_to_region_index(object.to_raw_address(), self.config.region_shift)
    }

    /// Weak and phantom loads of an unreachable referent return null while weak roots are
    /// processed.
    pub fn set_unreachable(&mut self, object: ObjectReference) {
        self.unreachable.insert(object);
    }

    pub fn is_unreachable(&self, object: ObjectReference) -> bool {
        self.unreachable.contains(&object)
    }

    // Heap state

    pub fn set_heap_state(&mut self, flags: HeapStateFlags) {
        self.memory.write_u8(
            THREAD_AREA.offset(self.config.heap_state_offset),
            flags.to_byte(),
        );
    }

    pub fn heap_state(&self) -> HeapStateFlags {
        HeapStateFlags::from_byte(
            self.memory
                .read_u8(THREAD_AREA.offset(self.config.heap_state_offset)),
        )
    }

    // Slots

    /// A fresh reference slot holding null.
    pub fn alloc_slot(&mut self, compressed: bool) -> Address {
        let holder = self.alloc_in(Area::Slots);
        let slot = Self::field_address(holder, 0);
        self.slot_widths.insert(slot, Width::of_reference(compressed));
        slot
    }

    /// The width of a slot from [`alloc_slot`](Self::alloc_slot), if it is one.
    pub fn slot_width(&self, slot: Address) -> Option<Width> {
        self.slot_widths.get(&slot).copied()
    }

    fn slot_width_or_panic(&self, slot: Address) -> Width {
        self.slot_width(slot)
            .unwrap_or_else(|| panic!("{} is not a simulated slot", slot))
    }

    /// Encode a reference for a slot of the given width.
    pub fn encode(&self, width: Width, object: ObjectReference) -> usize {
        match width {
            Width::Int => self.config.compressed.encode(HEAP_BASE, object.value()),
            _ => object.value(),
        }
    }

    /// Decode a raw slot value of the given width.
    pub fn decode(&self, width: Width, raw: usize) -> ObjectReference {
        let value = match width {
            Width::Int => self.config.compressed.decode(HEAP_BASE, raw),
            _ => raw,
        };
        ObjectReference::from_raw_address(Address::from_usize(value))
    }

    pub fn store_ref(&mut self, slot: Address, object: ObjectReference) {
        let width = self.slot_width_or_panic(slot);
        let raw = self.encode(width, object);
        self.memory.write_width(slot, width, raw);
    }

    pub fn load_ref(&self, slot: Address) -> ObjectReference {
        let width = self.slot_width_or_panic(slot);
        self.decode(width, self.memory.read_width(slot, width))
    }

    // Cards

    fn card_table_base(&self) -> Address {
        match self.config.card_table_base {
            CardTableBase::Fixed(base) => base,
            CardTableBase::ThreadLocal(_) => THREAD_LOCAL_CARD_TABLE,
        }
    }

    fn card_address(&self, addr: Address) -> Address {
        self.card_table_base() + address_to_card_index(addr, self.config.card_shift)
    }

    /// Reset every card of the simulated heap to clean.
    pub fn clean_cards(&mut self) {
        let first = self.card_address(HEAP_BASE);
        let cards = (AREAS * BYTES_IN_REGION) >> self.config.card_shift;
        self.memory.fill(first, cards, CLEAN_CARD);
    }

    pub fn card_is_dirty(&self, addr: Address) -> bool {
        self.memory.read_u8(self.card_address(addr)) == self.config.dirty_card
    }

    pub fn dirty_cards(&self) -> usize {
        let cards = (AREAS * BYTES_IN_REGION) >> self.config.card_shift;
        let first = self.card_address(HEAP_BASE);
        (0..cards)
            .filter(|i| self.memory.read_u8(first + *i) == self.config.dirty_card)
            .count()
    }

    // SATB queue

    /// Install an empty SATB queue with room for `capacity` entries.
    pub fn init_satb_queue(&mut self, capacity: usize) {
        self.satb_capacity = capacity;
        self.memory.write::<usize>(
            THREAD_AREA.offset(self.config.satb_buffer_offset),
            SATB_BUFFER.as_usize(),
        );
        self.set_satb_index(capacity * BYTES_IN_WORD);
    }

    /// The byte offset of the most recent entry. Zero means the queue is full.
    pub fn satb_index(&self) -> usize {
        self.memory
            .read(THREAD_AREA.offset(self.config.satb_index_offset))
    }

    fn set_satb_index(&mut self, index: usize) {
        self.memory
            .write::<usize>(THREAD_AREA.offset(self.config.satb_index_offset), index);
    }

    /// Entries currently in the queue, oldest first.
    pub fn satb_entries(&self) -> Vec<ObjectReference> {
        let index = self.satb_index();
        let end = self.satb_capacity * BYTES_IN_WORD;
        assert!(
            index <= end && index % BYTES_IN_WORD == 0,
            "Corrupt SATB index {:#x}",
            index
        );
        (index..end)
            .step_by(BYTES_IN_WORD)
            .rev()
            .map(|offset| {
                let value: usize = self.memory.read(SATB_BUFFER + offset);
                ObjectReference::from_raw_address(Address::from_usize(value))
            })
            .collect()
    }

    /// Hand the queued entries to the collector and reset the queue to empty.
    pub fn drain_satb_queue(&mut self) {
        let entries = self.satb_entries();
        debug!("Draining {} SATB entries", entries.len());
        self.satb_drained.extend(entries);
        self.set_satb_index(self.satb_capacity * BYTES_IN_WORD);
    }

    /// Push an entry the way the runtime does after a drain.
    pub fn satb_push(&mut self, object: ObjectReference) {
        let index = self.satb_index();
        assert!(index >= BYTES_IN_WORD, "SATB queue is full");
        let index = index - BYTES_IN_WORD;
        self.memory.write::<usize>(SATB_BUFFER + index, object.value());
        self.set_satb_index(index);
    }

    /// Everything recorded by SATB barriers so far: drained entries, then queued ones.
    pub fn satb_recorded(&self) -> Vec<ObjectReference> {
        let mut recorded = self.satb_drained.clone();
        recorded.extend(self.satb_entries());
        recorded
    }
}

impl Default for SimHeap {
    fn default() -> Self {
        Self::new(BarrierConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forwarding() {
        let mut heap = SimHeap::default();
        let from = heap.alloc_object();
        assert_eq!(heap.resolve(from), from);
        let to = heap.forward(from);
        assert_ne!(from, to);
        assert_eq!(heap.resolve(from), to);
        assert_eq!(heap.resolve(to), to);
        assert_eq!(heap.forward(from), to);
        assert!(heap.is_valid_object(to));
    }

    #[test]
    fn compressed_slots() {
        let mut heap = SimHeap::default();
        let obj = heap.alloc_object();
        let slot = heap.alloc_slot(true);
        assert!(heap.load_ref(slot).is_null());
        heap.store_ref(slot, obj);
        assert_eq!(heap.load_ref(slot), obj);
        let raw = heap.memory.read_width(slot, Width::Int);
        assert_ne!(raw, obj.value());
    }

    #[test]
    fn cards_start_clean() {
        let mut heap = SimHeap::default();
        let slot = heap.alloc_slot(false);
        assert!(!heap.card_is_dirty(slot));
        assert_eq!(heap.dirty_cards(), 0);
    }

    #[test]
    fn satb_queue() {
        let mut heap = SimHeap::default();
        heap.init_satb_queue(2);
        let a = heap.alloc_object();
        let b = heap.alloc_object();
        heap.satb_push(a);
        heap.satb_push(b);
        assert_eq!(heap.satb_index(), 0);
        assert_eq!(heap.satb_entries(), vec![a, b]);
        heap.drain_satb_queue();
        assert!(heap.satb_entries().is_empty());
        assert_eq!(heap.satb_recorded(), vec![a, b]);
    }

    #[test]
    fn cset_membership() {
        let mut heap = SimHeap::default();
        let a = heap.alloc_object();
        assert!(!heap.in_cset(a));
        heap.set_in_cset(a, true);
        assert!(heap.in_cset(a));
        let slot = heap.alloc_slot(false);
        let holder = ObjectReference::from_raw_address(slot - BYTES_IN_WORD);
        assert!(!heap.in_cset(holder));
    }
}
