mod common;

use common::*;
use gcbarrier::util::conversions::address_to_card_index;
use gcbarrier::util::{BarrierConfig, BarrierOptions, CardTableBase};
use gcbarrier::MemoryAccessDescriptor;

fn conditional() -> BarrierOptions {
    let mut options = BarrierOptions::default();
    options.conditional_card_marking = true;
    options
}

#[test]
fn store_dirties_exactly_its_card() {
    let planner = planner();
    let fragment = plan(&planner, MemoryAccessDescriptor::store());
    let mut heap = heap_for(&planner);
    let a = heap.alloc_object();
    let slot = heap.alloc_slot(false);
    assert_eq!(heap.dirty_cards(), 0);

    run_store(&mut heap, &fragment, slot, a);
    assert!(heap.card_is_dirty(slot));
    assert_eq!(heap.dirty_cards(), 1);
}

#[test]
fn unconditional_marking_writes_every_time() {
    let planner = planner();
    let fragment = plan(&planner, MemoryAccessDescriptor::store());
    let mut heap = heap_for(&planner);
    let a = heap.alloc_object();
    let slot = heap.alloc_slot(false);

    let byte_stores: usize = (0..2)
        .map(|_| run_store(&mut heap, &fragment, slot, a).byte_stores)
        .sum();
    assert_eq!(byte_stores, 2);
    assert_eq!(heap.dirty_cards(), 1);
}

#[test]
fn conditional_marking_skips_dirty_cards() {
    let planner = planner_with(BarrierConfig::default(), conditional());
    let fragment = plan(&planner, MemoryAccessDescriptor::store());
    let mut heap = heap_for(&planner);
    let a = heap.alloc_object();
    let slot = heap.alloc_slot(false);
    let neighbour = slot + 8usize;
    let shift = planner.config().card_shift;
    assert_eq!(
        address_to_card_index(slot, shift),
        address_to_card_index(neighbour, shift)
    );

    let first = run_store(&mut heap, &fragment, slot, a);
    let second = run_store(&mut heap, &fragment, neighbour, a);
    assert_eq!(first.byte_stores, 1);
    assert_eq!(second.byte_stores, 0);
    assert!(heap.card_is_dirty(slot));

    // After the collector cleans the card, the next store dirties it again.
    heap.clean_cards();
    let third = run_store(&mut heap, &fragment, slot, a);
    assert_eq!(third.byte_stores, 1);
    assert!(heap.card_is_dirty(slot));
}

#[test]
fn thread_local_card_table() {
    let config = BarrierConfig {
        card_table_base: CardTableBase::ThreadLocal(0x38),
        ..BarrierConfig::default()
    };
    for options in [BarrierOptions::default(), conditional()] {
        let planner = planner_with(config.clone(), options);
        let fragment = plan(&planner, MemoryAccessDescriptor::store());
        let mut heap = heap_for(&planner);
        let a = heap.alloc_object();
        let slot = heap.alloc_slot(false);

        let stats = run_store(&mut heap, &fragment, slot, a);
        assert_eq!(stats.byte_stores, 1);
        assert!(heap.card_is_dirty(slot));
        assert_eq!(heap.dirty_cards(), 1);
    }
}

#[test]
fn compare_and_swap_dirties_card() {
    let planner = planner_with(BarrierConfig::default(), conditional());
    let fragment = plan(
        &planner,
        MemoryAccessDescriptor::compare_and_swap().compressed(),
    );
    let mut heap = heap_for(&planner);
    let a = heap.alloc_object();
    let b = heap.alloc_object();
    let slot = heap.alloc_slot(true);
    heap.store_ref(slot, a);

    let expected = heap.encode(gcbarrier::codegen::Width::Int, a);
    let new_value = heap.encode(gcbarrier::codegen::Width::Int, b);
    let outcome = run_cas(&mut heap, &fragment, slot, expected, new_value, no_interleaving);
    assert!(outcome.success);
    assert!(heap.card_is_dirty(slot));
}

#[test]
fn disabled_card_barrier() {
    let mut options = BarrierOptions::default();
    options.card_barrier = false;
    let planner = planner_with(BarrierConfig::default(), options);
    let fragment = plan(&planner, MemoryAccessDescriptor::store());
    let mut heap = heap_for(&planner);
    let a = heap.alloc_object();
    let slot = heap.alloc_slot(false);

    let stats = run_store(&mut heap, &fragment, slot, a);
    assert_eq!(stats.byte_stores, 0);
    assert_eq!(heap.dirty_cards(), 0);
}
