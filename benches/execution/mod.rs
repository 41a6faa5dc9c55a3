use criterion::black_box;
use criterion::Criterion;

use gcbarrier::codegen::{VReg, VRegAllocator};
use gcbarrier::sim::{Machine, ReferenceRuntime, SimHeap};
use gcbarrier::util::HeapStateFlags;
use gcbarrier::{
    AccessOperands, BarrierConfig, BarrierContext, BarrierOptions, BarrierPlanner,
    MemoryAccessDescriptor, ReferenceStrength,
};

/// Interpreting the fast path of a load, and a CAS that has to retry on a from-space alias.
pub fn bench(c: &mut Criterion) {
    let planner = BarrierPlanner::new(BarrierConfig::default(), BarrierOptions::default());
    let ctx = BarrierContext::default();
    let (address, value, new_value, success) = (VReg(0), VReg(1), VReg(2), VReg(3));

    let load = planner.plan(
        &mut VRegAllocator::starting_at(4),
        &ctx,
        &MemoryAccessDescriptor::load(ReferenceStrength::Strong),
        &AccessOperands::Load {
            address,
            result: value,
        },
    );
    let cas = planner.plan(
        &mut VRegAllocator::starting_at(4),
        &ctx,
        &MemoryAccessDescriptor::compare_and_swap(),
        &AccessOperands::CompareAndSwap {
            address,
            expected: value,
            new_value,
            success,
        },
    );

    let mut heap = SimHeap::new(planner.config().clone());
    heap.set_heap_state(HeapStateFlags::HAS_FORWARDED);
    let from = heap.alloc_object();
    let to = heap.forward(from);
    let other = heap.alloc_object();
    let slot = heap.alloc_slot(false);
    heap.store_ref(slot, other);

    c.bench_function("run strong load", |b| {
        let mut runtime = ReferenceRuntime::new();
        let mut machine = Machine::new(&mut heap, &mut runtime);
        machine.set_addr(address, slot);
        b.iter(|| machine.run(black_box(&load)))
    });

    c.bench_function("run cas with retry", |b| {
        let mut runtime = ReferenceRuntime::new();
        let mut machine = Machine::new(&mut heap, &mut runtime);
        machine.set_addr(address, slot);
        b.iter(|| {
            machine.heap().store_ref(slot, from);
            machine.set_ref(value, to);
            machine.set_ref(new_value, to);
            machine.run(black_box(&cas))
        })
    });
}
