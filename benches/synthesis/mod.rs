use criterion::black_box;
use criterion::Criterion;

use gcbarrier::codegen::VRegAllocator;
use gcbarrier::{
    AccessOperands, BarrierConfig, BarrierContext, BarrierOptions, BarrierPlanner,
    MemoryAccessDescriptor, ReferenceStrength,
};

pub fn bench(c: &mut Criterion) {
    let planner = BarrierPlanner::new(BarrierConfig::default(), BarrierOptions::default());
    let ctx = BarrierContext::default();

    let cases = [
        (
            "plan strong load",
            MemoryAccessDescriptor::load(ReferenceStrength::Strong),
        ),
        (
            "plan weak load",
            MemoryAccessDescriptor::load(ReferenceStrength::Weak),
        ),
        ("plan narrow store", MemoryAccessDescriptor::store().compressed()),
        ("plan cas", MemoryAccessDescriptor::compare_and_swap()),
    ];
    for (name, desc) in cases {
        c.bench_function(name, |b| {
            b.iter(|| {
                let mut vregs = VRegAllocator::new();
                let operands = match desc.kind {
                    gcbarrier::AccessKind::Load => AccessOperands::Load {
                        address: vregs.fresh(),
                        result: vregs.fresh(),
                    },
                    gcbarrier::AccessKind::Store => AccessOperands::Store {
                        address: vregs.fresh(),
                        value: vregs.fresh(),
                    },
                    gcbarrier::AccessKind::CompareAndSwap => AccessOperands::CompareAndSwap {
                        address: vregs.fresh(),
                        expected: vregs.fresh(),
                        new_value: vregs.fresh(),
                        success: vregs.fresh(),
                    },
                };
                planner.plan(&mut vregs, &ctx, black_box(&desc), &operands)
            })
        });
    }
}
