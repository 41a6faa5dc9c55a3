//! Shared setup for the integration tests: plan an access with host registers `v0..v3`, then
//! run it on a simulated heap.

#![allow(dead_code)]

use gcbarrier::codegen::{Fragment, VReg, VRegAllocator};
use gcbarrier::sim::{AtomicSite, ExecStats, Machine, ReferenceRuntime, SimHeap};
use gcbarrier::util::{Address, BarrierConfig, BarrierOptions, ObjectReference};
use gcbarrier::{AccessKind, AccessOperands, BarrierContext, BarrierPlanner, MemoryAccessDescriptor};

pub const ADDRESS: VReg = VReg(0);
pub const VALUE: VReg = VReg(1);
pub const NEW_VALUE: VReg = VReg(2);
pub const SUCCESS: VReg = VReg(3);

pub fn init_logger() {
    let _ = gcbarrier::util::logger::try_init();
}

pub fn planner() -> BarrierPlanner {
    planner_with(BarrierConfig::default(), BarrierOptions::default())
}

pub fn planner_with(config: BarrierConfig, options: BarrierOptions) -> BarrierPlanner {
    init_logger();
    BarrierPlanner::new(config, options)
}

pub fn operands(kind: AccessKind) -> AccessOperands {
    match kind {
        AccessKind::Load => AccessOperands::Load {
            address: ADDRESS,
            result: VALUE,
        },
        AccessKind::Store => AccessOperands::Store {
            address: ADDRESS,
            value: VALUE,
        },
        AccessKind::CompareAndSwap => AccessOperands::CompareAndSwap {
            address: ADDRESS,
            expected: VALUE,
            new_value: NEW_VALUE,
            success: SUCCESS,
        },
    }
}

pub fn plan(planner: &BarrierPlanner, desc: MemoryAccessDescriptor) -> Fragment {
    // The host's own registers come first.
    let mut vregs = VRegAllocator::starting_at(16);
    planner.plan(
        &mut vregs,
        &BarrierContext::default(),
        &desc,
        &operands(desc.kind),
    )
}

pub fn heap_for(planner: &BarrierPlanner) -> SimHeap {
    SimHeap::new(planner.config().clone())
}

pub fn run_load(
    heap: &mut SimHeap,
    fragment: &Fragment,
    slot: Address,
) -> (ObjectReference, ExecStats) {
    let mut runtime = ReferenceRuntime::new();
    let mut machine = Machine::new(heap, &mut runtime);
    machine.set_addr(ADDRESS, slot);
    let stats = machine.run(fragment).unwrap();
    (machine.reg_as_ref(VALUE).unwrap(), stats)
}

pub fn run_store(
    heap: &mut SimHeap,
    fragment: &Fragment,
    slot: Address,
    value: ObjectReference,
) -> ExecStats {
    let mut runtime = ReferenceRuntime::new();
    let mut machine = Machine::new(heap, &mut runtime);
    machine.set_addr(ADDRESS, slot);
    machine.set_ref(VALUE, value);
    machine.run(fragment).unwrap()
}

#[derive(Debug)]
pub struct CasOutcome {
    pub success: bool,
    /// The raw witness, in the slot's representation.
    pub witness: usize,
    pub stats: ExecStats,
}

/// Run a CAS fragment. `expected` and `new_value` are raw values in the slot's representation.
/// `hook` runs before every atomic, standing in for concurrent collector and mutator activity.
pub fn run_cas(
    heap: &mut SimHeap,
    fragment: &Fragment,
    slot: Address,
    expected: usize,
    new_value: usize,
    hook: impl FnMut(&mut SimHeap, AtomicSite),
) -> CasOutcome {
    let mut runtime = ReferenceRuntime::new();
    let mut machine = Machine::new(heap, &mut runtime);
    machine.on_atomic(hook);
    machine.set_addr(ADDRESS, slot);
    machine.set_reg(VALUE, expected);
    machine.set_reg(NEW_VALUE, new_value);
    let stats = machine.run(fragment).unwrap();
    CasOutcome {
        success: machine.reg(SUCCESS).unwrap() != 0,
        witness: machine.reg(VALUE).unwrap(),
        stats,
    }
}

pub fn no_interleaving(_: &mut SimHeap, _: AtomicSite) {}
