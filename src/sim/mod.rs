//! A reference executor for barrier fragments.
//!
//! [`Machine`] interprets a [`Fragment`] against a [`SimHeap`], calling a
//! [`SlowPathRuntimeBridge`] for runtime entries. The collector is modelled by the test: it sets
//! up the heap state before running a fragment, and can act between instructions through the
//! interleaving hook, which runs right before every atomic instruction. That is where a
//! concurrent collector or another mutator could change the slot a CAS works on.

mod heap;
mod memory;
mod runtime;

pub use self::heap::{Area, SimHeap, FIELDS_PER_OBJECT};
pub use self::memory::SimMemory;
pub use self::runtime::{ReferenceRuntime, SlowPathRuntimeBridge};

use std::collections::HashMap;
use std::fmt;

use enum_map::EnumMap;

use crate::codegen::*;
use crate::util::{Address, CompressedReferences, ObjectReference};

/// Fragments are small and loop-free; anything longer than this is a runaway.
pub const DEFAULT_STEP_LIMIT: usize = 10_000;

/// What a run of a fragment did.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExecStats {
    pub instructions: usize,
    pub loads: usize,
    /// All stores, including byte stores.
    pub stores: usize,
    pub byte_stores: usize,
    pub atomics: usize,
    pub runtime_calls: EnumMap<RuntimeEntry, usize>,
    pub blocks: Vec<BlockId>,
}

impl ExecStats {
    pub fn total_runtime_calls(&self) -> usize {
        self.runtime_calls.values().sum()
    }

    /// Whether the run passed through an out-of-line block.
    pub fn left_fast_path(&self, fragment: &Fragment) -> bool {
        self.blocks
            .iter()
            .any(|id| fragment.block(*id).kind == BlockKind::OutOfLine)
    }

    /// Whether the run passed through a block with the given label.
    pub fn visited(&self, fragment: &Fragment, label: &str) -> bool {
        self.blocks
            .iter()
            .any(|id| fragment.block(*id).label == label)
    }
}

/// A fragment that could not be executed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// A register was read before anything was written to it.
    UndefinedRegister(VReg),
    /// `verify_object` found something that is not an object.
    InvalidObject(usize),
    StepLimitExceeded(usize),
}

impl fmt::Display for SimError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            SimError::UndefinedRegister(reg) => write!(f, "{} is read before it is written", reg),
            SimError::InvalidObject(value) => write!(f, "{:#x} is not a valid object", value),
            SimError::StepLimitExceeded(limit) => {
                write!(f, "fragment did not exit within {} instructions", limit)
            }
        }
    }
}

impl std::error::Error for SimError {}

/// An atomic instruction about to execute, as seen by the interleaving hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AtomicSite {
    /// How many atomics this run executed before this one.
    pub index: usize,
    pub address: Address,
}

type InterleaveHook<'a> = Box<dyn FnMut(&mut SimHeap, AtomicSite) + 'a>;

/// Interprets fragments. Registers persist across runs, so a host-like driver can run several
/// fragments in sequence on the same values.
pub struct Machine<'a, R: SlowPathRuntimeBridge> {
    heap: &'a mut SimHeap,
    runtime: &'a mut R,
    regs: HashMap<VReg, usize>,
    step_limit: usize,
    interleave: Option<InterleaveHook<'a>>,
}

impl<'a, R: SlowPathRuntimeBridge> Machine<'a, R> {
    pub fn new(heap: &'a mut SimHeap, runtime: &'a mut R) -> Self {
        Machine {
            heap,
            runtime,
            regs: HashMap::new(),
            step_limit: DEFAULT_STEP_LIMIT,
            interleave: None,
        }
    }

    pub fn heap(&mut self) -> &mut SimHeap {
        &mut *self.heap
    }

    pub fn set_step_limit(&mut self, limit: usize) {
        self.step_limit = limit;
    }

    /// Run `hook` before every atomic instruction.
    pub fn on_atomic(&mut self, hook: impl FnMut(&mut SimHeap, AtomicSite) + 'a) {
        self.interleave = Some(Box::new(hook));
    }

    pub fn set_reg(&mut self, reg: VReg, value: usize) {
        self.regs.insert(reg, value);
    }

    pub fn set_ref(&mut self, reg: VReg, object: ObjectReference) {
        self.set_reg(reg, object.value());
    }

    pub fn set_addr(&mut self, reg: VReg, addr: Address) {
        self.set_reg(reg, addr.as_usize());
    }

    pub fn reg(&self, reg: VReg) -> Option<usize> {
        self.regs.get(&reg).copied()
    }

    pub fn reg_as_ref(&self, reg: VReg) -> Option<ObjectReference> {
        self.reg(reg)
            .map(|v| ObjectReference::from_raw_address(Address::from_usize(v)))
    }

    fn read(&self, loc: Location) -> Result<usize, SimError> {
        match loc {
            Location::Reg(reg) => self.reg(reg).ok_or(SimError::UndefinedRegister(reg)),
            Location::Context(ContextValue::ThreadPointer) => Ok(self.heap.thread().as_usize()),
            Location::Context(ContextValue::HeapBase) => Ok(self.heap.heap_base().as_usize()),
        }
    }

    fn operand(&self, op: Operand) -> Result<usize, SimError> {
        match op {
            Operand::Loc(loc) => self.read(loc),
            Operand::Imm(imm) => Ok(imm),
        }
    }

    fn address(&self, base: Location, offset: isize) -> Result<Address, SimError> {
        Ok(Address::from_usize(self.read(base)?.wrapping_add_signed(offset)))
    }

    /// Run `fragment` from its entry to its exit.
    pub fn run(&mut self, fragment: &Fragment) -> Result<ExecStats, SimError> {
        let mut stats = ExecStats::default();
        let mut current = fragment.entry();
        loop {
            let block = fragment.block(current);
            stats.blocks.push(current);
            for inst in &block.insts {
                stats.instructions += 1;
                if stats.instructions > self.step_limit {
                    return Err(SimError::StepLimitExceeded(self.step_limit));
                }
                self.execute(inst, &mut stats)?;
            }
            current = match &block.terminator {
                Terminator::Exit => break,
                Terminator::Jump(target) => *target,
                Terminator::Branch {
                    cond,
                    lhs,
                    rhs,
                    taken,
                    not_taken,
                } => {
                    if cond.holds(self.read(*lhs)?, self.operand(*rhs)?) {
                        *taken
                    } else {
                        *not_taken
                    }
                }
            };
        }
        trace!("Ran {}: {:?}", fragment.name(), stats);
        Ok(stats)
    }

    fn execute(&mut self, inst: &Inst, stats: &mut ExecStats) -> Result<(), SimError> {
        match inst {
            Inst::Move { dst, src } => {
                let value = self.operand(*src)?;
                self.set_reg(*dst, value);
            }
            Inst::Load {
                dst,
                base,
                offset,
                width,
            } => {
                let addr = self.address(*base, *offset)?;
                let value = self.heap.memory.read_width(addr, *width);
                stats.loads += 1;
                self.set_reg(*dst, value);
            }
            Inst::Store {
                base,
                offset,
                src,
                width,
            } => {
                let addr = self.address(*base, *offset)?;
                let value = self.operand(*src)?;
                self.heap.memory.write_width(addr, *width, value);
                stats.stores += 1;
                if *width == Width::Byte {
                    stats.byte_stores += 1;
                }
            }
            Inst::Alu { op, dst, lhs, rhs } => {
                let value = op.apply(self.read(*lhs)?, self.operand(*rhs)?);
                self.set_reg(*dst, value);
            }
            Inst::Not { dst, src } => {
                let value = !self.read(*src)?;
                self.set_reg(*dst, value);
            }
            Inst::CompressRef {
                dst,
                src,
                heap_base,
                shift,
            } => {
                let base = Address::from_usize(self.read(*heap_base)?);
                let value = CompressedReferences { shift: *shift }.encode(base, self.read(*src)?);
                self.set_reg(*dst, value);
            }
            Inst::UncompressRef {
                dst,
                src,
                heap_base,
                shift,
            } => {
                let base = Address::from_usize(self.read(*heap_base)?);
                let narrow = Width::Int.truncate(self.read(*src)?);
                let value = CompressedReferences { shift: *shift }.decode(base, narrow);
                self.set_reg(*dst, value);
            }
            Inst::CompareAndSwap {
                address,
                expected,
                new_value,
                width,
                success,
            } => {
                let addr = Address::from_usize(self.read(*address)?);
                let compare = width.truncate(self.read(Location::Reg(*expected))?);
                let new_value = self.read(*new_value)?;
                if let Some(hook) = self.interleave.as_mut() {
                    hook(
                        self.heap,
                        AtomicSite {
                            index: stats.atomics,
                            address: addr,
                        },
                    );
                }
                stats.atomics += 1;
                let witness = self.heap.memory.read_width(addr, *width);
                let swapped = witness == compare;
                if swapped {
                    self.heap.memory.write_width(addr, *width, new_value);
                }
                self.set_reg(*expected, witness);
                self.set_reg(*success, swapped as usize);
            }
            Inst::CallRuntime {
                entry,
                args,
                result,
            } => {
                let args: Vec<usize> = args
                    .iter()
                    .map(|arg| self.read(*arg))
                    .collect::<Result<_, _>>()?;
                stats.runtime_calls[*entry] += 1;
                let object = |v: usize| ObjectReference::from_raw_address(Address::from_usize(v));
                match entry.lrb_strength() {
                    Some(strength) => {
                        let resolved = self.runtime.lrb_resolve(
                            self.heap,
                            strength,
                            object(args[0]),
                            Address::from_usize(args[1]),
                        );
                        if let Some(result) = result {
                            self.set_reg(*result, resolved.value());
                        }
                    }
                    None => self.runtime.satb_enqueue(self.heap, object(args[0])),
                }
            }
            Inst::VerifyObject { object } => {
                let value = self.read(*object)?;
                let obj = ObjectReference::from_raw_address(Address::from_usize(value));
                if !self.heap.is_valid_object(obj) {
                    return Err(SimError::InvalidObject(value));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::HeapStateFlags;

    #[test]
    fn undefined_register_is_an_error() {
        let mut vregs = VRegAllocator::new();
        let input = vregs.fresh();
        let output = vregs.fresh();
        let mut b = FragmentBuilder::new("copy", &mut vregs);
        b.alive(input);
        b.def(output);
        b.emit(Inst::Move {
            dst: output,
            src: input.into(),
        });
        let fragment = b.finish();

        let mut heap = SimHeap::default();
        let mut runtime = ReferenceRuntime::new();
        let mut machine = Machine::new(&mut heap, &mut runtime);
        assert_eq!(
            machine.run(&fragment),
            Err(SimError::UndefinedRegister(input))
        );
        machine.set_reg(input, 42);
        let stats = machine.run(&fragment).unwrap();
        assert_eq!(machine.reg(output), Some(42));
        assert_eq!(stats.instructions, 1);
        assert_eq!(stats.blocks.len(), 2);
    }

    #[test]
    fn reads_context_values() {
        let mut vregs = VRegAllocator::new();
        let state = vregs.fresh();
        let mut b = FragmentBuilder::new("state", &mut vregs);
        b.def(state);
        b.emit(Inst::Load {
            dst: state,
            base: ContextValue::ThreadPointer.into(),
            offset: crate::util::BarrierConfig::default().heap_state_offset,
            width: Width::Byte,
        });
        let fragment = b.finish();

        let mut heap = SimHeap::default();
        heap.set_heap_state(HeapStateFlags::MARKING | HeapStateFlags::WEAK_ROOTS);
        let mut runtime = ReferenceRuntime::new();
        let mut machine = Machine::new(&mut heap, &mut runtime);
        machine.run(&fragment).unwrap();
        assert_eq!(machine.reg(state), Some(0b110));
    }
}
