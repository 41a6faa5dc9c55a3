//! The builder emitters use to write a fragment.
//!
//! It plays the part of the host's code-layout and register-allocation collaborator: emitters ask
//! it for scratch registers and out-of-line blocks, and it records the roles of all registers so
//! that [`finish`](FragmentBuilder::finish) can hand back a checked [`Fragment`].
//!
//! Blocks are ordinary labeled blocks with explicit edges. The builder keeps a current block;
//! [`branch`](FragmentBuilder::branch) terminates it and continues in a fresh block of the same
//! kind, [`bind`](FragmentBuilder::bind) falls through from the current block into a previously
//! created one.

use super::contract::OperandContract;
use super::fragment::Fragment;
use super::ir::*;
use super::runtime::RuntimeEntry;

/// Hands out virtual register numbers. Owned by the host compiler, so that registers created by
/// barrier emitters never collide with the host's own.
#[derive(Debug, Default)]
pub struct VRegAllocator {
    next: u32,
}

impl VRegAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start numbering after registers the host already uses.
    pub fn starting_at(next: u32) -> Self {
        VRegAllocator { next }
    }

    pub fn fresh(&mut self) -> VReg {
        let reg = VReg(self.next);
        self.next += 1;
        reg
    }
}

struct PendingBlock {
    kind: BlockKind,
    label: &'static str,
    insts: Vec<Inst>,
    terminator: Option<Terminator>,
}

pub struct FragmentBuilder<'a> {
    name: String,
    vregs: &'a mut VRegAllocator,
    blocks: Vec<PendingBlock>,
    current: Option<BlockId>,
    contract: OperandContract,
    /// Scratch registers shared by all emitters writing into this fragment. Emitters run one
    /// after another and do not keep scratch values across emitter boundaries.
    scratch: Vec<VReg>,
}

impl<'a> FragmentBuilder<'a> {
    /// Create a builder with an inline entry block as the current block.
    pub fn new(name: impl Into<String>, vregs: &'a mut VRegAllocator) -> Self {
        let mut builder = FragmentBuilder {
            name: name.into(),
            vregs,
            blocks: vec![],
            current: None,
            contract: OperandContract::default(),
            scratch: vec![],
        };
        let entry = builder.new_block(BlockKind::Inline, "entry");
        builder.current = Some(entry);
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    // Operand roles

    /// Declare an input that the fragment reads and does not modify.
    pub fn alive(&mut self, loc: impl Into<Location>) {
        let loc = loc.into();
        if !self.contract.alive.contains(&loc) {
            self.contract.alive.push(loc);
        }
    }

    /// Declare that the fragment reads `loc`. A location that already has a role, for example the
    /// output of an earlier emitter, keeps it; anything else becomes an alive input.
    pub fn input(&mut self, loc: impl Into<Location>) {
        let loc = loc.into();
        if self.contract.role_of(loc).is_none() {
            self.contract.alive.push(loc);
        }
    }

    /// Declare an output.
    pub fn def(&mut self, reg: VReg) {
        if !self.contract.defs.contains(&reg) {
            self.contract.defs.push(reg);
        }
    }

    /// Declare an input whose register also carries an output.
    pub fn inout(&mut self, reg: VReg) {
        if !self.contract.inout.contains(&reg) {
            self.contract.inout.push(reg);
        }
    }

    /// The `index`-th shared scratch register, allocated on first use.
    pub fn scratch(&mut self, index: usize) -> VReg {
        while self.scratch.len() <= index {
            let reg = self.vregs.fresh();
            self.scratch.push(reg);
            self.contract.temps.push(reg);
        }
        self.scratch[index]
    }

    /// A scratch register private to the caller, never handed out again.
    pub fn temp(&mut self) -> VReg {
        let reg = self.vregs.fresh();
        self.contract.temps.push(reg);
        reg
    }

    pub fn contract(&self) -> &OperandContract {
        &self.contract
    }

    // Blocks

    /// Create a new, empty block. It does not become current.
    pub fn new_block(&mut self, kind: BlockKind, label: &'static str) -> BlockId {
        let id = BlockId(self.blocks.len() as u32);
        self.blocks.push(PendingBlock {
            kind,
            label,
            insts: vec![],
            terminator: None,
        });
        id
    }

    /// Request an out-of-line block for a slow path.
    pub fn out_of_line(&mut self, label: &'static str) -> BlockId {
        self.new_block(BlockKind::OutOfLine, label)
    }

    /// Request an inline join block.
    pub fn join_point(&mut self, label: &'static str) -> BlockId {
        self.new_block(BlockKind::Inline, label)
    }

    pub fn current(&self) -> Option<BlockId> {
        self.current
    }

    pub fn kind_of(&self, block: BlockId) -> BlockKind {
        self.blocks[block.0 as usize].kind
    }

    /// Make `block` current. If the current block is not terminated yet, it falls through to
    /// `block`.
    pub fn bind(&mut self, block: BlockId) {
        if let Some(current) = self.current {
            if current == block {
                return;
            }
            self.terminate(Terminator::Jump(block));
        }
        assert!(
            self.blocks[block.0 as usize].terminator.is_none(),
            "{}: cannot bind {}, it is already terminated",
            self.name,
            block
        );
        self.current = Some(block);
    }

    fn current_block(&mut self) -> &mut PendingBlock {
        let current = self
            .current
            .unwrap_or_else(|| panic!("{}: no current block to emit into", self.name));
        &mut self.blocks[current.0 as usize]
    }

    fn terminate(&mut self, terminator: Terminator) {
        let block = self.current_block();
        debug_assert!(block.terminator.is_none());
        block.terminator = Some(terminator);
        self.current = None;
    }

    // Instructions

    pub fn emit(&mut self, inst: Inst) {
        if let Inst::CallRuntime {
            entry,
            args,
            result,
        } = &inst
        {
            check_runtime_call(*entry, args, result);
        }
        self.current_block().insts.push(inst);
    }

    /// Unconditional jump. Leaves the builder without a current block.
    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump(target));
    }

    /// Branch to `target` if `cond(lhs, rhs)` holds, otherwise continue in a fresh block of the
    /// same kind as the current one.
    pub fn branch(
        &mut self,
        cond: Cond,
        lhs: impl Into<Location>,
        rhs: impl Into<Operand>,
        target: BlockId,
    ) {
        let current = self
            .current
            .unwrap_or_else(|| panic!("{}: branch without a current block", self.name));
        let kind = self.kind_of(current);
        let label = self.blocks[current.0 as usize].label;
        let not_taken = self.new_block(kind, label);
        self.terminate(Terminator::Branch {
            cond,
            lhs: lhs.into(),
            rhs: rhs.into(),
            taken: target,
            not_taken,
        });
        self.current = Some(not_taken);
    }

    /// Seal the fragment: the current block falls through to a fresh exit block, out-of-line
    /// blocks are laid out after the inline ones, and the graph and operand contract are checked.
    pub fn finish(mut self) -> Fragment {
        let exit = self.new_block(BlockKind::Inline, "exit");
        if self.current.is_some() {
            self.terminate(Terminator::Jump(exit));
        }
        self.blocks[exit.0 as usize].terminator = Some(Terminator::Exit);

        let name = self.name;
        let blocks: Vec<Block> = self
            .blocks
            .into_iter()
            .enumerate()
            .map(|(i, b)| Block {
                id: BlockId(i as u32),
                kind: b.kind,
                label: b.label,
                insts: b.insts,
                terminator: b.terminator.unwrap_or_else(|| {
                    panic!("{}: block b{} ({}) is not terminated", name, i, b.label)
                }),
            })
            .collect();

        let fragment = Fragment::new(name, blocks, BlockId(0), exit, self.contract);
        trace!("Synthesized fragment:\n{}", fragment);
        fragment
    }
}

fn check_runtime_call(entry: RuntimeEntry, args: &[Location], result: &Option<VReg>) {
    let signature = entry.signature();
    assert_eq!(
        args.len(),
        signature.args,
        "Runtime call to {} with {} arguments, expected {}",
        entry,
        args.len(),
        signature.args
    );
    assert_eq!(
        result.is_some(),
        signature.has_result,
        "Runtime call to {}: result register given: {}, entry returns a value: {}",
        entry,
        result.is_some(),
        signature.has_result
    );
}
