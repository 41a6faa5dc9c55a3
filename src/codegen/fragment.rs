use std::collections::HashSet;
use std::fmt;

use super::contract::OperandContract;
use super::ir::*;
use super::runtime::RuntimeEntry;

/// A synthesized barrier: a basic-block graph with one entry and one exit, and the operand
/// contract the host register allocator has to honor.
///
/// Out-of-line blocks are laid out after all inline blocks. The inline path from entry to exit is
/// the fast path; an out-of-line region is entered from inline code through a single branch and
/// returns by jumping to an inline join block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    name: String,
    blocks: Vec<Block>,
    entry: BlockId,
    exit: BlockId,
    contract: OperandContract,
}

impl Fragment {
    /// Create a fragment and check its structure. Panics if the block graph or the operand
    /// contract is malformed.
    pub fn new(
        name: String,
        blocks: Vec<Block>,
        entry: BlockId,
        exit: BlockId,
        contract: OperandContract,
    ) -> Fragment {
        let fragment = Fragment {
            name,
            blocks,
            entry,
            exit,
            contract,
        };
        fragment.check_graph();
        fragment.contract.validate();
        fragment.contract.check_blocks(&fragment.blocks);
        fragment
    }

    fn check_graph(&self) {
        let name = &self.name;
        for (i, block) in self.blocks.iter().enumerate() {
            assert_eq!(block.id, BlockId(i as u32), "{}: block ids out of order", name);
            for succ in block.terminator.successors() {
                assert!(
                    (succ.0 as usize) < self.blocks.len(),
                    "{}: {} jumps to unknown block {}",
                    name,
                    block.id,
                    succ
                );
            }
            let exits = matches!(block.terminator, Terminator::Exit);
            assert_eq!(
                exits,
                block.id == self.exit,
                "{}: {} must be the only exit block",
                name,
                self.exit
            );
        }
        assert_eq!(
            self.block(self.exit).kind,
            BlockKind::Inline,
            "{}: the exit block must be inline",
            name
        );

        // Every block is reachable from the entry.
        let mut reached = HashSet::new();
        let mut worklist = vec![self.entry];
        while let Some(id) = worklist.pop() {
            if reached.insert(id) {
                worklist.extend(self.block(id).terminator.successors());
            }
        }
        for block in &self.blocks {
            assert!(
                reached.contains(&block.id),
                "{}: {} ({}) is unreachable",
                name,
                block.id,
                block.label
            );
        }

        // Out-of-line blocks entered from inline code are entered through exactly one edge.
        for block in self.out_of_line_blocks() {
            let inline_edges = self
                .inline_blocks()
                .flat_map(|b| b.terminator.successors())
                .filter(|succ| *succ == block.id)
                .count();
            assert!(
                inline_edges <= 1,
                "{}: out-of-line {} ({}) is entered by {} inline branches",
                name,
                block.id,
                block.label,
                inline_edges
            );
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn block(&self, id: BlockId) -> &Block {
        &self.blocks[id.0 as usize]
    }

    pub fn entry(&self) -> BlockId {
        self.entry
    }

    pub fn exit(&self) -> BlockId {
        self.exit
    }

    pub fn contract(&self) -> &OperandContract {
        &self.contract
    }

    pub fn inline_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::Inline)
    }

    pub fn out_of_line_blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter().filter(|b| b.kind == BlockKind::OutOfLine)
    }

    /// Blocks in layout order: inline blocks first, then out-of-line blocks.
    pub fn layout(&self) -> impl Iterator<Item = &Block> {
        self.inline_blocks().chain(self.out_of_line_blocks())
    }

    pub fn instructions(&self) -> impl Iterator<Item = &Inst> {
        self.blocks.iter().flat_map(|b| b.insts.iter())
    }

    /// Runtime entries this fragment may call.
    pub fn runtime_calls(&self) -> Vec<RuntimeEntry> {
        self.instructions()
            .filter_map(|inst| match inst {
                Inst::CallRuntime { entry, .. } => Some(*entry),
                _ => None,
            })
            .collect()
    }

    /// The number of atomic instructions in the fragment.
    pub fn atomic_count(&self) -> usize {
        self.instructions().filter(|inst| inst.is_atomic()).count()
    }

    /// Whether the inline blocks alone contain a runtime call.
    pub fn calls_runtime_inline(&self) -> bool {
        self.inline_blocks()
            .flat_map(|b| b.insts.iter())
            .any(|inst| matches!(inst, Inst::CallRuntime { .. }))
    }
}

impl fmt::Display for Fragment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        writeln!(f, "fragment {}", self.name)?;
        let list = |f: &mut fmt::Formatter, role: &str, locs: Vec<String>| -> fmt::Result {
            if !locs.is_empty() {
                writeln!(f, "  {}: {}", role, locs.join(", "))?;
            }
            Ok(())
        };
        list(f, "alive", self.contract.alive.iter().map(|l| l.to_string()).collect())?;
        list(f, "def", self.contract.defs.iter().map(|r| r.to_string()).collect())?;
        list(f, "inout", self.contract.inout.iter().map(|r| r.to_string()).collect())?;
        list(f, "temp", self.contract.temps.iter().map(|r| r.to_string()).collect())?;
        for block in self.layout() {
            write!(f, "{}", block)?;
        }
        Ok(())
    }
}
