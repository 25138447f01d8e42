use cranelift_entity::PrimaryMap;
use smallvec::SmallVec;

use crate::{
    Block, BlockData, BlockFlags, Edge, EdgeData, Expr, ExprData, JumpKind, Layout, Local,
    LocalData, Stmt, StmtData,
};

/// A method under compilation: blocks, flow edges, statements and
/// expressions in entity arenas, plus the linear block layout.
pub struct Function {
    #[doc(hidden)]
    pub blocks: PrimaryMap<Block, BlockData>,
    #[doc(hidden)]
    pub edges: PrimaryMap<Edge, EdgeData>,
    #[doc(hidden)]
    pub stmts: PrimaryMap<Stmt, StmtData>,
    #[doc(hidden)]
    pub exprs: PrimaryMap<Expr, ExprData>,
    #[doc(hidden)]
    pub locals: PrimaryMap<Local, LocalData>,
    pub layout: Layout,
    entry_is_scratch: bool,
}

impl Default for Function {
    fn default() -> Self {
        Self::new()
    }
}

impl Function {
    pub fn new() -> Self {
        Self {
            blocks: PrimaryMap::default(),
            edges: PrimaryMap::default(),
            stmts: PrimaryMap::default(),
            exprs: PrimaryMap::default(),
            locals: PrimaryMap::default(),
            layout: Layout::new(),
            entry_is_scratch: false,
        }
    }

    pub fn make_block(&mut self, data: BlockData) -> Block {
        self.blocks.push(data)
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.layout.entry_block()
    }

    /// The first block carrying bytecode, skipping any internal blocks
    /// inserted ahead of it.
    pub fn first_il_block(&self) -> Option<Block> {
        self.layout
            .iter_block()
            .find(|&block| !self.blocks[block].is_internal())
    }

    /// Successor blocks of `block`, one entry per flow occurrence. A
    /// conditional whose taken and not-taken targets coincide yields the
    /// same block twice.
    pub fn succs(&self, block: Block) -> SmallVec<[Block; 2]> {
        let data = &self.blocks[block];
        let mut succs = SmallVec::new();

        match data.jump_kind {
            JumpKind::None => {
                if let Some(next) = self.layout.next_block_of(block) {
                    succs.push(next);
                }
            }
            JumpKind::Always | JumpKind::CallFinally | JumpKind::EhCatchRet => {
                succs.push(data.jump_dest.expand().expect("jump without dest"));
            }
            JumpKind::Cond => {
                if let Some(next) = self.layout.next_block_of(block) {
                    succs.push(next);
                }
                succs.push(data.jump_dest.expand().expect("branch without dest"));
            }
            JumpKind::Switch | JumpKind::EhFinallyRet | JumpKind::EhFilterRet => {
                succs.extend(data.switch_dests.iter().copied());
            }
            JumpKind::Return | JumpKind::Throw => {}
        }

        succs
    }

    /// Rebuild the edge arena and per-block predecessor lists from jump
    /// kinds, walking blocks in layout order. Existing edge ranges are
    /// discarded.
    pub fn rebuild_preds(&mut self) {
        self.edges = PrimaryMap::default();
        let blocks: Vec<Block> = self.layout.iter_block().collect();
        for &block in &blocks {
            self.blocks[block].preds.clear();
        }

        for &src in &blocks {
            for dst in self.succs(src) {
                let edge = self.edges.push(EdgeData::new(src, dst));
                self.blocks[dst].preds.push(edge);
            }
        }
    }

    /// Find the in-edge of `dst` whose source is `src`, skipping
    /// `exclude` so a conditional's two parallel edges can find each
    /// other.
    pub fn find_pred_edge(&self, dst: Block, src: Block, exclude: Option<Edge>) -> Option<Edge> {
        self.blocks[dst]
            .preds
            .iter()
            .copied()
            .find(|&e| self.edges[e].src() == src && Some(e) != exclude)
    }

    /// True when the entry block is a compiler-inserted scratch block
    /// rather than the method's first bytecode block.
    pub fn has_entry_scratch(&self) -> bool {
        self.entry_is_scratch
    }

    /// Make sure the entry block is a scratch block that statements can
    /// be appended to without disturbing bytecode-derived blocks. The
    /// scratch block falls through to the old entry.
    pub fn ensure_entry_scratch(&mut self) -> Block {
        if self.entry_is_scratch {
            return self.entry_block().expect("scratch entry without blocks");
        }

        let old_entry = self.entry_block().expect("empty layout");
        let scratch = self.make_block(BlockData {
            flags: BlockFlags::INTERNAL | BlockFlags::IMPORTED,
            jump_kind: JumpKind::None,
            code_offset: self.blocks[old_entry].code_offset,
            ..BlockData::default()
        });

        self.layout.insert_block_before(scratch, old_entry);
        self.entry_is_scratch = true;
        scratch
    }
}
