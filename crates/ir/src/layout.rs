//! This module contains function layout information including block order
//! and statement order.
use cranelift_entity::SecondaryMap;

use crate::{Block, Stmt};

#[derive(Debug, Clone, Default)]
pub struct Layout {
    blocks: SecondaryMap<Block, BlockNode>,
    stmts: SecondaryMap<Stmt, StmtNode>,
    entry_block: Option<Block>,
    last_block: Option<Block>,
}

impl Layout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_block(&self) -> Option<Block> {
        self.entry_block
    }

    pub fn last_block(&self) -> Option<Block> {
        self.last_block
    }

    pub fn prev_block_of(&self, block: Block) -> Option<Block> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].prev
    }

    pub fn next_block_of(&self, block: Block) -> Option<Block> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].next
    }

    pub fn is_block_inserted(&self, block: Block) -> bool {
        Some(block) == self.entry_block || self.blocks[block] != BlockNode::default()
    }

    pub fn iter_block(&self) -> impl Iterator<Item = Block> + '_ {
        BlockIter {
            next: self.entry_block,
            blocks: &self.blocks,
        }
    }

    pub fn append_block(&mut self, block: Block) {
        debug_assert!(!self.is_block_inserted(block));

        let mut block_node = BlockNode::default();

        if let Some(last_block) = self.last_block {
            let last_block_node = &mut self.blocks[last_block];
            last_block_node.next = Some(block);
            block_node.prev = Some(last_block);
        } else {
            self.entry_block = Some(block);
        }

        self.blocks[block] = block_node;
        self.last_block = Some(block);
    }

    pub fn insert_block_before(&mut self, block: Block, before: Block) {
        debug_assert!(self.is_block_inserted(before));
        debug_assert!(!self.is_block_inserted(block));

        let mut block_node = BlockNode::default();

        match self.blocks[before].prev {
            Some(prev) => {
                block_node.prev = Some(prev);
                self.blocks[prev].next = Some(block);
            }
            None => self.entry_block = Some(block),
        }

        block_node.next = Some(before);
        self.blocks[before].prev = Some(block);
        self.blocks[block] = block_node;
    }

    pub fn first_stmt_of(&self, block: Block) -> Option<Stmt> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].first_stmt
    }

    pub fn last_stmt_of(&self, block: Block) -> Option<Stmt> {
        debug_assert!(self.is_block_inserted(block));
        self.blocks[block].last_stmt
    }

    pub fn stmt_block(&self, stmt: Stmt) -> Block {
        debug_assert!(self.is_stmt_inserted(stmt));
        self.stmts[stmt].block.unwrap()
    }

    pub fn is_stmt_inserted(&self, stmt: Stmt) -> bool {
        self.stmts[stmt] != StmtNode::default()
    }

    pub fn iter_stmt(&self, block: Block) -> impl Iterator<Item = Stmt> + '_ {
        debug_assert!(self.is_block_inserted(block));
        StmtIter {
            next: self.blocks[block].first_stmt,
            stmts: &self.stmts,
        }
    }

    pub fn prepend_stmt(&mut self, stmt: Stmt, block: Block) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_stmt_inserted(stmt));

        let mut stmt_node = StmtNode {
            block: Some(block),
            ..StmtNode::default()
        };

        match self.blocks[block].first_stmt {
            Some(first) => {
                stmt_node.next = Some(first);
                self.stmts[first].prev = Some(stmt);
            }
            None => self.blocks[block].last_stmt = Some(stmt),
        }

        self.blocks[block].first_stmt = Some(stmt);
        self.stmts[stmt] = stmt_node;
    }

    pub fn append_stmt(&mut self, stmt: Stmt, block: Block) {
        debug_assert!(self.is_block_inserted(block));
        debug_assert!(!self.is_stmt_inserted(stmt));

        let mut stmt_node = StmtNode {
            block: Some(block),
            ..StmtNode::default()
        };

        match self.blocks[block].last_stmt {
            Some(last) => {
                stmt_node.prev = Some(last);
                self.stmts[last].next = Some(stmt);
            }
            None => self.blocks[block].first_stmt = Some(stmt),
        }

        self.blocks[block].last_stmt = Some(stmt);
        self.stmts[stmt] = stmt_node;
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct BlockNode {
    prev: Option<Block>,
    next: Option<Block>,
    first_stmt: Option<Stmt>,
    last_stmt: Option<Stmt>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct StmtNode {
    prev: Option<Stmt>,
    next: Option<Stmt>,
    block: Option<Block>,
}

struct BlockIter<'a> {
    next: Option<Block>,
    blocks: &'a SecondaryMap<Block, BlockNode>,
}

impl Iterator for BlockIter<'_> {
    type Item = Block;

    fn next(&mut self) -> Option<Block> {
        let block = self.next?;
        self.next = self.blocks[block].next;
        Some(block)
    }
}

struct StmtIter<'a> {
    next: Option<Stmt>,
    stmts: &'a SecondaryMap<Stmt, StmtNode>,
}

impl Iterator for StmtIter<'_> {
    type Item = Stmt;

    fn next(&mut self) -> Option<Stmt> {
        let stmt = self.next?;
        self.next = self.stmts[stmt].next;
        Some(stmt)
    }
}
