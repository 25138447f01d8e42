//! Basic blocks and their profile-related state.

use cranelift_entity::{entity_impl, packed_option::PackedOption};
use smallvec::SmallVec;

use crate::Edge;

/// Execution weight of a block or edge, an approximate execution
/// frequency per profiling window.
pub type Weight = f64;

/// Largest representable weight. Stands in for "unknown/unbounded" in
/// edge ranges and must never survive into a solved profile.
pub const MAX_WEIGHT: Weight = f64::MAX;

/// Default weight of a freshly created block.
pub const UNITY_WEIGHT: Weight = 100.0;

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// How control leaves a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JumpKind {
    /// Falls through to the next block in layout order.
    None,
    /// Unconditional jump to `jump_dest`.
    Always,
    /// Conditional: falls through to the next block or jumps to `jump_dest`.
    Cond,
    /// Multi-way jump to each block in `switch_dests`.
    Switch,
    CallFinally,
    EhCatchRet,
    EhFinallyRet,
    EhFilterRet,
    Return,
    Throw,
}

impl JumpKind {
    /// Kinds with exactly one successor, which therefore carries the
    /// whole block weight.
    pub fn is_unconditional(self) -> bool {
        matches!(
            self,
            JumpKind::Always | JumpKind::EhCatchRet | JumpKind::None | JumpKind::CallFinally
        )
    }

    /// Kinds that split flow across several successors.
    pub fn is_multi_way(self) -> bool {
        matches!(
            self,
            JumpKind::Cond | JumpKind::Switch | JumpKind::EhFinallyRet | JumpKind::EhFilterRet
        )
    }

    /// Kinds that leave the method.
    pub fn is_exit(self) -> bool {
        matches!(self, JumpKind::Return | JumpKind::Throw)
    }
}

/// Block flag bit set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockFlags(u16);

impl BlockFlags {
    /// The weight was sourced from profile data, propagated from a
    /// profiled neighbor, or assigned from the method call count.
    pub const HAS_PROFILE_WEIGHT: Self = Self(1 << 0);
    /// Weight is zero. Kept in sync with the weight on every write.
    pub const RUN_RARELY: Self = Self(1 << 1);
    /// Block was materialized from bytecode by the importer.
    pub const IMPORTED: Self = Self(1 << 2);
    /// Compiler-synthesized block with no bytecode of its own.
    pub const INTERNAL: Self = Self(1 << 3);
    /// Block contains one or more virtual-call class-profile candidates.
    pub const HAS_CLASS_PROFILE: Self = Self(1 << 4);
    /// Control enters this block across an EH boundary.
    pub const EH_BOUNDARY_IN: Self = Self(1 << 5);
    /// Control leaves this block across an EH boundary.
    pub const EH_BOUNDARY_OUT: Self = Self(1 << 6);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl std::ops::BitOr for BlockFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[derive(Debug, Clone)]
pub struct BlockData {
    pub(crate) weight: Weight,
    pub flags: BlockFlags,
    pub jump_kind: JumpKind,
    pub jump_dest: PackedOption<Block>,
    /// Targets of `Switch`, `EhFinallyRet` and `EhFilterRet` blocks.
    pub switch_dests: SmallVec<[Block; 4]>,
    /// Bytecode offset of the block's first instruction.
    pub code_offset: u32,
    /// In-edges, one per (pred, this) flow occurrence, in layout order
    /// of the predecessors.
    pub preds: SmallVec<[Edge; 4]>,
}

impl Default for BlockData {
    fn default() -> Self {
        Self {
            weight: UNITY_WEIGHT,
            flags: BlockFlags::default(),
            jump_kind: JumpKind::None,
            jump_dest: None.into(),
            switch_dests: SmallVec::new(),
            code_offset: 0,
            preds: SmallVec::new(),
        }
    }
}

impl BlockData {
    pub fn weight(&self) -> Weight {
        self.weight
    }

    pub fn has_profile_weight(&self) -> bool {
        self.flags.contains(BlockFlags::HAS_PROFILE_WEIGHT)
    }

    pub fn is_imported(&self) -> bool {
        self.flags.contains(BlockFlags::IMPORTED)
    }

    pub fn is_internal(&self) -> bool {
        self.flags.contains(BlockFlags::INTERNAL)
    }

    pub fn has_class_profile(&self) -> bool {
        self.flags.contains(BlockFlags::HAS_CLASS_PROFILE)
    }

    pub fn runs_rarely(&self) -> bool {
        self.flags.contains(BlockFlags::RUN_RARELY)
    }

    /// Assign a profile-derived weight. The single choke point that
    /// keeps `RUN_RARELY` equivalent to a zero weight.
    pub fn set_profile_weight(&mut self, weight: Weight) {
        debug_assert!(weight >= 0.0);

        self.weight = weight;
        self.flags.insert(BlockFlags::HAS_PROFILE_WEIGHT);
        if weight == 0.0 {
            self.flags.insert(BlockFlags::RUN_RARELY);
        } else {
            self.flags.remove(BlockFlags::RUN_RARELY);
        }
    }

    pub fn in_edge_count(&self) -> usize {
        self.preds.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_bit_ops() {
        let mut flags = BlockFlags::IMPORTED | BlockFlags::INTERNAL;
        assert!(flags.contains(BlockFlags::IMPORTED));
        assert!(!flags.contains(BlockFlags::HAS_PROFILE_WEIGHT));

        flags.remove(BlockFlags::INTERNAL);
        assert!(!flags.contains(BlockFlags::INTERNAL));
        assert!(flags.contains(BlockFlags::IMPORTED));
    }

    #[test]
    fn profile_weight_tracks_run_rarely() {
        let mut block = BlockData::default();
        assert!(!block.has_profile_weight());
        assert!(!block.runs_rarely());

        block.set_profile_weight(0.0);
        assert!(block.has_profile_weight());
        assert!(block.runs_rarely());

        block.set_profile_weight(42.0);
        assert!(!block.runs_rarely());
        assert_eq!(block.weight(), 42.0);
    }
}
