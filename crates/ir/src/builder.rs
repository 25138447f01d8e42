//! Convenience builder for assembling flow graphs block by block.

use crate::{Block, BlockData, BlockFlags, Function, JumpKind, Weight};

pub struct FunctionBuilder {
    func: Function,
}

impl Default for FunctionBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl FunctionBuilder {
    pub fn new() -> Self {
        Self {
            func: Function::new(),
        }
    }

    /// Append a block at the given bytecode offset.
    pub fn append_block_at(&mut self, code_offset: u32) -> Block {
        let block = self.func.make_block(BlockData {
            code_offset,
            ..BlockData::default()
        });
        self.func.layout.append_block(block);
        block
    }

    pub fn imported(&mut self, block: Block) {
        self.func.blocks[block].flags.insert(BlockFlags::IMPORTED);
    }

    pub fn internal(&mut self, block: Block) {
        self.func.blocks[block].flags.insert(BlockFlags::INTERNAL);
    }

    pub fn class_profile(&mut self, block: Block) {
        self.func.blocks[block]
            .flags
            .insert(BlockFlags::HAS_CLASS_PROFILE);
    }

    pub fn profile_weight(&mut self, block: Block, weight: Weight) {
        self.func.blocks[block].set_profile_weight(weight);
    }

    pub fn falls_through(&mut self, block: Block) {
        self.func.blocks[block].jump_kind = JumpKind::None;
    }

    pub fn jumps_to(&mut self, block: Block, dest: Block) {
        let data = &mut self.func.blocks[block];
        data.jump_kind = JumpKind::Always;
        data.jump_dest = dest.into();
    }

    pub fn branches(&mut self, block: Block, taken: Block) {
        let data = &mut self.func.blocks[block];
        data.jump_kind = JumpKind::Cond;
        data.jump_dest = taken.into();
    }

    pub fn switches(&mut self, block: Block, dests: &[Block]) {
        let data = &mut self.func.blocks[block];
        data.jump_kind = JumpKind::Switch;
        data.switch_dests = dests.iter().copied().collect();
    }

    pub fn returns(&mut self, block: Block) {
        self.func.blocks[block].jump_kind = JumpKind::Return;
    }

    pub fn throws(&mut self, block: Block) {
        self.func.blocks[block].jump_kind = JumpKind::Throw;
    }

    pub fn func_mut(&mut self) -> &mut Function {
        &mut self.func
    }

    /// Derive predecessor edges and hand back the finished function.
    pub fn finish(mut self) -> Function {
        self.func.rebuild_preds();
        self.func
    }
}

pub mod test_util {
    use super::*;
    use crate::{CallData, ClassProbe, Expr, ExprData};

    pub fn test_func_builder() -> FunctionBuilder {
        FunctionBuilder::new()
    }

    pub fn probe(index: u32, il_offset: u32) -> ClassProbe {
        ClassProbe {
            probe_index: index,
            il_offset,
            stub_addr: 0x5a00 + index as usize * 0x10,
        }
    }

    /// Append a statement holding a virtual call carrying class-probe
    /// candidate info, the shape the importer leaves behind.
    pub fn new_virtual_call_stmt(
        func: &mut Function,
        block: Block,
        probe: ClassProbe,
        is_virtual_stub: bool,
    ) -> Expr {
        let this = func.new_ref_temp();
        let receiver = func.new_local_ref(this);
        let call = func.make_expr(ExprData::Call(CallData {
            receiver,
            is_virtual: true,
            is_indirect: false,
            is_virtual_stub,
            stub_addr: None,
            probe: Some(probe),
        }));
        func.new_stmt_at_end(block, call);
        call
    }

    /// Three imported blocks at offsets 0, 5, 10 falling through to a
    /// return, with optional profile weights.
    pub fn linear3(weights: &[Option<Weight>; 3]) -> (Function, [Block; 3]) {
        let mut builder = test_func_builder();
        let b0 = builder.append_block_at(0);
        let b1 = builder.append_block_at(5);
        let b2 = builder.append_block_at(10);

        for (&block, &weight) in [b0, b1, b2].iter().zip(weights) {
            builder.imported(block);
            if let Some(weight) = weight {
                builder.profile_weight(block, weight);
            }
        }

        builder.falls_through(b0);
        builder.falls_through(b1);
        builder.returns(b2);

        (builder.finish(), [b0, b1, b2])
    }

    /// Diamond: `b0` branches to `b1` (fall through) or `b2` (taken),
    /// both rejoin at `b3`, which returns. All blocks imported and
    /// profiled with the given weights.
    pub fn diamond(w0: Weight, w1: Weight, w2: Weight, w3: Weight) -> (Function, [Block; 4]) {
        let mut builder = test_func_builder();
        let b0 = builder.append_block_at(0);
        let b1 = builder.append_block_at(4);
        let b2 = builder.append_block_at(8);
        let b3 = builder.append_block_at(12);

        for (&block, weight) in [b0, b1, b2, b3].iter().zip([w0, w1, w2, w3]) {
            builder.imported(block);
            builder.profile_weight(block, weight);
        }

        builder.branches(b0, b2);
        builder.jumps_to(b1, b3);
        builder.falls_through(b2);
        builder.returns(b3);

        (builder.finish(), [b0, b1, b2, b3])
    }
}
