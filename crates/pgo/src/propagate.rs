//! Block-weight reconstruction.
//!
//! Measured counters only cover imported non-internal blocks; everything
//! else gets a weight inferred from its neighbors, and the method call
//! count is derived from the completed weights.

use cranelift_entity::SecondaryMap;
use tracing::debug;

use tempo_ir::{Block, Function, JumpKind, Weight, UNITY_WEIGHT};

use crate::{ctx::CompileContext, error::Result, solve::compute_edge_weights};

/// Upper bound on propagation sweeps. Downstream passes that remove
/// conditional branches can leave flow shapes where the local rules
/// oscillate instead of converging.
pub const MAX_PROPAGATION_PASSES: usize = 10;

/// Determine weights for blocks and, when profile data is in use, the
/// method call count and per-edge weight ranges.
pub fn compute_block_and_edge_weights(
    func: &mut Function,
    ctx: &mut CompileContext,
) -> Result<()> {
    debug!("computing block and edge weights");

    ctx.have_valid_edge_weights = false;
    ctx.called_count = UNITY_WEIGHT;

    let return_weight = compute_missing_block_weights(func);

    if ctx.using_profile_weights() {
        compute_called_count(func, ctx, return_weight);
    } else {
        debug!("no profile data, using default called count");
    }

    compute_edge_weights(func, ctx)
}

/// Determine weights for blocks that were not profiled, using two local
/// rules: a block inherits the weight of a sole predecessor that flows
/// only into it, or of a sole successor that is only reached from it.
///
/// Returns the sum of weights of all profiled return and throw blocks,
/// needed by the call-count computation when the entry has back-edges.
pub fn compute_missing_block_weights(func: &mut Function) -> Weight {
    let blocks: Vec<Block> = func.layout.iter_block().collect();

    // Blocks eligible for inference. Assignment marks a block as carrying
    // a profile weight, so eligibility is fixed up front; assigned blocks
    // stay revisable until the sweeps settle.
    let mut eligible: SecondaryMap<Block, bool> = SecondaryMap::default();
    for &block in &blocks {
        eligible[block] = !func.blocks[block].has_profile_weight();
    }

    let mut return_weight;
    let mut iterations = 0;

    loop {
        let mut changed = false;
        return_weight = 0.0;
        iterations += 1;

        for &block in &blocks {
            if eligible[block] && func.blocks[block].in_edge_count() > 0 {
                let mut new_weight: Option<Weight> = None;

                // Sole predecessor that flows only into this block.
                if func.blocks[block].in_edge_count() == 1 {
                    let pred = func.edges[func.blocks[block].preds[0]].src();
                    if sole_successor(func, pred) == Some(block)
                        && func.blocks[pred].has_profile_weight()
                    {
                        new_weight = Some(func.blocks[pred].weight());
                    }
                }

                // Sole successor whose only in-edge is from this block.
                if let Some(next) = sole_successor(func, block) {
                    if func.blocks[next].in_edge_count() == 1 {
                        debug_assert_eq!(
                            func.edges[func.blocks[next].preds[0]].src(),
                            block
                        );
                        if func.blocks[next].has_profile_weight() {
                            new_weight = Some(func.blocks[next].weight());
                        }
                    }
                }

                if let Some(new_weight) = new_weight {
                    if func.blocks[block].weight() != new_weight {
                        changed = true;
                    }
                    func.blocks[block].set_profile_weight(new_weight);
                }
            }

            let data = &func.blocks[block];
            if data.has_profile_weight() && data.jump_kind.is_exit() {
                return_weight += data.weight();
            }
        }

        if !changed || iterations >= MAX_PROPAGATION_PASSES {
            break;
        }
    }

    debug!(return_weight, iterations, "missing block weights computed");
    return_weight
}

/// The single block that `block` flows into, when its exit is
/// unconditional.
fn sole_successor(func: &Function, block: Block) -> Option<Block> {
    match func.blocks[block].jump_kind {
        JumpKind::None => func.layout.next_block_of(block),
        JumpKind::Always => func.blocks[block].jump_dest.expand(),
        _ => None,
    }
}

/// Compute the method call count from the completed block weights.
///
/// With a back-edge into the entry (tail-recursive shapes) the entry
/// weight overcounts, so the sum of exit weights is the better estimate;
/// a method that never returns leaves only the entry weight to go by.
pub fn compute_called_count(func: &mut Function, ctx: &mut CompileContext, return_weight: Weight) {
    debug_assert!(ctx.using_profile_weights());

    // Skip past any internal blocks added before the first bytecode
    // block. That block is expected to carry a profile-derived weight.
    let first = func.first_il_block().expect("no bytecode blocks");
    debug_assert!(func.blocks[first].has_profile_weight());

    if func.blocks[first].in_edge_count() == 1 || return_weight == 0.0 {
        ctx.called_count = func.blocks[first].weight();
    } else {
        ctx.called_count = return_weight;
    }

    // A scratch entry block stands in for the method entry and gets the
    // call count as its weight.
    if func.has_entry_scratch() {
        let entry = func.entry_block().expect("scratch entry without blocks");
        func.blocks[entry].set_profile_weight(ctx.called_count);
    }

    debug!(called_count = ctx.called_count, "using profile call count");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ctx::PgoConfig;
    use tempo_ir::builder::test_util::*;

    #[test]
    fn propagates_through_unprofiled_block() {
        // b0 (profiled 100) -> b1 (unprofiled) -> b2 (profiled 100).
        let (mut func, [_, b1, _]) = linear3(&[Some(100.0), None, Some(100.0)]);

        let return_weight = compute_missing_block_weights(&mut func);

        assert!(func.blocks[b1].has_profile_weight());
        assert_eq!(func.blocks[b1].weight(), 100.0);
        assert!(!func.blocks[b1].runs_rarely());
        assert_eq!(return_weight, 100.0);
    }

    #[test]
    fn propagated_zero_weight_marks_run_rarely() {
        let (mut func, [_, b1, _]) = linear3(&[Some(0.0), None, Some(0.0)]);

        compute_missing_block_weights(&mut func);

        assert!(func.blocks[b1].has_profile_weight());
        assert!(func.blocks[b1].runs_rarely());
    }

    #[test]
    fn no_rule_applies_across_a_join() {
        // Diamond: the join block has two in-edges and its successors
        // are shared, so neither rule can fire on an unprofiled arm.
        let mut builder = test_func_builder();
        let b0 = builder.append_block_at(0);
        let b1 = builder.append_block_at(4);
        let b2 = builder.append_block_at(8);
        let b3 = builder.append_block_at(12);
        for b in [b0, b1, b2, b3] {
            builder.imported(b);
        }
        builder.profile_weight(b0, 100.0);
        builder.profile_weight(b3, 100.0);
        builder.branches(b0, b2);
        builder.jumps_to(b1, b3);
        builder.falls_through(b2);
        builder.returns(b3);
        let mut func = builder.finish();

        compute_missing_block_weights(&mut func);

        assert!(!func.blocks[b1].has_profile_weight());
        assert!(!func.blocks[b2].has_profile_weight());
    }

    #[test]
    fn called_count_from_single_entry() {
        let (mut func, _) = linear3(&[Some(100.0), None, Some(100.0)]);
        let mut ctx = CompileContext::new(0, PgoConfig::default());
        ctx.have_profile_weights = true;

        let return_weight = compute_missing_block_weights(&mut func);
        compute_called_count(&mut func, &mut ctx, return_weight);

        assert_eq!(ctx.called_count, 100.0);
    }

    #[test]
    fn called_count_from_returns_with_entry_back_edges() {
        // Two back-edges into the entry inflate its weight; the exit sum
        // is the better call-count estimate.
        let mut builder = test_func_builder();
        let b0 = builder.append_block_at(0);
        let b1 = builder.append_block_at(4);
        let b2 = builder.append_block_at(8);
        let b3 = builder.append_block_at(12);
        for b in [b0, b1, b2, b3] {
            builder.imported(b);
        }
        builder.profile_weight(b0, 300.0);
        builder.profile_weight(b1, 300.0);
        builder.profile_weight(b2, 200.0);
        builder.profile_weight(b3, 100.0);
        builder.falls_through(b0);
        builder.branches(b1, b0);
        builder.branches(b2, b0);
        builder.returns(b3);
        let mut func = builder.finish();

        let mut ctx = CompileContext::new(0, PgoConfig::default());
        ctx.have_profile_weights = true;

        let return_weight = compute_missing_block_weights(&mut func);
        assert_eq!(return_weight, 100.0);

        compute_called_count(&mut func, &mut ctx, return_weight);
        assert_eq!(ctx.called_count, 100.0);
    }

    #[test]
    fn called_count_when_method_never_returns() {
        let mut builder = test_func_builder();
        let b0 = builder.append_block_at(0);
        let b1 = builder.append_block_at(4);
        for b in [b0, b1] {
            builder.imported(b);
        }
        builder.profile_weight(b0, 40.0);
        builder.profile_weight(b1, 0.0);
        builder.falls_through(b0);
        builder.throws(b1);
        let mut func = builder.finish();

        let mut ctx = CompileContext::new(0, PgoConfig::default());
        ctx.have_profile_weights = true;

        let return_weight = compute_missing_block_weights(&mut func);
        assert_eq!(return_weight, 0.0);

        compute_called_count(&mut func, &mut ctx, return_weight);
        assert_eq!(ctx.called_count, 40.0);
    }

    #[test]
    fn scratch_entry_receives_called_count() {
        let (mut func, _) = linear3(&[Some(75.0), Some(75.0), Some(75.0)]);
        func.ensure_entry_scratch();
        func.rebuild_preds();

        let mut ctx = CompileContext::new(0, PgoConfig::default());
        ctx.have_profile_weights = true;

        let return_weight = compute_missing_block_weights(&mut func);
        compute_called_count(&mut func, &mut ctx, return_weight);

        let entry = func.entry_block().unwrap();
        assert!(func.blocks[entry].has_profile_weight());
        assert_eq!(func.blocks[entry].weight(), 75.0);
    }
}
