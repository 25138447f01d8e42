//! Edge-weight ranges from block weights and flow-graph shape.
//!
//! Block counters say how often a block ran, not which way it left. The
//! solver brackets each edge in a `[min, max]` range, then iteratively
//! tightens the ranges against two constraints: a conditional's two
//! out-edges must sum to its block weight, and a block's in-edges must
//! sum to its weight. Measured counts carry small skew, so every
//! tightening allows a weight-proportional slop; profiles that cannot be
//! reconciled within slop are declared inconsistent and downstream
//! passes fall back to heuristics.

use tracing::{debug, warn};

use tempo_ir::{Block, Edge, Function, JumpKind, Weight, MAX_WEIGHT};

use crate::{
    ctx::CompileContext,
    error::{FlowError, Result},
};

/// Upper bound on refinement passes. The constraint system is not
/// guaranteed consistent, so the solver settles for the fixed point it
/// can reach while the solved-edge count keeps growing.
pub const MAX_SOLVER_PASSES: usize = 8;

struct Inconsistent;

/// Permitted absolute error when tightening the range of `edge`,
/// proportional to the heavier endpoint.
fn slop_for(func: &Function, edge: Edge) -> Weight {
    let src = func.edges[edge].src();
    let dst = func.edges[edge].dst();
    let heavier = func.blocks[src].weight().max(func.blocks[dst].weight());
    heavier / 100.0 + 1.0
}

/// Weight of `block` as seen by its in-edges: the entry block's weight
/// includes method invocations, which no edge accounts for.
fn in_flow_weight(func: &Function, ctx: &CompileContext, block: Block) -> Weight {
    let mut weight = func.blocks[block].weight();
    if Some(block) == func.entry_block() {
        weight -= ctx.called_count;
    }
    weight
}

/// Compute edge weight ranges for the whole method. Skipped unless the
/// compilation is optimizing with profile weights in hand.
pub fn compute_edge_weights(func: &mut Function, ctx: &mut CompileContext) -> Result<()> {
    if !ctx.opt_enabled || !ctx.using_profile_weights() {
        debug!("not optimizing or no profile data, not computing edge weights");
        return Ok(());
    }

    let blocks: Vec<Block> = func.layout.iter_block().collect();

    let mut inconsistent = false;
    let mut used_slop = false;
    let mut num_edges = 0u32;
    let mut iterations = 0;
    let mut good_edges = 0u32;

    match init_edge_ranges(func, ctx, &blocks, &mut used_slop)? {
        Ok(count) => num_edges = count,
        Err(Inconsistent) => inconsistent = true,
    }

    if !inconsistent {
        ctx.edge_count = num_edges;

        let mut good_previous = 0u32;
        loop {
            iterations += 1;

            match refine_pass(func, ctx, &blocks, &mut used_slop) {
                Ok(count) => good_edges = count,
                Err(Inconsistent) => {
                    inconsistent = true;
                    break;
                }
            }

            if good_edges == num_edges {
                // Every edge solved exactly.
                break;
            }

            if good_edges <= good_previous || iterations >= MAX_SOLVER_PASSES {
                break;
            }
            good_previous = good_edges;
        }
    }

    if inconsistent {
        warn!("inconsistent profile data, not using the edge weights");
    } else if good_edges == num_edges {
        debug!(num_edges, iterations, "exact weights for all edges");
    } else {
        debug!(good_edges, num_edges, iterations, "exact weights for some edges");
    }

    ctx.slop_used_in_edge_weights = used_slop;
    ctx.range_used_in_edge_weights = func
        .edges
        .values()
        .any(|e| e.min_weight() != e.max_weight());
    ctx.have_valid_edge_weights = !inconsistent;
    ctx.edge_weights_computed = true;

    Ok(())
}

/// Seed every edge range from its source's jump kind: an unconditional
/// edge carries exactly the source weight, a multi-way edge at most
/// that; either way no edge can carry more than its destination. Edges
/// touching an unprofiled block are reset to fully open first.
///
/// Returns the edge count, or `Inconsistent` when a seed cannot be
/// applied within slop.
fn init_edge_ranges(
    func: &mut Function,
    ctx: &CompileContext,
    blocks: &[Block],
    used_slop: &mut bool,
) -> Result<std::result::Result<u32, Inconsistent>> {
    let mut num_edges = 0u32;

    for &dst in blocks {
        let dst_weight = in_flow_weight(func, ctx, dst);

        for i in 0..func.blocks[dst].preds.len() {
            let edge = func.blocks[dst].preds[i];
            let src = func.edges[edge].src();
            num_edges += 1;

            if !func.blocks[src].has_profile_weight() || !func.blocks[dst].has_profile_weight()
            {
                func.edges[edge].set_weights(0.0, MAX_WEIGHT);
            }

            let slop = slop_for(func, edge);
            let src_weight = func.blocks[src].weight();
            let src_kind = func.blocks[src].jump_kind;

            let mut assign_ok = true;
            if src_kind.is_unconditional() {
                // The lone out-edge carries the whole block weight.
                assign_ok &= func.edges[edge].set_min_checked(src_weight, slop, used_slop);
                assign_ok &= func.edges[edge].set_max_checked(src_weight, slop, used_slop);
            } else if src_kind.is_multi_way() {
                // Only an upper bound: the edge cannot outweigh its source.
                if func.edges[edge].max_weight() > src_weight {
                    assign_ok &= func.edges[edge].set_max_checked(src_weight, slop, used_slop);
                }
            } else {
                // Return and throw blocks have no out-edges.
                return Err(FlowError::UnexpectedJumpKind {
                    block: src,
                    kind: src_kind,
                });
            }

            // Nor can the edge outweigh its destination.
            if func.edges[edge].max_weight() > dst_weight {
                assign_ok &= func.edges[edge].set_max_checked(dst_weight, slop, used_slop);
            }

            if !assign_ok {
                return Ok(Err(Inconsistent));
            }
        }
    }

    Ok(Ok(num_edges))
}

/// One refinement sweep: reconcile conditional out-edge pairs, then
/// balance each block's in-flow. Returns the number of edges whose range
/// has collapsed to a point.
fn refine_pass(
    func: &mut Function,
    ctx: &CompileContext,
    blocks: &[Block],
    used_slop: &mut bool,
) -> std::result::Result<u32, Inconsistent> {
    // A conditional's two out-edges must sum to its weight: raise one
    // edge's floor or lower the other's ceiling until they do.
    for &dst in blocks {
        for i in 0..func.blocks[dst].preds.len() {
            let edge = func.blocks[dst].preds[i];
            let src = func.edges[edge].src();

            if func.blocks[src].jump_kind != JumpKind::Cond {
                continue;
            }

            let taken = func.blocks[src].jump_dest.expand().expect("branch without dest");
            let other_dst = if func.layout.next_block_of(src) == Some(dst) {
                taken
            } else {
                func.layout.next_block_of(src).expect("branch without fall-through")
            };
            let other = func
                .find_pred_edge(other_dst, src, Some(edge))
                .expect("conditional with a single out-edge");

            debug_assert!(func.edges[edge].min_weight() <= func.edges[edge].max_weight());
            debug_assert!(func.edges[other].min_weight() <= func.edges[other].max_weight());

            let src_weight = func.blocks[src].weight();
            let slop = slop_for(func, edge);

            let mut assign_ok = true;

            let diff =
                src_weight - (func.edges[edge].min_weight() + func.edges[other].max_weight());
            if diff > 0.0 {
                let raised = func.edges[edge].min_weight() + diff;
                assign_ok &= func.edges[edge].set_min_checked(raised, slop, used_slop);
            } else if diff < 0.0 {
                let lowered = func.edges[other].max_weight() + diff;
                assign_ok &= func.edges[other].set_max_checked(lowered, slop, used_slop);
            }

            let diff =
                src_weight - (func.edges[other].min_weight() + func.edges[edge].max_weight());
            if diff > 0.0 {
                let raised = func.edges[other].min_weight() + diff;
                assign_ok &= func.edges[other].set_min_checked(raised, slop, used_slop);
            } else if diff < 0.0 {
                let lowered = func.edges[edge].max_weight() + diff;
                assign_ok &= func.edges[edge].set_max_checked(lowered, slop, used_slop);
            }

            if !assign_ok {
                return Err(Inconsistent);
            }

            // Both pairings now add up to the block weight, within slop.
            debug_assert!({
                let diff = src_weight
                    - (func.edges[edge].min_weight() + func.edges[other].max_weight());
                -slop <= diff && diff <= slop
            });
            debug_assert!({
                let diff = src_weight
                    - (func.edges[other].min_weight() + func.edges[edge].max_weight());
                -slop <= diff && diff <= slop
            });
        }
    }

    // Balance in-flow: each in-edge is bracketed by what the block
    // weight leaves over when every other in-edge runs at its extreme.
    let mut good_edges = 0u32;

    for &dst in blocks {
        if func.blocks[dst].weight() == MAX_WEIGHT {
            // Weights must be finite before solving.
            return Err(Inconsistent);
        }

        let dst_weight = in_flow_weight(func, ctx, dst);

        let mut min_sum = 0.0;
        let mut max_sum = 0.0;
        for &edge in &func.blocks[dst].preds {
            min_sum += func.edges[edge].min_weight();
            max_sum += func.edges[edge].max_weight();
        }

        for i in 0..func.blocks[dst].preds.len() {
            let edge = func.blocks[dst].preds[i];
            let slop = slop_for(func, edge);

            let mut assign_ok = true;

            // Lower bound: the rest of the in-flow at full tilt.
            debug_assert!(max_sum >= func.edges[edge].max_weight());
            let other_max = max_sum - func.edges[edge].max_weight();
            if dst_weight >= other_max {
                let min_calc = dst_weight - other_max;
                if min_calc > func.edges[edge].min_weight() {
                    assign_ok &= func.edges[edge].set_min_checked(min_calc, slop, used_slop);
                }
            }

            // Upper bound: the rest of the in-flow at a crawl.
            debug_assert!(min_sum >= func.edges[edge].min_weight());
            let other_min = min_sum - func.edges[edge].min_weight();
            if dst_weight >= other_min {
                let max_calc = dst_weight - other_min;
                if max_calc < func.edges[edge].max_weight() {
                    assign_ok &= func.edges[edge].set_max_checked(max_calc, slop, used_slop);
                }
            }

            if !assign_ok {
                return Err(Inconsistent);
            }

            if func.edges[edge].min_weight() == func.edges[edge].max_weight() {
                good_edges += 1;
            }
        }
    }

    Ok(good_edges)
}
