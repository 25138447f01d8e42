//! Flow-conservation checking of a profiled method.
//!
//! For each profiled block the counts flowing in, the block weight and
//! the counts flowing out should all agree; with edges carrying ranges,
//! agreement means the weight falls inside the summed `[min, max]`. EH
//! flow has no explicit edges and is exempted at the boundaries.

use rustc_hash::FxHashMap;
use tracing::{debug, warn};

use tempo_ir::{Block, Edge, Function, Weight};

use crate::error::{CheckError, CheckErrorKind};

/// How hard to react to an inconsistent profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CheckLevel {
    #[default]
    Off,
    Warn,
    /// Panic on any inconsistency.
    Assert,
}

impl CheckLevel {
    /// Map the numeric configuration value (0 / 1 / 2).
    pub fn from_setting(setting: u32) -> Self {
        match setting {
            0 => Self::Off,
            1 => Self::Warn,
            _ => Self::Assert,
        }
    }
}

#[derive(Debug, Default)]
pub struct CheckSummary {
    pub profiled_blocks: u32,
    pub unprofiled_blocks: u32,
    pub problems: u32,
    pub errors: Vec<CheckError>,
}

impl CheckSummary {
    pub fn is_consistent(&self) -> bool {
        self.problems == 0
    }

    fn report(&mut self, block: Block, kind: CheckErrorKind) {
        let err = CheckError { block, kind };
        warn!("{err}");
        self.problems += 1;
        self.errors.push(err);
    }
}

pub struct ProfileChecker {
    level: CheckLevel,
}

impl ProfileChecker {
    pub fn new(level: CheckLevel) -> Self {
        Self { level }
    }

    /// Verify that the profile is self-consistent, or nearly so.
    pub fn check(&self, func: &Function) -> CheckSummary {
        let mut summary = CheckSummary::default();
        if self.level == CheckLevel::Off {
            return summary;
        }

        debug!("checking profile data");

        let entry = func.entry_block();
        let mut entry_weight: Option<Weight> = None;
        let mut exit_weight: Option<Weight> = None;

        for block in func.layout.iter_block() {
            let data = &func.blocks[block];
            if !data.has_profile_weight() {
                summary.unprofiled_blocks += 1;
                continue;
            }

            summary.profiled_blocks += 1;
            let weight = data.weight();

            let mut verify_incoming = true;
            let mut verify_outgoing = true;

            if Some(block) == entry {
                *entry_weight.get_or_insert(0.0) += weight;
                verify_incoming = false;
            }

            if data.jump_kind.is_exit() {
                *exit_weight.get_or_insert(0.0) += weight;
                verify_outgoing = false;
            }

            // EH flow is not modeled by edges; skip the boundary blocks.
            if data.flags.contains(tempo_ir::BlockFlags::EH_BOUNDARY_IN) {
                verify_incoming = false;
            }
            if data.flags.contains(tempo_ir::BlockFlags::EH_BOUNDARY_OUT) {
                verify_outgoing = false;
            }

            if verify_incoming {
                self.check_incoming(func, block, weight, &mut summary);
            }
            if verify_outgoing {
                self.check_outgoing(func, block, weight, &mut summary);
            }
        }

        // Counts entering the method should leave it.
        if let (Some(entry_weight), Some(exit_weight)) = (entry_weight, exit_weight) {
            if entry_weight != exit_weight {
                summary.report(
                    entry.expect("profiled entry without layout entry"),
                    CheckErrorKind::EntryExitImbalance {
                        entry: entry_weight,
                        exit: exit_weight,
                    },
                );
            }
        }

        if summary.is_consistent() {
            debug!(
                profiled = summary.profiled_blocks,
                unprofiled = summary.unprofiled_blocks,
                "profile is self-consistent"
            );
        } else {
            warn!(
                problems = summary.problems,
                profiled = summary.profiled_blocks,
                unprofiled = summary.unprofiled_blocks,
                "profile is not self-consistent"
            );

            if self.level == CheckLevel::Assert {
                panic!("inconsistent profile: {} problems", summary.problems);
            }
        }

        summary
    }

    fn check_incoming(
        &self,
        func: &Function,
        block: Block,
        weight: Weight,
        summary: &mut CheckSummary,
    ) {
        let preds = &func.blocks[block].preds;
        if preds.is_empty() {
            summary.report(block, CheckErrorKind::ExpectedPredecessors);
            return;
        }

        let mut min_sum = 0.0;
        let mut max_sum = 0.0;
        for &edge in preds {
            min_sum += func.edges[edge].min_weight();
            max_sum += func.edges[edge].max_weight();
        }

        if min_sum > max_sum {
            summary.report(
                block,
                CheckErrorKind::IncomingRangeInverted {
                    min: min_sum,
                    max: max_sum,
                },
            );
        } else if weight < min_sum {
            summary.report(
                block,
                CheckErrorKind::WeightBelowIncomingMin {
                    weight,
                    min: min_sum,
                },
            );
        } else if weight > max_sum {
            summary.report(
                block,
                CheckErrorKind::WeightAboveIncomingMax {
                    weight,
                    max: max_sum,
                },
            );
        }
    }

    fn check_outgoing(
        &self,
        func: &Function,
        block: Block,
        weight: Weight,
        summary: &mut CheckSummary,
    ) {
        let succs = func.succs(block);
        if succs.is_empty() {
            summary.report(block, CheckErrorKind::ExpectedSuccessors);
            return;
        }

        let mut min_sum = 0.0;
        let mut max_sum = 0.0;

        // Each successor occurrence must be backed by its own
        // predecessor record on the far side. A missing edge is its own
        // finding; the range checks below still run on the partial sums.
        let mut taken: FxHashMap<Block, usize> = FxHashMap::default();
        for succ in succs {
            let occurrence = taken.entry(succ).or_insert(0);
            let matched: Vec<Edge> = func.blocks[succ]
                .preds
                .iter()
                .copied()
                .filter(|&e| func.edges[e].src() == block)
                .collect();

            match matched.get(*occurrence) {
                Some(&edge) => {
                    min_sum += func.edges[edge].min_weight();
                    max_sum += func.edges[edge].max_weight();
                }
                None => {
                    summary.report(block, CheckErrorKind::MissingSuccessorEdge { to: succ });
                }
            }
            *occurrence += 1;
        }

        if min_sum > max_sum {
            summary.report(
                block,
                CheckErrorKind::OutgoingRangeInverted {
                    min: min_sum,
                    max: max_sum,
                },
            );
        } else if weight < min_sum {
            summary.report(
                block,
                CheckErrorKind::WeightBelowOutgoingMin {
                    weight,
                    min: min_sum,
                },
            );
        } else if weight > max_sum {
            summary.report(
                block,
                CheckErrorKind::WeightAboveOutgoingMax {
                    weight,
                    max: max_sum,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempo_ir::builder::test_util::*;
    use tempo_ir::BlockFlags;

    /// Diamond with exact edge weights filled in by hand.
    fn solved_diamond() -> (Function, [Block; 4]) {
        let (mut func, blocks) = diamond(100.0, 30.0, 70.0, 100.0);
        let [b0, b1, b2, b3] = blocks;

        for (dst, src, weight) in [
            (b1, b0, 30.0),
            (b2, b0, 70.0),
            (b3, b1, 30.0),
            (b3, b2, 70.0),
        ] {
            let edge = func.find_pred_edge(dst, src, None).unwrap();
            func.edges[edge].set_weights(weight, weight);
        }

        (func, blocks)
    }

    #[test]
    fn consistent_profile_passes() {
        let (func, _) = solved_diamond();
        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);

        assert!(summary.is_consistent());
        assert_eq!(summary.profiled_blocks, 4);
        assert_eq!(summary.unprofiled_blocks, 0);
    }

    #[test]
    fn off_level_checks_nothing() {
        let (mut func, [_, b1, _, _]) = solved_diamond();
        func.blocks[b1].set_profile_weight(55.0);

        let summary = ProfileChecker::new(CheckLevel::Off).check(&func);
        assert!(summary.is_consistent());
        assert_eq!(summary.profiled_blocks, 0);
    }

    #[test]
    fn detects_weight_outside_incoming_range() {
        let (mut func, [_, b1, _, _]) = solved_diamond();
        // b1 claims 55 but its only in-edge carries exactly 30.
        func.blocks[b1].set_profile_weight(55.0);

        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);
        assert!(!summary.is_consistent());
        assert!(summary.errors.contains(&CheckError {
            block: b1,
            kind: CheckErrorKind::WeightAboveIncomingMax {
                weight: 55.0,
                max: 30.0
            },
        }));
    }

    #[test]
    fn detects_entry_exit_imbalance() {
        let (mut func, [b0, _, _, _]) = solved_diamond();
        // Entry weight no longer matches the exit weight. Outgoing flow
        // from the entry is also off, so expect both findings.
        func.blocks[b0].set_profile_weight(120.0);

        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);
        assert!(!summary.is_consistent());
        assert!(summary.errors.iter().any(|e| matches!(
            e.kind,
            CheckErrorKind::EntryExitImbalance { entry, exit } if entry == 120.0 && exit == 100.0
        )));
    }

    #[test]
    fn detects_missing_successor_edge() {
        let (mut func, [b0, b1, _, _]) = solved_diamond();
        // Drop b1's record of the edge from b0.
        func.blocks[b1].preds.clear();

        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);
        assert!(summary.errors.contains(&CheckError {
            block: b0,
            kind: CheckErrorKind::MissingSuccessorEdge { to: b1 },
        }));
        // The range check still runs against the surviving edge, so b0
        // is also flagged for outweighing its remaining outgoing flow.
        assert!(summary.errors.contains(&CheckError {
            block: b0,
            kind: CheckErrorKind::WeightAboveOutgoingMax {
                weight: 100.0,
                max: 70.0
            },
        }));
        // And b1 now has no incoming flow at all.
        assert!(summary.errors.contains(&CheckError {
            block: b1,
            kind: CheckErrorKind::ExpectedPredecessors,
        }));
    }

    #[test]
    fn eh_boundaries_are_exempt() {
        let (mut func, [_, b1, _, _]) = solved_diamond();
        func.blocks[b1].set_profile_weight(55.0);
        func.blocks[b1].flags.insert(BlockFlags::EH_BOUNDARY_IN);
        // The bogus weight now only trips the outgoing check at b1.
        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);
        assert!(summary.errors.iter().all(|e| !matches!(
            e.kind,
            CheckErrorKind::WeightAboveIncomingMax { .. }
        ) || e.block != b1));

        func.blocks[b1].flags.insert(BlockFlags::EH_BOUNDARY_OUT);
        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);
        assert!(summary.errors.iter().all(|e| e.block != b1));
    }

    #[test]
    #[should_panic(expected = "inconsistent profile")]
    fn assert_level_panics() {
        let (mut func, [_, b1, _, _]) = solved_diamond();
        func.blocks[b1].set_profile_weight(55.0);

        ProfileChecker::new(CheckLevel::Assert).check(&func);
    }

    #[test]
    fn unprofiled_blocks_are_skipped() {
        let (func, blocks) = linear3(&[None, None, None]);

        let summary = ProfileChecker::new(CheckLevel::Warn).check(&func);
        assert!(summary.is_consistent());
        assert_eq!(summary.unprofiled_blocks, blocks.len() as u32);
        assert_eq!(summary.profiled_blocks, 0);
    }
}
