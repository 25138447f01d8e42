use std::fmt;

use tempo_ir::{Block, Weight};

/// A single profile-consistency violation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CheckErrorKind {
    ExpectedPredecessors,
    IncomingRangeInverted { min: Weight, max: Weight },
    WeightBelowIncomingMin { weight: Weight, min: Weight },
    WeightAboveIncomingMax { weight: Weight, max: Weight },
    ExpectedSuccessors,
    MissingSuccessorEdge { to: Block },
    OutgoingRangeInverted { min: Weight, max: Weight },
    WeightBelowOutgoingMin { weight: Weight, min: Weight },
    WeightAboveOutgoingMax { weight: Weight, max: Weight },
    EntryExitImbalance { entry: Weight, exit: Weight },
}

impl fmt::Display for CheckErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::ExpectedPredecessors => write!(f, "expected to see predecessors"),
            Self::IncomingRangeInverted { min, max } => {
                write!(f, "incoming min {min} > incoming max {max}")
            }
            Self::WeightBelowIncomingMin { weight, min } => {
                write!(f, "block weight {weight} < incoming min {min}")
            }
            Self::WeightAboveIncomingMax { weight, max } => {
                write!(f, "block weight {weight} > incoming max {max}")
            }
            Self::ExpectedSuccessors => write!(f, "expected to see successors"),
            Self::MissingSuccessorEdge { to } => {
                write!(f, "can't find successor edge to {to}")
            }
            Self::OutgoingRangeInverted { min, max } => {
                write!(f, "outgoing min {min} > outgoing max {max}")
            }
            Self::WeightBelowOutgoingMin { weight, min } => {
                write!(f, "block weight {weight} < outgoing min {min}")
            }
            Self::WeightAboveOutgoingMax { weight, max } => {
                write!(f, "block weight {weight} > outgoing max {max}")
            }
            Self::EntryExitImbalance { entry, exit } => {
                write!(f, "entry {entry} exit {exit} mismatch")
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckError {
    pub block: Block,
    pub kind: CheckErrorKind,
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.block, self.kind)
    }
}
