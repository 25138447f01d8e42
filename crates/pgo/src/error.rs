use thiserror::Error;

use tempo_ir::{Block, JumpKind};

/// Fatal profile-analysis errors. Degraded-but-recoverable conditions
/// are reported through compile-context flags instead.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("counter buffer allocation failed: {0:#x}")]
    CounterAllocation(u32),
    #[error("unexpected jump kind {kind:?} on an edge out of {block}")]
    UnexpectedJumpKind { block: Block, kind: JumpKind },
    #[error("schema bookkeeping mismatch: found {found}, expected {expected}")]
    SchemaCursorMismatch { found: u32, expected: u32 },
    #[error("block counter bookkeeping mismatch: found {found}, expected {expected}")]
    BlockCountMismatch { found: u32, expected: u32 },
    #[error("class probe bookkeeping mismatch: found {found}, expected {expected}")]
    CallCountMismatch { found: u32, expected: u32 },
}

pub type Result<T> = std::result::Result<T, FlowError>;
