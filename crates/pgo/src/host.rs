//! The runtime seam.
//!
//! Counter memory lives on the runtime side of a separately compiled
//! boundary; the compiler only ever sees a base address and per-entry
//! offsets.

use thiserror::Error;

use crate::schema::SchemaEntry;

/// Opaque runtime handle for a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodHandle(pub usize);

/// Metadata token naming a method in its defining scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token(pub u32);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The runtime cannot instrument this method (for example a generic
    /// method from another assembly). Recoverable: compilation continues
    /// without instrumentation.
    #[error("counter allocation not implemented for this method")]
    NotImplemented,
    /// Any other allocation failure. Fatal.
    #[error("counter allocation failed: {0:#x}")]
    Failed(u32),
}

/// Runtime services consumed by the instrumenter.
pub trait Host {
    /// Allocate a counter buffer laid out per `schema`, filling each
    /// entry's `offset`. Returns the buffer base address.
    fn allocate_counters(
        &mut self,
        method: MethodHandle,
        schema: &mut [SchemaEntry],
    ) -> Result<usize, AllocError>;

    fn method_def_token(&self, method: MethodHandle) -> Token;

    fn resolve_token(&self, token: Token) -> MethodHandle;

    /// Embed a method handle as an IR immediate.
    fn embed_method_handle(&self, method: MethodHandle) -> usize;
}
