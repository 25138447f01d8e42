//! Shared test support.

use crate::{
    ctx::{CompileContext, PgoConfig},
    host::{AllocError, Host, MethodHandle, Token},
    schema::{SchemaEntry, SchemaKind, HISTOGRAM_SIZE},
};

/// Synthetic counter-buffer base so spliced addresses are recognizable
/// in assertions.
pub const TEST_BUFFER_BASE: usize = 0x10_0000;

/// In-memory host: lays counters out sequentially, remembers the schema
/// it was handed, and can be told to fail allocation.
pub struct TestHost {
    pub alloc_calls: u32,
    pub fail_with: Option<AllocError>,
    pub allocated_bytes: u32,
    pub schema: Option<Vec<SchemaEntry>>,
}

impl Default for TestHost {
    fn default() -> Self {
        Self::new()
    }
}

impl TestHost {
    pub fn new() -> Self {
        Self {
            alloc_calls: 0,
            fail_with: None,
            allocated_bytes: 0,
            schema: None,
        }
    }

    pub fn failing_with(err: AllocError) -> Self {
        Self {
            fail_with: Some(err),
            ..Self::new()
        }
    }
}

impl Host for TestHost {
    fn allocate_counters(
        &mut self,
        _method: MethodHandle,
        schema: &mut [SchemaEntry],
    ) -> Result<usize, AllocError> {
        self.alloc_calls += 1;
        if let Some(err) = self.fail_with {
            return Err(err);
        }

        let mut offset = 0u32;
        for entry in schema.iter_mut() {
            entry.offset = offset;
            let width = match entry.kind {
                SchemaKind::BasicBlockIntCount | SchemaKind::TypeHandleHistogramCount => 4,
                SchemaKind::TypeHandleHistogramTypeHandle => 8,
            };
            offset += entry.count * width;
        }

        self.allocated_bytes = offset;
        self.schema = Some(schema.to_vec());
        Ok(TEST_BUFFER_BASE)
    }

    fn method_def_token(&self, method: MethodHandle) -> Token {
        Token(method.0 as u32 | 0x0600_0000)
    }

    fn resolve_token(&self, token: Token) -> MethodHandle {
        MethodHandle((token.0 & 0x00ff_ffff) as usize)
    }

    fn embed_method_handle(&self, method: MethodHandle) -> usize {
        method.0
    }
}

pub fn test_ctx() -> CompileContext {
    CompileContext::new(0x7357, PgoConfig::default())
}

/// Histogram probes consume two schema entries and
/// `4 + HISTOGRAM_SIZE * 8` buffer bytes under [`TestHost`].
pub fn histogram_bytes() -> u32 {
    4 + HISTOGRAM_SIZE * 8
}
