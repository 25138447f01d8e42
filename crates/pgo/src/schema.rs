//! Instrumentation schema shared with the runtime.
//!
//! The schema tells the runtime what counters to allocate and tells a
//! later optimizing compilation how to interpret the counter buffer.
//! Layout and discriminants are wire-stable and must not drift from the
//! runtime's definition.

/// Number of rows in a receiver-type histogram.
pub const HISTOGRAM_SIZE: u32 = 8;

/// Marks a histogram probe in `SchemaEntry::other`.
pub const CLASS_FLAG: u32 = 0x8000_0000;
/// Marks a virtual-stub (interface) call site, set alongside
/// [`CLASS_FLAG`].
pub const INTERFACE_FLAG: u32 = 0x4000_0000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SchemaKind {
    /// 32-bit per-block execution counter.
    BasicBlockIntCount = 1,
    /// 32-bit sample counter of a receiver-type histogram.
    TypeHandleHistogramCount = 2,
    /// The histogram rows themselves, `count` entries wide.
    TypeHandleHistogramTypeHandle = 3,
}

/// One counter descriptor. `offset` is assigned by the runtime when the
/// buffer is allocated; every other field is owned by the compiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(C)]
pub struct SchemaEntry {
    pub kind: SchemaKind,
    pub il_offset: u32,
    pub count: u32,
    pub other: u32,
    pub offset: u32,
}

impl SchemaEntry {
    pub fn block_count(il_offset: u32) -> Self {
        Self {
            kind: SchemaKind::BasicBlockIntCount,
            il_offset,
            count: 1,
            other: 0,
            offset: 0,
        }
    }

    pub fn histogram_count(il_offset: u32, other: u32) -> Self {
        Self {
            kind: SchemaKind::TypeHandleHistogramCount,
            il_offset,
            count: 1,
            other,
            offset: 0,
        }
    }

    pub fn histogram_rows(il_offset: u32, other: u32) -> Self {
        Self {
            kind: SchemaKind::TypeHandleHistogramTypeHandle,
            il_offset,
            count: HISTOGRAM_SIZE,
            other,
            offset: 0,
        }
    }
}
