//! Per-compilation context.
//!
//! The surrounding compiler hands one of these to every pass; nothing in
//! this crate reads process-global state.

use tempo_ir::{Weight, UNITY_WEIGHT};

use crate::{
    data::{InlineInfo, ProfileData},
    host::MethodHandle,
};

/// Profiling-related configuration knobs.
#[derive(Debug, Clone, Copy, Default)]
pub struct PgoConfig {
    /// Non-zero seed turns on the deterministic stress-weight source,
    /// overriding measured counters.
    pub stress_seed: u32,
    /// Skip instrumentation of methods too trivial to be worth probing.
    pub minimal_profiling: bool,
    /// Insert receiver-type histogram probes at virtual call sites.
    pub class_profiling: bool,
}

/// State of one method compilation, including the result surface that
/// downstream passes observe instead of an error channel.
pub struct CompileContext {
    pub method_hash: u32,
    pub method_handle: MethodHandle,
    pub is_prejit: bool,
    pub is_ready_to_run: bool,
    /// Import-only compilations never consume profile data.
    pub import_only: bool,
    pub opt_enabled: bool,
    /// Class-profile candidates counted during import.
    pub class_probe_count: u32,
    pub config: PgoConfig,

    pub profile: Option<ProfileData>,
    pub inline: Option<InlineInfo>,

    // Results.
    pub have_profile_weights: bool,
    pub called_count: Weight,
    pub have_valid_edge_weights: bool,
    pub edge_weights_computed: bool,
    pub slop_used_in_edge_weights: bool,
    pub range_used_in_edge_weights: bool,
    pub edge_count: u32,
    /// Address of the entry block's execution counter, once inserted.
    pub entry_counter_addr: Option<usize>,
}

impl CompileContext {
    pub fn new(method_hash: u32, config: PgoConfig) -> Self {
        Self {
            method_hash,
            method_handle: MethodHandle(0),
            is_prejit: false,
            is_ready_to_run: false,
            import_only: false,
            opt_enabled: true,
            class_probe_count: 0,
            config,
            profile: None,
            inline: None,
            have_profile_weights: false,
            called_count: UNITY_WEIGHT,
            have_valid_edge_weights: false,
            edge_weights_computed: false,
            slop_used_in_edge_weights: false,
            range_used_in_edge_weights: false,
            edge_count: 0,
            entry_counter_addr: None,
        }
    }

    /// True when block weights in the flow graph came from profile data
    /// (measured or stress-synthesized).
    pub fn using_profile_weights(&self) -> bool {
        self.have_profile_weights
    }
}
