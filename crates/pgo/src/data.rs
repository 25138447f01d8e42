//! Measured profile data and its interpretation.

use tracing::debug;

use tempo_ir::{Function, Weight};

use crate::{
    ctx::CompileContext,
    schema::{SchemaEntry, SchemaKind},
    stress::stress_weight,
};

/// The schema and raw counter buffer of a previous instrumented run.
/// Immutable for the duration of the compilation.
#[derive(Debug, Clone)]
pub struct ProfileData {
    schema: Box<[SchemaEntry]>,
    counters: Box<[u8]>,
}

impl ProfileData {
    pub fn new(schema: Vec<SchemaEntry>, counters: Vec<u8>) -> Self {
        Self {
            schema: schema.into_boxed_slice(),
            counters: counters.into_boxed_slice(),
        }
    }

    pub fn schema(&self) -> &[SchemaEntry] {
        &self.schema
    }

    /// Counter value for the first block-count entry at `il_offset`, or
    /// zero when no entry matches. "Present but silent" is a valid
    /// answer distinct from having no data at all; callers that need the
    /// distinction go through [`CompileContext::profile_weight_at`].
    fn count_at(&self, il_offset: u32) -> Weight {
        for entry in self.schema.iter() {
            if entry.kind == SchemaKind::BasicBlockIntCount && entry.il_offset == il_offset {
                let at = entry.offset as usize;
                let raw = u32::from_le_bytes(
                    self.counters[at..at + 4].try_into().expect("short buffer"),
                );
                return raw as Weight;
            }
        }

        0.0
    }
}

impl CompileContext {
    /// Check if profile data is available.
    pub fn has_profile_data(&self) -> bool {
        if self.import_only {
            return false;
        }

        self.profile.is_some()
    }

    /// Profile weight for the block at `il_offset`. A configured stress
    /// seed takes precedence over measured data; otherwise `None` means
    /// no data at all, while `Some(0.0)` may mean the data simply has no
    /// entry for this offset.
    pub fn profile_weight_at(&self, il_offset: u32) -> Option<Weight> {
        if self.config.stress_seed != 0 {
            return Some(stress_weight(
                self.method_hash,
                self.config.stress_seed,
                il_offset,
            ));
        }

        if self.import_only {
            return None;
        }

        let profile = self.profile.as_ref()?;
        Some(profile.count_at(il_offset))
    }
}

/// Seed block weights from profile data. Sets `have_profile_weights`
/// when any block received one.
pub fn apply_profile_weights(func: &mut Function, ctx: &mut CompileContext) {
    let blocks: Vec<_> = func.layout.iter_block().collect();
    for block in blocks {
        let data = &func.blocks[block];
        if !data.is_imported() || data.is_internal() {
            continue;
        }

        if let Some(weight) = ctx.profile_weight_at(data.code_offset) {
            func.blocks[block].set_profile_weight(weight);
            ctx.have_profile_weights = true;
        }
    }
}

/// How much scaling to apply to an inlinee's raw profile counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InlineScaleState {
    #[default]
    Undetermined,
    /// No usable scale; downstream falls back to heuristics.
    Unavailable,
    Known,
}

/// Inlining state the caller's compilation shares with the inlinee.
#[derive(Debug, Clone, Copy, Default)]
pub struct InlineInfo {
    /// The call-site block carries a profile-derived weight.
    pub call_site_profiled: bool,
    pub call_site_weight: Weight,
    pub scale_state: InlineScaleState,
    pub scale_factor: f64,
}

/// Determine how much to scale the inlinee's raw counts by comparing the
/// call-site weight against the callee's entry weight. Only meaningful
/// for inlinee compilations; the result is recorded on the inline info
/// and later calls return immediately.
pub fn compute_profile_scale(ctx: &mut CompileContext) {
    let inline = ctx.inline.expect("not an inlinee compilation");
    if inline.scale_state != InlineScaleState::Undetermined {
        return;
    }

    debug!("computing inlinee profile scale");

    let resolved = resolve_scale(ctx, &inline);
    let inline = ctx.inline.as_mut().unwrap();
    match resolved {
        Some(scale) => {
            inline.scale_factor = scale;
            inline.scale_state = InlineScaleState::Known;
            debug!(scale, "inlinee profile scale known");
        }
        None => {
            inline.scale_state = InlineScaleState::Unavailable;
        }
    }
}

fn resolve_scale(ctx: &CompileContext, inline: &InlineInfo) -> Option<f64> {
    if !inline.call_site_profiled {
        debug!("call site not profiled");
        return None;
    }

    let call_site_weight = inline.call_site_weight;
    if call_site_weight == 0.0 {
        debug!("zero call site count");
        return None;
    }

    if !ctx.has_profile_data() {
        debug!("no callee profile data");
        return None;
    }

    let callee_weight = ctx.profile_weight_at(0)?;

    // Ignore callee data if we would need to upscale; something is off
    // with the collection or retrieval when the callee entry ran less
    // often than the call site.
    if callee_weight < call_site_weight {
        debug!(callee_weight, call_site_weight, "callee entry count below call site count");
        return None;
    }

    // Scale is always in (0.0, 1.0]; callee counts only scale down.
    Some(call_site_weight / callee_weight)
}
