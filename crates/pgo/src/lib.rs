pub mod ctx;
pub mod data;
pub mod error;
pub mod host;
pub mod instrument;
pub mod propagate;
pub mod schema;
pub mod solve;
pub mod stress;

pub mod test_util;

pub use ctx::{CompileContext, PgoConfig};
pub use data::{
    apply_profile_weights, compute_profile_scale, InlineInfo, InlineScaleState, ProfileData,
};
pub use error::{FlowError, Result};
pub use host::{AllocError, Host, MethodHandle, Token};
pub use instrument::instrument_method;
pub use propagate::{
    compute_block_and_edge_weights, compute_called_count, compute_missing_block_weights,
    MAX_PROPAGATION_PASSES,
};
pub use schema::{SchemaEntry, SchemaKind, CLASS_FLAG, HISTOGRAM_SIZE, INTERFACE_FLAG};
pub use solve::{compute_edge_weights, MAX_SOLVER_PASSES};
pub use stress::stress_weight;
