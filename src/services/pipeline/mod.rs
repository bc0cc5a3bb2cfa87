//! Pipeline Builder — deterministic, side-effect-free translation of tool
//! requests into document-store aggregation pipelines with a fixed tenant
//! prelude.

pub mod builder;
pub mod error;
pub mod filter;

pub use builder::{
    validate_derived_column, DerivedColumn, Metric, PipelineBuilder, ReductionOp, SortOrder,
    TimeFreq, DEFAULT_LIMIT, MAX_LIMIT,
};
pub use error::PipelineError;
pub use filter::tenant_prelude;
