//! Per-voxel cross-correlation against the probe regressor.
//!
//! `SPEC_FULL.md` §4.2.

pub mod methods;
pub mod stage;

pub use methods::{apply_weighting, CorrWeighting};
pub use stage::{run_correlation_stage, CorrelationConfig, CorrelationOutput};
