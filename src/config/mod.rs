//! Typed pipeline configuration surface.
//!
//! `SPEC_FULL.md` §9 "Dynamic option dictionary" / §10.4.

mod output_map;
mod settings;

pub use output_map::OutputMap;
pub use settings::{
    ConcurrencyConfig, CorrelationConfig, DespeckleConfig, FitConfig, GlmConfig, GlobalMaskMethod, OutputPrecision,
    PipelineConfig, RefineConfig, RegressorConfig,
};
