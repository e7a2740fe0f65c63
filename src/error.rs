//! Error taxonomy for the pipeline.
//!
//! Configuration and structural problems are fatal and surface as
//! [`PipelineError`]. Per-voxel numerical fit failures are *not* part of
//! this taxonomy: they are recorded as [`crate::fit::FailReason`] bits on an
//! `Ok` result, per the contract in `fit`.

use thiserror::Error;

/// Errors that can abort the pipeline outright.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// An unknown or unsupported option value (window function, interpolator,
    /// correlation weighting, ...).
    #[error("unsupported option value for `{option}`: {value}")]
    UnsupportedOption { option: &'static str, value: String },

    /// `lag_min >= lag_max`, or the lag window exceeds half the run duration.
    #[error("invalid lag window [{lag_min}, {lag_max}]: {reason}")]
    InvalidLagWindow {
        lag_min: f64,
        lag_max: f64,
        reason: &'static str,
    },

    /// A mask's shape does not match the data it is applied to.
    #[error("mask dimension mismatch: mask has {mask_len} entries, data has {data_len}")]
    MaskDimensionMismatch { mask_len: usize, data_len: usize },

    /// Two arrays that are expected to share a row count disagree (e.g. the
    /// voxel matrix vs. the fit-results vectors).
    #[error("row count mismatch in {context}: expected {expected}, got {actual}")]
    RowCountMismatch {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// No valid voxels remain after masking.
    #[error("no valid voxels selected by the mask")]
    EmptyVoxelSet,

    /// A worker pool could not be constructed and no sequential fallback
    /// was possible (should not normally occur; sequential execution is
    /// always available as a fallback per the concurrency model).
    #[error("failed to construct worker pool: {0}")]
    WorkerPoolUnavailable(String),

    /// A stage produced fewer results than it was given voxels to process.
    #[error("stage `{stage}` returned {got} results for {expected} inputs")]
    StageShortfall {
        stage: &'static str,
        expected: usize,
        got: usize,
    },

    /// Passthrough for adapter-boundary I/O errors (reading/writing is out
    /// of scope for this crate, but the error type is still useful to
    /// embedding applications).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias used throughout the pipeline.
pub type PipelineResult<T> = Result<T, PipelineError>;
