//! voxlag-core - core analysis engine for a time-delay fMRI processing
//! pipeline.
//!
//! Given a 2-D voxel matrix (`N` voxels x `T` timepoints) and a probe
//! regressor, this crate finds each voxel's best-fit time delay against
//! the probe via FFT cross-correlation and sub-sample peak fitting,
//! optionally despeckles the resulting lag map, iteratively refines the
//! probe regressor from the voxels that fit it best, and finally removes
//! the delay-shifted regressor from every voxel via per-voxel GLM. See
//! [`Pipeline`] for the entry point.
//!
//! This crate has zero UI dependencies: it is a library only, with no
//! job-log viewer or GUI callback surface (`SPEC_FULL.md` §10.1).

pub mod config;
pub mod correlation;
pub mod data;
pub mod despeckle;
pub mod error;
pub mod fit;
pub mod glm;
pub mod logging;
pub mod pipeline;
pub mod refine;
pub mod regressor;
pub mod workers;

pub use config::{OutputMap, PipelineConfig};
pub use data::{FitResults, VoxelCube, VoxelGeometry, VoxelMatrix};
pub use error::{PipelineError, PipelineResult};
pub use pipeline::{Pipeline, PipelineOutputs};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_builds_a_pipeline() {
        let mut config = PipelineConfig::default();
        config.fmri_tr = 1.5;
        assert!(Pipeline::new(config).is_ok());
    }
}
