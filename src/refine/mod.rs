//! Iterative probe-regressor refinement from the voxels that fit it
//! best.
//!
//! `SPEC_FULL.md` §4.5. One refinement pass: select voxels
//! ([`mask`]), time-shift and prenormalize each ([`shift`]), combine
//! them into a candidate regressor ([`combine`]), then optionally bin
//! by lag for diagnostics ([`dispersion`]).

pub mod combine;
pub mod dispersion;
pub mod mask;
pub mod shift;

pub use combine::RefineType;
pub use mask::{LagMaskSide, RefineMaskConfig};
pub use shift::{PrenormMode, RefineWeighting};

use ndarray::Array2;

use crate::data::{FitResults, VoxelMatrix};
use crate::error::{PipelineError, PipelineResult};
use crate::regressor::InterpType;

/// Configuration for one refinement pass.
#[derive(Debug, Clone)]
pub struct RefineConfig {
    pub mask: RefineMaskConfig,
    pub prenorm: PrenormMode,
    pub weighting: RefineWeighting,
    pub refine_type: RefineType,
    pub interp: InterpType,
    pub fs_hz: f64,
    pub pca_components: usize,
    /// Regress the previous regressor's contribution out of the newly
    /// combined one ("cleanrefined").
    pub cleanrefined: bool,
    /// Divide the combined regressor's spectrum by `mean(PSD)/std(PSD)`
    /// and inverse-transform before returning it ("SNR post-filter").
    pub snr_post_filter: bool,
}

/// Result of one refinement pass.
pub struct RefineOutput {
    pub regressor: Vec<f64>,
    pub n_contributing: usize,
}

/// Run one refinement pass: select, shift, prenormalize, and combine.
pub fn refine_pass(
    data: &VoxelMatrix<f64>,
    fit: &FitResults<f64>,
    previous_regressor: &[f64],
    config: &RefineConfig,
) -> PipelineResult<RefineOutput> {
    if data.nrows() != fit.len() {
        return Err(PipelineError::RowCountMismatch {
            context: "refinement: voxel matrix rows vs. fit results",
            expected: data.nrows(),
            actual: fit.len(),
        });
    }

    let selection = mask::compute_refine_mask(fit, &config.mask);
    let selected_rows: Vec<usize> = selection
        .iter()
        .enumerate()
        .filter_map(|(i, &keep)| keep.then_some(i))
        .collect();

    if selected_rows.is_empty() {
        return Err(PipelineError::EmptyVoxelSet);
    }

    let t = data.ncols();
    let mut shifted = Array2::<f64>::zeros((selected_rows.len(), t));
    let mut sample_weights = Array2::<f64>::zeros((selected_rows.len(), t));
    let mut voxel_weights = vec![0.0; selected_rows.len()];

    for (out_row, &src_row) in selected_rows.iter().enumerate() {
        let timecourse: Vec<f64> = data.row(src_row).to_vec();
        let lag = fit.lag[src_row];
        let (shifted_row, weights_row) = shift::shift_to_reference(&timecourse, config.fs_hz, -lag, config.interp);
        let normalized = shift::prenorm(&shifted_row, lag, config.prenorm);
        for col in 0..t {
            shifted[[out_row, col]] = normalized[col];
            sample_weights[[out_row, col]] = weights_row[col];
        }
        voxel_weights[out_row] = config.weighting.weight(fit.amp[src_row]);
    }

    let mut regressor = match config.refine_type {
        RefineType::Average => combine::average(&shifted, &sample_weights),
        RefineType::WeightedAverage => combine::weighted_average(&shifted, &sample_weights, &voxel_weights),
        RefineType::Pca => {
            let components = combine::pca_components(&shifted, 1);
            components.into_iter().next().unwrap_or_else(|| vec![0.0; t])
        }
        RefineType::Ica => {
            let k = config.pca_components.max(2);
            let components = combine::pca_components(&shifted, k);
            combine::ica_component(&components)
        }
    };

    combine::align_sign(&mut regressor, previous_regressor);

    if config.cleanrefined {
        regressor = combine::cleanrefined(&regressor, previous_regressor);
    }

    if config.snr_post_filter {
        regressor = combine::snr_post_filter(&regressor);
    }

    Ok(RefineOutput {
        regressor,
        n_contributing: selected_rows.len(),
    })
}
