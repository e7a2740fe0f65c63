//! Final GLM removal: regress the time-shifted regressor out of every
//! voxel and report the residual, fit coefficients, and filtered (Wiener)
//! estimate.
//!
//! `SPEC_FULL.md` §4.6. Each voxel is fit independently via ordinary
//! least squares, `v(t) = alpha + beta * L(t - lag) + residual(t)`, using
//! the worker pool from `crate::workers`.

use ndarray::Array2;

use crate::data::{FitResults, VoxelMatrix};
use crate::error::{PipelineError, PipelineResult};
use crate::regressor::resample::InterpType;
use crate::refine::shift::shift_to_reference;
use crate::workers::run_pool;

/// Configuration for the GLM stage.
#[derive(Debug, Clone)]
pub struct GlmConfig {
    pub fs_hz: f64,
    pub interp: InterpType,
    /// Voxel-mean threshold gating regression (`SPEC_FULL.md` §4.6: "For
    /// each voxel n whose mean exceeds `thresh_val`"); voxels at or
    /// below it pass through unmodified.
    pub thresh_val: f64,
    /// Bypass the `thresh_val` gate and regress every voxel.
    pub no_thresh: bool,
    pub nprocs: usize,
}

/// Per-voxel GLM removal output.
pub struct GlmOutput {
    /// Regression intercept, one per voxel.
    pub alpha: Vec<f64>,
    /// Regression slope, one per voxel.
    pub beta: Vec<f64>,
    /// Pearson R between the voxel and its shifted regressor.
    pub r: Vec<f64>,
    /// `v(t) - (alpha + beta * L(t))`, the GLM-filtered ("Wiener-tagged")
    /// residual time series, one row per voxel.
    pub residual: VoxelMatrix<f64>,
    /// `alpha + beta * L(t)`, the fitted (removed) component.
    pub fitted: VoxelMatrix<f64>,
    /// `true` where the voxel's mean cleared `thresh_val` (or `no_thresh`
    /// was set) and regression was actually applied.
    pub applied: Vec<bool>,
}

/// Run the GLM removal stage over every voxel, regressing `regressor`
/// (the final refined probe, on the fMRI grid) out of each voxel after
/// shifting it by that voxel's fitted lag.
pub fn run_glm_stage(
    data: &VoxelMatrix<f64>,
    fit: &FitResults<f64>,
    regressor: &[f64],
    config: &GlmConfig,
) -> PipelineResult<GlmOutput> {
    if data.nrows() != fit.len() {
        return Err(PipelineError::RowCountMismatch {
            context: "GLM stage: voxel matrix rows vs. fit results",
            expected: data.nrows(),
            actual: fit.len(),
        });
    }
    if data.nrows() == 0 {
        return Err(PipelineError::EmptyVoxelSet);
    }
    if regressor.len() != data.ncols() {
        return Err(PipelineError::RowCountMismatch {
            context: "GLM stage: regressor length vs. voxel time series length",
            expected: data.ncols(),
            actual: regressor.len(),
        });
    }

    let t = data.ncols();
    let rows: Vec<(Vec<f64>, f64)> = data
        .rows()
        .into_iter()
        .zip(fit.lag.iter())
        .map(|(r, &lag)| (r.to_vec(), lag))
        .collect();

    let thresh_val = config.thresh_val;
    let no_thresh = config.no_thresh;
    let fs_hz = config.fs_hz;
    let interp = config.interp;
    let regressor = regressor.to_vec();

    let results: Vec<(f64, f64, f64, Vec<f64>, Vec<f64>, bool)> = run_pool(rows, config.nprocs, move |(voxel, lag)| {
        let (shifted_regressor, weights) = shift_to_reference(&regressor, fs_hz, -lag, interp);
        glm_one_voxel(&voxel, &shifted_regressor, &weights, thresh_val, no_thresh)
    });

    let mut alpha = vec![0.0; data.nrows()];
    let mut beta = vec![0.0; data.nrows()];
    let mut r = vec![0.0; data.nrows()];
    let mut applied = vec![false; data.nrows()];
    let mut residual = Array2::<f64>::zeros((data.nrows(), t));
    let mut fitted = Array2::<f64>::zeros((data.nrows(), t));

    for (row, (a, b, rv, res, fit_ts, app)) in results.into_iter().enumerate() {
        alpha[row] = a;
        beta[row] = b;
        r[row] = rv;
        applied[row] = app;
        for col in 0..t {
            residual[[row, col]] = res[col];
            fitted[[row, col]] = fit_ts[col];
        }
    }

    Ok(GlmOutput {
        alpha,
        beta,
        r,
        residual,
        fitted,
        applied,
    })
}

/// OLS-fit one voxel against its shifted regressor, weighting out
/// samples where the shift pulled in data outside the original domain.
/// Gated on the voxel's own (unweighted) mean per `SPEC_FULL.md` §4.6,
/// not on the fitted `R` — `R` is only ever a reported diagnostic.
fn glm_one_voxel(
    voxel: &[f64],
    regressor: &[f64],
    weights: &[f64],
    thresh_val: f64,
    no_thresh: bool,
) -> (f64, f64, f64, Vec<f64>, Vec<f64>, bool) {
    let n = voxel.len();
    let mean_raw = voxel.iter().sum::<f64>() / n.max(1) as f64;
    if !no_thresh && mean_raw <= thresh_val {
        return (0.0, 0.0, 0.0, voxel.to_vec(), vec![0.0; n], false);
    }

    let wsum: f64 = weights.iter().sum();
    if wsum < 2.0 {
        return (0.0, 0.0, 0.0, voxel.to_vec(), vec![0.0; n], false);
    }

    let mean_v = weighted_mean(voxel, weights, wsum);
    let mean_l = weighted_mean(regressor, weights, wsum);

    let mut cov = 0.0;
    let mut var_l = 0.0;
    let mut var_v = 0.0;
    for i in 0..n {
        let w = weights[i];
        let dv = voxel[i] - mean_v;
        let dl = regressor[i] - mean_l;
        cov += w * dv * dl;
        var_l += w * dl * dl;
        var_v += w * dv * dv;
    }

    if var_l < 1e-15 || var_v < 1e-15 {
        return (0.0, 0.0, 0.0, voxel.to_vec(), vec![0.0; n], false);
    }

    let beta = cov / var_l;
    let alpha = mean_v - beta * mean_l;
    let r = cov / (var_l.sqrt() * var_v.sqrt());

    let fitted: Vec<f64> = regressor.iter().map(|&l| alpha + beta * l).collect();
    let residual: Vec<f64> = voxel.iter().zip(fitted.iter()).map(|(&v, &f)| v - f).collect();

    (alpha, beta, r, residual, fitted, true)
}

fn weighted_mean(samples: &[f64], weights: &[f64], wsum: f64) -> f64 {
    samples.iter().zip(weights.iter()).map(|(&s, &w)| s * w).sum::<f64>() / wsum
}

/// GLM output for the `glm.enabled = false` case: every voxel passes
/// through unmodified, nothing fitted or removed.
pub fn pass_through(data: &VoxelMatrix<f64>) -> GlmOutput {
    let n = data.nrows();
    GlmOutput {
        alpha: vec![0.0; n],
        beta: vec![0.0; n],
        r: vec![0.0; n],
        residual: data.clone(),
        fitted: Array2::zeros(data.dim()),
        applied: vec![false; n],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FailReason;
    use ndarray::array;

    #[test]
    fn recovers_exact_linear_relationship() {
        let regressor: Vec<f64> = (0..50).map(|i| (i as f64 * 0.2).sin()).collect();
        let v: Vec<f64> = regressor.iter().map(|&x| 2.0 * x + 0.5).collect();
        let data = Array2::from_shape_vec((1, v.len()), v).unwrap();
        let fit = FitResults {
            lag: vec![0.0],
            amp: vec![0.9],
            sigma: vec![1.0],
            mask: vec![true],
            fail: vec![FailReason::empty()],
        };
        let config = GlmConfig {
            fs_hz: 1.0,
            interp: InterpType::Cubic,
            thresh_val: 0.0,
            no_thresh: true,
            nprocs: 1,
        };
        let out = run_glm_stage(&data, &fit, &regressor, &config).unwrap();
        assert!((out.beta[0] - 2.0).abs() < 1e-6, "beta={}", out.beta[0]);
        assert!((out.alpha[0] - 0.5).abs() < 1e-6, "alpha={}", out.alpha[0]);
        assert!(out.applied[0]);
    }

    #[test]
    fn below_threshold_leaves_voxel_unmodified() {
        let data = array![[1.0, 2.0, 1.0, 2.0, 1.0, 2.0, 1.0, 2.0]];
        let regressor = vec![0.1, -0.2, 0.05, 0.3, -0.1, 0.2, 0.0, -0.05];
        let fit = FitResults {
            lag: vec![0.0],
            amp: vec![0.01],
            sigma: vec![1.0],
            mask: vec![true],
            fail: vec![FailReason::empty()],
        };
        let config = GlmConfig {
            fs_hz: 1.0,
            interp: InterpType::Cubic,
            thresh_val: 10.0,
            no_thresh: false,
            nprocs: 1,
        };
        let out = run_glm_stage(&data, &fit, &regressor, &config).unwrap();
        assert!(!out.applied[0]);
        assert_eq!(out.residual.row(0).to_vec(), data.row(0).to_vec());
    }

    #[test]
    fn pass_through_leaves_every_voxel_unmodified() {
        let data = array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]];
        let out = pass_through(&data);
        assert_eq!(out.residual, data);
        assert!(out.applied.iter().all(|&a| !a));
        assert_eq!(out.fitted, Array2::zeros(data.dim()));
    }
}
