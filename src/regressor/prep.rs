//! Probe-regressor preparation pipeline.
//!
//! `SPEC_FULL.md` §4.1: invert, detrend, band-limit filter, resample onto
//! the fMRI and oversampled time grids, then (separately, per use) window
//! and normalize for correlation.

use serde::{Deserialize, Serialize};

use super::filters::{zero_phase_bandpass, BandLimit};
use super::resample::{resample, InterpType};
use crate::error::PipelineResult;

/// Polynomial order removed by detrending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DetrendOrder {
    None,
    /// Remove the mean only.
    Constant,
    /// Remove a least-squares line.
    #[default]
    Linear,
}

/// Taper applied to the correlation inputs immediately before the FFT.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum WindowFunc {
    None,
    #[default]
    Hann,
    Hamming,
    Blackman,
}

/// Configuration for [`prepare_probe_regressor`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepConfig {
    pub invert: bool,
    pub detrend_order: DetrendOrder,
    pub band_limit: BandLimit,
    pub filter_order: usize,
    pub interp: InterpType,
    pub oversample_factor: usize,
}

impl Default for PrepConfig {
    fn default() -> Self {
        Self {
            invert: false,
            detrend_order: DetrendOrder::Linear,
            band_limit: BandLimit::Lfo,
            filter_order: 3,
            interp: InterpType::Cubic,
            oversample_factor: 2,
        }
    }
}

/// The probe regressor resampled onto the two grids the rest of the
/// pipeline needs: the native fMRI TR grid, and an oversampled grid used
/// for sub-TR lag search.
#[derive(Debug, Clone)]
pub struct ProbeRegressor {
    pub fmri_grid: Vec<f64>,
    pub oversampled_grid: Vec<f64>,
    pub oversampled_fs_hz: f64,
}

/// Run the full probe-regressor prep pipeline.
///
/// `raw` / `raw_fs_hz` describe the probe as recorded; `fmri_tr` and
/// `n_fmri_points` describe the destination fMRI time series.
pub fn prepare_probe_regressor(
    raw: &[f64],
    raw_fs_hz: f64,
    fmri_tr: f64,
    n_fmri_points: usize,
    config: &PrepConfig,
) -> PipelineResult<ProbeRegressor> {
    let mut signal = raw.to_vec();
    if config.invert {
        for v in signal.iter_mut() {
            *v = -*v;
        }
    }
    signal = detrend(&signal, config.detrend_order);
    signal = zero_phase_bandpass(&signal, raw_fs_hz, config.band_limit, config.filter_order)?;

    let src_t: Vec<f64> = (0..signal.len()).map(|i| i as f64 / raw_fs_hz).collect();

    let fmri_t: Vec<f64> = (0..n_fmri_points).map(|i| i as f64 * fmri_tr).collect();
    let fmri_grid = resample(&src_t, &signal, &fmri_t, config.interp);

    let oversample_factor = config.oversample_factor.max(1);
    let n_over = n_fmri_points * oversample_factor;
    let over_tr = fmri_tr / oversample_factor as f64;
    let over_t: Vec<f64> = (0..n_over).map(|i| i as f64 * over_tr).collect();
    let oversampled_grid = resample(&src_t, &signal, &over_t, config.interp);

    Ok(ProbeRegressor {
        fmri_grid,
        oversampled_grid,
        oversampled_fs_hz: 1.0 / over_tr,
    })
}

/// Detrend, window, and z-score a regressor immediately before it is
/// handed to the correlation stage.
///
/// `SPEC_FULL.md` §4.1, "Correlation prep".
pub fn prepare_for_correlation(samples: &[f64], window: WindowFunc) -> Vec<f64> {
    let detrended = detrend(samples, DetrendOrder::Linear);
    let windowed = apply_window(&detrended, window);
    zscore(&windowed)
}

/// Remove a constant or linear trend via ordinary least squares.
pub fn detrend(samples: &[f64], order: DetrendOrder) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    match order {
        DetrendOrder::None => samples.to_vec(),
        DetrendOrder::Constant => {
            let mean = samples.iter().sum::<f64>() / n as f64;
            samples.iter().map(|&v| v - mean).collect()
        }
        DetrendOrder::Linear => {
            let xs: Vec<f64> = (0..n).map(|i| i as f64).collect();
            let x_mean = xs.iter().sum::<f64>() / n as f64;
            let y_mean = samples.iter().sum::<f64>() / n as f64;
            let mut num = 0.0;
            let mut den = 0.0;
            for i in 0..n {
                num += (xs[i] - x_mean) * (samples[i] - y_mean);
                den += (xs[i] - x_mean).powi(2);
            }
            let slope = if den.abs() > 1e-15 { num / den } else { 0.0 };
            let intercept = y_mean - slope * x_mean;
            samples
                .iter()
                .zip(xs.iter())
                .map(|(&y, &x)| y - (intercept + slope * x))
                .collect()
        }
    }
}

/// Apply a symmetric taper window in place (returned as a new vector).
pub fn apply_window(samples: &[f64], window: WindowFunc) -> Vec<f64> {
    let n = samples.len();
    if n == 0 || window == WindowFunc::None {
        return samples.to_vec();
    }
    let nm1 = (n - 1).max(1) as f64;
    samples
        .iter()
        .enumerate()
        .map(|(i, &v)| {
            let phase = 2.0 * std::f64::consts::PI * i as f64 / nm1;
            let w = match window {
                WindowFunc::None => 1.0,
                WindowFunc::Hann => 0.5 - 0.5 * phase.cos(),
                WindowFunc::Hamming => 0.54 - 0.46 * phase.cos(),
                WindowFunc::Blackman => {
                    0.42 - 0.5 * phase.cos() + 0.08 * (2.0 * phase).cos()
                }
            };
            v * w
        })
        .collect()
}

/// Zero-mean, unit-variance normalize. A degenerate (constant) input
/// returns all zeros rather than dividing by zero.
pub fn zscore(samples: &[f64]) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let mean = samples.iter().sum::<f64>() / n as f64;
    let var = samples.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let std = var.sqrt();
    if std < 1e-15 {
        return vec![0.0; n];
    }
    samples.iter().map(|&v| (v - mean) / std).collect()
}

/// Remove the least-squares projection of `target` onto the span of
/// `confounds` (ordinary multiple regression, residual returned).
///
/// `SPEC_FULL.md` §4.1, "Mask-multiply + orthogonalize".
pub fn orthogonalize(target: &[f64], confounds: &[Vec<f64>]) -> Vec<f64> {
    if confounds.is_empty() {
        return target.to_vec();
    }
    let n = target.len();
    let k = confounds.len();

    // Normal equations for [confounds | 1] * beta ~= target.
    let p = k + 1;
    let mut ata = vec![vec![0.0; p]; p];
    let mut atb = vec![0.0; p];
    let col = |j: usize, i: usize| -> f64 {
        if j < k {
            confounds[j][i]
        } else {
            1.0
        }
    };
    for a in 0..p {
        for b in 0..p {
            let mut s = 0.0;
            for i in 0..n {
                s += col(a, i) * col(b, i);
            }
            ata[a][b] = s;
        }
        let mut s = 0.0;
        for i in 0..n {
            s += col(a, i) * target[i];
        }
        atb[a] = s;
    }

    let Some(beta) = solve_linear(&ata, &atb) else {
        return target.to_vec();
    };

    (0..n)
        .map(|i| {
            let mut fitted = 0.0;
            for (a, &coeff) in beta.iter().enumerate() {
                fitted += coeff * col(a, i);
            }
            target[i] - fitted
        })
        .collect()
}

/// Gaussian elimination with partial pivoting for a small dense system.
fn solve_linear(a: &[Vec<f64>], b: &[f64]) -> Option<Vec<f64>> {
    let n = a.len();
    let mut m: Vec<Vec<f64>> = a.iter().map(|row| row.clone()).collect();
    let mut rhs = b.to_vec();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| m[i][col].abs().partial_cmp(&m[j][col].abs()).unwrap())?;
        if m[pivot][col].abs() < 1e-12 {
            return None;
        }
        m.swap(col, pivot);
        rhs.swap(col, pivot);
        for row in (col + 1)..n {
            let factor = m[row][col] / m[col][col];
            for c in col..n {
                m[row][c] -= factor * m[col][c];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let mut s = rhs[row];
        for c in (row + 1)..n {
            s -= m[row][c] * x[c];
        }
        x[row] = s / m[row][row];
    }
    Some(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn linear_detrend_removes_ramp() {
        let samples: Vec<f64> = (0..50).map(|i| i as f64 * 0.3 + 2.0).collect();
        let out = detrend(&samples, DetrendOrder::Linear);
        let max_abs = out.iter().cloned().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        assert!(max_abs < 1e-8, "max_abs={max_abs}");
    }

    #[test]
    fn zscore_has_zero_mean_unit_variance() {
        let samples = vec![1.0, 2.0, 3.0, 4.0, 5.0];
        let out = zscore(&samples);
        let mean = out.iter().sum::<f64>() / out.len() as f64;
        let var = out.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / out.len() as f64;
        assert!(mean.abs() < 1e-9);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn constant_input_zscores_to_zero() {
        let samples = vec![5.0; 10];
        let out = zscore(&samples);
        assert!(out.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn orthogonalize_removes_confound_correlation() {
        let n = 100;
        let confound: Vec<f64> = (0..n).map(|i| (i as f64 * 0.1).sin()).collect();
        let target: Vec<f64> = confound.iter().map(|&c| c * 3.0 + 1.0).collect();
        let residual = orthogonalize(&target, &[confound]);
        let max_abs = residual.iter().cloned().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        assert!(max_abs < 1e-6, "max_abs={max_abs}");
    }

    #[test]
    fn prepare_probe_regressor_preserves_grid_lengths() {
        let raw: Vec<f64> = (0..1000).map(|i| (i as f64 * 0.05).sin()).collect();
        let cfg = PrepConfig::default();
        let prepped = prepare_probe_regressor(&raw, 50.0, 1.5, 100, &cfg).unwrap();
        assert_eq!(prepped.fmri_grid.len(), 100);
        assert_eq!(prepped.oversampled_grid.len(), 100 * cfg.oversample_factor);
    }
}
