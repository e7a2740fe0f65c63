//! Per-voxel cross-correlation against the probe regressor.
//!
//! `SPEC_FULL.md` §4.2. Grounded on `compute_gcc_phat` in
//! `crates/vsg_core/src/analysis/methods/gcc_phat.rs`: zero-pad to the
//! next power of two, FFT both signals, form and reweight the
//! cross-power spectrum, inverse FFT, then rotate so zero lag sits at
//! the array's center. Each voxel's correlation slice is produced by a
//! worker in the pool from `crate::workers`.
//!
//! Both sides of the correlation run on the oversampled grid (`O x`
//! the fMRI rate, `SPEC_FULL.md` §3 "Lag scale S" / §4.2 step 1): the
//! reference is already resampled there by
//! `regressor::prep::prepare_probe_regressor`, and each voxel row is
//! resampled from the fMRI grid to the oversampled grid here (skipped
//! when `oversample_factor == 1`) before the FFT.

use ndarray::Array2;
use num_complex::Complex64;
use parking_lot::Mutex;
use rustfft::FftPlanner;
use std::sync::Arc;

use super::methods::{apply_weighting, CorrWeighting};
use crate::data::{VoxelCube, VoxelMatrix};
use crate::error::{PipelineError, PipelineResult};
use crate::regressor::{apply_window, resample, InterpType, WindowFunc};
use crate::workers::run_pool;

/// Configuration for the correlation stage.
#[derive(Debug, Clone)]
pub struct CorrelationConfig {
    pub weighting: CorrWeighting,
    pub detrend: bool,
    pub window: WindowFunc,
    /// Sample rate (Hz) `data`'s rows are recorded at (the native fMRI
    /// grid), used to resample each voxel onto the oversampled grid.
    pub source_fs_hz: f64,
    /// `O`: how many oversampled samples per native fMRI sample. `1`
    /// skips the resample step entirely, per §4.2 step 1.
    pub oversample_factor: usize,
    /// Interpolator used for the fMRI-grid -> oversampled-grid resample.
    pub interp: InterpType,
    /// Sample rate (Hz) correlation and the lag axis operate at:
    /// `oversample_factor * source_fs_hz`.
    pub fs_hz: f64,
    pub lag_min: f64,
    pub lag_max: f64,
    pub nprocs: usize,
}

/// Output of the correlation stage: one correlation slice per voxel row,
/// the shared lag axis (seconds) those slices are indexed against, and
/// each voxel's mean signal value (used downstream for global-mean
/// weighting in refinement).
pub struct CorrelationOutput {
    pub correlations: VoxelCube<f64>,
    pub lags: Vec<f64>,
    pub voxel_means: Vec<f64>,
}

/// Run the correlation stage over every row of `data` (on the native
/// fMRI grid) against `probe` (already on the oversampled grid).
pub fn run_correlation_stage(
    data: &VoxelMatrix<f64>,
    probe: &[f64],
    config: &CorrelationConfig,
) -> PipelineResult<CorrelationOutput> {
    let n_voxels = data.nrows();
    let n_time = data.ncols();
    let oversample_factor = config.oversample_factor.max(1);
    let n_time_os = n_time * oversample_factor;
    if probe.len() != n_time_os {
        return Err(PipelineError::RowCountMismatch {
            context: "correlation reference length vs. voxel time series length x oversample factor",
            expected: n_time_os,
            actual: probe.len(),
        });
    }
    if n_voxels == 0 {
        return Err(PipelineError::EmptyVoxelSet);
    }

    let weighting = if config.weighting.requires_detrend() && !config.detrend {
        tracing::warn!(
            weighting = ?config.weighting,
            "weighting requires detrended inputs; forcing detrend=true"
        );
        config.weighting
    } else {
        config.weighting
    };
    let detrend = config.detrend || config.weighting.requires_detrend();

    let fft_len = (2 * n_time_os - 1).next_power_of_two();
    let planner = Arc::new(Mutex::new(FftPlanner::<f64>::new()));

    let prepped_probe = prep_signal(probe, detrend, config.window);
    let probe_spectrum = {
        let mut planner = planner.lock();
        let fft = planner.plan_fft_forward(fft_len);
        let mut buf = zero_pad(&prepped_probe, fft_len);
        fft.process(&mut buf);
        buf
    };
    let probe_power: Vec<f64> = probe_spectrum.iter().map(|c| c.norm_sqr()).collect();

    let rows: Vec<Vec<f64>> = data.rows().into_iter().map(|r| r.to_vec()).collect();

    let weighting_owned = weighting;
    let window_owned = config.window;
    let probe_spectrum = Arc::new(probe_spectrum);
    let probe_power = Arc::new(probe_power);
    let source_fs_hz = config.source_fs_hz;
    let fs_hz = config.fs_hz;
    let interp = config.interp;

    // Oversampled-grid timestamps each native-rate row resamples onto
    // (step 1 of §4.2; identity when `oversample_factor == 1`).
    let src_t: Vec<f64> = (0..n_time).map(|i| i as f64 / source_fs_hz).collect();
    let over_t: Vec<f64> = (0..n_time_os).map(|i| i as f64 / fs_hz).collect();
    let src_t = Arc::new(src_t);
    let over_t = Arc::new(over_t);

    let results: Vec<(Vec<f64>, f64)> = run_pool(rows, config.nprocs, move |row| {
        let mean = row.iter().sum::<f64>() / row.len().max(1) as f64;
        let row_os = if oversample_factor <= 1 {
            row
        } else {
            resample(&src_t, &row, &over_t, interp)
        };
        let prepped = prep_signal(&row_os, detrend, window_owned);

        let mut buf = zero_pad(&prepped, fft_len);
        let voxel_spectrum = {
            let mut planner = planner.lock();
            let fft = planner.plan_fft_forward(fft_len);
            fft.process(&mut buf);
            buf
        };
        let voxel_power: Vec<f64> = voxel_spectrum.iter().map(|c| c.norm_sqr()).collect();

        let mut cross: Vec<Complex64> = probe_spectrum
            .iter()
            .zip(voxel_spectrum.iter())
            .map(|(p, v)| p * v.conj())
            .collect();
        apply_weighting(&mut cross, &probe_power, &voxel_power, weighting_owned);

        let mut ifft_buf = cross;
        {
            let mut planner = planner.lock();
            let ifft = planner.plan_fft_inverse(fft_len);
            ifft.process(&mut ifft_buf);
        }
        let scale = 1.0 / fft_len as f64;
        let correlation: Vec<f64> = ifft_buf.iter().map(|c| c.re * scale).collect();

        (center_correlation(&correlation, n_time_os), mean)
    });

    let lags: Vec<f64> = {
        let half = (n_time_os as isize) - 1;
        (-half..=half).map(|k| k as f64 / config.fs_hz).collect()
    };

    let n_lags = lags.len();
    let mut correlations = Array2::<f64>::zeros((n_voxels, n_lags));
    let mut voxel_means = vec![0.0; n_voxels];
    for (row_idx, (slice, mean)) in results.into_iter().enumerate() {
        for (col, v) in slice.into_iter().enumerate() {
            correlations[[row_idx, col]] = v;
        }
        voxel_means[row_idx] = mean;
    }

    let _ = config.lag_min;
    let _ = config.lag_max;

    Ok(CorrelationOutput {
        correlations,
        lags,
        voxel_means,
    })
}

fn prep_signal(samples: &[f64], detrend: bool, window: WindowFunc) -> Vec<f64> {
    let detrended = if detrend {
        crate::regressor::prep::detrend(samples, crate::regressor::prep::DetrendOrder::Linear)
    } else {
        samples.to_vec()
    };
    apply_window(&detrended, window)
}

fn zero_pad(samples: &[f64], len: usize) -> Vec<Complex64> {
    let mut buf: Vec<Complex64> = samples.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    buf.resize(len, Complex64::new(0.0, 0.0));
    buf
}

/// Extract the `2*n_time - 1` lags centered on zero from a full-length
/// (possibly zero-padded) linear cross-correlation, matching
/// `compute_gcc_phat`'s centering rotation.
fn center_correlation(full: &[f64], n_time: usize) -> Vec<f64> {
    let fft_len = full.len();
    let half = (n_time - 1) as isize;
    (-half..=half)
        .map(|lag| {
            let idx = lag.rem_euclid(fft_len as isize) as usize;
            full[idx]
        })
        .collect()
}
