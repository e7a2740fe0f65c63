//! Band-limit filtering for the probe regressor and per-voxel time series.
//!
//! `SPEC_FULL.md` §4.1 step 3 (band selection) and step 4 (anti-alias).
//! Zero-phase IIR designs run the same biquad cascade forward then
//! backward (a "filtfilt") so the filter introduces no phase shift; the
//! FFT variants zero (brickwall) or linearly taper (trapezoidal) the
//! rejected spectral region directly.

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type as BiquadType, Q_BUTTERWORTH_F64};
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, PipelineResult};

/// Named physiological bands plus an arbitrary four-corner trapezoid.
///
/// `SPEC_FULL.md` §4.1 step 3.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum BandLimit {
    /// Very-low-frequency band, ~0.009-0.15 Hz.
    Vlf,
    /// Low-frequency-oscillation band, ~0.01-0.15 Hz.
    Lfo,
    /// Respiratory band, ~0.2-0.5 Hz.
    Respiratory,
    /// Cardiac band, ~0.7-2.0 Hz.
    Cardiac,
    /// Arbitrary four-corner trapezoid: (lower_stop, lower_pass, upper_pass, upper_stop) Hz.
    Arbitrary {
        lower_stop: f64,
        lower_pass: f64,
        upper_pass: f64,
        upper_stop: f64,
    },
    /// No band-limit filtering.
    None,
}

impl BandLimit {
    /// Resolve to the four corner frequencies `(lower_stop, lower_pass,
    /// upper_pass, upper_stop)` in Hz.
    pub fn corners(self) -> Option<(f64, f64, f64, f64)> {
        match self {
            BandLimit::Vlf => Some((0.0, 0.009, 0.15, 0.2)),
            BandLimit::Lfo => Some((0.0, 0.01, 0.15, 0.2)),
            BandLimit::Respiratory => Some((0.1, 0.2, 0.5, 0.6)),
            BandLimit::Cardiac => Some((0.6, 0.7, 2.0, 2.1)),
            BandLimit::Arbitrary {
                lower_stop,
                lower_pass,
                upper_pass,
                upper_stop,
            } => Some((lower_stop, lower_pass, upper_pass, upper_stop)),
            BandLimit::None => None,
        }
    }
}

/// Apply a zero-phase band-pass filter built from a cascade of
/// Butterworth biquads, run forward then backward.
///
/// `order` is the number of second-order sections cascaded in each
/// direction (total filter order is `4 * order`, since it runs forward
/// and backward through `order` biquads each covering two poles).
pub fn zero_phase_bandpass(
    samples: &[f64],
    fs_hz: f64,
    band: BandLimit,
    order: usize,
) -> PipelineResult<Vec<f64>> {
    let Some((lower_stop, lower_pass, upper_pass, _upper_stop)) = band.corners() else {
        return Ok(samples.to_vec());
    };
    if order == 0 {
        return Ok(samples.to_vec());
    }

    let mut stages = Vec::with_capacity(order * 2);
    if lower_pass > 0.0 {
        let coeffs = Coefficients::<f64>::from_params(
            BiquadType::HighPass,
            fs_hz.hz(),
            ((lower_stop + lower_pass) / 2.0).max(1e-6).hz(),
            Q_BUTTERWORTH_F64,
        )
        .map_err(|e| {
            PipelineError::UnsupportedOption {
                option: "band_limit",
                value: format!("{e:?}"),
            }
        })?;
        for _ in 0..order {
            stages.push(coeffs);
        }
    }
    {
        let coeffs = Coefficients::<f64>::from_params(
            BiquadType::LowPass,
            fs_hz.hz(),
            upper_pass.hz(),
            Q_BUTTERWORTH_F64,
        )
        .map_err(|e| {
            PipelineError::UnsupportedOption {
                option: "band_limit",
                value: format!("{e:?}"),
            }
        })?;
        for _ in 0..order {
            stages.push(coeffs);
        }
    }

    Ok(filtfilt(samples, &stages))
}

/// Zero-phase low-pass filter (for the §4.1 step-4 anti-alias stage).
pub fn zero_phase_lowpass(samples: &[f64], fs_hz: f64, cutoff_hz: f64, order: usize) -> PipelineResult<Vec<f64>> {
    if order == 0 {
        return Ok(samples.to_vec());
    }
    let coeffs = Coefficients::<f64>::from_params(
        BiquadType::LowPass,
        fs_hz.hz(),
        cutoff_hz.hz(),
        Q_BUTTERWORTH_F64,
    )
    .map_err(|e| PipelineError::UnsupportedOption {
        option: "anti_alias_cutoff",
        value: format!("{e:?}"),
    })?;
    let stages = vec![coeffs; order];
    Ok(filtfilt(samples, &stages))
}

/// Run a cascade of biquad sections forward, then backward over the
/// result, cancelling phase distortion (the classic `filtfilt`).
fn filtfilt(samples: &[f64], stages: &[Coefficients<f64>]) -> Vec<f64> {
    if samples.is_empty() || stages.is_empty() {
        return samples.to_vec();
    }
    let forward = run_cascade(samples, stages, false);
    run_cascade(&forward, stages, true)
}

fn run_cascade(samples: &[f64], stages: &[Coefficients<f64>], reverse: bool) -> Vec<f64> {
    let mut buf: Vec<f64> = samples.to_vec();
    if reverse {
        buf.reverse();
    }
    for coeffs in stages {
        let mut filt = DirectForm1::<f64>::new(*coeffs);
        for sample in buf.iter_mut() {
            *sample = filt.run(*sample);
        }
    }
    if reverse {
        buf.reverse();
    }
    buf
}

/// Anti-alias / arbitrary-band FFT masking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum FftFilterShape {
    /// Hard zero outside the pass band.
    #[default]
    Brickwall,
    /// Linear taper between stop and pass corners.
    Trapezoidal,
}

/// Apply a band-pass filter entirely in the frequency domain: zero (or
/// linearly taper, per `shape`) bins outside `[lower_pass, upper_pass]`,
/// tapering across `[lower_stop, lower_pass]` and `[upper_pass,
/// upper_stop]` when `shape` is [`FftFilterShape::Trapezoidal`].
///
/// Used for the anti-alias stage (`SPEC_FULL.md` §4.1 step 4, FFT
/// brickwall/trapezoidal variants) and for sidelobe notch filtering
/// (§4.1, "Autocorrelation sidelobe check").
pub fn fft_band_filter(
    samples: &[f64],
    fs_hz: f64,
    lower_stop: f64,
    lower_pass: f64,
    upper_pass: f64,
    upper_stop: f64,
    shape: FftFilterShape,
    notch: bool,
) -> Vec<f64> {
    let n = samples.len();
    if n == 0 {
        return Vec::new();
    }
    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let ifft = planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex64> = samples.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    fft.process(&mut buf);

    let df = fs_hz / n as f64;
    for (k, bin) in buf.iter_mut().enumerate() {
        let freq = if k <= n / 2 {
            k as f64 * df
        } else {
            (k as f64 - n as f64) * df
        }
        .abs();
        let mut gain = band_gain(freq, lower_stop, lower_pass, upper_pass, upper_stop, shape);
        if notch {
            gain = 1.0 - gain;
        }
        *bin *= gain;
    }

    ifft.process(&mut buf);
    let scale = 1.0 / n as f64;
    buf.iter().map(|c| c.re * scale).collect()
}

fn band_gain(
    freq: f64,
    lower_stop: f64,
    lower_pass: f64,
    upper_pass: f64,
    upper_stop: f64,
    shape: FftFilterShape,
) -> f64 {
    match shape {
        FftFilterShape::Brickwall => {
            if freq >= lower_pass && freq <= upper_pass {
                1.0
            } else {
                0.0
            }
        }
        FftFilterShape::Trapezoidal => {
            if freq < lower_stop || freq > upper_stop {
                0.0
            } else if freq < lower_pass {
                if (lower_pass - lower_stop).abs() < 1e-12 {
                    1.0
                } else {
                    (freq - lower_stop) / (lower_pass - lower_stop)
                }
            } else if freq <= upper_pass {
                1.0
            } else if (upper_stop - upper_pass).abs() < 1e-12 {
                1.0
            } else {
                (upper_stop - freq) / (upper_stop - upper_pass)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fft_brickwall_removes_out_of_band_tone() {
        let fs = 100.0;
        let n = 1024;
        let t: Vec<f64> = (0..n).map(|i| i as f64 / fs).collect();
        // 0.05 Hz in-band tone plus a 5 Hz out-of-band tone.
        let samples: Vec<f64> = t
            .iter()
            .map(|&x| (2.0 * std::f64::consts::PI * 0.05 * x).sin() + (2.0 * std::f64::consts::PI * 5.0 * x).sin())
            .collect();
        let filtered = fft_band_filter(&samples, fs, 0.0, 0.01, 0.2, 0.25, FftFilterShape::Brickwall, false);

        let in_band: Vec<f64> = t.iter().map(|&x| (2.0 * std::f64::consts::PI * 0.05 * x).sin()).collect();
        let rmse = filtered
            .iter()
            .zip(in_band.iter())
            .map(|(&a, &b)| (a - b).powi(2))
            .sum::<f64>()
            / n as f64;
        assert!(rmse.sqrt() < 0.1, "rmse was {}", rmse.sqrt());
    }

    #[test]
    fn zero_phase_lowpass_preserves_length() {
        let samples: Vec<f64> = (0..200).map(|i| (i as f64 * 0.1).sin()).collect();
        let filtered = zero_phase_lowpass(&samples, 10.0, 1.0, 2).unwrap();
        assert_eq!(filtered.len(), samples.len());
    }

    #[test]
    fn none_band_is_identity() {
        let samples = vec![1.0, 2.0, 3.0];
        let out = zero_phase_bandpass(&samples, 10.0, BandLimit::None, 3).unwrap();
        assert_eq!(out, samples);
    }
}
