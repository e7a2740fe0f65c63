//! Autocorrelation sidelobe detection and mitigation.
//!
//! A probe regressor with strong periodic structure (cardiac/respiratory
//! leakage, a near-periodic task design) produces an autocorrelation
//! function with secondary peaks nearly as tall as the zero-lag peak.
//! Left alone, the correlation stage's peak finder can lock onto a
//! sidelobe instead of the true delay. `SPEC_FULL.md` §4.1,
//! "Autocorrelation sidelobe check".

use super::filters::{fft_band_filter, FftFilterShape};

/// Sidelobe mitigation the prep pipeline applies when a sidelobe is
/// detected.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SidelobeFix {
    /// No sidelobe found above threshold; no action needed.
    None,
    /// Wrap fitted lags modulo this many seconds instead of suppressing
    /// the regressor (cheapest fix, used when the sidelobe period is
    /// short relative to the lag search window).
    LagMod(f64),
    /// Notch out the sidelobe's frequency from the regressor before
    /// correlation.
    Notch { center_hz: f64, half_width_hz: f64 },
    /// Leave the regressor alone but widen the despeckle acceptance
    /// threshold, since the sidelobe will make isolated voxels jump to
    /// the secondary peak.
    WidenDespeckleThreshold(f64),
}

/// Autocorrelation of `samples` at lags `0..=max_lag_samples`, normalized
/// so that `result[0] == 1.0`.
pub fn autocorrelation(samples: &[f64], max_lag_samples: usize) -> Vec<f64> {
    let n = samples.len();
    let mean = samples.iter().sum::<f64>() / n.max(1) as f64;
    let centered: Vec<f64> = samples.iter().map(|&v| v - mean).collect();
    let zero_lag: f64 = centered.iter().map(|&v| v * v).sum();
    if zero_lag < 1e-15 {
        return vec![0.0; max_lag_samples + 1];
    }
    (0..=max_lag_samples.min(n.saturating_sub(1)))
        .map(|lag| {
            let s: f64 = (0..n - lag).map(|i| centered[i] * centered[i + lag]).sum();
            s / zero_lag
        })
        .collect()
}

/// Scan the autocorrelation of `samples` for a secondary peak above
/// `threshold` (relative to the zero-lag peak, which is always 1.0) and
/// recommend a fix.
///
/// `fs_hz` is the sample rate of `samples` (used to report the sidelobe
/// frequency for the `Notch` fix); `lag_search_max_sec` bounds how far
/// out a sidelobe needs to be before `LagMod` is preferred over `Notch`
/// (a sidelobe inside the lag search window must be filtered, not
/// wrapped around).
pub fn check_sidelobe(
    samples: &[f64],
    fs_hz: f64,
    lag_search_max_sec: f64,
    threshold: f64,
) -> SidelobeFix {
    let max_lag_samples = samples.len().saturating_sub(1);
    let ac = autocorrelation(samples, max_lag_samples);

    // Skip a small guard region around zero lag so we don't flag the
    // main lobe's own shoulder as a sidelobe.
    let guard = (fs_hz * 0.5).round() as usize + 1;
    let Some((peak_lag, &peak_val)) = ac
        .iter()
        .enumerate()
        .skip(guard.min(ac.len()))
        .max_by(|(_, a), (_, b)| a.abs().partial_cmp(&b.abs()).unwrap())
    else {
        return SidelobeFix::None;
    };

    if peak_val.abs() < threshold {
        return SidelobeFix::None;
    }

    let period_sec = peak_lag as f64 / fs_hz;
    if period_sec > lag_search_max_sec {
        SidelobeFix::LagMod(period_sec)
    } else if period_sec > 1e-6 {
        SidelobeFix::Notch {
            center_hz: 1.0 / period_sec,
            half_width_hz: 0.05,
        }
    } else {
        SidelobeFix::WidenDespeckleThreshold(threshold)
    }
}

/// Apply a [`SidelobeFix::Notch`] to a regressor via the FFT band
/// filter's notch mode.
pub fn apply_notch(samples: &[f64], fs_hz: f64, center_hz: f64, half_width_hz: f64) -> Vec<f64> {
    fft_band_filter(
        samples,
        fs_hz,
        0.0,
        (center_hz - half_width_hz).max(0.0),
        center_hz + half_width_hz,
        center_hz + half_width_hz + 0.01,
        FftFilterShape::Trapezoidal,
        true,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn autocorrelation_of_white_noise_decays_quickly() {
        let n = 2000;
        let mut state: u64 = 12345;
        let samples: Vec<f64> = (0..n)
            .map(|_| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                ((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0
            })
            .collect();
        let ac = autocorrelation(&samples, 100);
        assert!((ac[0] - 1.0).abs() < 1e-9);
        assert!(ac[50].abs() < 0.3, "ac[50]={}", ac[50]);
    }

    #[test]
    fn periodic_signal_flags_sidelobe() {
        let fs = 20.0;
        let n = 400;
        let samples: Vec<f64> = (0..n)
            .map(|i| (2.0 * std::f64::consts::PI * 1.0 * i as f64 / fs).sin())
            .collect();
        let fix = check_sidelobe(&samples, fs, 20.0, 0.5);
        assert!(!matches!(fix, SidelobeFix::None));
    }

    #[test]
    fn flat_signal_reports_no_sidelobe() {
        let samples = vec![0.0; 200];
        let fix = check_sidelobe(&samples, 10.0, 20.0, 0.5);
        assert!(matches!(fix, SidelobeFix::None));
    }
}
