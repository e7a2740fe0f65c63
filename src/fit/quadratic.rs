//! Quadratic (parabolic) peak fit variant.
//!
//! `SPEC_FULL.md` §4.3, "Quadratic variant". Three-point parabolic
//! interpolation directly on the correlation values (not their log), with
//! sigma derived from the parabola's curvature rather than a Gaussian
//! width.

use super::peak::{classify, locate_peak};
use super::types::{wrap_lag, FailReason, FitOutcome, PeakFitConfig};

/// Run the quadratic fit variant over one correlation slice.
pub fn fit_quadratic(
    c: &[f64],
    s: &[f64],
    config: &PeakFitConfig,
    initial_lag: Option<f64>,
) -> FitOutcome {
    let flip = if config.bipolar {
        let max = c.iter().cloned().fold(f64::MIN, f64::max);
        let min = c.iter().cloned().fold(f64::MAX, f64::min);
        if max < -min {
            -1.0
        } else {
            1.0
        }
    } else {
        1.0
    };
    let flipped: Vec<f64> = c.iter().map(|&v| v * flip).collect();

    let Some((peak, mut fail)) = locate_peak(&flipped, s, config, initial_lag) else {
        return FitOutcome {
            bin_index: c.len() / 2,
            lag: 0.0,
            amplitude: 0.0,
            sigma: 0.0,
            mask: false,
            fail_reason: FailReason::AMPLITUDE_TOO_LOW
                | FailReason::LAG_OUT_OF_RANGE
                | FailReason::EDGE_OF_WINDOW,
        };
    };

    let i = peak.index;
    let (mu, sigma, amp, converged) = if i == 0 || i + 1 >= flipped.len() {
        (s[i], 0.0, flipped[i], false)
    } else {
        let y0 = flipped[i - 1];
        let y1 = flipped[i];
        let y2 = flipped[i + 1];
        let dx = s[i + 1] - s[i];

        let a = (y0 + y2) / 2.0 - y1;
        let b = (y2 - y0) / 2.0;

        if a.abs() < 1e-12 {
            (s[i], 0.0, y1, false)
        } else {
            let delta = (-b / (2.0 * a)).clamp(-1.0, 1.0);
            let mu = s[i] + delta * dx;
            let refined_amp = y1 - (b * b) / (4.0 * a);
            // Curvature-derived width: a parabola `y = a*u^2 + ...` near a
            // peak of height `refined_amp` crosses zero at
            // `u = sqrt(-refined_amp / a)`; report that half-width as sigma.
            let sigma = if a < 0.0 && refined_amp > 0.0 {
                (-refined_amp / a).sqrt() * dx
            } else {
                0.0
            };
            (mu, sigma, refined_amp, true)
        }
    };

    if !converged {
        fail |= FailReason::FIT_DID_NOT_CONVERGE;
    }

    let wrapped_lag = wrap_lag(mu, config.lag_mod);
    let fail = classify(config, wrapped_lag, sigma, amp * flip, fail, converged);
    let masked = !(config.enforce_thresh && !fail.is_empty());

    let (lag, amplitude, sigma_out) = if !masked && config.zero_out_bad_fit {
        (0.0, 0.0, 0.0)
    } else {
        (wrapped_lag, amp * flip, sigma)
    };

    FitOutcome {
        bin_index: peak.index,
        lag,
        amplitude,
        sigma: sigma_out,
        mask: masked,
        fail_reason: fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symmetric_peak_returns_zero_subbin_offset() {
        let s: Vec<f64> = (0..5).map(|i| i as f64 - 2.0).collect();
        let c = vec![0.3, 0.8, 1.0, 0.8, 0.3];
        let cfg = PeakFitConfig {
            lag_min: -2.0,
            lag_max: 2.0,
            lthresh: 0.1,
            ..Default::default()
        };
        let out = fit_quadratic(&c, &s, &cfg, None);
        assert!(out.lag.abs() < 1e-9);
        assert!(out.mask);
    }

    #[test]
    fn asymmetric_peak_shifts_toward_larger_neighbor() {
        let s: Vec<f64> = (0..5).map(|i| i as f64 - 2.0).collect();
        let c = vec![0.3, 0.6, 1.0, 0.8, 0.4];
        let cfg = PeakFitConfig {
            lag_min: -2.0,
            lag_max: 2.0,
            lthresh: 0.1,
            ..Default::default()
        };
        let out = fit_quadratic(&c, &s, &cfg, None);
        assert!(out.lag > 0.0);
    }
}
