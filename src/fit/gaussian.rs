//! Gaussian peak fit variant.
//!
//! `SPEC_FULL.md` §4.3, "Algorithm (Gaussian variant)". Fits
//! `a * exp(-(x - mu)^2 / (2*sigma^2))` to the samples spanning a located
//! peak, either via the fast three-point analytic log-parabola solution or
//! via a small Gauss-Newton iteration.

use super::peak::{classify, locate_peak, LocatedPeak};
use super::types::{wrap_lag, FailReason, FitOutcome, PeakFitConfig};

/// Run the Gaussian fit variant over one correlation slice.
///
/// `initial_lag` seeds the peak search (used by the despeckle refit,
/// `SPEC_FULL.md` §4.4) instead of the discrete argmax.
pub fn fit_gaussian(
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

    let (mu, sigma, amp, converged) = if config.fast_gauss {
        fit_three_point(&flipped, s, &peak)
    } else {
        fit_nonlinear(&flipped, s, &peak)
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

/// Analytic three-point fit of `log(c)` near the peak: exact when the
/// three central samples are themselves Gaussian.
fn fit_three_point(c: &[f64], s: &[f64], peak: &LocatedPeak) -> (f64, f64, f64, bool) {
    let i = peak.index;
    if i == 0 || i + 1 >= c.len() || c[i - 1] <= 0.0 || c[i] <= 0.0 || c[i + 1] <= 0.0 {
        return (s[i], 0.0, c[i].max(0.0), false);
    }
    let y0 = c[i - 1].ln();
    let y1 = c[i].ln();
    let y2 = c[i + 1].ln();
    let dx = if i + 1 < s.len() { s[i + 1] - s[i] } else { 1.0 };

    // log c(x) ~= log a - (x - mu)^2 / (2 sigma^2): a parabola in index
    // space; solve for the vertex and curvature as in `peak_fit`, then
    // convert from index-space delta to seconds via `dx`.
    let a = (y0 + y2) / 2.0 - y1;
    let b = (y2 - y0) / 2.0;
    if a.abs() < 1e-12 {
        return (s[i], 0.0, c[i], false);
    }
    let delta = -b / (2.0 * a); // in bins
    let mu = s[i] + delta * dx;
    // curvature -1/(2 sigma^2) == a / dx^2 (second derivative in x)
    let sigma_sq = -dx * dx / (2.0 * a);
    if sigma_sq <= 0.0 {
        return (mu, 0.0, c[i], false);
    }
    let sigma = sigma_sq.sqrt();
    let log_amp = y1 - (b * b) / (4.0 * a);
    (mu, sigma, log_amp.exp(), true)
}

/// Small Gauss-Newton iteration over the peak span for a non-fast
/// Gaussian fit, seeded from the three-point analytic solution.
fn fit_nonlinear(c: &[f64], s: &[f64], peak: &LocatedPeak) -> (f64, f64, f64, bool) {
    let (mu0, sigma0, amp0, seeded_ok) = fit_three_point(c, s, peak);
    if !seeded_ok || sigma0 <= 0.0 {
        return (mu0, sigma0, amp0, false);
    }

    let xs = &s[peak.start..peak.end];
    let ys = &c[peak.start..peak.end];
    if xs.len() < 3 {
        return (mu0, sigma0, amp0, false);
    }

    let mut a = amp0;
    let mut mu = mu0;
    let mut sigma = sigma0;

    for _ in 0..25 {
        // Residuals r_k = a*exp(-(x_k-mu)^2/(2 sigma^2)) - y_k and their
        // Jacobian w.r.t. (a, mu, sigma); accumulate J^T J and J^T r, solve
        // the 3x3 normal equations directly.
        let mut jtj = [[0.0_f64; 3]; 3];
        let mut jtr = [0.0_f64; 3];

        for (&x, &y) in xs.iter().zip(ys.iter()) {
            let d = x - mu;
            let e = (-d * d / (2.0 * sigma * sigma)).exp();
            let model = a * e;
            let r = model - y;
            let d_da = e;
            let d_dmu = a * e * d / (sigma * sigma);
            let d_dsigma = a * e * d * d / (sigma * sigma * sigma);
            let j = [d_da, d_dmu, d_dsigma];
            for row in 0..3 {
                jtr[row] += j[row] * r;
                for col in 0..3 {
                    jtj[row][col] += j[row] * j[col];
                }
            }
        }

        // Levenberg-style damping for stability.
        for k in 0..3 {
            jtj[k][k] += 1e-6 * jtj[k][k].max(1.0);
        }

        let Some(delta) = solve3(jtj, jtr) else {
            return (mu, sigma, a, false);
        };

        a -= delta[0];
        mu -= delta[1];
        sigma -= delta[2];
        if sigma <= 0.0 {
            sigma = sigma0.max(1e-6);
        }

        let step_norm = delta.iter().map(|v| v * v).sum::<f64>().sqrt();
        if step_norm < 1e-9 {
            return (mu, sigma, a, true);
        }
    }
    (mu, sigma, a, true)
}

/// Solve the 3x3 linear system `m * x = b` via Cramer's rule.
fn solve3(m: [[f64; 3]; 3], b: [f64; 3]) -> Option<[f64; 3]> {
    let det = det3(m);
    if det.abs() < 1e-18 {
        return None;
    }
    let mut out = [0.0; 3];
    for col in 0..3 {
        let mut mc = m;
        for row in 0..3 {
            mc[row][col] = b[row];
        }
        out[col] = det3(mc) / det;
    }
    Some(out)
}

fn det3(m: [[f64; 3]; 3]) -> f64 {
    m[0][0] * (m[1][1] * m[2][2] - m[1][2] * m[2][1])
        - m[0][1] * (m[1][0] * m[2][2] - m[1][2] * m[2][0])
        + m[0][2] * (m[1][0] * m[2][1] - m[1][1] * m[2][0])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gaussian_slice(n: usize, delta: f64, mu: f64, sigma: f64, amp: f64) -> (Vec<f64>, Vec<f64>) {
        let origin = (n / 2) as f64;
        let s: Vec<f64> = (0..n).map(|i| (i as f64 - origin) * delta).collect();
        let c: Vec<f64> = s
            .iter()
            .map(|&x| amp * (-((x - mu).powi(2)) / (2.0 * sigma * sigma)).exp())
            .collect();
        (c, s)
    }

    #[test]
    fn fast_fit_recovers_exact_gaussian() {
        let (c, s) = gaussian_slice(41, 0.25, 0.75, 1.2, 0.95);
        let cfg = PeakFitConfig {
            lag_min: -5.0,
            lag_max: 5.0,
            lthresh: 0.1,
            ..Default::default()
        };
        let out = fit_gaussian(&c, &s, &cfg, None);
        assert!(out.mask);
        assert!((out.lag - 0.75).abs() < 0.05);
        assert!((out.amplitude - 0.95).abs() < 0.05);
    }

    #[test]
    fn nonlinear_fit_matches_fast_fit_closely() {
        let (c, s) = gaussian_slice(61, 0.1, -1.3, 2.0, 0.8);
        let cfg = PeakFitConfig {
            lag_min: -10.0,
            lag_max: 10.0,
            lthresh: 0.05,
            fast_gauss: false,
            ..Default::default()
        };
        let out = fit_gaussian(&c, &s, &cfg, None);
        assert!(out.mask);
        assert!((out.lag - (-1.3)).abs() < 0.1);
        assert!((out.sigma - 2.0).abs() < 0.3);
    }

    #[test]
    fn bipolar_sign_invariance() {
        let (c, s) = gaussian_slice(41, 0.25, 0.5, 1.0, 0.9);
        let flipped: Vec<f64> = c.iter().map(|&v| -v).collect();
        let cfg = PeakFitConfig {
            lag_min: -5.0,
            lag_max: 5.0,
            lthresh: 0.1,
            bipolar: true,
            ..Default::default()
        };
        let pos = fit_gaussian(&c, &s, &cfg, None);
        let neg = fit_gaussian(&flipped, &s, &cfg, None);
        assert!((pos.lag - neg.lag).abs() < 1e-6);
        assert!((pos.amplitude.abs() - neg.amplitude.abs()).abs() < 1e-6);
    }

    #[test]
    fn amplitude_too_low_sets_fail_bit_and_zeros() {
        let n = 41;
        let s: Vec<f64> = (0..n).map(|i| (i as f64 - 20.0) * 0.25).collect();
        let c = vec![0.01; n];
        let cfg = PeakFitConfig {
            lag_min: -5.0,
            lag_max: 5.0,
            lthresh: 0.3,
            ..Default::default()
        };
        let out = fit_gaussian(&c, &s, &cfg, None);
        assert!(!out.mask);
        assert!(out.fail_reason.contains(FailReason::AMPLITUDE_TOO_LOW));
        assert_eq!(out.lag, 0.0);
        assert_eq!(out.amplitude, 0.0);
    }
}
