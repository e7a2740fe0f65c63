//! Fixed-delay fit mode: skip fitting entirely.
//!
//! `SPEC_FULL.md` §4.3, "Fixed-delay mode".

use super::types::{FailReason, FitOutcome};

/// Return the fixed-delay outcome for one correlation slice: `lag` is the
/// configured value verbatim, `amplitude` is read off at the nearest bin,
/// `sigma = 1`, and the voxel always passes (`mask = true`).
pub fn fit_fixed(c: &[f64], s: &[f64], fixed_lag: f64) -> FitOutcome {
    let bin_index = s
        .iter()
        .enumerate()
        .min_by(|(_, &a), (_, &b)| (a - fixed_lag).abs().partial_cmp(&(b - fixed_lag).abs()).unwrap())
        .map(|(i, _)| i)
        .unwrap_or(0);

    FitOutcome {
        bin_index,
        lag: fixed_lag,
        amplitude: c.get(bin_index).copied().unwrap_or(0.0),
        sigma: 1.0,
        mask: true,
        fail_reason: FailReason::empty(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_matches_request_exactly() {
        let s: Vec<f64> = (0..21).map(|i| (i as f64 - 10.0) * 0.5).collect();
        let c: Vec<f64> = s.iter().map(|&x| (-x * x).exp()).collect();
        let out = fit_fixed(&c, &s, 2.0);
        assert_eq!(out.lag, 2.0);
        assert!(out.mask);
        assert_eq!(out.sigma, 1.0);
        assert!(out.fail_reason.is_empty());
    }
}
