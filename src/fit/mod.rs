//! Correlation-peak location and sub-sample fitting.
//!
//! `SPEC_FULL.md` §4.3. Two peak-finder variants (Gaussian, quadratic)
//! share the peak-location contract in `peak`; a third mode skips fitting
//! altogether (`fixed`). All three produce the same [`FitOutcome`].

mod fixed;
mod gaussian;
mod peak;
mod quadratic;
mod types;

pub use fixed::fit_fixed;
pub use gaussian::fit_gaussian;
pub use quadratic::fit_quadratic;
pub use types::{wrap_lag, FailReason, FindMaxType, FitOutcome, PeakFitConfig};

/// Dispatch to the configured fit variant for one correlation slice.
///
/// `fixed_delay`, when set, takes priority over `find_max_type` per
/// `SPEC_FULL.md` §4.3 "Fixed-delay mode".
pub fn fit_one(
    c: &[f64],
    s: &[f64],
    config: &PeakFitConfig,
    find_max_type: FindMaxType,
    fixed_delay: Option<f64>,
    initial_lag: Option<f64>,
) -> FitOutcome {
    if let Some(fixed) = fixed_delay {
        return fit_fixed(c, s, fixed);
    }
    match find_max_type {
        FindMaxType::Gauss => fit_gaussian(c, s, config, initial_lag),
        FindMaxType::Quad => fit_quadratic(c, s, config, initial_lag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_delay_mode_overrides_find_max_type() {
        let s: Vec<f64> = (0..21).map(|i| (i as f64 - 10.0) * 0.5).collect();
        let c: Vec<f64> = s.iter().map(|&x| (-x * x).exp()).collect();
        let cfg = PeakFitConfig::default();
        let out = fit_one(&c, &s, &cfg, FindMaxType::Gauss, Some(1.5), None);
        assert_eq!(out.lag, 1.5);
        assert_eq!(out.sigma, 1.0);
    }
}
