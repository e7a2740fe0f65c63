//! Cross-spectrum weighting variants for the correlation stage.
//!
//! `SPEC_FULL.md` §4.2. Grounded on the `CorrelationMethod` trait in
//! `crates/vsg_core/src/analysis/methods/gcc_phat.rs`: a cross-power
//! spectrum computed via a cached FFT planner, then weighted before the
//! inverse transform. Each variant here reweights the same cross-power
//! spectrum differently rather than implementing a separate method end
//! to end, since every variant shares the same FFT plan and centering
//! logic.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

/// Cross-spectrum weighting applied before the inverse FFT.
///
/// `SPEC_FULL.md` §9 Open Question (b): Liang and Eckart weighting
/// assume a detrended input (their denominators are only meaningful
/// once DC and linear trend are removed), so the correlation stage
/// forces `detrend = true` whenever either is selected and logs a
/// warning if the caller had disabled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CorrWeighting {
    /// Plain cross-correlation: no reweighting.
    #[default]
    None,
    /// Phase transform: keep phase, discard magnitude.
    Phat,
    /// Smoothed-coherence-style weighting: normalize by the geometric
    /// mean of the two auto-power spectra.
    Liang,
    /// SNR-weighted (Eckart-filter) weighting: emphasizes frequencies
    /// where cross-power is large relative to the auto-power product.
    Eckart,
}

impl CorrWeighting {
    /// Whether this weighting requires its inputs to be detrended.
    pub fn requires_detrend(self) -> bool {
        matches!(self, CorrWeighting::Liang | CorrWeighting::Eckart)
    }
}

/// Reweight a cross-power spectrum `g = F(ref) * conj(F(test))` in
/// place, given the two auto-power spectra.
pub fn apply_weighting(g: &mut [Complex64], ref_power: &[f64], test_power: &[f64], weighting: CorrWeighting) {
    match weighting {
        CorrWeighting::None => {}
        CorrWeighting::Phat => {
            for val in g.iter_mut() {
                let mag = val.norm();
                if mag > 1e-12 {
                    *val /= mag;
                }
            }
        }
        CorrWeighting::Liang => {
            for (val, (&px, &py)) in g.iter_mut().zip(ref_power.iter().zip(test_power.iter())) {
                let denom = (px * py).sqrt();
                if denom > 1e-12 {
                    *val /= denom;
                }
            }
        }
        CorrWeighting::Eckart => {
            for (val, (&px, &py)) in g.iter_mut().zip(ref_power.iter().zip(test_power.iter())) {
                let denom = px * py;
                if denom > 1e-12 {
                    let mag = val.norm();
                    *val = *val * (mag / denom);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_weighting_is_identity() {
        let mut g = vec![Complex64::new(2.0, 1.0), Complex64::new(-1.0, 3.0)];
        let original = g.clone();
        apply_weighting(&mut g, &[1.0, 1.0], &[1.0, 1.0], CorrWeighting::None);
        assert_eq!(g, original);
    }

    #[test]
    fn phat_weighting_normalizes_magnitude_to_one() {
        let mut g = vec![Complex64::new(3.0, 4.0)];
        apply_weighting(&mut g, &[1.0], &[1.0], CorrWeighting::Phat);
        assert!((g[0].norm() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn liang_and_eckart_require_detrend() {
        assert!(CorrWeighting::Liang.requires_detrend());
        assert!(CorrWeighting::Eckart.requires_detrend());
        assert!(!CorrWeighting::None.requires_detrend());
        assert!(!CorrWeighting::Phat.requires_detrend());
    }
}
