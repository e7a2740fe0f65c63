//! Voxel selection mask for regressor refinement.
//!
//! `SPEC_FULL.md` §4.5, "Voxel selection". A voxel contributes to the
//! refined regressor only if its fit passed thresholding and its lag,
//! amplitude, and width all fall within the refinement-specific bounds
//! (which may be tighter than the fit's own thresholds).

use serde::{Deserialize, Serialize};

use crate::data::FitResults;

/// Which side of zero lag may contribute to the refined regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LagMaskSide {
    #[default]
    Both,
    Positive,
    Negative,
}

/// Bounds used to select voxels for refinement.
#[derive(Debug, Clone)]
pub struct RefineMaskConfig {
    pub lag_min: f64,
    pub lag_max: f64,
    pub lag_mask_side: LagMaskSide,
    pub amplitude_min: f64,
    pub max_sigma: f64,
    /// Explicit per-voxel include mask (e.g. gray-matter segmentation);
    /// `None` means no additional restriction.
    pub include: Option<Vec<bool>>,
    /// Explicit per-voxel exclude mask; any `true` entry is dropped even
    /// if every other criterion passes.
    pub exclude: Option<Vec<bool>>,
}

impl Default for RefineMaskConfig {
    fn default() -> Self {
        Self {
            lag_min: -20.0,
            lag_max: 20.0,
            lag_mask_side: LagMaskSide::Both,
            amplitude_min: 0.3,
            max_sigma: 100.0,
            include: None,
            exclude: None,
        }
    }
}

/// Compute the boolean refinement mask for every voxel row in `fit`.
pub fn compute_refine_mask(fit: &FitResults<f64>, config: &RefineMaskConfig) -> Vec<bool> {
    (0..fit.len())
        .map(|row| {
            if !fit.mask[row] {
                return false;
            }
            let lag = fit.lag[row];
            let amp = fit.amp[row];
            let sigma = fit.sigma[row];

            if lag < config.lag_min || lag > config.lag_max {
                return false;
            }
            match config.lag_mask_side {
                LagMaskSide::Both => {}
                LagMaskSide::Positive if lag < 0.0 => return false,
                LagMaskSide::Negative if lag > 0.0 => return false,
                _ => {}
            }
            if amp.abs() < config.amplitude_min {
                return false;
            }
            if sigma > config.max_sigma {
                return false;
            }
            if let Some(include) = &config.include {
                if !include[row] {
                    return false;
                }
            }
            if let Some(exclude) = &config.exclude {
                if exclude[row] {
                    return false;
                }
            }
            true
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FailReason;

    fn sample_fit() -> FitResults<f64> {
        FitResults {
            lag: vec![-5.0, 0.0, 5.0, 25.0],
            amp: vec![0.5, 0.1, 0.6, 0.9],
            sigma: vec![2.0, 2.0, 200.0, 2.0],
            mask: vec![true, true, true, true],
            fail: vec![FailReason::empty(); 4],
        }
    }

    #[test]
    fn rejects_low_amplitude_and_wide_sigma_and_out_of_range_lag() {
        let fit = sample_fit();
        let config = RefineMaskConfig::default();
        let mask = compute_refine_mask(&fit, &config);
        assert_eq!(mask, vec![true, false, false, false]);
    }

    #[test]
    fn positive_side_rejects_negative_lags() {
        let fit = sample_fit();
        let config = RefineMaskConfig {
            lag_mask_side: LagMaskSide::Positive,
            amplitude_min: 0.0,
            max_sigma: 1000.0,
            lag_max: 100.0,
            ..RefineMaskConfig::default()
        };
        let mask = compute_refine_mask(&fit, &config);
        assert_eq!(mask, vec![false, true, true, true]);
    }

    #[test]
    fn explicit_exclude_overrides_otherwise_valid_voxel() {
        let fit = sample_fit();
        let config = RefineMaskConfig {
            amplitude_min: 0.0,
            max_sigma: 1000.0,
            lag_max: 100.0,
            exclude: Some(vec![true, false, false, false]),
            ..RefineMaskConfig::default()
        };
        let mask = compute_refine_mask(&fit, &config);
        assert_eq!(mask[0], false);
    }
}
