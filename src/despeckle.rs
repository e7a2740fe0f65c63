//! Spatial despeckle: median-filter the lag map and refit outliers.
//!
//! `SPEC_FULL.md` §4.4. A voxel is an outlier if its fitted lag departs
//! from its 3x3x3 neighborhood median by more than `despeckle_thresh`
//! seconds. Outliers are refit seeded at the neighborhood median lag,
//! using a relaxed width limit, and the pass repeats until no voxel
//! qualifies or `max_passes` is reached.

use crate::data::{FitResults, VoxelCube, VoxelGeometry};
use crate::fit::{fit_one, FindMaxType, PeakFitConfig};

/// Configuration for the despeckle pass.
#[derive(Debug, Clone)]
pub struct DespeckleConfig {
    pub threshold: f64,
    pub max_passes: usize,
    /// Width limit used when refitting an outlier (typically looser
    /// than the original fit's `width_limit`).
    pub refit_width_limit: f64,
}

impl Default for DespeckleConfig {
    fn default() -> Self {
        Self {
            threshold: 5.0,
            max_passes: 4,
            refit_width_limit: 100.0,
        }
    }
}

/// Run the despeckle pass over `fit` in place, using `correlations` to
/// refit outliers. Returns the number of voxels refit per pass.
pub fn despeckle(
    fit: &mut FitResults<f64>,
    correlations: &VoxelCube<f64>,
    lags: &[f64],
    geometry: &VoxelGeometry,
    peak_config: &PeakFitConfig,
    find_max_type: FindMaxType,
    config: &DespeckleConfig,
) -> Vec<usize> {
    let mut refit_counts = Vec::with_capacity(config.max_passes);

    for _pass in 0..config.max_passes {
        let lag_volume = geometry.scatter_to_volume(&fit.lag, 0.0);
        let median_volume = median_filter_3x3x3(&lag_volume, geometry.shape());
        let median_per_row = geometry.gather_from_volume(&median_volume);

        let mut outliers = Vec::new();
        for row in 0..fit.len() {
            if !fit.mask[row] {
                continue;
            }
            if (fit.lag[row] - median_per_row[row]).abs() > config.threshold {
                outliers.push(row);
            }
        }

        if outliers.is_empty() {
            refit_counts.push(0);
            break;
        }

        let relaxed = PeakFitConfig {
            width_limit: config.refit_width_limit,
            ..peak_config.clone()
        };

        for &row in &outliers {
            let c = correlations.row(row).to_vec();
            let outcome = fit_one(&c, lags, &relaxed, find_max_type, None, Some(median_per_row[row]));
            fit.lag[row] = outcome.lag;
            fit.amp[row] = outcome.amplitude;
            fit.sigma[row] = outcome.sigma;
            fit.mask[row] = outcome.mask;
            fit.fail[row] = outcome.fail_reason;
        }

        refit_counts.push(outliers.len());
    }

    refit_counts
}

/// 3x3x3 median filter over a flat, x-fastest native volume. Edge
/// voxels use whatever neighbors fall inside the volume (no padding).
fn median_filter_3x3x3(volume: &[f64], shape: (usize, usize, usize)) -> Vec<f64> {
    let (nx, ny, nz) = shape;
    let idx = |x: usize, y: usize, z: usize| x + nx * (y + ny * z);
    let mut out = vec![0.0; volume.len()];

    for z in 0..nz {
        for y in 0..ny {
            for x in 0..nx {
                let mut neighborhood = Vec::with_capacity(27);
                for dz in -1isize..=1 {
                    let zz = z as isize + dz;
                    if zz < 0 || zz >= nz as isize {
                        continue;
                    }
                    for dy in -1isize..=1 {
                        let yy = y as isize + dy;
                        if yy < 0 || yy >= ny as isize {
                            continue;
                        }
                        for dx in -1isize..=1 {
                            let xx = x as isize + dx;
                            if xx < 0 || xx >= nx as isize {
                                continue;
                            }
                            neighborhood.push(volume[idx(xx as usize, yy as usize, zz as usize)]);
                        }
                    }
                }
                neighborhood.sort_by(|a, b| a.partial_cmp(b).unwrap());
                out[idx(x, y, z)] = neighborhood[neighborhood.len() / 2];
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fit::FailReason;
    use ndarray::Array2;

    #[test]
    fn median_filter_removes_single_voxel_spike() {
        let shape = (3, 3, 3);
        let mut volume = vec![1.0; 27];
        let idx = |x: usize, y: usize, z: usize| x + 3 * (y + 3 * z);
        volume[idx(1, 1, 1)] = 50.0;
        let filtered = median_filter_3x3x3(&volume, shape);
        assert_eq!(filtered[idx(1, 1, 1)], 1.0);
    }

    #[test]
    fn outlier_voxel_is_refit_and_moves_toward_median() {
        let shape = (3, 3, 1);
        let mask = vec![true; 9];
        let geometry = VoxelGeometry::from_mask(shape, &mask);

        let lags: Vec<f64> = (0..21).map(|i| (i as f64 - 10.0) * 0.5).collect();
        let n_lags = lags.len();
        let mut correlations = Array2::<f64>::zeros((9, n_lags));
        let mut fit = FitResults::zeros(9);
        for row in 0..9 {
            let true_lag = if row == 4 { 8.0 } else { 0.0 };
            for (col, &s) in lags.iter().enumerate() {
                correlations[[row, col]] = (-(s - true_lag).powi(2)).exp();
            }
            fit.lag[row] = true_lag;
            fit.amp[row] = 1.0;
            fit.mask[row] = true;
            fit.fail[row] = FailReason::empty();
        }

        let peak_config = PeakFitConfig::default();
        let despeckle_config = DespeckleConfig {
            threshold: 2.0,
            max_passes: 2,
            refit_width_limit: 100.0,
        };
        let counts = despeckle(
            &mut fit,
            &correlations,
            &lags,
            &geometry,
            &peak_config,
            FindMaxType::Gauss,
            &despeckle_config,
        );

        assert!(counts[0] >= 1);
        assert!(fit.lag[4].abs() < 8.0);
    }
}
