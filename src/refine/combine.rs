//! Combine shifted, selected voxel timecourses into one refined
//! regressor.
//!
//! `SPEC_FULL.md` §4.5, "Combination". Four variants share the same
//! `N x T` shifted-and-masked voxel matrix: plain average, amplitude-
//! weighted average, and two variants built on a hand-rolled PCA
//! (power iteration with deflation, avoiding a full eigensolver crate
//! for the same reason the teacher avoids `linfa` for clustering) and a
//! single-unit FastICA run in that PCA-whitened subspace.

use ndarray::Array2;
use num_complex::Complex64;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

/// How selected voxel timecourses are combined into one regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RefineType {
    #[default]
    Average,
    WeightedAverage,
    Pca,
    Ica,
}

/// Plain mean across voxel rows at each time point, ignoring any row
/// whose `sample_weights` entry is zero at that time point.
pub fn average(data: &Array2<f64>, sample_weights: &Array2<f64>) -> Vec<f64> {
    let (n, t) = data.dim();
    let mut out = vec![0.0; t];
    for col in 0..t {
        let mut sum = 0.0;
        let mut wsum = 0.0;
        for row in 0..n {
            let w = sample_weights[[row, col]];
            sum += w * data[[row, col]];
            wsum += w;
        }
        out[col] = if wsum > 1e-12 { sum / wsum } else { 0.0 };
    }
    out
}

/// Amplitude-weighted average: each voxel row additionally carries a
/// scalar `voxel_weights[row]` (from [`super::shift::RefineWeighting`]).
pub fn weighted_average(data: &Array2<f64>, sample_weights: &Array2<f64>, voxel_weights: &[f64]) -> Vec<f64> {
    let (n, t) = data.dim();
    let mut out = vec![0.0; t];
    for col in 0..t {
        let mut sum = 0.0;
        let mut wsum = 0.0;
        for row in 0..n {
            let w = sample_weights[[row, col]] * voxel_weights[row];
            sum += w * data[[row, col]];
            wsum += w;
        }
        out[col] = if wsum > 1e-12 { sum / wsum } else { 0.0 };
    }
    out
}

/// Top-`k` temporal principal components of `data` (`N x T`), found by
/// power iteration with deflation. Returns orthonormal length-`T`
/// vectors, most significant first.
pub fn pca_components(data: &Array2<f64>, k: usize) -> Vec<Vec<f64>> {
    let (n, t) = data.dim();
    let mut residual = data.clone();
    let mut components = Vec::with_capacity(k);

    for _ in 0..k.min(t).min(n.max(1)) {
        let mut v = vec![1.0 / (t as f64).sqrt(); t];
        for _iter in 0..100 {
            // w = X^T (X v), the power-iteration step for the top right
            // singular vector of `residual`.
            let xv: Vec<f64> = (0..n)
                .map(|row| (0..t).map(|col| residual[[row, col]] * v[col]).sum::<f64>())
                .collect();
            let mut w = vec![0.0; t];
            for row in 0..n {
                let xv_row = xv[row];
                for col in 0..t {
                    w[col] += residual[[row, col]] * xv_row;
                }
            }
            let norm = w.iter().map(|x| x * x).sum::<f64>().sqrt();
            if norm < 1e-14 {
                break;
            }
            for x in w.iter_mut() {
                *x /= norm;
            }
            let delta: f64 = w.iter().zip(v.iter()).map(|(a, b)| (a - b).abs()).sum();
            v = w;
            if delta < 1e-10 {
                break;
            }
        }

        // Deflate: remove the projection onto `v` from every row.
        for row in 0..n {
            let proj: f64 = (0..t).map(|col| residual[[row, col]] * v[col]).sum();
            for col in 0..t {
                residual[[row, col]] -= proj * v[col];
            }
        }

        components.push(v);
    }

    components
}

/// Single-unit FastICA with the `tanh` contrast function, run over the
/// PCA-whitened subspace spanned by `components` (each orthonormal and
/// length `T`, so `sqrt(T) * components[k]` is already a zero-mean,
/// unit-variance whitened feature — see `SPEC_FULL.md` §10.8 for why
/// this avoids needing an explicit `N x N` whitening matrix).
pub fn ica_component(components: &[Vec<f64>]) -> Vec<f64> {
    let k = components.len();
    if k == 0 {
        return Vec::new();
    }
    let t = components[0].len();
    let sqrt_t = (t as f64).sqrt();

    // Z[t][k] = whitened feature matrix.
    let z: Vec<Vec<f64>> = (0..t)
        .map(|time| (0..k).map(|comp| sqrt_t * components[comp][time]).collect())
        .collect();

    let mut w = vec![0.0; k];
    w[0] = 1.0;

    for _iter in 0..200 {
        let mut new_w = vec![0.0; k];
        let mut mean_gprime = 0.0;
        for row in z.iter() {
            let proj: f64 = row.iter().zip(w.iter()).map(|(z_k, w_k)| z_k * w_k).sum();
            let g = proj.tanh();
            let gprime = 1.0 - g * g;
            for (acc, &z_k) in new_w.iter_mut().zip(row.iter()) {
                *acc += z_k * g;
            }
            mean_gprime += gprime;
        }
        let t_f = t as f64;
        for x in new_w.iter_mut() {
            *x /= t_f;
        }
        mean_gprime /= t_f;
        for (x, &w_k) in new_w.iter_mut().zip(w.iter()) {
            *x -= mean_gprime * w_k;
        }

        let norm = new_w.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm < 1e-14 {
            break;
        }
        for x in new_w.iter_mut() {
            *x /= norm;
        }

        let delta: f64 = new_w.iter().zip(w.iter()).map(|(a, b)| (a - b).abs()).sum();
        w = new_w;
        if delta < 1e-9 {
            break;
        }
    }

    (0..t)
        .map(|time| z[time].iter().zip(w.iter()).map(|(z_k, w_k)| z_k * w_k).sum())
        .collect()
}

/// Flip the sign of `candidate` if it is anti-correlated with
/// `reference` (Pearson R), so successive refinement passes don't flap
/// between a regressor and its negation.
pub fn align_sign(candidate: &mut [f64], reference: &[f64]) {
    if pearson_r(candidate, reference) < 0.0 {
        for v in candidate.iter_mut() {
            *v = -*v;
        }
    }
}

fn pearson_r(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n == 0 {
        return 0.0;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;
    let mut num = 0.0;
    let mut den_a = 0.0;
    let mut den_b = 0.0;
    for i in 0..n {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }
    let den = (den_a * den_b).sqrt();
    if den < 1e-15 {
        0.0
    } else {
        num / den
    }
}

/// Regress out an existing regressor from a freshly-combined one, so
/// repeated refinement passes don't reconverge on the same regressor
/// they started with ("cleanrefined", `SPEC_FULL.md` §4.5).
pub fn cleanrefined(candidate: &[f64], previous: &[f64]) -> Vec<f64> {
    crate::regressor::prep::orthogonalize(candidate, &[previous.to_vec()])
}

/// SNR post-filter: divide the candidate regressor's spectrum by
/// `mean(PSD)/std(PSD)` and inverse-transform, reshaping it toward
/// frequencies where its own power is more consistent (`SPEC_FULL.md`
/// §4.5, "SNR post-filter"). A no-op (returns `candidate` unchanged) if
/// the spectrum is flat or silent.
pub fn snr_post_filter(candidate: &[f64]) -> Vec<f64> {
    let n = candidate.len();
    if n == 0 {
        return Vec::new();
    }

    let mut planner = FftPlanner::<f64>::new();
    let fft = planner.plan_fft_forward(n);
    let mut buf: Vec<Complex64> = candidate.iter().map(|&x| Complex64::new(x, 0.0)).collect();
    fft.process(&mut buf);

    let psd: Vec<f64> = buf.iter().map(|c| c.norm_sqr()).collect();
    let mean_psd = psd.iter().sum::<f64>() / n as f64;
    let variance = psd.iter().map(|&p| (p - mean_psd).powi(2)).sum::<f64>() / n as f64;
    let std_psd = variance.sqrt();
    if std_psd < 1e-15 {
        return candidate.to_vec();
    }

    let divisor = mean_psd / std_psd;
    if divisor.abs() < 1e-15 {
        return candidate.to_vec();
    }
    for c in buf.iter_mut() {
        *c /= divisor;
    }

    let ifft = planner.plan_fft_inverse(n);
    ifft.process(&mut buf);
    let scale = 1.0 / n as f64;
    buf.iter().map(|c| c.re * scale).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn average_ignores_zero_weight_samples() {
        let data = array![[1.0, 2.0, 3.0], [5.0, 6.0, 7.0]];
        let weights = array![[1.0, 1.0, 0.0], [1.0, 1.0, 1.0]];
        let out = average(&data, &weights);
        assert_eq!(out[2], 7.0);
        assert!((out[0] - 3.0).abs() < 1e-9);
    }

    #[test]
    fn pca_recovers_shared_oscillation() {
        let t = 64;
        let shared: Vec<f64> = (0..t).map(|i| (i as f64 * 0.3).sin()).collect();
        let mut data = Array2::<f64>::zeros((4, t));
        for row in 0..4 {
            for col in 0..t {
                data[[row, col]] = shared[col] * (1.0 + 0.1 * row as f64);
            }
        }
        let components = pca_components(&data, 1);
        assert_eq!(components.len(), 1);
        let r = pearson_r(&components[0], &shared).abs();
        assert!(r > 0.99, "r={r}");
    }

    #[test]
    fn align_sign_flips_anticorrelated_candidate() {
        let reference = vec![1.0, 2.0, 3.0, 2.0, 1.0];
        let mut candidate: Vec<f64> = reference.iter().map(|&v| -v).collect();
        align_sign(&mut candidate, &reference);
        assert!(pearson_r(&candidate, &reference) > 0.0);
    }

    #[test]
    fn cleanrefined_removes_correlation_with_previous() {
        let previous = vec![1.0, 2.0, 3.0, 4.0, 5.0, 4.0, 3.0, 2.0];
        let candidate: Vec<f64> = previous.iter().map(|&v| v * 2.0 + 1.0).collect();
        let cleaned = cleanrefined(&candidate, &previous);
        assert!(pearson_r(&cleaned, &previous).abs() < 1e-6);
    }

    #[test]
    fn snr_post_filter_preserves_length_and_is_idempotent_on_flat_spectrum() {
        let candidate: Vec<f64> = vec![1.0; 16];
        let reshaped = snr_post_filter(&candidate);
        assert_eq!(reshaped.len(), candidate.len());
        // A DC-only signal has a single nonzero bin: std(PSD) is not ~0,
        // so the divide-by-scalar step still runs, but applying it twice
        // should settle rather than diverge.
        let twice = snr_post_filter(&reshaped);
        assert_eq!(twice.len(), candidate.len());
    }

    #[test]
    fn snr_post_filter_reshapes_a_tone_without_changing_its_length() {
        let t = 32;
        let candidate: Vec<f64> = (0..t).map(|i| (i as f64 * 0.4).sin()).collect();
        let reshaped = snr_post_filter(&candidate);
        assert_eq!(reshaped.len(), t);
        assert!(reshaped.iter().any(|&v| v.abs() > 1e-9));
    }
}
