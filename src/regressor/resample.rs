//! Resampling the probe regressor onto the fMRI and oversampled time grids.
//!
//! `SPEC_FULL.md` §4.1 step 5. Three interpolators are supported; all
//! operate on irregularly-timed output grids by evaluating a local
//! polynomial (or natural cubic spline) around the query point.

use serde::{Deserialize, Serialize};

/// Interpolation kernel used to resample the regressor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum InterpType {
    /// Catmull-Rom-style local cubic through the four nearest samples.
    #[default]
    Cubic,
    /// Three-point (Lagrange) quadratic through the nearest samples.
    Quadratic,
    /// Natural cubic spline fit once over the whole input, then evaluated.
    Spline,
}

/// Resample `(src_t, src_y)` onto `dst_t`, assuming `src_t` is sorted and
/// uniformly spaced (both true of the fMRI and oversampled time grids
/// this pipeline constructs).
pub fn resample(src_t: &[f64], src_y: &[f64], dst_t: &[f64], interp: InterpType) -> Vec<f64> {
    if src_t.len() < 2 {
        return dst_t.iter().map(|_| src_y.first().copied().unwrap_or(0.0)).collect();
    }

    match interp {
        InterpType::Cubic => dst_t.iter().map(|&t| cubic_at(src_t, src_y, t)).collect(),
        InterpType::Quadratic => dst_t.iter().map(|&t| quadratic_at(src_t, src_y, t)).collect(),
        InterpType::Spline => {
            let spline = NaturalCubicSpline::fit(src_t, src_y);
            dst_t.iter().map(|&t| spline.eval(t)).collect()
        }
    }
}

fn clamp_index(i: isize, len: usize) -> usize {
    i.clamp(0, len as isize - 1) as usize
}

fn locate(src_t: &[f64], t: f64) -> usize {
    // src_t is uniform; partition_point finds the first index with t_i > t.
    let idx = src_t.partition_point(|&x| x <= t);
    idx.saturating_sub(1).min(src_t.len() - 1)
}

fn cubic_at(src_t: &[f64], src_y: &[f64], t: f64) -> f64 {
    let n = src_t.len();
    let i1 = locate(src_t, t) as isize;
    let i0 = clamp_index(i1 - 1, n);
    let i1c = clamp_index(i1, n);
    let i2 = clamp_index(i1 + 1, n);
    let i3 = clamp_index(i1 + 2, n);

    let dt = if n > 1 { src_t[1] - src_t[0] } else { 1.0 };
    let u = if dt.abs() > 1e-15 { (t - src_t[i1c]) / dt } else { 0.0 };

    let p0 = src_y[i0];
    let p1 = src_y[i1c];
    let p2 = src_y[i2];
    let p3 = src_y[i3];

    // Catmull-Rom basis.
    0.5 * ((2.0 * p1)
        + (-p0 + p2) * u
        + (2.0 * p0 - 5.0 * p1 + 4.0 * p2 - p3) * u * u
        + (-p0 + 3.0 * p1 - 3.0 * p2 + p3) * u * u * u)
}

fn quadratic_at(src_t: &[f64], src_y: &[f64], t: f64) -> f64 {
    let n = src_t.len();
    let i1 = locate(src_t, t) as isize;
    let i0 = clamp_index(i1 - 1, n);
    let i1c = clamp_index(i1, n);
    let i2 = clamp_index(i1 + 1, n);

    lagrange3(src_t[i0], src_y[i0], src_t[i1c], src_y[i1c], src_t[i2], src_y[i2], t)
}

fn lagrange3(x0: f64, y0: f64, x1: f64, y1: f64, x2: f64, y2: f64, x: f64) -> f64 {
    let d01 = x0 - x1;
    let d02 = x0 - x2;
    let d12 = x1 - x2;
    if d01.abs() < 1e-15 || d02.abs() < 1e-15 || d12.abs() < 1e-15 {
        return y1;
    }
    let l0 = (x - x1) * (x - x2) / (d01 * d02);
    let l1 = (x - x0) * (x - x2) / (-d01 * d12);
    let l2 = (x - x0) * (x - x1) / (d02 * d12);
    y0 * l0 + y1 * l1 + y2 * l2
}

/// A natural cubic spline, fit once via the standard tridiagonal
/// second-derivative system, then evaluated at arbitrary points.
struct NaturalCubicSpline {
    x: Vec<f64>,
    y: Vec<f64>,
    /// Second derivatives at each knot.
    m: Vec<f64>,
}

impl NaturalCubicSpline {
    fn fit(x: &[f64], y: &[f64]) -> Self {
        let n = x.len();
        let mut m = vec![0.0; n];
        if n < 3 {
            return NaturalCubicSpline {
                x: x.to_vec(),
                y: y.to_vec(),
                m,
            };
        }

        let mut a = vec![0.0; n];
        let mut b = vec![0.0; n];
        let mut c = vec![0.0; n];
        let mut d = vec![0.0; n];
        b[0] = 1.0;
        b[n - 1] = 1.0;

        for i in 1..n - 1 {
            let h_im1 = x[i] - x[i - 1];
            let h_i = x[i + 1] - x[i];
            a[i] = h_im1;
            b[i] = 2.0 * (h_im1 + h_i);
            c[i] = h_i;
            d[i] = 6.0 * ((y[i + 1] - y[i]) / h_i - (y[i] - y[i - 1]) / h_im1);
        }

        // Thomas algorithm for the tridiagonal system.
        let mut cp = vec![0.0; n];
        let mut dp = vec![0.0; n];
        cp[0] = 0.0;
        dp[0] = 0.0;
        for i in 1..n {
            let denom = b[i] - a[i] * cp[i - 1];
            cp[i] = if denom.abs() > 1e-15 { c[i] / denom } else { 0.0 };
            dp[i] = if denom.abs() > 1e-15 {
                (d[i] - a[i] * dp[i - 1]) / denom
            } else {
                0.0
            };
        }
        m[n - 1] = dp[n - 1];
        for i in (0..n - 1).rev() {
            m[i] = dp[i] - cp[i] * m[i + 1];
        }

        NaturalCubicSpline {
            x: x.to_vec(),
            y: y.to_vec(),
            m,
        }
    }

    fn eval(&self, t: f64) -> f64 {
        let n = self.x.len();
        if n < 3 {
            return self.y.first().copied().unwrap_or(0.0);
        }
        let i = locate(&self.x, t).min(n - 2);
        let h = self.x[i + 1] - self.x[i];
        if h.abs() < 1e-15 {
            return self.y[i];
        }
        let a = (self.x[i + 1] - t) / h;
        let b = (t - self.x[i]) / h;
        a * self.y[i]
            + b * self.y[i + 1]
            + ((a.powi(3) - a) * self.m[i] + (b.powi(3) - b) * self.m[i + 1]) * (h * h) / 6.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cubic_resample_recovers_linear_signal() {
        let src_t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let src_y: Vec<f64> = src_t.iter().map(|&t| 2.0 * t + 1.0).collect();
        let dst_t = vec![2.5, 5.5, 10.25];
        let out = resample(&src_t, &src_y, &dst_t, InterpType::Cubic);
        for (&t, &y) in dst_t.iter().zip(out.iter()) {
            assert!((y - (2.0 * t + 1.0)).abs() < 1e-6, "t={t} y={y}");
        }
    }

    #[test]
    fn spline_resample_recovers_linear_signal() {
        let src_t: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let src_y: Vec<f64> = src_t.iter().map(|&t| -0.5 * t + 3.0).collect();
        let dst_t = vec![1.5, 8.25, 15.75];
        let out = resample(&src_t, &src_y, &dst_t, InterpType::Spline);
        for (&t, &y) in dst_t.iter().zip(out.iter()) {
            assert!((y - (-0.5 * t + 3.0)).abs() < 1e-6, "t={t} y={y}");
        }
    }

    #[test]
    fn quadratic_resample_hits_knots_exactly() {
        let src_t: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let src_y: Vec<f64> = src_t.iter().map(|&t| t * t).collect();
        let out = resample(&src_t, &src_y, &src_t, InterpType::Quadratic);
        for (&expected, &got) in src_y.iter().zip(out.iter()) {
            assert!((expected - got).abs() < 1e-6);
        }
    }
}
