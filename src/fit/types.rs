//! Shared types for the correlation-peak fit stage.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Failure-mode bitset for a single voxel's peak fit.
    ///
    /// `SPEC_FULL.md` §4.3 step 5. Several bits may be set at once; an
    /// empty set means the fit was clean.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FailReason: u16 {
        /// Peak amplitude below `lthresh`/`uthresh`.
        const AMPLITUDE_TOO_LOW = 1 << 0;
        /// Fitted lag fell outside `[lag_min, lag_max]`.
        const LAG_OUT_OF_RANGE = 1 << 1;
        /// Fitted sigma exceeded `width_limit`.
        const WIDTH_OUT_OF_RANGE = 1 << 2;
        /// The located peak touched the edge-buffer margin.
        const EDGE_OF_WINDOW = 1 << 3;
        /// The nonlinear (or fast) fit did not converge.
        const FIT_DID_NOT_CONVERGE = 1 << 4;
    }
}

/// Which peak-fit algorithm to use for a correlation slice.
///
/// `refine` in the reference implementation's enum naming; `find_max_type`
/// in `SPEC_FULL.md` §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FindMaxType {
    /// Nonlinear (or fast analytic three-point) Gaussian fit.
    Gauss,
    /// Three-point parabolic (quadratic) interpolation.
    Quad,
}

impl Default for FindMaxType {
    fn default() -> Self {
        FindMaxType::Gauss
    }
}

/// Configuration shared by the Gaussian and quadratic peak finders.
///
/// `SPEC_FULL.md` §4.3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakFitConfig {
    /// Lower bound of the search window, seconds.
    pub lag_min: f64,
    /// Upper bound of the search window, seconds.
    pub lag_max: f64,
    /// Maximum acceptable peak sigma, seconds.
    pub width_limit: f64,
    /// Lower amplitude threshold, fraction of the peak.
    pub lthresh: f64,
    /// Upper amplitude threshold, fraction of the peak.
    pub uthresh: f64,
    /// Fraction of the slice length excluded at each edge.
    pub edge_buffer_frac: f64,
    /// If set, flip the correlation sign when `max(|c|) == -min(c)`.
    pub bipolar: bool,
    /// If set, `mask = 0` whenever any `FailReason` bit is set.
    pub enforce_thresh: bool,
    /// If set, zero `lag`/`amp`/`sigma` when `mask = 0`.
    pub zero_out_bad_fit: bool,
    /// Lag-wrap modulus (seconds); `0.0` disables wrapping. Set by the
    /// autocorrelation sidelobe fix (`SPEC_FULL.md` §4.1).
    pub lag_mod: f64,
    /// Use the fast analytic three-point log-parabola fit instead of
    /// nonlinear least squares (Gaussian variant only).
    pub fast_gauss: bool,
}

impl Default for PeakFitConfig {
    fn default() -> Self {
        Self {
            lag_min: -20.0,
            lag_max: 20.0,
            width_limit: 100.0,
            lthresh: 0.3,
            uthresh: 1.0,
            edge_buffer_frac: 0.0,
            bipolar: false,
            enforce_thresh: true,
            zero_out_bad_fit: true,
            lag_mod: 0.0,
            fast_gauss: true,
        }
    }
}

/// Result of fitting a single correlation slice.
///
/// `SPEC_FULL.md` §4.3 "Output contract".
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FitOutcome {
    /// Discrete bin index of the located peak.
    pub bin_index: usize,
    /// Sub-bin-refined lag, seconds.
    pub lag: f64,
    /// Fitted peak amplitude.
    pub amplitude: f64,
    /// Fitted peak sigma, seconds.
    pub sigma: f64,
    /// Whether the voxel passes threshold enforcement.
    pub mask: bool,
    /// Failure-mode bits.
    pub fail_reason: FailReason,
}

/// Wrap a lag symmetrically about zero through `modulus`.
///
/// `SPEC_FULL.md` §9 Open Question (a): no sign convention is documented
/// upstream, so lags are wrapped into `[-modulus/2, modulus/2)`.
pub fn wrap_lag(lag: f64, modulus: f64) -> f64 {
    if modulus <= 0.0 {
        return lag;
    }
    let half = modulus / 2.0;
    let mut wrapped = (lag + half).rem_euclid(modulus) - half;
    // rem_euclid can return exactly -half due to floating rounding; nudge
    // into the half-open interval.
    if wrapped < -half {
        wrapped += modulus;
    }
    wrapped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wrap_lag_identity_when_disabled() {
        assert_eq!(wrap_lag(12.5, 0.0), 12.5);
    }

    #[test]
    fn wrap_lag_symmetric_about_zero() {
        // modulus 10 -> range [-5, 5)
        assert!((wrap_lag(7.0, 10.0) - (-3.0)).abs() < 1e-9);
        assert!((wrap_lag(-7.0, 10.0) - 3.0).abs() < 1e-9);
        assert!((wrap_lag(2.0, 10.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn fail_reason_bits_combine() {
        let f = FailReason::AMPLITUDE_TOO_LOW | FailReason::EDGE_OF_WINDOW;
        assert!(f.contains(FailReason::AMPLITUDE_TOO_LOW));
        assert!(f.contains(FailReason::EDGE_OF_WINDOW));
        assert!(!f.contains(FailReason::WIDTH_OUT_OF_RANGE));
    }
}
