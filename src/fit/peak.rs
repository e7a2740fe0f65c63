//! Peak location shared by the Gaussian and quadratic fit variants.
//!
//! `SPEC_FULL.md` §4.3 steps 2-3.

use super::types::{FailReason, PeakFitConfig};

/// A located peak: its discrete index and the `[start, end)` span over
/// which it stays above threshold.
#[derive(Debug, Clone, Copy)]
pub struct LocatedPeak {
    pub index: usize,
    pub start: usize,
    pub end: usize,
}

/// Restrict search to `[lag_min, lag_max]` excluding an `edge_buffer_frac *
/// len` margin at each end, locate the discrete argmax (or the bin nearest
/// `initial_lag` if provided), and walk outward while the correlation
/// stays above `lthresh * max` and below `uthresh * max` until a
/// descending-to-ascending turn.
///
/// Returns `None` if the search window is empty after excluding the edge
/// buffer, or if the restricted window contains no samples at all.
pub fn locate_peak(
    c: &[f64],
    s: &[f64],
    config: &PeakFitConfig,
    initial_lag: Option<f64>,
) -> Option<(LocatedPeak, FailReason)> {
    let len = c.len();
    if len == 0 || s.len() != len {
        return None;
    }

    let edge = ((config.edge_buffer_frac * len as f64).round() as usize).min(len / 2);
    let lo = edge;
    let hi = len.saturating_sub(edge);
    if lo >= hi {
        return None;
    }

    // Restrict further to the [lag_min, lag_max] window expressed on the
    // lag axis `s`.
    let mut win_lo = lo;
    let mut win_hi = hi;
    for i in lo..hi {
        if s[i] >= config.lag_min {
            win_lo = i;
            break;
        }
        win_lo = hi;
    }
    for i in (lo..hi).rev() {
        if s[i] <= config.lag_max {
            win_hi = i + 1;
            break;
        }
        win_hi = lo;
    }
    if win_lo >= win_hi {
        return None;
    }

    let mut fail = FailReason::empty();

    let peak_index = if let Some(guess) = initial_lag {
        // Nearest bin to the guess, within the window.
        (win_lo..win_hi)
            .min_by(|&a, &b| {
                (s[a] - guess)
                    .abs()
                    .partial_cmp(&(s[b] - guess).abs())
                    .unwrap()
            })
            .unwrap()
    } else {
        (win_lo..win_hi)
            .max_by(|&a, &b| c[a].partial_cmp(&c[b]).unwrap())
            .unwrap()
    };

    if peak_index == lo || peak_index == hi - 1 {
        fail |= FailReason::EDGE_OF_WINDOW;
    }

    let peak_val = c[peak_index];
    if peak_val <= 0.0 {
        // Degenerate: nothing to walk outward from.
        return Some((
            LocatedPeak {
                index: peak_index,
                start: peak_index,
                end: peak_index + 1,
            },
            fail | FailReason::AMPLITUDE_TOO_LOW,
        ));
    }

    let lower_bound = config.lthresh * peak_val;
    let upper_bound = config.uthresh * peak_val;

    // Walk left from the peak while values keep descending and remain
    // inside [lower_bound, upper_bound]; stop at the first ascending turn.
    let mut start = peak_index;
    while start > win_lo {
        let cur = c[start - 1];
        if cur < lower_bound || cur > upper_bound {
            break;
        }
        if cur > c[start] {
            // ascending turn when walking further left: stop before it.
            break;
        }
        start -= 1;
    }

    let mut end = peak_index;
    while end + 1 < win_hi {
        let cur = c[end + 1];
        if cur < lower_bound || cur > upper_bound {
            break;
        }
        if cur > c[end] {
            break;
        }
        end += 1;
    }
    end += 1; // exclusive

    Some((
        LocatedPeak {
            index: peak_index,
            start,
            end,
        },
        fail,
    ))
}

/// Classify a fitted `(lag, sigma, amplitude)` triple against the
/// configured thresholds, combining with any bits already raised during
/// peak location (e.g. edge-of-window).
pub fn classify(
    config: &PeakFitConfig,
    lag: f64,
    sigma: f64,
    amplitude: f64,
    located_fail: FailReason,
    converged: bool,
) -> FailReason {
    let mut fail = located_fail;
    if amplitude.abs() < config.lthresh {
        fail |= FailReason::AMPLITUDE_TOO_LOW;
    }
    if lag < config.lag_min || lag > config.lag_max {
        fail |= FailReason::LAG_OUT_OF_RANGE;
    }
    if sigma > config.width_limit {
        fail |= FailReason::WIDTH_OUT_OF_RANGE;
    }
    if !converged {
        fail |= FailReason::FIT_DID_NOT_CONVERGE;
    }
    fail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(n: usize, delta: f64) -> Vec<f64> {
        let origin = (n / 2) as f64;
        (0..n).map(|i| (i as f64 - origin) * delta).collect()
    }

    #[test]
    fn locate_peak_finds_argmax() {
        let s = axis(21, 0.5);
        let c: Vec<f64> = s.iter().map(|&x| (-x * x / 2.0).exp()).collect();
        let cfg = PeakFitConfig {
            lag_min: -5.0,
            lag_max: 5.0,
            ..Default::default()
        };
        let (peak, fail) = locate_peak(&c, &s, &cfg, None).unwrap();
        assert_eq!(peak.index, 10);
        assert!(!fail.contains(FailReason::EDGE_OF_WINDOW));
    }

    #[test]
    fn locate_peak_respects_initial_guess() {
        let s = axis(21, 0.5);
        // two peaks: one at index 5, one (bigger) at index 15
        let mut c = vec![0.0; 21];
        c[5] = 0.6;
        c[15] = 1.0;
        let cfg = PeakFitConfig {
            lag_min: -5.0,
            lag_max: 5.0,
            ..Default::default()
        };
        let (peak, _) = locate_peak(&c, &s, &cfg, Some(s[5])).unwrap();
        assert_eq!(peak.index, 5);
    }

    #[test]
    fn locate_peak_flags_edge_of_window() {
        let s = axis(11, 1.0);
        let c: Vec<f64> = (0..11).map(|i| i as f64).collect(); // monotone increasing
        let cfg = PeakFitConfig {
            lag_min: -5.0,
            lag_max: 5.0,
            ..Default::default()
        };
        let (peak, fail) = locate_peak(&c, &s, &cfg, None).unwrap();
        assert_eq!(peak.index, 10);
        assert!(fail.contains(FailReason::EDGE_OF_WINDOW));
    }
}
