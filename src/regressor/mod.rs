//! Probe-regressor preparation: band-limiting, resampling, and sidelobe
//! mitigation ahead of the correlation stage.
//!
//! `SPEC_FULL.md` §4.1.

pub mod filters;
pub mod prep;
pub mod resample;
pub mod sidelobe;

pub use filters::{BandLimit, FftFilterShape};
pub use prep::{prepare_for_correlation, prepare_probe_regressor, DetrendOrder, PrepConfig, ProbeRegressor, WindowFunc};
pub use resample::{resample, InterpType};
pub use sidelobe::{check_sidelobe, SidelobeFix};
