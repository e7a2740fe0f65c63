//! Typed pipeline configuration.
//!
//! `SPEC_FULL.md` §9 "Dynamic option dictionary" / §10.4. One nested
//! section struct per subsystem, in the style of the teacher's
//! `Settings`/`*Settings` split in `crates/vsg_core/src/config/settings.rs`.

use serde::{Deserialize, Serialize};

use crate::correlation::CorrWeighting;
use crate::despeckle::DespeckleConfig as DespeckleStageConfig;
use crate::error::PipelineError;
use crate::fit::FindMaxType;
use crate::regressor::{BandLimit, DetrendOrder, InterpType, WindowFunc};
use crate::refine::{LagMaskSide, PrenormMode, RefineType, RefineWeighting};

/// How the probe regressor is constructed when no explicit external
/// probe is supplied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum GlobalMaskMethod {
    /// Average every valid voxel, optionally mean-scaling each first
    /// (`v -> v/mean(v) - 1`) before averaging (`getglobalsignal`,
    /// `SPEC_FULL.md` §10.7).
    #[default]
    MeanScaled,
    /// Plain average, no per-voxel mean scaling.
    PlainAverage,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegressorConfig {
    pub invert: bool,
    pub detrend_order: DetrendOrder,
    pub band_limit: BandLimit,
    pub filter_order: usize,
    pub interp: InterpType,
    pub oversample_factor: usize,
    pub window: WindowFunc,
    pub global_mask_method: GlobalMaskMethod,
    pub sidelobe_check: bool,
    pub sidelobe_fix: bool,
    pub sidelobe_threshold: f64,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            invert: false,
            detrend_order: DetrendOrder::Linear,
            band_limit: BandLimit::Lfo,
            filter_order: 3,
            interp: InterpType::Cubic,
            oversample_factor: 2,
            window: WindowFunc::Hann,
            global_mask_method: GlobalMaskMethod::MeanScaled,
            sidelobe_check: false,
            sidelobe_fix: false,
            sidelobe_threshold: 0.1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationConfig {
    pub weighting: CorrWeighting,
    pub detrend: bool,
    pub window: WindowFunc,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            weighting: CorrWeighting::None,
            detrend: true,
            window: WindowFunc::Hann,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitConfig {
    pub lag_min: f64,
    pub lag_max: f64,
    pub width_limit: f64,
    pub lthresh: f64,
    pub uthresh: f64,
    pub edge_buffer_frac: f64,
    pub bipolar: bool,
    pub enforce_thresh: bool,
    pub zero_out_bad_fit: bool,
    pub fast_gauss: bool,
    pub find_max_type: FindMaxType,
    pub fixed_delay: Option<f64>,
}

impl Default for FitConfig {
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
            fast_gauss: true,
            find_max_type: FindMaxType::Gauss,
            fixed_delay: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DespeckleConfig {
    pub enabled: bool,
    pub threshold: f64,
    pub max_passes: usize,
    pub refit_width_limit: f64,
}

impl Default for DespeckleConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: 5.0,
            max_passes: 4,
            refit_width_limit: 100.0,
        }
    }
}

impl DespeckleConfig {
    pub(crate) fn to_stage_config(&self) -> DespeckleStageConfig {
        DespeckleStageConfig {
            threshold: self.threshold,
            max_passes: self.max_passes,
            refit_width_limit: self.refit_width_limit,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefineConfig {
    pub n_passes: usize,
    pub refine_type: RefineType,
    pub prenorm: PrenormMode,
    pub weighting: RefineWeighting,
    pub amp_thresh: f64,
    pub lag_min_thresh: f64,
    pub lag_max_thresh: f64,
    pub sigma_thresh: f64,
    pub lag_mask_side: LagMaskSide,
    pub cleanrefined: bool,
    pub snr_post_filter: bool,
    pub dispersioncalc_enabled: bool,
    pub dispersioncalc_step: f64,
}

impl Default for RefineConfig {
    fn default() -> Self {
        Self {
            n_passes: 3,
            refine_type: RefineType::WeightedAverage,
            prenorm: PrenormMode::None,
            weighting: RefineWeighting::R,
            amp_thresh: 0.3,
            lag_min_thresh: 0.0,
            lag_max_thresh: 20.0,
            sigma_thresh: 100.0,
            lag_mask_side: LagMaskSide::Both,
            cleanrefined: false,
            snr_post_filter: false,
            dispersioncalc_enabled: false,
            dispersioncalc_step: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlmConfig {
    pub enabled: bool,
    pub thresh_val: f64,
    pub no_thresh: bool,
}

impl Default for GlmConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            thresh_val: 0.0,
            no_thresh: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    pub nprocs: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self { nprocs: 1 }
    }
}

/// Output precision, `SPEC_FULL.md` §6 "output precision (single |
/// double)".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum OutputPrecision {
    Single,
    #[default]
    Double,
}

/// The full typed configuration surface. `SPEC_FULL.md` §10.4.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    pub regressor: RegressorConfig,
    pub correlation: CorrelationConfig,
    pub fit: FitConfig,
    pub despeckle: DespeckleConfig,
    pub refine: RefineConfig,
    pub glm: GlmConfig,
    pub concurrency: ConcurrencyConfig,
    pub precision: OutputPrecision,
    pub fmri_tr: f64,
    /// NIRS acquisition preset: disables amplitude/lag thresholding and
    /// sets NIRS-typical amp/lag thresholds, per `SPEC_FULL.md` §6.
    pub nirs_preset: bool,
}

impl PipelineConfig {
    /// Apply the NIRS preset (disables thresholding, widens amplitude
    /// and lag thresholds to NIRS-typical values) if `nirs_preset` is
    /// set. Call after constructing a config but before [`Self::validate`].
    pub fn apply_nirs_preset(&mut self) {
        if !self.nirs_preset {
            return;
        }
        self.fit.enforce_thresh = false;
        self.fit.lthresh = 0.1;
        self.fit.lag_min = -10.0;
        self.fit.lag_max = 10.0;
        self.refine.amp_thresh = 0.1;
        self.glm.no_thresh = true;
    }

    /// Validate cross-field invariants not expressible in field types
    /// alone.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.fit.lag_min >= self.fit.lag_max {
            return Err(PipelineError::InvalidLagWindow {
                lag_min: self.fit.lag_min,
                lag_max: self.fit.lag_max,
                reason: "lag_min must be strictly less than lag_max",
            });
        }
        if self.fmri_tr <= 0.0 {
            return Err(PipelineError::UnsupportedOption {
                option: "fmri_tr",
                value: self.fmri_tr.to_string(),
            });
        }
        if self.regressor.oversample_factor == 0 {
            return Err(PipelineError::UnsupportedOption {
                option: "oversample_factor",
                value: "0".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        let mut config = PipelineConfig::default();
        config.fmri_tr = 1.5;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_lag_window_fails_validation() {
        let mut config = PipelineConfig::default();
        config.fmri_tr = 1.5;
        config.fit.lag_min = 5.0;
        config.fit.lag_max = -5.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn nirs_preset_disables_thresholding() {
        let mut config = PipelineConfig {
            nirs_preset: true,
            ..PipelineConfig::default()
        };
        config.apply_nirs_preset();
        assert!(!config.fit.enforce_thresh);
        assert!(config.glm.no_thresh);
    }
}
