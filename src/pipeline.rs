//! Top-level orchestration: the full pass loop from raw voxel matrix and
//! probe source down to final maps and 4-D derivatives.
//!
//! `SPEC_FULL.md` §2 "System overview" data-flow diagram. This module is
//! the one place that wires the independently-testable stages in
//! `regressor`, `correlation`, `fit`, `despeckle`, `refine`, and `glm`
//! together using a single `PipelineConfig` (§10.4/§10.5: this crate
//! provides one concrete `f64` instantiation of the pipeline rather than
//! a type parameter, since every stage module above is already written
//! directly against `f64` — a generic `Pipeline<F>` would need every one
//! of those modules re-derived behind a `Float` bound with no compiler to
//! check it against; that tradeoff is recorded in `DESIGN.md`).

use ndarray::Array2;

use crate::config::PipelineConfig;
use crate::correlation::{run_correlation_stage, CorrelationConfig as CorrelationStageConfig};
use crate::data::{FitResults, VoxelCube, VoxelGeometry, VoxelMatrix};
use crate::despeckle::despeckle;
use crate::error::{PipelineError, PipelineResult};
use crate::fit::{fit_one, FindMaxType, PeakFitConfig};
use crate::glm::{run_glm_stage, GlmConfig as GlmStageConfig};
use crate::logging::{log_fit_summary, FailCounts};
use crate::refine::mask::RefineMaskConfig;
use crate::refine::{refine_pass, LagMaskSide, RefineConfig as RefineStageConfig};
use crate::regressor::prep::{prepare_probe_regressor, PrepConfig};
use crate::regressor::sidelobe::{apply_notch, autocorrelation, check_sidelobe, SidelobeFix};
use crate::refine::shift;
use crate::workers::run_pool;

/// Number of components power-iteration PCA extracts as ICA's whitened
/// input subspace when `refine_type = ica` and the config doesn't name a
/// component count (the pipeline-level `RefineConfig` has no
/// `pca_components` field; `SPEC_FULL.md` §4.5 only specifies "first
/// independent component", not the whitening subspace width).
const ICA_SUBSPACE_COMPONENTS: usize = 4;

/// The fully wired analysis engine for one configuration.
pub struct Pipeline {
    config: PipelineConfig,
}

/// Every named per-voxel map and 4-D derivative the pipeline produces.
/// `SPEC_FULL.md` §6 "Outputs produced" / §10.4 "static table instead of
/// string-eval".
pub struct PipelineOutputs {
    pub lag_times: Vec<f64>,
    pub lag_strengths: Vec<f64>,
    pub r2: Vec<f64>,
    pub lag_sigma: Vec<f64>,
    pub lag_mask: Vec<f64>,
    pub mtt: Vec<f64>,
    pub fit_r: Vec<f64>,
    pub fit_r2: Vec<f64>,
    pub mean: Vec<f64>,
    pub fit_coff: Vec<f64>,
    pub fit_norm: Vec<f64>,
    pub refine_mask: Vec<f64>,

    /// Per-voxel correlation slice from the final pass, `N x L`.
    pub corrout: VoxelCube<f64>,
    /// Evaluated Gaussian peak model over the same lag axis, zero where
    /// the fit failed.
    pub gaussout: VoxelCube<f64>,
    /// Per-voxel lag-shifted reference, `N x T` (`L` in §3/§4.6).
    pub lagregressor: VoxelMatrix<f64>,
    /// Per-voxel time-shifted traces from the last refinement pass.
    pub shiftedtcs: VoxelMatrix<f64>,
    /// GLM residual (the cleaned data set).
    pub filtereddata: VoxelMatrix<f64>,

    /// The lag axis (seconds) `corrout`/`gaussout` are indexed against.
    pub lags: Vec<f64>,
}

impl PipelineOutputs {
    /// Look up a named scalar map, replacing the reference
    /// implementation's string-eval lookup (`SPEC_FULL.md` §9).
    pub fn get(&self, map: crate::config::OutputMap) -> &[f64] {
        use crate::config::OutputMap::*;
        match map {
            LagTimes => &self.lag_times,
            LagStrengths => &self.lag_strengths,
            R2 => &self.r2,
            LagSigma => &self.lag_sigma,
            LagMask => &self.lag_mask,
            Mtt => &self.mtt,
            FitR => &self.fit_r,
            FitR2 => &self.fit_r2,
            Mean => &self.mean,
            FitCoff => &self.fit_coff,
            FitNorm => &self.fit_norm,
            RefineMask => &self.refine_mask,
        }
    }
}

impl Pipeline {
    /// Build a pipeline from a configuration, applying the NIRS preset
    /// (if set) and validating cross-field invariants.
    pub fn new(mut config: PipelineConfig) -> PipelineResult<Self> {
        config.apply_nirs_preset();
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Run the full pipeline: probe prep, the correlation/fit/despeckle/
    /// refine pass loop, then final GLM removal.
    ///
    /// `data` is the already-masked `N x T` voxel matrix; `geometry` maps
    /// its rows back to native 3-D space for despeckle's median filter.
    /// `probe_raw`/`probe_raw_fs_hz` describe the probe source as
    /// recorded (already averaged into a global-mean signal upstream if
    /// no external probe is supplied — `SPEC_FULL.md` §4.1 "Input").
    pub fn run(
        &self,
        data: &VoxelMatrix<f64>,
        geometry: &VoxelGeometry,
        probe_raw: &[f64],
        probe_raw_fs_hz: f64,
    ) -> PipelineResult<PipelineOutputs> {
        let n_voxels = data.nrows();
        let n_time = data.ncols();
        if geometry.len() != n_voxels {
            return Err(PipelineError::RowCountMismatch {
                context: "pipeline: voxel matrix rows vs. geometry",
                expected: n_voxels,
                actual: geometry.len(),
            });
        }
        if n_voxels == 0 {
            return Err(PipelineError::EmptyVoxelSet);
        }

        let cfg = &self.config;
        let fmri_tr = cfg.fmri_tr;
        let fmri_fs = 1.0 / fmri_tr;
        let nprocs = cfg.concurrency.nprocs;

        tracing::info!(n_voxels, n_time, fmri_tr, "pipeline starting");

        let prep_config = PrepConfig {
            invert: cfg.regressor.invert,
            detrend_order: cfg.regressor.detrend_order,
            band_limit: cfg.regressor.band_limit,
            filter_order: cfg.regressor.filter_order,
            interp: cfg.regressor.interp,
            oversample_factor: cfg.regressor.oversample_factor,
        };
        let mut probe = prepare_probe_regressor(probe_raw, probe_raw_fs_hz, fmri_tr, n_time, &prep_config)?;

        let mut lag_mod = 0.0;
        let mut despeckle_threshold = cfg.despeckle.threshold;
        if cfg.regressor.sidelobe_check {
            let lag_search_max = cfg.fit.lag_min.abs().max(cfg.fit.lag_max.abs());
            let fix = check_sidelobe(&probe.fmri_grid, fmri_fs, lag_search_max, cfg.regressor.sidelobe_threshold);
            tracing::info!(?fix, "sidelobe check complete");
            if cfg.regressor.sidelobe_fix {
                match fix {
                    SidelobeFix::None => {}
                    SidelobeFix::LagMod(period) => lag_mod = period / 2.0,
                    SidelobeFix::Notch { center_hz, half_width_hz } => {
                        probe.fmri_grid = apply_notch(&probe.fmri_grid, fmri_fs, center_hz, half_width_hz);
                        probe.oversampled_grid =
                            apply_notch(&probe.oversampled_grid, probe.oversampled_fs_hz, center_hz, half_width_hz);
                    }
                    SidelobeFix::WidenDespeckleThreshold(min_thresh) => {
                        despeckle_threshold = despeckle_threshold.max(min_thresh);
                    }
                }
            }
        }

        let n_passes = cfg.refine.n_passes.max(1);
        let mut current_regressor = probe.fmri_grid.clone();
        let mut current_regressor_os = probe.oversampled_grid.clone();
        let mut offset_time = 0.0_f64;

        let mut fit_results = FitResults::<f64>::zeros(n_voxels);
        let mut correlations: VoxelCube<f64> = Array2::zeros((n_voxels, 0));
        let mut lags: Vec<f64> = Vec::new();
        let mut voxel_means = vec![0.0; n_voxels];
        let mut refine_mask = vec![false; n_voxels];
        let mut shiftedtcs = Array2::<f64>::zeros((n_voxels, n_time));

        for pass in 0..n_passes {
            tracing::info!(pass, "pass starting");

            let corr_config = CorrelationStageConfig {
                weighting: cfg.correlation.weighting,
                detrend: cfg.correlation.detrend,
                window: cfg.correlation.window,
                source_fs_hz: fmri_fs,
                oversample_factor: cfg.regressor.oversample_factor,
                interp: cfg.regressor.interp,
                fs_hz: probe.oversampled_fs_hz,
                lag_min: cfg.fit.lag_min,
                lag_max: cfg.fit.lag_max,
                nprocs,
            };
            let corr_out = run_correlation_stage(data, &current_regressor_os, &corr_config)?;
            correlations = corr_out.correlations;
            lags = corr_out.lags;
            voxel_means = corr_out.voxel_means;

            let peak_config = PeakFitConfig {
                lag_min: cfg.fit.lag_min,
                lag_max: cfg.fit.lag_max,
                width_limit: cfg.fit.width_limit,
                lthresh: cfg.fit.lthresh,
                uthresh: cfg.fit.uthresh,
                edge_buffer_frac: cfg.fit.edge_buffer_frac,
                bipolar: cfg.fit.bipolar,
                enforce_thresh: cfg.fit.enforce_thresh,
                zero_out_bad_fit: cfg.fit.zero_out_bad_fit,
                lag_mod,
                fast_gauss: cfg.fit.fast_gauss,
            };

            fit_results = run_fit_stage(
                &correlations,
                &lags,
                &peak_config,
                cfg.fit.find_max_type,
                cfg.fit.fixed_delay,
                nprocs,
            );
            log_fit_summary(pass, &FailCounts::tally(&fit_results));

            if cfg.despeckle.enabled {
                let mut despeckle_config = cfg.despeckle.to_stage_config();
                despeckle_config.threshold = despeckle_threshold;
                let counts = despeckle(
                    &mut fit_results,
                    &correlations,
                    &lags,
                    geometry,
                    &peak_config,
                    cfg.fit.find_max_type,
                    &despeckle_config,
                );
                tracing::info!(pass, ?counts, "despeckle complete");
            }

            offset_time = lag_histogram_peak(&fit_results, cfg.fit.lag_min, cfg.fit.lag_max);

            if pass + 1 >= n_passes {
                break;
            }

            let mask_config = refine_mask_config(cfg, cfg.refine.lag_mask_side);
            let selection = crate::refine::mask::compute_refine_mask(&fit_results, &mask_config);
            refine_mask = selection;

            // The offset-time correction applies to the per-voxel time
            // shift, not to the selection thresholds: shift by the lag
            // measured relative to the previous pass's modal lag.
            let offset_fit = FitResults {
                lag: fit_results.lag.iter().map(|&l| l - offset_time).collect(),
                amp: fit_results.amp.clone(),
                sigma: fit_results.sigma.clone(),
                mask: fit_results.mask.clone(),
                fail: fit_results.fail.clone(),
            };

            let refine_stage_config = RefineStageConfig {
                mask: mask_config.clone(),
                prenorm: cfg.refine.prenorm,
                weighting: cfg.refine.weighting,
                refine_type: cfg.refine.refine_type,
                interp: cfg.regressor.interp,
                fs_hz: fmri_fs,
                pca_components: ICA_SUBSPACE_COMPONENTS,
                cleanrefined: cfg.refine.cleanrefined,
                snr_post_filter: cfg.refine.snr_post_filter,
            };

            match refine_pass(data, &offset_fit, &current_regressor, &refine_stage_config) {
                Ok(refine_out) => {
                    tracing::info!(
                        pass,
                        n_contributing = refine_out.n_contributing,
                        "refinement complete"
                    );
                    current_regressor = refine_out.regressor;
                    current_regressor_os = resample_to_oversampled_grid(
                        &current_regressor,
                        fmri_fs,
                        probe.oversampled_fs_hz,
                        cfg.regressor.oversample_factor,
                        cfg.regressor.interp,
                    );
                }
                Err(err) => {
                    tracing::warn!(pass, %err, "refinement pass produced no contributing voxels; keeping previous pass's reference");
                }
            }

            if cfg.refine.dispersioncalc_enabled {
                let step = if cfg.refine.dispersioncalc_step > 0.0 {
                    cfg.refine.dispersioncalc_step
                } else {
                    0.0
                };
                let min_step = (cfg.fit.lag_max - cfg.fit.lag_min) / 25.0;
                let dispersion = compute_pass_dispersion(data, &offset_fit, &mask_config, fmri_fs, cfg, step, min_step);
                if let Some(dispersion) = dispersion {
                    tracing::info!(
                        pass,
                        n_bins = dispersion.bin_centers.len(),
                        "dispersion calculation complete"
                    );
                }
            }
        }

        // Final per-voxel lag-shifted reference and time-shifted traces,
        // built with the same shift primitive refinement and GLM use.
        let interp = cfg.regressor.interp;
        let mut lagregressor = Array2::<f64>::zeros((n_voxels, n_time));
        for row in 0..n_voxels {
            let lag = fit_results.lag[row];
            let (shifted_regressor, _) = shift::shift_to_reference(&current_regressor, fmri_fs, -lag, interp);
            for col in 0..n_time {
                lagregressor[[row, col]] = shifted_regressor[col];
            }
            let voxel: Vec<f64> = data.row(row).to_vec();
            let (shifted_voxel, _) = shift::shift_to_reference(&voxel, fmri_fs, -lag, interp);
            for col in 0..n_time {
                shiftedtcs[[row, col]] = shifted_voxel[col];
            }
        }

        let glm_out = if cfg.glm.enabled {
            let glm_config = GlmStageConfig {
                fs_hz: fmri_fs,
                interp,
                thresh_val: cfg.glm.thresh_val,
                no_thresh: cfg.glm.no_thresh,
                nprocs,
            };
            run_glm_stage(data, &fit_results, &current_regressor, &glm_config)?
        } else {
            crate::glm::pass_through(data)
        };
        tracing::info!(
            applied = glm_out.applied.iter().filter(|&&a| a).count(),
            total = n_voxels,
            "GLM removal complete"
        );

        let acwidth = reference_autocorr_width(&current_regressor, fmri_fs);
        let mtt: Vec<f64> = fit_results
            .sigma
            .iter()
            .map(|&s| (s * s - acwidth * acwidth).max(0.0).sqrt())
            .collect();

        let gaussout = evaluate_gaussian_cube(&fit_results, &lags);

        let r2: Vec<f64> = fit_results.amp.iter().map(|&a| a * a).collect();
        let fit_r2: Vec<f64> = glm_out.r.iter().map(|&r| r * r).collect();
        let fit_norm: Vec<f64> = glm_out
            .alpha
            .iter()
            .zip(glm_out.beta.iter())
            .map(|(&a, &b)| if a.abs() > 1e-12 { b / a } else { 0.0 })
            .collect();
        let lag_mask: Vec<f64> = fit_results.mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();
        let refine_mask: Vec<f64> = refine_mask.iter().map(|&m| if m { 1.0 } else { 0.0 }).collect();

        Ok(PipelineOutputs {
            lag_times: fit_results.lag.clone(),
            lag_strengths: fit_results.amp.clone(),
            r2,
            lag_sigma: fit_results.sigma.clone(),
            lag_mask,
            mtt,
            fit_r: glm_out.r,
            fit_r2,
            mean: voxel_means,
            fit_coff: glm_out.beta,
            fit_norm,
            refine_mask,
            corrout: correlations,
            gaussout,
            lagregressor,
            shiftedtcs,
            filtereddata: glm_out.residual,
            lags,
        })
    }
}

/// Fit every correlation slice, distributed across the worker pool.
fn run_fit_stage(
    correlations: &VoxelCube<f64>,
    lags: &[f64],
    peak_config: &PeakFitConfig,
    find_max_type: FindMaxType,
    fixed_delay: Option<f64>,
    nprocs: usize,
) -> FitResults<f64> {
    let n = correlations.nrows();
    let rows: Vec<Vec<f64>> = correlations.rows().into_iter().map(|r| r.to_vec()).collect();
    let lags_owned = lags.to_vec();
    let peak_config = peak_config.clone();

    let outcomes = run_pool(rows, nprocs, move |row| fit_one(&row, &lags_owned, &peak_config, find_max_type, fixed_delay, None));

    let mut results = FitResults::<f64>::zeros(n);
    for (row, outcome) in outcomes.into_iter().enumerate() {
        results.lag[row] = outcome.lag;
        results.amp[row] = outcome.amplitude;
        results.sigma[row] = outcome.sigma;
        results.mask[row] = outcome.mask;
        results.fail[row] = outcome.fail_reason;
    }
    results
}

/// Translate the pipeline-level refinement thresholds into the
/// stage-level selection bounds, per the side convention in
/// `SPEC_FULL.md` §4.5 ("upper -> (lag_min_thr, lag_max_thr), lower ->
/// (-lag_max_thr, -lag_min_thr), both -> by absolute value").
fn refine_mask_config(cfg: &PipelineConfig, side: LagMaskSide) -> RefineMaskConfig {
    let (lag_min, lag_max) = match side {
        LagMaskSide::Both => (-cfg.refine.lag_max_thresh, cfg.refine.lag_max_thresh),
        LagMaskSide::Positive => (cfg.refine.lag_min_thresh, cfg.refine.lag_max_thresh),
        LagMaskSide::Negative => (-cfg.refine.lag_max_thresh, -cfg.refine.lag_min_thresh),
    };
    RefineMaskConfig {
        lag_min,
        lag_max,
        lag_mask_side: side,
        amplitude_min: cfg.refine.amp_thresh,
        max_sigma: cfg.refine.sigma_thresh,
        include: None,
        exclude: None,
    }
}

/// Resample a refined regressor (fMRI grid, length `T`) up to the
/// oversampled grid the correlation stage needs next pass (`SPEC_FULL.md`
/// §4.1 step 5 / §4.2 step 1).
fn resample_to_oversampled_grid(
    regressor: &[f64],
    fmri_fs_hz: f64,
    oversampled_fs_hz: f64,
    oversample_factor: usize,
    interp: crate::regressor::InterpType,
) -> Vec<f64> {
    let oversample_factor = oversample_factor.max(1);
    if oversample_factor <= 1 {
        return regressor.to_vec();
    }
    let n_time = regressor.len();
    let src_t: Vec<f64> = (0..n_time).map(|i| i as f64 / fmri_fs_hz).collect();
    let over_t: Vec<f64> = (0..n_time * oversample_factor).map(|i| i as f64 / oversampled_fs_hz).collect();
    crate::regressor::resample(&src_t, regressor, &over_t, interp)
}

/// Find the modal lag among masked voxels, binned over `[lag_min,
/// lag_max]`, for the next pass's `offsettime` (`SPEC_FULL.md` §4.5
/// "Outputs" / §10.7).
fn lag_histogram_peak(fit: &FitResults<f64>, lag_min: f64, lag_max: f64) -> f64 {
    const BINS: usize = 50;
    let width = (lag_max - lag_min) / BINS as f64;
    if width <= 0.0 {
        return 0.0;
    }
    let mut counts = [0usize; BINS];
    let mut any = false;
    for (&lag, &mask) in fit.lag.iter().zip(fit.mask.iter()) {
        if !mask {
            continue;
        }
        any = true;
        let idx = (((lag - lag_min) / width) as isize).clamp(0, BINS as isize - 1) as usize;
        counts[idx] += 1;
    }
    if !any {
        return 0.0;
    }
    let (best, _) = counts.iter().enumerate().max_by_key(|&(_, c)| *c).unwrap();
    lag_min + (best as f64 + 0.5) * width
}

/// Autocorrelation width of the current reference, used by the `MTT`
/// formula (`SPEC_FULL.md` §6: `MTT = sqrt(max(sigma^2 - acwidth^2, 0))`).
/// Width is where the (normalized) autocorrelation first decays below
/// `1/e`, matching a Gaussian's characteristic width at that level.
fn reference_autocorr_width(regressor: &[f64], fs_hz: f64) -> f64 {
    if regressor.len() < 2 {
        return 0.0;
    }
    let max_lag_samples = (regressor.len() - 1).min(regressor.len() / 2 + 1);
    let ac = autocorrelation(regressor, max_lag_samples);
    let threshold = 1.0 / std::f64::consts::E;
    let width_samples = ac
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, &v)| v.abs() < threshold)
        .map(|(i, _)| i)
        .unwrap_or(max_lag_samples);
    width_samples as f64 / fs_hz
}

/// Evaluate the fitted Gaussian peak model over the lag axis for every
/// voxel, zeroing rows whose fit failed (`SPEC_FULL.md` §3 "Gaussian
/// cube").
fn evaluate_gaussian_cube(fit: &FitResults<f64>, lags: &[f64]) -> VoxelCube<f64> {
    let n = fit.len();
    let l = lags.len();
    let mut out = Array2::<f64>::zeros((n, l));
    for row in 0..n {
        if !fit.mask[row] {
            continue;
        }
        let amp = fit.amp[row];
        let lag = fit.lag[row];
        let sigma = fit.sigma[row].max(1e-9);
        for (col, &s) in lags.iter().enumerate() {
            let x = s - lag;
            out[[row, col]] = amp * (-(x * x) / (2.0 * sigma * sigma)).exp();
        }
    }
    out
}

/// Bin the voxels selected for refinement by lag and average each bin's
/// shifted waveform, for the optional dispersion diagnostic
/// (`SPEC_FULL.md` §4.5 "Dispersion calculation").
fn compute_pass_dispersion(
    data: &VoxelMatrix<f64>,
    fit: &FitResults<f64>,
    mask_config: &RefineMaskConfig,
    fs_hz: f64,
    cfg: &PipelineConfig,
    step: f64,
    min_step: f64,
) -> Option<crate::refine::dispersion::DispersionResult> {
    let selection = crate::refine::mask::compute_refine_mask(fit, mask_config);
    let selected_rows: Vec<usize> = selection.iter().enumerate().filter_map(|(i, &k)| k.then_some(i)).collect();
    if selected_rows.is_empty() {
        return None;
    }
    let t = data.ncols();
    let mut shifted = Array2::<f64>::zeros((selected_rows.len(), t));
    let mut shifted_lags = Vec::with_capacity(selected_rows.len());
    for (out_row, &src_row) in selected_rows.iter().enumerate() {
        let voxel: Vec<f64> = data.row(src_row).to_vec();
        let lag = fit.lag[src_row];
        let (shifted_row, _) = shift::shift_to_reference(&voxel, fs_hz, -lag, cfg.regressor.interp);
        for col in 0..t {
            shifted[[out_row, col]] = shifted_row[col];
        }
        shifted_lags.push(lag);
    }
    Some(crate::refine::dispersion::compute_dispersion(
        &shifted,
        &shifted_lags,
        cfg.refine.lag_min_thresh,
        cfg.refine.lag_max_thresh,
        step,
        min_step,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CorrelationConfig, DespeckleConfig, FitConfig, GlmConfig, RefineConfig, RegressorConfig};
    use crate::data::VoxelGeometry;
    use crate::refine::RefineType;

    fn sine(n: usize, fs: f64, freq_hz: f64) -> Vec<f64> {
        (0..n).map(|i| (2.0 * std::f64::consts::PI * freq_hz * i as f64 / fs).sin()).collect()
    }

    fn base_config(fmri_tr: f64) -> PipelineConfig {
        PipelineConfig {
            regressor: RegressorConfig {
                oversample_factor: 1,
                ..RegressorConfig::default()
            },
            correlation: CorrelationConfig::default(),
            fit: FitConfig {
                lag_min: -20.0,
                lag_max: 20.0,
                ..FitConfig::default()
            },
            despeckle: DespeckleConfig {
                enabled: false,
                ..DespeckleConfig::default()
            },
            refine: RefineConfig {
                n_passes: 1,
                ..RefineConfig::default()
            },
            glm: GlmConfig {
                no_thresh: true,
                ..GlmConfig::default()
            },
            fmri_tr,
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn single_pass_all_ones_mask_recovers_known_reference() {
        let n_time = 128;
        let fs = 1.0;
        let probe = sine(n_time, fs, 0.05);
        let mut data = Array2::<f64>::zeros((8, n_time));
        for mut row in data.rows_mut() {
            for (col, v) in row.iter_mut().enumerate() {
                *v = probe[col];
            }
        }
        let geometry = VoxelGeometry::from_mask((8, 1, 1), &vec![true; 8]);
        let config = base_config(1.0);
        let pipeline = Pipeline::new(config).unwrap();
        let out = pipeline.run(&data, &geometry, &probe, fs).unwrap();

        for i in 0..8 {
            assert!(out.lag_strengths[i] >= 0.99, "strength[{i}]={}", out.lag_strengths[i]);
            assert!(out.lag_times[i].abs() <= 0.5, "lag[{i}]={}", out.lag_times[i]);
            assert_eq!(out.lag_mask[i], 1.0);
        }
    }

    #[test]
    fn noise_voxel_fails_amplitude_threshold() {
        let n_time = 128;
        let fs = 1.0;
        let probe = sine(n_time, fs, 0.05);
        let mut data = Array2::<f64>::zeros((2, n_time));
        for (col, v) in data.row_mut(0).iter_mut().enumerate() {
            *v = probe[col];
        }
        let mut state: u64 = 42;
        for v in data.row_mut(1).iter_mut() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
            *v = ((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0;
        }
        let geometry = VoxelGeometry::from_mask((2, 1, 1), &vec![true; 2]);
        let config = base_config(1.0);
        let pipeline = Pipeline::new(config).unwrap();
        let out = pipeline.run(&data, &geometry, &probe, fs).unwrap();

        assert_eq!(out.lag_mask[1], 0.0, "pure-noise voxel should fail thresholding");
    }

    #[test]
    fn glm_recovers_linear_relationship() {
        let n_time = 200;
        let fs = 1.0;
        let probe = sine(n_time, fs, 0.05);
        let v: Vec<f64> = probe.iter().map(|&l| 3.0 + 1.5 * l).collect();
        let mut state: u64 = 7;
        let v: Vec<f64> = v
            .into_iter()
            .map(|x| {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let noise = (((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0) * 0.1;
                x + noise
            })
            .collect();
        let data = Array2::from_shape_vec((1, n_time), v).unwrap();
        let geometry = VoxelGeometry::from_mask((1, 1, 1), &[true]);
        let config = base_config(1.0);
        let pipeline = Pipeline::new(config).unwrap();
        let out = pipeline.run(&data, &geometry, &probe, fs).unwrap();

        assert!((out.fit_coff[0] - 1.5).abs() < 0.1, "beta={}", out.fit_coff[0]);
        assert!(out.fit_r2[0] >= 0.9, "R2={}", out.fit_r2[0]);
    }

    #[test]
    fn pca_refinement_recovers_shared_cluster_lag() {
        let n_time = 256;
        let fs = 1.0;
        let probe = sine(n_time, fs, 0.05);
        let shift_samples = 1isize;
        let mut state: u64 = 99;
        let mut rows = Vec::new();
        for _ in 0..4 {
            let mut row = vec![0.0; n_time];
            for i in 0..n_time {
                let src = i as isize - shift_samples;
                if src >= 0 && (src as usize) < n_time {
                    row[i] = probe[src as usize];
                }
            }
            rows.push(row);
        }
        for _ in 0..20 {
            let row: Vec<f64> = (0..n_time)
                .map(|_| {
                    state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                    ((state >> 33) as f64 / (1u64 << 31) as f64) - 1.0
                })
                .collect();
            rows.push(row);
        }
        let n_voxels = rows.len();
        let mut data = Array2::<f64>::zeros((n_voxels, n_time));
        for (row_idx, row) in rows.into_iter().enumerate() {
            for (col, v) in row.into_iter().enumerate() {
                data[[row_idx, col]] = v;
            }
        }
        let geometry = VoxelGeometry::from_mask((n_voxels, 1, 1), &vec![true; n_voxels]);
        let mut config = base_config(1.0);
        config.refine.n_passes = 2;
        config.refine.refine_type = RefineType::Pca;
        config.refine.amp_thresh = 0.0;
        let pipeline = Pipeline::new(config).unwrap();
        let out = pipeline.run(&data, &geometry, &probe, fs).unwrap();

        for i in 0..4 {
            assert!((out.lag_times[i] - shift_samples as f64).abs() < 1.0, "lag[{i}]={}", out.lag_times[i]);
        }
    }
}
