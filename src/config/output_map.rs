//! Named output maps, replacing the reference implementation's
//! string-eval map lookup (`SPEC_FULL.md` §9 "String-eval of map
//! names").

/// Every per-voxel scalar map this pipeline can emit. `PipelineOutputs`
/// (in `crate::pipeline`) holds one `Vec<f64>` field per variant and
/// exposes [`crate::pipeline::PipelineOutputs::get`] as the single,
/// statically-checked replacement for a name-indexed lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputMap {
    LagTimes,
    LagStrengths,
    R2,
    LagSigma,
    LagMask,
    Mtt,
    FitR,
    FitR2,
    Mean,
    FitCoff,
    FitNorm,
    RefineMask,
}

impl OutputMap {
    /// All variants, in the order `SPEC_FULL.md` §6 lists them.
    pub const ALL: [OutputMap; 12] = [
        OutputMap::LagTimes,
        OutputMap::LagStrengths,
        OutputMap::R2,
        OutputMap::LagSigma,
        OutputMap::LagMask,
        OutputMap::Mtt,
        OutputMap::FitR,
        OutputMap::FitR2,
        OutputMap::Mean,
        OutputMap::FitCoff,
        OutputMap::FitNorm,
        OutputMap::RefineMask,
    ];

    /// The output file suffix an adapter would use (`<out>_<name>`).
    pub fn name(self) -> &'static str {
        match self {
            OutputMap::LagTimes => "lagtimes",
            OutputMap::LagStrengths => "lagstrengths",
            OutputMap::R2 => "R2",
            OutputMap::LagSigma => "lagsigma",
            OutputMap::LagMask => "lagmask",
            OutputMap::Mtt => "MTT",
            OutputMap::FitR => "fitR",
            OutputMap::FitR2 => "fitR2",
            OutputMap::Mean => "mean",
            OutputMap::FitCoff => "fitcoff",
            OutputMap::FitNorm => "fitNorm",
            OutputMap::RefineMask => "refinemask",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_variant_has_a_unique_name() {
        let mut names: Vec<&str> = OutputMap::ALL.iter().map(|m| m.name()).collect();
        names.sort_unstable();
        let mut dedup = names.clone();
        dedup.dedup();
        assert_eq!(names.len(), dedup.len());
    }
}
