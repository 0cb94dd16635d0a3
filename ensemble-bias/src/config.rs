use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::error::BiasError;
use crate::potential::{BiasPotential, EnsembleHarmonic, HarmonicPotential};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PotentialKind {
    Ensemble,
    Harmonic,
}

impl TryFrom<&str> for PotentialKind {
    type Error = String;
    fn try_from(s: &str) -> Result<Self, Self::Error> {
        match s {
            "ensemble" | "ensemble_harmonic" => Ok(Self::Ensemble),
            "harmonic" => Ok(Self::Harmonic),
            _ => Err(format!(
                "unknown potential '{s}', expected 'ensemble' or 'harmonic'"
            )),
        }
    }
}

fn validate_ensemble_params(cfg: &EnsembleParams) -> Result<(), ValidationError> {
    if cfg.n_bins < 1 {
        return Err(ValidationError::new("n_bins must be >= 1"));
    }
    if !(cfg.bin_width.is_finite() && cfg.bin_width > 0.0) {
        return Err(ValidationError::new("bin_width must be positive"));
    }
    if !(cfg.sigma.is_finite() && cfg.sigma > 0.0) {
        return Err(ValidationError::new("sigma must be positive"));
    }
    if cfg.n_samples < 1 {
        return Err(ValidationError::new("n_samples must be >= 1"));
    }
    if !(cfg.sample_period.is_finite() && cfg.sample_period > 0.0) {
        return Err(ValidationError::new("sample_period must be positive"));
    }
    if cfg.n_windows < 1 {
        return Err(ValidationError::new("n_windows must be >= 1"));
    }
    if cfg.experimental.len() != cfg.n_bins {
        return Err(ValidationError::new(
            "experimental distribution length must equal n_bins",
        ));
    }
    if cfg.experimental.iter().any(|v| !v.is_finite()) {
        return Err(ValidationError::new(
            "experimental distribution must be finite",
        ));
    }
    if !(cfg.min_dist.is_finite() && cfg.max_dist.is_finite()) {
        return Err(ValidationError::new("min_dist and max_dist must be finite"));
    }
    if cfg.min_dist > cfg.max_dist {
        return Err(ValidationError::new("min_dist must be <= max_dist"));
    }
    if !cfg.k.is_finite() {
        return Err(ValidationError::new("k must be finite"));
    }
    Ok(())
}

/// Parameters of the histogram-matching ensemble restraint.
///
/// Fixed for the lifetime of the restraint. Bin `n` sits at distance
/// `n * bin_width`; `experimental` holds one magnitude per bin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_ensemble_params"))]
pub struct EnsembleParams {
    pub n_bins: usize,
    pub bin_width: f64,
    /// Lower flat-bottom boundary.
    pub min_dist: f64,
    /// Upper flat-bottom boundary.
    pub max_dist: f64,
    pub experimental: Vec<f64>,
    /// Distances recorded per window.
    pub n_samples: usize,
    pub sample_period: f64,
    /// Windows averaged into the working histogram.
    pub n_windows: usize,
    /// Force constant.
    pub k: f64,
    /// Width of the Gaussian used to blur samples onto the grid.
    pub sigma: f64,
}

impl EnsembleParams {
    /// Duration of one sampling window.
    pub fn window_period(&self) -> f64 {
        self.n_samples as f64 * self.sample_period
    }
}

fn validate_harmonic_params(cfg: &HarmonicParams) -> Result<(), ValidationError> {
    if !(cfg.r0.is_finite() && cfg.r0 >= 0.0) {
        return Err(ValidationError::new("r0 must be finite and non-negative"));
    }
    if !cfg.k.is_finite() {
        return Err(ValidationError::new("k must be finite"));
    }
    Ok(())
}

/// Plain harmonic pair restraint `U = k/2 (R - r0)^2`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_harmonic_params"))]
pub struct HarmonicParams {
    pub r0: f64,
    pub k: f64,
}

/// Bias potential selected when the restraint is configured.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PotentialConfig {
    Ensemble(EnsembleParams),
    Harmonic(HarmonicParams),
}

impl PotentialConfig {
    pub fn kind(&self) -> PotentialKind {
        match self {
            Self::Ensemble(_) => PotentialKind::Ensemble,
            Self::Harmonic(_) => PotentialKind::Harmonic,
        }
    }

    pub fn build(self) -> Result<Box<dyn BiasPotential>, BiasError> {
        let potential: Box<dyn BiasPotential> = match self {
            Self::Ensemble(params) => Box::new(EnsembleHarmonic::new(params)?),
            Self::Harmonic(params) => Box::new(HarmonicPotential::new(params)?),
        };
        Ok(potential)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> EnsembleParams {
        EnsembleParams {
            n_bins: 4,
            bin_width: 0.5,
            min_dist: 0.5,
            max_dist: 1.5,
            experimental: vec![0.0, 0.5, 1.0, 0.5],
            n_samples: 3,
            sample_period: 0.1,
            n_windows: 2,
            k: 10.0,
            sigma: 0.2,
        }
    }

    #[test]
    fn test_valid_params() {
        assert!(params().validate().is_ok());
        assert!((params().window_period() - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_rejects_each_bad_field() {
        let cases: [fn(&mut EnsembleParams); 13] = [
            |p: &mut EnsembleParams| p.bin_width = 0.0,
            |p: &mut EnsembleParams| p.bin_width = -1.0,
            |p: &mut EnsembleParams| p.sigma = 0.0,
            |p: &mut EnsembleParams| p.sigma = f64::NAN,
            |p: &mut EnsembleParams| p.n_samples = 0,
            |p: &mut EnsembleParams| p.sample_period = 0.0,
            |p: &mut EnsembleParams| p.sample_period = -0.5,
            |p: &mut EnsembleParams| p.n_windows = 0,
            |p: &mut EnsembleParams| p.n_bins = 0,
            |p: &mut EnsembleParams| p.experimental.truncate(3),
            |p: &mut EnsembleParams| p.experimental.push(1.0),
            |p: &mut EnsembleParams| p.min_dist = 2.0,
            |p: &mut EnsembleParams| p.k = f64::INFINITY,
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut p = params();
            mutate(&mut p);
            let err: BiasError = p.validate().unwrap_err().into();
            assert!(
                matches!(err, BiasError::Configuration(_)),
                "case {i} should be a configuration error"
            );
        }
    }

    #[test]
    fn test_potential_kind_from_str() {
        assert_eq!(
            PotentialKind::try_from("ensemble"),
            Ok(PotentialKind::Ensemble)
        );
        assert_eq!(
            PotentialKind::try_from("harmonic"),
            Ok(PotentialKind::Harmonic)
        );
        assert!(PotentialKind::try_from("metadynamics").is_err());
    }

    #[test]
    fn test_config_from_json() {
        let json = r#"{
            "kind": "ensemble",
            "n_bins": 4, "bin_width": 0.5, "min_dist": 0.5, "max_dist": 1.5,
            "experimental": [0.0, 0.5, 1.0, 0.5],
            "n_samples": 3, "sample_period": 0.1, "n_windows": 2,
            "k": 10.0, "sigma": 0.2
        }"#;
        let cfg: PotentialConfig = serde_json::from_str(json).unwrap();
        assert_eq!(cfg.kind(), PotentialKind::Ensemble);
        assert_eq!(cfg, PotentialConfig::Ensemble(params()));
        assert!(cfg.build().is_ok());

        let harmonic: PotentialConfig =
            serde_json::from_str(r#"{"kind": "harmonic", "r0": 1.0, "k": 2.0}"#).unwrap();
        assert_eq!(harmonic.kind(), PotentialKind::Harmonic);
    }

    #[test]
    fn test_build_rejects_bad_params() {
        let mut p = params();
        p.sigma = -0.1;
        assert!(matches!(
            PotentialConfig::Ensemble(p).build(),
            Err(BiasError::Configuration(_))
        ));
    }
}
