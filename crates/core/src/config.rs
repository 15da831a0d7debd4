//! Audit configuration.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{MiaError, Result};
use crate::transform::OutputTransform;

/// Hashed path fingerprint parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FingerprintConfig {
    /// Longest token path hashed into the fingerprint.
    pub max_path_len: usize,
    /// Fingerprint width in bits.
    pub n_bits: usize,
}

impl Default for FingerprintConfig {
    fn default() -> Self {
        Self {
            max_path_len: 3,
            n_bits: 2048,
        }
    }
}

/// Target partition sizes, expressed as nested fractions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitRatios {
    /// Fraction of molecules assigned to the shadow side.
    pub shadow_fraction: f64,
    /// Fraction of the shadow side that shadow runs may train on.
    pub shadow_train_fraction: f64,
    /// Fraction of the target side the target model trains on.
    pub target_train_fraction: f64,
}

impl Default for SplitRatios {
    fn default() -> Self {
        Self {
            shadow_fraction: 0.5,
            shadow_train_fraction: 1.0,
            target_train_fraction: 0.5,
        }
    }
}

impl SplitRatios {
    /// Validate that all fractions lie in [0, 1] and both sides can be non-empty.
    pub fn validate(&self) -> Result<()> {
        for (name, v) in [
            ("shadow_fraction", self.shadow_fraction),
            ("shadow_train_fraction", self.shadow_train_fraction),
            ("target_train_fraction", self.target_train_fraction),
        ] {
            if !(0.0..=1.0).contains(&v) {
                return Err(MiaError::invalid(format!("{name} must be in [0, 1], got {v}")));
            }
        }
        if self.shadow_fraction <= 0.0 || self.shadow_fraction >= 1.0 {
            return Err(MiaError::invalid(
                "shadow_fraction must leave both shadow and target sides non-empty",
            ));
        }
        if self.shadow_train_fraction <= 0.0 {
            return Err(MiaError::invalid(
                "shadow_train_fraction must be positive: shadow runs need candidates",
            ));
        }
        Ok(())
    }
}

/// What to do with molecules lacking the minimum observation count.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackPolicy {
    /// Use population-pooled statistics for the short side.
    #[default]
    Pooled,
    /// Fail calibration.
    Strict,
}

/// How standard deviations of fitted distributions are estimated.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarianceMode {
    /// One standard deviation per molecule and side.
    #[default]
    PerExample,
    /// One pooled standard deviation per side.
    Global,
}

/// Full configuration surface of an audit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Tanimoto similarity at or above which molecules share a cluster.
    pub similarity_threshold: f64,
    /// Fingerprint parameters for the similarity index.
    pub fingerprint: FingerprintConfig,
    /// Target partition ratios.
    pub ratios: SplitRatios,
    /// Allowed deviation from target sizes, as a fraction of the dataset.
    pub ratio_tolerance: f64,
    /// Number of shadow runs.
    pub ensemble_size: usize,
    /// Per-run probability that a candidate molecule is trained on.
    pub inclusion_probability: f64,
    /// Minimum in and out observations for a per-example fit.
    pub min_observations: usize,
    /// Handling of molecules below `min_observations`.
    pub fallback: FallbackPolicy,
    /// Standard deviation estimation mode.
    pub variance: VarianceMode,
    /// Floor applied to fitted standard deviations.
    pub min_std: f64,
    /// Statistic computed from predictor outputs.
    pub transform: OutputTransform,
    /// Bootstrap resample count.
    pub bootstrap_resamples: usize,
    /// Confidence level of reported intervals.
    pub confidence: f64,
    /// False-positive rates at which the true-positive rate is reported.
    pub fpr_operating_points: Vec<f64>,
    /// Global random seed.
    pub seed: u64,
    /// Worker pool size for shadow training (`None` = available parallelism).
    pub workers: Option<usize>,
    /// Wall-clock budget for shadow training, in seconds.
    pub deadline_secs: Option<f64>,
    /// Free-form predictor hyperparameters forwarded to the factory.
    pub hyperparameters: BTreeMap<String, f64>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.7,
            fingerprint: FingerprintConfig::default(),
            ratios: SplitRatios::default(),
            ratio_tolerance: 0.05,
            ensemble_size: 16,
            inclusion_probability: 0.5,
            min_observations: 2,
            fallback: FallbackPolicy::Pooled,
            variance: VarianceMode::PerExample,
            min_std: 1e-6,
            transform: OutputTransform::NegSquaredError,
            bootstrap_resamples: 1000,
            confidence: 0.95,
            fpr_operating_points: vec![0.001, 0.01, 0.1],
            seed: 0,
            workers: None,
            deadline_secs: None,
            hyperparameters: BTreeMap::new(),
        }
    }
}

impl AuditConfig {
    /// Validate every field.
    pub fn validate(&self) -> Result<()> {
        if !(self.similarity_threshold > 0.0 && self.similarity_threshold <= 1.0) {
            return Err(MiaError::invalid("similarity_threshold must be in (0, 1]"));
        }
        if self.fingerprint.n_bits == 0 || self.fingerprint.max_path_len == 0 {
            return Err(MiaError::invalid(
                "fingerprint n_bits and max_path_len must be positive",
            ));
        }
        self.ratios.validate()?;
        if !(0.0..=1.0).contains(&self.ratio_tolerance) {
            return Err(MiaError::invalid("ratio_tolerance must be in [0, 1]"));
        }
        if self.ensemble_size == 0 {
            return Err(MiaError::invalid("ensemble_size must be positive"));
        }
        if !(self.inclusion_probability > 0.0 && self.inclusion_probability < 1.0) {
            return Err(MiaError::invalid("inclusion_probability must be in (0, 1)"));
        }
        if self.min_observations < 2 {
            return Err(MiaError::invalid(
                "min_observations must be at least 2 to estimate a spread",
            ));
        }
        if !(self.min_std.is_finite() && self.min_std > 0.0) {
            return Err(MiaError::invalid("min_std must be positive"));
        }
        if self.bootstrap_resamples == 0 {
            return Err(MiaError::invalid("bootstrap_resamples must be positive"));
        }
        if !(self.confidence > 0.0 && self.confidence < 1.0) {
            return Err(MiaError::invalid("confidence must be in (0, 1)"));
        }
        if self
            .fpr_operating_points
            .iter()
            .any(|f| !(0.0..=1.0).contains(f))
        {
            return Err(MiaError::invalid("fpr_operating_points must lie in [0, 1]"));
        }
        if self.workers == Some(0) {
            return Err(MiaError::invalid("workers must be positive"));
        }
        if let Some(secs) = self.deadline_secs {
            Duration::try_from_secs_f64(secs).map_err(|e| {
                MiaError::invalid(format!(
                    "deadline_secs of {secs} is not a usable duration: {e}"
                ))
            })?;
        }
        Ok(())
    }

    /// Shadow-training budget as a duration.
    ///
    /// A budget too large to represent means no deadline.
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs
            .and_then(|secs| Duration::try_from_secs_f64(secs).ok())
    }

    /// Load and validate a JSON configuration file.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| MiaError::io(path, e))?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON.
    pub fn to_json_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text).map_err(|e| MiaError::io(path, e))
    }
}
