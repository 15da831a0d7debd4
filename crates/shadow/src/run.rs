//! Records produced by individual shadow runs.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use molmia_core::{Molecule, PipelineWarning, PredictorOutput};

/// Outputs of one completed shadow run. The fitted predictor is not retained.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowRun {
    /// Run index within the ensemble.
    pub run_id: usize,
    /// Seed the run's subset and predictor were derived from.
    pub seed: u64,
    /// Digest of the population and candidate pool the run was trained against.
    pub population_digest: u64,
    /// Digest of the sampling rate and hyperparameters the run was trained with.
    #[serde(default)]
    pub config_digest: u64,
    /// Population indices trained on, ascending.
    pub in_indices: Vec<usize>,
    /// One output per population molecule, in population order.
    pub outputs: Vec<PredictorOutput>,
}

impl ShadowRun {
    /// Whether the molecule at `index` was in this run's training set.
    pub fn is_in(&self, index: usize) -> bool {
        self.in_indices.binary_search(&index).is_ok()
    }

    /// `(population index, in-flag, output)` for every recorded output.
    pub fn records(&self) -> impl Iterator<Item = (usize, bool, &PredictorOutput)> + '_ {
        let mut next_in = self.in_indices.iter().peekable();
        self.outputs.iter().enumerate().map(move |(i, out)| {
            let is_in = next_in.peek() == Some(&&i);
            if is_in {
                next_in.next();
            }
            (i, is_in, out)
        })
    }
}

/// A shadow run that produced no usable outputs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ShadowRunFailure {
    /// Run index within the ensemble.
    pub run_id: usize,
    /// Why the run failed.
    pub reason: String,
    /// Whether the run was interrupted by the deadline.
    pub cancelled: bool,
}

impl ShadowRunFailure {
    /// Convert into a pipeline warning.
    pub fn to_warning(&self) -> PipelineWarning {
        PipelineWarning::ShadowRunFailed {
            run_id: self.run_id,
            reason: self.reason.clone(),
            cancelled: self.cancelled,
        }
    }
}

/// Result of training a shadow ensemble.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EnsembleOutcome {
    /// Completed runs, ascending by run id.
    pub runs: Vec<ShadowRun>,
    /// Failed or cancelled runs, ascending by run id.
    pub failures: Vec<ShadowRunFailure>,
}

impl EnsembleOutcome {
    /// Warnings for every failed run.
    pub fn warnings(&self) -> Vec<PipelineWarning> {
        self.failures.iter().map(ShadowRunFailure::to_warning).collect()
    }

    /// Number of completed runs.
    pub fn succeeded(&self) -> usize {
        self.runs.len()
    }
}

struct Fnv(u64);

impl Fnv {
    fn new() -> Self {
        Self(0xCBF2_9CE4_8422_2325)
    }

    fn eat(&mut self, bytes: &[u8]) {
        for &b in bytes {
            self.0 ^= b as u64;
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01B3);
        }
    }
}

/// Digest identifying a population and candidate pool.
///
/// Stored runs are only reused when the digest matches.
pub fn population_digest(population: &[Molecule], candidates: &[usize]) -> u64 {
    let mut h = Fnv::new();
    for m in population {
        h.eat(m.id.as_str().as_bytes());
        h.eat(&[0xFF]);
    }
    for &c in candidates {
        h.eat(&(c as u64).to_le_bytes());
    }
    h.0
}

/// Digest of the settings that change what a run trains on or how.
///
/// Covers the inclusion probability and every hyperparameter, bit for bit.
pub fn config_digest(
    inclusion_probability: f64,
    hyperparameters: &BTreeMap<String, f64>,
) -> u64 {
    let mut h = Fnv::new();
    h.eat(&inclusion_probability.to_bits().to_le_bytes());
    for (name, value) in hyperparameters {
        h.eat(name.as_bytes());
        h.eat(&[0xFF]);
        h.eat(&value.to_bits().to_le_bytes());
    }
    h.0
}
