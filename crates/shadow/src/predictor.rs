//! Capability interface of the external trainable predictor.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use molmia_core::{Deadline, Molecule, PredictorOutput, Result};

/// Per-instance predictor configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PredictorConfig {
    /// Seed for any randomness inside the predictor (initialization, dropout, batching).
    pub seed: u64,
    /// Free-form model, optimizer and loss parameters.
    pub hyperparameters: BTreeMap<String, f64>,
}

impl PredictorConfig {
    /// Look up a hyperparameter, falling back to `default`.
    pub fn get_or(&self, name: &str, default: f64) -> f64 {
        self.hyperparameters.get(name).copied().unwrap_or(default)
    }
}

/// Context handed to [`Predictor::train`] so long trainings can stop early.
#[derive(Clone, Copy, Debug)]
pub struct RunContext {
    /// Index of the shadow run (`None` for the target model).
    pub run_id: Option<usize>,
    /// Deadline after which training should be abandoned.
    pub deadline: Deadline,
}

impl RunContext {
    /// Whether the predictor should stop as soon as possible.
    pub fn should_stop(&self) -> bool {
        self.deadline.expired()
    }
}

/// A trainable property predictor.
///
/// Shadow runs and the target model only ever see this interface.
pub trait Predictor {
    /// Fit on the given molecules. Divergence is reported as
    /// [`molmia_core::MiaError::TrainingDiverged`].
    fn train(&mut self, examples: &[&Molecule], ctx: &RunContext) -> Result<()>;

    /// Predict one output per molecule, in order.
    fn predict(&self, examples: &[&Molecule]) -> Result<Vec<PredictorOutput>>;
}

/// Factory creating fresh, independent predictor instances.
pub trait PredictorFactory: Sync {
    /// Predictor type produced by the factory.
    type Predictor: Predictor;

    /// Create an untrained predictor.
    fn new_predictor(&self, config: &PredictorConfig) -> Result<Self::Predictor>;
}

impl<F: PredictorFactory + ?Sized> PredictorFactory for &F {
    type Predictor = F::Predictor;

    fn new_predictor(&self, config: &PredictorConfig) -> Result<Self::Predictor> {
        (**self).new_predictor(config)
    }
}
