//! Shadow-model ensembles.
//!
//! Each run trains a fresh predictor on a random subset of the candidate pool
//! and records its outputs on the whole population, so every molecule
//! accumulates "trained on" and "not trained on" observations.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod driver;
pub mod predictor;
pub mod run;
pub mod sampling;
pub mod statistics;
pub mod store;

pub use driver::ShadowEnsemble;
pub use predictor::{Predictor, PredictorConfig, PredictorFactory, RunContext};
pub use run::{config_digest, population_digest, EnsembleOutcome, ShadowRun, ShadowRunFailure};
pub use sampling::poisson_subset;
pub use statistics::{Observations, PerExampleStatistics};
pub use store::ShadowStore;

/// Common imports for shadow training.
pub mod prelude {
    pub use crate::{
        EnsembleOutcome, PerExampleStatistics, Predictor, PredictorConfig, PredictorFactory,
        RunContext, ShadowEnsemble, ShadowRun, ShadowStore,
    };
}
