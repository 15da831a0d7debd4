//! Facade crate re-exporting stable APIs.
//!
//! Membership-inference privacy audits for molecular property predictors:
//! leakage-safe cluster splits, shadow-model ensembles, likelihood-ratio
//! calibration and bootstrap risk metrics behind one typed pipeline.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod pipeline;

/// Crate version string.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub use molmia_attack as attack;
pub use molmia_core as core;
pub use molmia_shadow as shadow;
pub use molmia_split as split;

pub use crate::attack::{
    auc, roc_curve, tpr_at_fpr, AttackMetrics, AttackReport, BootstrapParams, CalibratedScorer,
    Calibrator, Evaluator, ExampleScore, FitSource, Interval, TargetExample, TargetOutputs,
};
pub use crate::core::{
    AuditConfig, Deadline, Encoder, FallbackPolicy, FeatureVector, FingerprintConfig, MiaError,
    Molecule, MoleculeId, OutputTransform, PipelineStage, PipelineWarning, PredictorOutput, RawRecord,
    Result, SeedKey, SplitRatios, VarianceMode,
};
pub use logging::init_tracing;
pub use pipeline::{Audit, Calibrated, DataLoaded, Evaluated, ShadowTrained, Split};
pub use crate::shadow::{
    EnsembleOutcome, PerExampleStatistics, Predictor, PredictorConfig, PredictorFactory,
    RunContext, ShadowEnsemble, ShadowRun, ShadowStore,
};
pub use crate::split::{
    Cluster, ClusterSplitter, FingerprintEncoder, KeyIndex, Partition, SimilarityIndex,
    SplitAssignment, TanimotoIndex,
};

/// Convenience prelude covering a full audit.
pub mod prelude {
    pub use crate::pipeline::{Audit, Calibrated, DataLoaded, Evaluated, ShadowTrained, Split};
    pub use molmia_attack::prelude::*;
    pub use molmia_core::prelude::*;
    pub use molmia_shadow::prelude::*;
    pub use molmia_split::prelude::*;
}
