//! Membership scoring and privacy-risk aggregation.
//!
//! The calibrator turns shadow statistics into a per-molecule likelihood-ratio
//! scorer; the evaluator applies it to a target model and summarizes how well
//! a threshold on the score separates training members from held-out molecules.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod calibrator;
pub mod evaluator;
pub mod metrics;
pub mod report;

pub use calibrator::{
    CalibratedScorer, Calibration, Calibrator, ExampleModel, FitSource, GaussianFit, ScoreDetail,
    SideFit,
};
pub use evaluator::{
    partition_scores, Evaluation, Evaluator, ExampleScore, TargetExample, TargetOutputs,
};
pub use metrics::{
    auc, epsilon_lower_bound, max_advantage, roc_curve, tpr_at_fpr, AttackMetrics,
    BootstrapParams, Interval, OperatingPoint, RocCurve,
};
pub use report::AttackReport;

/// Common imports for scoring and reporting.
pub mod prelude {
    pub use crate::{
        AttackMetrics, AttackReport, BootstrapParams, CalibratedScorer, Calibrator, Evaluator,
        ExampleScore, Interval, TargetExample, TargetOutputs,
    };
}
