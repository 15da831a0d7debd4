//! Scoring a target model's outputs and aggregating them into metrics.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use molmia_core::{AuditConfig, MiaError, MoleculeId, PredictorOutput, Result, SeedKey};

use crate::calibrator::{CalibratedScorer, FitSource};
use crate::metrics::{AttackMetrics, BootstrapParams};

/// One target-model output with its ground truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetExample {
    /// Molecule identifier.
    pub id: MoleculeId,
    /// Property label.
    pub label: f64,
    /// Target-model output.
    pub output: PredictorOutput,
}

impl TargetExample {
    /// Bundle an output with its molecule.
    pub fn new(id: impl Into<MoleculeId>, label: f64, output: PredictorOutput) -> Self {
        Self {
            id: id.into(),
            label,
            output,
        }
    }
}

/// Target-model outputs on its declared train and holdout sets.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TargetOutputs {
    /// Examples the target model trained on.
    pub train: Vec<TargetExample>,
    /// Examples held out from target training.
    pub holdout: Vec<TargetExample>,
}

impl TargetOutputs {
    /// Bundle train and holdout outputs.
    pub fn new(train: Vec<TargetExample>, holdout: Vec<TargetExample>) -> Self {
        Self { train, holdout }
    }

    fn check_disjoint(&self) -> Result<()> {
        let train: HashSet<&MoleculeId> = self.train.iter().map(|e| &e.id).collect();
        if let Some(dup) = self.holdout.iter().find(|e| train.contains(&e.id)) {
            return Err(MiaError::invalid_molecule(
                dup.id.as_str(),
                "listed in both target train and holdout",
            ));
        }
        Ok(())
    }
}

/// Per-example membership score.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExampleScore {
    /// Molecule identifier.
    pub id: MoleculeId,
    /// Ground truth: whether the target model trained on the molecule.
    pub member: bool,
    /// Statistic derived from the output; absent when non-finite.
    pub statistic: Option<f64>,
    /// Membership score; higher is more member-like.
    pub score: f64,
    /// Origin of the "in" fit.
    pub in_source: FitSource,
    /// Origin of the "out" fit.
    pub out_source: FitSource,
}

/// Split scores into `(members, non_members)`.
pub fn partition_scores(scores: &[ExampleScore]) -> (Vec<f64>, Vec<f64>) {
    let mut members = Vec::new();
    let mut non_members = Vec::new();
    for s in scores {
        if s.member {
            members.push(s.score);
        } else {
            non_members.push(s.score);
        }
    }
    (members, non_members)
}

/// Scores plus aggregate metrics for one target model.
#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Train examples first, then holdout, each in input order.
    pub scores: Vec<ExampleScore>,
    /// Aggregate metrics.
    pub metrics: AttackMetrics,
}

/// Applies a calibrated scorer to target outputs.
#[derive(Clone, Debug)]
pub struct Evaluator {
    /// False-positive rates at which TPR is reported.
    pub fpr_points: Vec<f64>,
    /// Bootstrap parameters.
    pub bootstrap: BootstrapParams,
}

impl Evaluator {
    /// Build from an audit configuration; resampling uses the `"bootstrap"` key.
    pub fn from_config(config: &AuditConfig) -> Result<Self> {
        Ok(Self {
            fpr_points: config.fpr_operating_points.clone(),
            bootstrap: BootstrapParams::new(
                config.bootstrap_resamples,
                config.confidence,
                SeedKey::new(config.seed).fold_in_label("bootstrap"),
            )?,
        })
    }

    /// Score every target example and compute metrics.
    ///
    /// Pure: the same scorer and outputs always give the same evaluation.
    pub fn evaluate(&self, scorer: &CalibratedScorer, targets: &TargetOutputs) -> Result<Evaluation> {
        if targets.train.is_empty() {
            return Err(MiaError::degenerate("target train set is empty"));
        }
        if targets.holdout.is_empty() {
            return Err(MiaError::degenerate("target holdout set is empty"));
        }
        targets.check_disjoint()?;

        let scores: Vec<ExampleScore> = targets
            .train
            .iter()
            .map(|e| (e, true))
            .chain(targets.holdout.iter().map(|e| (e, false)))
            .map(|(example, member)| {
                let detail = scorer.score_detail(&example.id, &example.output, example.label);
                ExampleScore {
                    id: example.id.clone(),
                    member,
                    statistic: detail.statistic.is_finite().then_some(detail.statistic),
                    score: detail.score,
                    in_source: detail.in_source,
                    out_source: detail.out_source,
                }
            })
            .collect();
        let unknown = scores
            .iter()
            .filter(|s| scorer.model(&s.id).is_none())
            .count();
        if unknown > 0 {
            debug!(unknown, "scored molecules absent from shadow statistics with pooled fits");
        }

        let (members, non_members) = partition_scores(&scores);
        let metrics = AttackMetrics::compute(&members, &non_members, &self.fpr_points, &self.bootstrap)?;
        info!(
            members = members.len(),
            non_members = non_members.len(),
            auc = metrics.auc.estimate,
            auc_lower = metrics.auc.lower,
            auc_upper = metrics.auc.upper,
            "evaluated membership attack"
        );
        Ok(Evaluation { scores, metrics })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrator::Calibrator;
    use molmia_core::{FallbackPolicy, OutputTransform, VarianceMode};
    use molmia_shadow::{Observations, PerExampleStatistics};

    fn scorer() -> CalibratedScorer {
        // Members fit almost perfectly, non-members miss by about 2.
        let ids: Vec<MoleculeId> = (0..6).map(|i| MoleculeId(format!("m{i}"))).collect();
        let obs = (0..6)
            .map(|_| Observations {
                in_values: vec![-0.01, -0.02, -0.03],
                out_values: vec![-3.0, -4.0, -5.0],
            })
            .collect();
        let stats = PerExampleStatistics::from_observations(ids, obs);
        Calibrator {
            min_observations: 2,
            fallback: FallbackPolicy::Pooled,
            variance: VarianceMode::PerExample,
            min_std: 1e-6,
            transform: OutputTransform::NegSquaredError,
        }
        .fit(&stats, &[0, 1, 2, 3, 4, 5])
        .unwrap()
        .scorer
    }

    fn evaluator() -> Evaluator {
        Evaluator {
            fpr_points: vec![0.1],
            bootstrap: BootstrapParams::new(100, 0.9, SeedKey::new(1)).unwrap(),
        }
    }

    fn targets() -> TargetOutputs {
        TargetOutputs::new(
            (0..3)
                .map(|i| TargetExample::new(format!("m{i}"), 1.0, PredictorOutput::point(1.1)))
                .collect(),
            (3..6)
                .map(|i| TargetExample::new(format!("m{i}"), 1.0, PredictorOutput::point(3.0)))
                .collect(),
        )
    }

    #[test]
    fn memorized_examples_score_higher() {
        let eval = evaluator().evaluate(&scorer(), &targets()).unwrap();
        assert_eq!(eval.scores.len(), 6);
        assert!(eval.scores[..3].iter().all(|s| s.member));
        assert_eq!(eval.metrics.auc.estimate, 1.0);
        assert_eq!(eval.metrics.n_members, 3);
    }

    #[test]
    fn evaluation_is_idempotent() {
        let scorer = scorer();
        let a = evaluator().evaluate(&scorer, &targets()).unwrap();
        let b = evaluator().evaluate(&scorer, &targets()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn empty_holdout_is_degenerate() {
        let mut t = targets();
        t.holdout.clear();
        let err = evaluator().evaluate(&scorer(), &t).unwrap_err();
        assert!(matches!(err, MiaError::DegenerateReport { .. }));
    }

    #[test]
    fn identical_scores_are_degenerate() {
        let t = TargetOutputs::new(
            vec![TargetExample::new("m0", 1.0, PredictorOutput::point(2.0))],
            vec![TargetExample::new("m1", 1.0, PredictorOutput::point(2.0))],
        );
        let err = evaluator().evaluate(&scorer(), &t).unwrap_err();
        assert!(matches!(err, MiaError::DegenerateReport { .. }));
    }

    #[test]
    fn overlapping_sets_are_rejected() {
        let mut t = targets();
        t.holdout.push(t.train[0].clone());
        let err = evaluator().evaluate(&scorer(), &t).unwrap_err();
        assert!(matches!(err, MiaError::InvalidMolecule { .. }));
    }

    #[test]
    fn non_finite_outputs_still_score() {
        let mut t = targets();
        t.holdout[0].output = PredictorOutput::point(f64::NAN);
        let eval = evaluator().evaluate(&scorer(), &t).unwrap();
        let s = &eval.scores[3];
        assert_eq!(s.statistic, None);
        assert!(s.score.is_finite());
    }
}
