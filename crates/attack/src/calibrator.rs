//! Likelihood-ratio calibration from shadow statistics.
//!
//! Every molecule gets a Gaussian over its "in" statistic and one over its
//! "out" statistic. Sides with too few shadow observations borrow from the
//! population: either the other side's mean shifted by the average in/out gap
//! (relative), or a Gaussian over every observation of that side (absolute).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Normal};
use statrs::statistics::Statistics;
use tracing::{debug, info};

use molmia_core::{
    AuditConfig, FallbackPolicy, MiaError, MoleculeId, OutputTransform, PipelineWarning,
    PredictorOutput, Result, VarianceMode,
};
use molmia_shadow::PerExampleStatistics;

/// A fitted normal distribution.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GaussianFit {
    /// Mean.
    pub mean: f64,
    /// Standard deviation, already floored.
    pub std: f64,
}

impl GaussianFit {
    /// Fit mean and unbiased standard deviation, flooring the latter at `min_std`.
    pub fn from_values(values: &[f64], min_std: f64) -> Self {
        let mean = values.iter().mean();
        let std = values.iter().std_dev();
        Self {
            mean,
            std: floor_std(std, min_std),
        }
    }

    /// Log density at `x`.
    pub fn ln_density(&self, x: f64) -> f64 {
        match Normal::new(self.mean, self.std) {
            Ok(normal) => normal.ln_pdf(x),
            Err(_) => f64::NAN,
        }
    }

    fn with_std(self, std: f64) -> Self {
        Self { std, ..self }
    }
}

fn floor_std(std: f64, min_std: f64) -> f64 {
    // NaN (fewer than two values) also lands on the floor.
    if std.is_finite() {
        std.max(min_std)
    } else {
        min_std
    }
}

/// Where a side's distribution came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitSource {
    /// The molecule's own shadow observations.
    PerExample,
    /// The other side's mean shifted by the population in/out gap.
    PooledRelative,
    /// All observations of that side across the population.
    PooledAbsolute,
}

impl FitSource {
    /// Whether population statistics were used.
    pub fn is_pooled(self) -> bool {
        !matches!(self, Self::PerExample)
    }
}

/// One side of a molecule's model.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SideFit {
    /// Fitted distribution.
    pub fit: GaussianFit,
    /// Origin of the fit.
    pub source: FitSource,
}

/// "In" and "out" fits for one molecule.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExampleModel {
    /// Distribution of the statistic when trained on.
    pub in_side: SideFit,
    /// Distribution of the statistic when not trained on.
    pub out_side: SideFit,
}

/// Per-example score and its provenance.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScoreDetail {
    /// Statistic computed from the output.
    pub statistic: f64,
    /// Log-likelihood ratio, "in" over "out". Always finite.
    pub score: f64,
    /// Origin of the "in" fit.
    pub in_source: FitSource,
    /// Origin of the "out" fit.
    pub out_source: FitSource,
}

/// Immutable function from target-model output to membership score.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibratedScorer {
    transform: OutputTransform,
    index: HashMap<MoleculeId, usize>,
    models: Vec<ExampleModel>,
    pooled_in: GaussianFit,
    pooled_out: GaussianFit,
}

impl CalibratedScorer {
    /// Score an output for molecule `id` with ground-truth `label`.
    pub fn score(&self, id: &MoleculeId, output: &PredictorOutput, label: f64) -> f64 {
        self.score_detail(id, output, label).score
    }

    /// Score with provenance. Unknown molecules use the absolute pooled fits.
    pub fn score_detail(&self, id: &MoleculeId, output: &PredictorOutput, label: f64) -> ScoreDetail {
        let model = self.model(id).copied().unwrap_or(ExampleModel {
            in_side: SideFit {
                fit: self.pooled_in,
                source: FitSource::PooledAbsolute,
            },
            out_side: SideFit {
                fit: self.pooled_out,
                source: FitSource::PooledAbsolute,
            },
        });
        let statistic = self.transform.apply(output, label);
        ScoreDetail {
            statistic,
            score: log_likelihood_ratio(&model.in_side.fit, &model.out_side.fit, statistic),
            in_source: model.in_side.source,
            out_source: model.out_side.source,
        }
    }

    /// Fitted model of a known molecule.
    pub fn model(&self, id: &MoleculeId) -> Option<&ExampleModel> {
        self.index.get(id).map(|&i| &self.models[i])
    }

    /// Absolute pooled `(in, out)` fits.
    pub fn pooled(&self) -> (GaussianFit, GaussianFit) {
        (self.pooled_in, self.pooled_out)
    }

    /// Transform used to derive statistics from outputs.
    pub fn transform(&self) -> OutputTransform {
        self.transform
    }

    /// Number of molecules with a fitted model.
    pub fn len(&self) -> usize {
        self.models.len()
    }

    /// Whether no molecule has a fitted model.
    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

fn log_likelihood_ratio(in_fit: &GaussianFit, out_fit: &GaussianFit, statistic: f64) -> f64 {
    if !statistic.is_finite() {
        return f64::MIN;
    }
    let llr = in_fit.ln_density(statistic) - out_fit.ln_density(statistic);
    if llr.is_nan() {
        0.0
    } else {
        llr.clamp(f64::MIN, f64::MAX)
    }
}

/// A fitted scorer plus the recoverable problems found while fitting.
#[derive(Clone, Debug)]
pub struct Calibration {
    /// The scorer.
    pub scorer: CalibratedScorer,
    /// One `PooledFallback` per molecule that borrowed population statistics.
    pub warnings: Vec<PipelineWarning>,
}

/// Fits a [`CalibratedScorer`] from per-example statistics.
#[derive(Clone, Debug)]
pub struct Calibrator {
    /// Minimum observations per side for a per-example fit.
    pub min_observations: usize,
    /// Handling of molecules below the minimum.
    pub fallback: FallbackPolicy,
    /// Standard deviation estimation mode.
    pub variance: VarianceMode,
    /// Floor applied to every standard deviation.
    pub min_std: f64,
    /// Statistic the observations were computed with.
    pub transform: OutputTransform,
}

impl Calibrator {
    /// Build from an audit configuration.
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            min_observations: config.min_observations,
            fallback: config.fallback,
            variance: config.variance,
            min_std: config.min_std,
            transform: config.transform,
        }
    }

    /// Fit the scorer.
    ///
    /// `candidates` are the population indices shadow runs could train on.
    /// Every other molecule is never "in" a shadow run, so its "in" side is
    /// always borrowed from the population and is not reported as short.
    pub fn fit(&self, stats: &PerExampleStatistics, candidates: &[usize]) -> Result<Calibration> {
        if self.min_observations == 0 {
            return Err(MiaError::invalid("min_observations must be positive"));
        }
        if !(self.min_std.is_finite() && self.min_std > 0.0) {
            return Err(MiaError::invalid("min_std must be positive"));
        }
        let min = self.min_observations;
        let mut is_candidate = vec![false; stats.len()];
        for &c in candidates {
            if let Some(flag) = is_candidate.get_mut(c) {
                *flag = true;
            }
        }

        let short: Vec<usize> = (0..stats.len())
            .filter(|&i| {
                let (n_in, n_out) = stats.counts(i);
                (is_candidate[i] && n_in < min) || n_out < min
            })
            .collect();
        if self.fallback == FallbackPolicy::Strict && !short.is_empty() {
            return Err(MiaError::InsufficientObservations {
                min,
                molecules: short.iter().map(|&i| stats.ids()[i].to_string()).collect(),
            });
        }

        let per_example: Vec<(Option<GaussianFit>, Option<GaussianFit>)> = stats
            .iter()
            .map(|(_, obs)| {
                let fit = |values: &[f64]| {
                    (values.len() >= min).then(|| GaussianFit::from_values(values, self.min_std))
                };
                (fit(&obs.in_values), fit(&obs.out_values))
            })
            .collect();

        let pooled = self.pooled_fits(stats, &short)?;
        let relative = RelativeFallback::estimate(stats, &per_example, self.min_std);
        let global = match self.variance {
            VarianceMode::PerExample => None,
            VarianceMode::Global => Some(self.global_stds(stats, &per_example, &pooled)),
        };

        let mut models = Vec::with_capacity(stats.len());
        for (in_fit, out_fit) in &per_example {
            let in_side = match (in_fit, out_fit, &relative) {
                (Some(fit), _, _) => side(*fit, FitSource::PerExample),
                (None, Some(out), Some(rel)) => side(
                    GaussianFit {
                        mean: out.mean + rel.shift,
                        std: rel.in_std,
                    },
                    FitSource::PooledRelative,
                ),
                _ => side(pooled.0, FitSource::PooledAbsolute),
            };
            let out_side = match (out_fit, in_fit, &relative) {
                (Some(fit), _, _) => side(*fit, FitSource::PerExample),
                (None, Some(inn), Some(rel)) => side(
                    GaussianFit {
                        mean: inn.mean - rel.shift,
                        std: rel.out_std,
                    },
                    FitSource::PooledRelative,
                ),
                _ => side(pooled.1, FitSource::PooledAbsolute),
            };
            let (in_side, out_side) = match global {
                Some((in_std, out_std)) => (
                    SideFit {
                        fit: in_side.fit.with_std(in_std),
                        ..in_side
                    },
                    SideFit {
                        fit: out_side.fit.with_std(out_std),
                        ..out_side
                    },
                ),
                None => (in_side, out_side),
            };
            models.push(ExampleModel { in_side, out_side });
        }

        let warnings: Vec<PipelineWarning> = short
            .iter()
            .map(|&i| {
                let (n_in, n_out) = stats.counts(i);
                PipelineWarning::PooledFallback {
                    id: stats.ids()[i].to_string(),
                    n_in,
                    n_out,
                }
            })
            .collect();
        info!(
            molecules = models.len(),
            short = short.len(),
            shift = relative.as_ref().map_or(f64::NAN, |r| r.shift),
            "fitted membership scorer"
        );

        let index = stats
            .ids()
            .iter()
            .cloned()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect();
        Ok(Calibration {
            scorer: CalibratedScorer {
                transform: self.transform,
                index,
                models,
                pooled_in: pooled.0,
                pooled_out: pooled.1,
            },
            warnings,
        })
    }

    fn pooled_fits(
        &self,
        stats: &PerExampleStatistics,
        short: &[usize],
    ) -> Result<(GaussianFit, GaussianFit)> {
        let all_in: Vec<f64> = stats.iter().flat_map(|(_, o)| o.in_values.iter().copied()).collect();
        let all_out: Vec<f64> = stats.iter().flat_map(|(_, o)| o.out_values.iter().copied()).collect();
        if all_in.len() < self.min_observations || all_out.len() < self.min_observations {
            debug!(n_in = all_in.len(), n_out = all_out.len(), "pooled sides too small");
            let mut molecules: Vec<String> =
                short.iter().map(|&i| stats.ids()[i].to_string()).collect();
            if molecules.is_empty() {
                molecules = stats.ids().iter().map(ToString::to_string).collect();
            }
            return Err(MiaError::InsufficientObservations {
                min: self.min_observations,
                molecules,
            });
        }
        Ok((
            GaussianFit::from_values(&all_in, self.min_std),
            GaussianFit::from_values(&all_out, self.min_std),
        ))
    }

    /// Within-molecule pooled standard deviation of each side.
    fn global_stds(
        &self,
        stats: &PerExampleStatistics,
        per_example: &[(Option<GaussianFit>, Option<GaussianFit>)],
        pooled: &(GaussianFit, GaussianFit),
    ) -> (f64, f64) {
        let mut acc = [(0.0, 0usize, 0usize); 2];
        for ((_, obs), (in_fit, out_fit)) in stats.iter().zip(per_example) {
            for (slot, fit, values) in [
                (0, in_fit, &obs.in_values),
                (1, out_fit, &obs.out_values),
            ] {
                if let Some(fit) = fit {
                    let (ss, n, groups) = &mut acc[slot];
                    *ss += values.iter().map(|v| (v - fit.mean).powi(2)).sum::<f64>();
                    *n += values.len();
                    *groups += 1;
                }
            }
        }
        let pick = |(ss, n, groups): (f64, usize, usize), fallback: f64| {
            if n > groups {
                floor_std((ss / (n - groups) as f64).sqrt(), self.min_std)
            } else {
                fallback
            }
        };
        (pick(acc[0], pooled.0.std), pick(acc[1], pooled.1.std))
    }
}

fn side(fit: GaussianFit, source: FitSource) -> SideFit {
    SideFit { fit, source }
}

/// Population in/out gap estimated from molecules with both sides fitted.
#[derive(Clone, Copy, Debug)]
struct RelativeFallback {
    shift: f64,
    in_std: f64,
    out_std: f64,
}

impl RelativeFallback {
    fn estimate(
        stats: &PerExampleStatistics,
        per_example: &[(Option<GaussianFit>, Option<GaussianFit>)],
        min_std: f64,
    ) -> Option<Self> {
        let both: Vec<(usize, GaussianFit, GaussianFit)> = per_example
            .iter()
            .enumerate()
            .filter_map(|(i, pair)| match pair {
                (Some(a), Some(b)) => Some((i, *a, *b)),
                _ => None,
            })
            .collect();
        if both.is_empty() {
            return None;
        }
        let shift = both.iter().map(|(_, a, b)| a.mean - b.mean).mean();

        let mut in_residuals = Vec::new();
        let mut out_residuals = Vec::new();
        for &(i, in_fit, out_fit) in &both {
            let Some(obs) = stats.get(i) else { continue };
            in_residuals.extend(obs.in_values.iter().map(|v| v - (out_fit.mean + shift)));
            out_residuals.extend(obs.out_values.iter().map(|v| v - (in_fit.mean - shift)));
        }
        Some(Self {
            shift,
            in_std: floor_std(rms(&in_residuals), min_std),
            out_std: floor_std(rms(&out_residuals), min_std),
        })
    }
}

fn rms(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    (values.iter().map(|v| v * v).sum::<f64>() / values.len() as f64).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use molmia_shadow::Observations;

    fn stats(rows: &[(&[f64], &[f64])]) -> PerExampleStatistics {
        let ids = (0..rows.len()).map(|i| MoleculeId(format!("m{i}"))).collect();
        let obs = rows
            .iter()
            .map(|(i, o)| Observations {
                in_values: i.to_vec(),
                out_values: o.to_vec(),
            })
            .collect();
        PerExampleStatistics::from_observations(ids, obs)
    }

    fn calibrator() -> Calibrator {
        Calibrator {
            min_observations: 2,
            fallback: FallbackPolicy::Pooled,
            variance: VarianceMode::PerExample,
            min_std: 1e-6,
            transform: OutputTransform::NegSquaredError,
        }
    }

    // With NegSquaredError and label 0, a prediction p gives statistic -p^2.
    fn output_for(statistic: f64) -> PredictorOutput {
        PredictorOutput::point((-statistic).sqrt())
    }

    #[test]
    fn per_example_fit_scores_in_like_outputs_higher() {
        let s = stats(&[(&[-0.1, -0.2, -0.3], &[-2.0, -3.0, -4.0])]);
        let cal = calibrator().fit(&s, &[0]).unwrap();
        assert!(cal.warnings.is_empty());
        let id = MoleculeId::from("m0");
        let member = cal.scorer.score_detail(&id, &output_for(-0.2), 0.0);
        let non_member = cal.scorer.score_detail(&id, &output_for(-3.0), 0.0);
        assert!(member.score > 0.0);
        assert!(non_member.score < 0.0);
        assert_eq!(member.in_source, FitSource::PerExample);
        assert_eq!(member.out_source, FitSource::PerExample);

        let model = cal.scorer.model(&id).unwrap();
        assert!((model.in_side.fit.mean + 0.2).abs() < 1e-12);
        assert!((model.in_side.fit.std - 0.1).abs() < 1e-12);
    }

    #[test]
    fn short_side_uses_shifted_other_side() {
        let s = stats(&[
            (&[0.0, 2.0], &[-4.0, -2.0]),
            (&[1.0, 3.0], &[-3.0, -1.0]),
            (&[], &[-10.0, -8.0]),
        ]);
        let cal = calibrator().fit(&s, &[0, 1, 2]).unwrap();
        let model = cal.scorer.model(&MoleculeId::from("m2")).unwrap();
        assert_eq!(model.in_side.source, FitSource::PooledRelative);
        assert_eq!(model.out_side.source, FitSource::PerExample);
        // Both fitted molecules have an in/out gap of 4.
        assert!((model.in_side.fit.mean - (-9.0 + 4.0)).abs() < 1e-12);
        assert_eq!(
            cal.warnings,
            vec![PipelineWarning::PooledFallback {
                id: "m2".into(),
                n_in: 0,
                n_out: 2
            }]
        );
    }

    #[test]
    fn non_candidates_are_not_reported_short() {
        let s = stats(&[(&[0.0, 1.0], &[-3.0, -2.0]), (&[], &[-3.0, -2.5])]);
        let cal = calibrator().fit(&s, &[0]).unwrap();
        assert!(cal.warnings.is_empty());
        let model = cal.scorer.model(&MoleculeId::from("m1")).unwrap();
        assert_eq!(model.in_side.source, FitSource::PooledRelative);
    }

    #[test]
    fn absolute_pool_when_no_molecule_has_both_sides() {
        let s = stats(&[(&[0.0, 1.0], &[-1.0]), (&[2.0], &[-2.0, -4.0])]);
        let cal = calibrator().fit(&s, &[0, 1]).unwrap();
        let m0 = cal.scorer.model(&MoleculeId::from("m0")).unwrap();
        assert_eq!(m0.out_side.source, FitSource::PooledAbsolute);
        assert!((m0.out_side.fit.mean + 7.0 / 3.0).abs() < 1e-12);
        assert_eq!(cal.warnings.len(), 2);
    }

    #[test]
    fn strict_policy_lists_every_short_molecule() {
        let s = stats(&[
            (&[0.0, 1.0], &[-1.0]),
            (&[0.0, 1.0], &[-1.0, -2.0]),
            (&[0.0], &[-1.0, -2.0]),
        ]);
        let strict = Calibrator {
            fallback: FallbackPolicy::Strict,
            ..calibrator()
        };
        match strict.fit(&s, &[0, 1, 2]) {
            Err(MiaError::InsufficientObservations { min, molecules }) => {
                assert_eq!(min, 2);
                assert_eq!(molecules, vec!["m0".to_string(), "m2".to_string()]);
            }
            other => panic!("expected insufficient observations, got {other:?}"),
        }
    }

    #[test]
    fn empty_pool_is_fatal_even_with_fallback() {
        let s = stats(&[(&[], &[-1.0, -2.0]), (&[], &[-1.0])]);
        let err = calibrator().fit(&s, &[0, 1]).unwrap_err();
        assert!(matches!(err, MiaError::InsufficientObservations { .. }));
    }

    #[test]
    fn unknown_molecules_use_absolute_pool() {
        let s = stats(&[(&[0.0, -0.5], &[-3.0, -2.0])]);
        let cal = calibrator().fit(&s, &[0]).unwrap();
        let detail = cal
            .scorer
            .score_detail(&MoleculeId::from("stranger"), &output_for(-0.2), 0.0);
        assert_eq!(detail.in_source, FitSource::PooledAbsolute);
        assert_eq!(detail.out_source, FitSource::PooledAbsolute);
        assert!(detail.score > 0.0);
    }

    #[test]
    fn global_variance_shares_one_std_per_side() {
        let s = stats(&[
            (&[0.0, 2.0], &[-4.0, -2.0]),
            (&[1.0, 1.5], &[-3.0, -1.0]),
        ]);
        let global = Calibrator {
            variance: VarianceMode::Global,
            ..calibrator()
        };
        let cal = global.fit(&s, &[0, 1]).unwrap();
        let a = cal.scorer.model(&MoleculeId::from("m0")).unwrap();
        let b = cal.scorer.model(&MoleculeId::from("m1")).unwrap();
        assert_eq!(a.in_side.fit.std, b.in_side.fit.std);
        assert_eq!(a.out_side.fit.std, b.out_side.fit.std);
        // in: (1 + 1 + 0.0625 + 0.0625) / (4 - 2)
        assert!((a.in_side.fit.std - 1.0625f64.sqrt()).abs() < 1e-12);
        assert_eq!(a.in_side.fit.mean, 1.0);
    }

    #[test]
    fn scores_are_always_finite() {
        let s = stats(&[(&[0.0, 0.0], &[-1.0, -1.0])]);
        let cal = calibrator().fit(&s, &[0]).unwrap();
        let id = MoleculeId::from("m0");
        for p in [f64::NAN, f64::INFINITY, 1e200, 0.0] {
            let score = cal.scorer.score(&id, &PredictorOutput::point(p), 0.0);
            assert!(score.is_finite(), "prediction {p} gave {score}");
        }
    }
}
