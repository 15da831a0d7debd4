//! Shadow-model ensemble driver.
//!
//! Runs are independent: each derives its own seed from `(global seed, run
//! index)`, owns its predictor for its lifetime, and returns its outputs.
//! Results are collected in run order and merged afterwards, so the outcome
//! does not depend on worker scheduling.

use std::collections::BTreeMap;

use rayon::prelude::*;
use tracing::{debug, info, info_span, warn};

use molmia_core::{AuditConfig, Deadline, MiaError, Molecule, Result, SeedKey};

use crate::predictor::{Predictor, PredictorConfig, PredictorFactory, RunContext};
use crate::run::{
    config_digest, population_digest, EnsembleOutcome, ShadowRun, ShadowRunFailure,
};
use crate::sampling::poisson_subset;
use crate::store::ShadowStore;

/// Trains an ensemble of shadow predictors.
#[derive(Clone, Debug)]
pub struct ShadowEnsemble {
    /// Number of runs.
    pub ensemble_size: usize,
    /// Per-run probability that a candidate is trained on.
    pub inclusion_probability: f64,
    /// Worker pool size (`None` = available parallelism).
    pub workers: Option<usize>,
    /// Root key; run `i` uses `key.fold_in(i)`.
    pub key: SeedKey,
    /// Hyperparameters forwarded to every predictor.
    pub hyperparameters: BTreeMap<String, f64>,
}

impl ShadowEnsemble {
    /// Build from an audit configuration.
    pub fn from_config(config: &AuditConfig) -> Self {
        Self {
            ensemble_size: config.ensemble_size,
            inclusion_probability: config.inclusion_probability,
            workers: config.workers,
            key: SeedKey::new(config.seed).fold_in_label("shadow"),
            hyperparameters: config.hyperparameters.clone(),
        }
    }

    /// Train every run.
    ///
    /// `population` is every molecule outputs are recorded for; `candidates`
    /// are the population indices runs may train on. Failed runs are
    /// collected rather than propagated.
    pub fn train<F: PredictorFactory>(
        &self,
        population: &[Molecule],
        candidates: &[usize],
        factory: &F,
        deadline: Deadline,
    ) -> Result<EnsembleOutcome> {
        let run_ids: Vec<usize> = (0..self.ensemble_size).collect();
        self.train_runs(population, candidates, factory, deadline, &run_ids, None)
    }

    /// Train every run not already present in `store`, persisting new runs.
    pub fn train_cached<F: PredictorFactory>(
        &self,
        population: &[Molecule],
        candidates: &[usize],
        factory: &F,
        deadline: Deadline,
        store: &ShadowStore,
    ) -> Result<EnsembleOutcome> {
        let digest = population_digest(population, &normalized(candidates));
        let settings = self.config_digest();
        let mut cached = Vec::new();
        let mut missing = Vec::new();
        for run_id in 0..self.ensemble_size {
            match store.load(run_id)? {
                Some(run)
                    if run.seed == self.run_key(run_id).value()
                        && run.population_digest == digest
                        && run.config_digest == settings
                        && run.outputs.len() == population.len() =>
                {
                    cached.push(run)
                }
                _ => missing.push(run_id),
            }
        }
        info!(
            cached = cached.len(),
            missing = missing.len(),
            dir = %store.dir().display(),
            "reusing stored shadow runs"
        );

        let mut outcome =
            self.train_runs(population, candidates, factory, deadline, &missing, Some(store))?;
        outcome.runs.extend(cached);
        outcome.runs.sort_by_key(|r| r.run_id);
        Ok(outcome)
    }

    fn config_digest(&self) -> u64 {
        config_digest(self.inclusion_probability, &self.hyperparameters)
    }

    fn run_key(&self, run_id: usize) -> SeedKey {
        self.key.fold_in(run_id as u64)
    }

    fn train_runs<F: PredictorFactory>(
        &self,
        population: &[Molecule],
        candidates: &[usize],
        factory: &F,
        deadline: Deadline,
        run_ids: &[usize],
        store: Option<&ShadowStore>,
    ) -> Result<EnsembleOutcome> {
        if !(self.inclusion_probability > 0.0 && self.inclusion_probability < 1.0) {
            return Err(MiaError::invalid("inclusion_probability must be in (0, 1)"));
        }
        if let Some(&bad) = candidates.iter().find(|&&c| c >= population.len()) {
            return Err(MiaError::invalid(format!(
                "candidate index {bad} outside population of {}",
                population.len()
            )));
        }
        let candidates = normalized(candidates);
        let digest = population_digest(population, &candidates);
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(n) = self.workers {
            builder = builder.num_threads(n);
        }
        let pool = builder
            .build()
            .map_err(|e| MiaError::invalid(format!("cannot build worker pool: {e}")))?;

        info!(
            runs = run_ids.len(),
            workers = pool.current_num_threads(),
            population = population.len(),
            candidates = candidates.len(),
            "training shadow ensemble"
        );

        let results: Vec<std::result::Result<ShadowRun, ShadowRunFailure>> = pool.install(|| {
            run_ids
                .par_iter()
                .map(|&run_id| {
                    let outcome =
                        self.run_one(run_id, population, &candidates, digest, factory, deadline);
                    match (outcome, store) {
                        (Ok(run), Some(store)) => match store.save(&run) {
                            Ok(()) => Ok(run),
                            Err(e) => {
                                warn!(run_id, error = %e, "could not persist shadow run");
                                Ok(run)
                            }
                        },
                        (other, _) => other,
                    }
                })
                .collect()
        });

        let mut outcome = EnsembleOutcome::default();
        for result in results {
            match result {
                Ok(run) => outcome.runs.push(run),
                Err(failure) => outcome.failures.push(failure),
            }
        }
        info!(
            succeeded = outcome.runs.len(),
            failed = outcome.failures.len(),
            "shadow ensemble finished"
        );
        Ok(outcome)
    }

    fn run_one<F: PredictorFactory>(
        &self,
        run_id: usize,
        population: &[Molecule],
        candidates: &[usize],
        digest: u64,
        factory: &F,
        deadline: Deadline,
    ) -> std::result::Result<ShadowRun, ShadowRunFailure> {
        let _span = info_span!("shadow_run", run_id).entered();
        let fail = |reason: String, cancelled: bool| {
            if cancelled {
                debug!(%reason, "shadow run cancelled");
            } else {
                warn!(%reason, "shadow run failed");
            }
            ShadowRunFailure {
                run_id,
                reason,
                cancelled,
            }
        };
        if deadline.expired() {
            return Err(fail("deadline passed before start".into(), true));
        }

        let key = self.run_key(run_id);
        let mut rng = key.to_rng();
        let in_indices = poisson_subset(candidates, self.inclusion_probability, &mut rng);
        if in_indices.is_empty() {
            return Err(fail("empty training subset".into(), false));
        }

        let config = PredictorConfig {
            seed: key.fold_in_label("predictor").value(),
            hyperparameters: self.hyperparameters.clone(),
        };
        let ctx = RunContext {
            run_id: Some(run_id),
            deadline,
        };

        let mut predictor = factory
            .new_predictor(&config)
            .map_err(|e| fail(format!("predictor construction: {e}"), false))?;
        let train_set: Vec<&Molecule> = in_indices.iter().map(|&i| &population[i]).collect();
        if let Err(e) = predictor.train(&train_set, &ctx) {
            let cancelled = matches!(e, MiaError::Cancelled { .. });
            return Err(fail(e.to_string(), cancelled));
        }
        if deadline.expired() {
            return Err(fail("deadline passed during training".into(), true));
        }

        let everyone: Vec<&Molecule> = population.iter().collect();
        let outputs = predictor
            .predict(&everyone)
            .map_err(|e| fail(format!("prediction: {e}"), false))?;
        drop(predictor);
        if outputs.len() != population.len() {
            return Err(fail(
                format!(
                    "predictor returned {} outputs for {} molecules",
                    outputs.len(),
                    population.len()
                ),
                false,
            ));
        }

        debug!(trained_on = in_indices.len(), "shadow run complete");
        Ok(ShadowRun {
            run_id,
            seed: key.value(),
            population_digest: digest,
            config_digest: self.config_digest(),
            in_indices,
            outputs,
        })
    }
}

fn normalized(candidates: &[usize]) -> Vec<usize> {
    let mut sorted = candidates.to_vec();
    sorted.sort_unstable();
    sorted.dedup();
    sorted
}
