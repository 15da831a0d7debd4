//! Toy predictors and datasets shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashSet;

use rand_distr::{Distribution, StandardNormal};

use molmia::{
    AuditConfig, Encoder, FeatureVector, MiaError, Molecule, MoleculeId, Predictor,
    PredictorConfig, PredictorFactory, PredictorOutput, RawRecord, Result, RunContext, SeedKey,
};

/// Deterministic standard-normal noise for a predictor seed and molecule.
pub fn noise(seed: u64, id: &MoleculeId) -> f64 {
    let mut rng = SeedKey::new(seed).fold_in_label(id.as_str()).to_rng();
    StandardNormal.sample(&mut rng)
}

/// Encoder that ignores structure and emits a constant feature.
pub struct ConstantEncoder;

impl Encoder for ConstantEncoder {
    fn encode(&self, _structure: &str) -> Result<FeatureVector> {
        Ok(FeatureVector::from_vec(vec![1.0]))
    }
}

/// `n` molecules, each its own similarity group, with labels in [0, 10).
pub fn singleton_records(n: usize) -> Vec<RawRecord> {
    (0..n)
        .map(|i| {
            RawRecord::new(format!("mol-{i:04}"), "CCO", (i % 10) as f64)
                .with_key(format!("group-{i}"))
        })
        .collect()
}

/// `clusters × size` molecules grouped by similarity key.
pub fn clustered_records(clusters: usize, size: usize) -> Vec<RawRecord> {
    (0..clusters * size)
        .map(|i| {
            RawRecord::new(format!("mol-{i:04}"), "CCO", (i % 7) as f64)
                .with_key(format!("cluster-{}", i / size))
        })
        .collect()
}

/// A config small enough for quick tests.
pub fn quick_config(seed: u64) -> AuditConfig {
    AuditConfig {
        ensemble_size: 16,
        bootstrap_resamples: 400,
        confidence: 0.99,
        workers: Some(4),
        seed,
        ..AuditConfig::default()
    }
}

/// Outputs `label + N(0, 1)` regardless of training: no generalization gap.
pub struct ZeroGap;

pub struct ZeroGapPredictor {
    seed: u64,
}

impl Predictor for ZeroGapPredictor {
    fn train(&mut self, _examples: &[&Molecule], _ctx: &RunContext) -> Result<()> {
        Ok(())
    }

    fn predict(&self, examples: &[&Molecule]) -> Result<Vec<PredictorOutput>> {
        Ok(examples
            .iter()
            .map(|m| PredictorOutput::point(m.label + noise(self.seed, &m.id)))
            .collect())
    }
}

impl PredictorFactory for ZeroGap {
    type Predictor = ZeroGapPredictor;

    fn new_predictor(&self, config: &PredictorConfig) -> Result<ZeroGapPredictor> {
        Ok(ZeroGapPredictor { seed: config.seed })
    }
}

/// Returns the exact label for trained molecules and a large miss otherwise.
pub struct Memorizer;

pub struct MemorizerPredictor {
    seed: u64,
    seen: HashSet<MoleculeId>,
}

impl Predictor for MemorizerPredictor {
    fn train(&mut self, examples: &[&Molecule], _ctx: &RunContext) -> Result<()> {
        self.seen = examples.iter().map(|m| m.id.clone()).collect();
        Ok(())
    }

    fn predict(&self, examples: &[&Molecule]) -> Result<Vec<PredictorOutput>> {
        Ok(examples
            .iter()
            .map(|m| {
                if self.seen.contains(&m.id) {
                    PredictorOutput::point(m.label)
                } else {
                    PredictorOutput::point(m.label + 5.0 + noise(self.seed, &m.id))
                }
            })
            .collect())
    }
}

impl PredictorFactory for Memorizer {
    type Predictor = MemorizerPredictor;

    fn new_predictor(&self, config: &PredictorConfig) -> Result<MemorizerPredictor> {
        Ok(MemorizerPredictor {
            seed: config.seed,
            seen: HashSet::new(),
        })
    }
}

/// Wraps a factory; shadow runs whose id is `1 mod every` diverge.
pub struct Flaky<F> {
    pub inner: F,
    pub every: usize,
}

pub struct FlakyPredictor<P> {
    inner: P,
    every: usize,
}

impl<P: Predictor> Predictor for FlakyPredictor<P> {
    fn train(&mut self, examples: &[&Molecule], ctx: &RunContext) -> Result<()> {
        if let Some(run_id) = ctx.run_id {
            if run_id % self.every == 1 {
                return Err(MiaError::diverged(format!("loss exploded in run {run_id}")));
            }
        }
        self.inner.train(examples, ctx)
    }

    fn predict(&self, examples: &[&Molecule]) -> Result<Vec<PredictorOutput>> {
        self.inner.predict(examples)
    }
}

impl<F: PredictorFactory> PredictorFactory for Flaky<F> {
    type Predictor = FlakyPredictor<F::Predictor>;

    fn new_predictor(&self, config: &PredictorConfig) -> Result<Self::Predictor> {
        Ok(FlakyPredictor {
            inner: self.inner.new_predictor(config)?,
            every: self.every,
        })
    }
}

/// Wraps a factory; shadow runs from `stop_at` on report a reached deadline.
pub struct StopsAt<F> {
    pub inner: F,
    pub stop_at: usize,
}

pub struct StopsAtPredictor<P> {
    inner: P,
    stop_at: usize,
}

impl<P: Predictor> Predictor for StopsAtPredictor<P> {
    fn train(&mut self, examples: &[&Molecule], ctx: &RunContext) -> Result<()> {
        if ctx.should_stop() || ctx.run_id.is_some_and(|id| id >= self.stop_at) {
            return Err(MiaError::cancelled("deadline reached during training"));
        }
        self.inner.train(examples, ctx)
    }

    fn predict(&self, examples: &[&Molecule]) -> Result<Vec<PredictorOutput>> {
        self.inner.predict(examples)
    }
}

impl<F: PredictorFactory> PredictorFactory for StopsAt<F> {
    type Predictor = StopsAtPredictor<F::Predictor>;

    fn new_predictor(&self, config: &PredictorConfig) -> Result<Self::Predictor> {
        Ok(StopsAtPredictor {
            inner: self.inner.new_predictor(config)?,
            stop_at: self.stop_at,
        })
    }
}

/// A factory whose predictors never train successfully.
pub struct Broken;

impl PredictorFactory for Broken {
    type Predictor = ZeroGapPredictor;

    fn new_predictor(&self, _config: &PredictorConfig) -> Result<ZeroGapPredictor> {
        Err(MiaError::diverged("no predictor for you"))
    }
}
