//! Audit a nearest-neighbour regressor on a synthetic molecule set.
//!
//! With `k = 1` the regressor reproduces every training label exactly, so the
//! attack should separate members from held-out molecules almost perfectly.
//! Larger `k` smooths the predictions and lowers the AUC.
//!
//! Run with `RUST_LOG=molmia=debug` for per-stage logs.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use molmia::{
    init_tracing, Audit, AuditConfig, FeatureVector, FingerprintConfig, FingerprintEncoder,
    Molecule, Predictor, PredictorConfig, PredictorFactory, PredictorOutput, RawRecord, Result,
    RunContext,
};

struct Knn;

struct KnnRegressor {
    k: usize,
    memory: Vec<(FeatureVector, f64)>,
}

fn tanimoto(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let both = a.dot(b);
    let either = a.sum() + b.sum() - both;
    if either == 0.0 {
        1.0
    } else {
        both / either
    }
}

impl Predictor for KnnRegressor {
    fn train(&mut self, examples: &[&Molecule], ctx: &RunContext) -> Result<()> {
        if ctx.should_stop() {
            return Err(molmia::MiaError::cancelled("deadline reached before fitting"));
        }
        self.memory = examples
            .iter()
            .map(|m| ((*m.features).clone(), m.label))
            .collect();
        Ok(())
    }

    fn predict(&self, examples: &[&Molecule]) -> Result<Vec<PredictorOutput>> {
        Ok(examples
            .iter()
            .map(|m| {
                let mut sims: Vec<(f64, f64)> = self
                    .memory
                    .iter()
                    .map(|(f, label)| (tanimoto(&m.features, f), *label))
                    .collect();
                sims.sort_by(|a, b| b.0.total_cmp(&a.0));
                let top = &sims[..self.k.min(sims.len())];
                let mean = top.iter().map(|(_, l)| l).sum::<f64>() / top.len().max(1) as f64;
                PredictorOutput::point(mean)
            })
            .collect())
    }
}

impl PredictorFactory for Knn {
    type Predictor = KnnRegressor;

    fn new_predictor(&self, config: &PredictorConfig) -> Result<KnnRegressor> {
        Ok(KnnRegressor {
            k: config.get_or("k", 1.0).max(1.0) as usize,
            memory: Vec::new(),
        })
    }
}

fn synthetic_records(n: usize, seed: u64) -> Vec<RawRecord> {
    const ATOMS: [&str; 4] = ["C", "N", "O", "S"];
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..n)
        .map(|i| {
            let len = rng.gen_range(6..12);
            let mut smiles = String::new();
            let mut label = 0.0;
            for pos in 0..len {
                let atom = ATOMS[rng.gen_range(0..ATOMS.len())];
                label += match atom {
                    "N" => 1.0,
                    "O" => 0.5,
                    _ => 0.1,
                };
                if pos > 0 && pos + 1 < len && rng.gen_bool(0.2) {
                    smiles.push_str(&format!("({atom})"));
                } else {
                    smiles.push_str(atom);
                }
            }
            label += rng.gen_range(-0.5..0.5);
            RawRecord::new(format!("syn-{i:04}"), smiles, label)
        })
        .collect()
}

fn main() -> Result<()> {
    init_tracing("info");

    for k in [1.0, 15.0] {
        let config = AuditConfig {
            ensemble_size: 16,
            bootstrap_resamples: 500,
            seed: 42,
            fingerprint: FingerprintConfig {
                max_path_len: 3,
                n_bits: 512,
            },
            hyperparameters: BTreeMap::from([("k".to_string(), k)]),
            ..AuditConfig::default()
        };
        let records = synthetic_records(400, 7);
        let encoder = FingerprintEncoder::new(config.fingerprint.clone());

        let split = Audit::load(&records, &encoder, config)?.split_by_fingerprint()?;
        let targets = split.train_target(&Knn)?;
        let report = split
            .train_shadows(&Knn)?
            .calibrate()?
            .evaluate(&targets)?
            .into_report();

        let m = &report.metrics;
        println!(
            "k = {k:>2}: AUC {:.3} [{:.3}, {:.3}], advantage {:.3}, {} warnings",
            m.auc.estimate,
            m.auc.lower,
            m.auc.upper,
            m.advantage.estimate,
            report.warnings.len()
        );
        for p in &m.operating_points {
            println!(
                "        TPR @ FPR {:<5}: {:.3}  (eps >= {:.3})",
                p.fpr, p.tpr.estimate, p.epsilon_lower
            );
        }
    }
    Ok(())
}
