//! Persisted audit results.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use molmia_core::{AuditConfig, MiaError, PipelineWarning, Result};

use crate::evaluator::{partition_scores, Evaluation, ExampleScore};
use crate::metrics::{AttackMetrics, BootstrapParams};

/// Everything an audit produced, immutable once built.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AttackReport {
    /// Per-example scores, target train first then holdout.
    pub scores: Vec<ExampleScore>,
    /// Aggregate metrics.
    pub metrics: AttackMetrics,
    /// Recoverable problems collected by every stage.
    pub warnings: Vec<PipelineWarning>,
    /// Configuration the audit ran with.
    pub config: AuditConfig,
}

impl AttackReport {
    /// Assemble a report from an evaluation.
    pub fn new(evaluation: Evaluation, warnings: Vec<PipelineWarning>, config: AuditConfig) -> Self {
        Self {
            scores: evaluation.scores,
            metrics: evaluation.metrics,
            warnings,
            config,
        }
    }

    /// Recompute aggregate metrics from the stored scores alone.
    ///
    /// With the stored bootstrap parameters this reproduces `metrics` exactly.
    pub fn recompute_metrics(&self, params: &BootstrapParams) -> Result<AttackMetrics> {
        let (members, non_members) = partition_scores(&self.scores);
        let fpr_points: Vec<f64> = self.metrics.operating_points.iter().map(|p| p.fpr).collect();
        AttackMetrics::compute(&members, &non_members, &fpr_points, params)
    }

    /// Serialize to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Write the report to `path`.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        fs::write(path, self.to_json()?).map_err(|e| MiaError::io(path, e))?;
        info!(path = %path.display(), scores = self.scores.len(), "saved attack report");
        Ok(())
    }

    /// Read a report written by [`AttackReport::save_json`].
    pub fn load_json(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = fs::read_to_string(path).map_err(|e| MiaError::io(path, e))?;
        Self::from_json(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrator::FitSource;
    use molmia_core::{MoleculeId, SeedKey};

    fn report() -> AttackReport {
        let scores: Vec<ExampleScore> = [(0.3, true), (2.5, true), (-1.0, false), (0.1, false), (1.0, true)]
            .iter()
            .enumerate()
            .map(|(i, &(score, member))| ExampleScore {
                id: MoleculeId(format!("m{i}")),
                member,
                statistic: if i == 3 { None } else { Some(-(i as f64) / 7.0) },
                score,
                in_source: FitSource::PooledRelative,
                out_source: FitSource::PerExample,
            })
            .collect();
        let params = BootstrapParams::new(50, 0.95, SeedKey::new(8)).unwrap();
        let (m, n) = partition_scores(&scores);
        let metrics = AttackMetrics::compute(&m, &n, &[0.001, 0.1], &params).unwrap();
        AttackReport {
            scores,
            metrics,
            warnings: vec![PipelineWarning::ShadowRunFailed {
                run_id: 4,
                reason: "training diverged: loss is NaN".into(),
                cancelled: false,
            }],
            config: AuditConfig::default(),
        }
    }

    #[test]
    fn reloaded_report_reproduces_metrics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        let original = report();
        original.save_json(&path).unwrap();

        let loaded = AttackReport::load_json(&path).unwrap();
        assert_eq!(loaded, original);
        let recomputed = loaded.recompute_metrics(&loaded.metrics.bootstrap).unwrap();
        assert_eq!(recomputed, original.metrics);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = AttackReport::load_json(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, MiaError::Io { .. }));
    }
}
