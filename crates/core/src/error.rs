//! Error types for membership-inference audits.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Stage of the audit pipeline that raised a fatal error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PipelineStage {
    /// Loading and encoding the raw dataset.
    DataLoaded,
    /// Clustering and partitioning.
    Split,
    /// Training the shadow ensemble.
    ShadowTrained,
    /// Fitting the membership scorer.
    Calibrated,
    /// Scoring the target model.
    Evaluated,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::DataLoaded => "load",
            Self::Split => "split",
            Self::ShadowTrained => "shadow-training",
            Self::Calibrated => "calibration",
            Self::Evaluated => "evaluation",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while auditing a model.
#[derive(Debug, thiserror::Error)]
pub enum MiaError {
    /// No valid partition assignment exists.
    #[error("infeasible split: {reason}{}", cluster_suffix(.cluster))]
    InfeasibleSplit {
        /// Human-readable error description.
        reason: String,
        /// Cluster responsible for the failure, when one can be named.
        cluster: Option<usize>,
    },

    /// A single shadow run failed to produce outputs.
    #[error("shadow run {run_id} failed: {reason}")]
    ShadowRunFailed {
        /// Index of the failed run.
        run_id: usize,
        /// Human-readable error description.
        reason: String,
    },

    /// Molecules lack the minimum number of in/out observations.
    #[error(
        "insufficient observations (need {min} in and {min} out): {}",
        format_ids(.molecules)
    )]
    InsufficientObservations {
        /// Required number of observations per side.
        min: usize,
        /// Molecules (or pooled sides) that fell short.
        molecules: Vec<String>,
    },

    /// A structure string could not be parsed or encoded.
    #[error("invalid molecule {id}: {reason}")]
    InvalidMolecule {
        /// Molecule identifier.
        id: String,
        /// Human-readable error description.
        reason: String,
    },

    /// Evaluation cannot produce meaningful metrics.
    #[error("degenerate report: {reason}")]
    DegenerateReport {
        /// Human-readable error description.
        reason: String,
    },

    /// The external predictor failed to converge.
    #[error("training diverged: {msg}")]
    TrainingDiverged {
        /// Human-readable error description.
        msg: String,
    },

    /// Invalid parameter provided.
    #[error("invalid parameter: {msg}")]
    InvalidParameters {
        /// Human-readable error description.
        msg: String,
    },

    /// Work was interrupted by a deadline.
    #[error("cancelled: {msg}")]
    Cancelled {
        /// Human-readable error description.
        msg: String,
    },

    /// Filesystem failure while persisting or loading artifacts.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path being accessed.
        path: String,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Artifact (de)serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A fatal error annotated with the pipeline stage that raised it.
    #[error("{stage} stage failed: {source}")]
    Stage {
        /// Stage that failed.
        stage: PipelineStage,
        /// Underlying error.
        #[source]
        source: Box<MiaError>,
    },
}

/// Result type for audit operations.
pub type Result<T> = std::result::Result<T, MiaError>;

impl MiaError {
    /// Create an invalid parameter error.
    pub fn invalid<S: Into<String>>(msg: S) -> Self {
        Self::InvalidParameters { msg: msg.into() }
    }

    /// Create a degenerate report error.
    pub fn degenerate<S: Into<String>>(reason: S) -> Self {
        Self::DegenerateReport {
            reason: reason.into(),
        }
    }

    /// Create a training divergence error.
    pub fn diverged<S: Into<String>>(msg: S) -> Self {
        Self::TrainingDiverged { msg: msg.into() }
    }

    /// Create an invalid molecule error.
    pub fn invalid_molecule<I: Into<String>, S: Into<String>>(id: I, reason: S) -> Self {
        Self::InvalidMolecule {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Create an infeasible split error.
    pub fn infeasible<S: Into<String>>(reason: S, cluster: Option<usize>) -> Self {
        Self::InfeasibleSplit {
            reason: reason.into(),
            cluster,
        }
    }

    /// Create a cancellation error.
    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::Cancelled { msg: msg.into() }
    }

    /// Wrap an io error with the path being accessed.
    pub fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }

    /// Annotate with the failing stage. Already-annotated errors are kept as is.
    pub fn at_stage(self, stage: PipelineStage) -> Self {
        match self {
            Self::Stage { .. } => self,
            other => Self::Stage {
                stage,
                source: Box::new(other),
            },
        }
    }

    /// Stage that raised this error, if annotated.
    pub fn stage(&self) -> Option<PipelineStage> {
        match self {
            Self::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// The innermost error, with stage annotations removed.
    pub fn root(&self) -> &MiaError {
        match self {
            Self::Stage { source, .. } => source.root(),
            other => other,
        }
    }
}

fn cluster_suffix(cluster: &Option<usize>) -> String {
    match cluster {
        Some(id) => format!(" (cluster {id})"),
        None => String::new(),
    }
}

fn format_ids(ids: &[String]) -> String {
    const SHOWN: usize = 8;
    if ids.len() <= SHOWN {
        return ids.join(", ");
    }
    format!("{} and {} more", ids[..SHOWN].join(", "), ids.len() - SHOWN)
}
