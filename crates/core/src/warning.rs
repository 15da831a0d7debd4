//! Recoverable problems collected during an audit.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A per-input or per-run problem that did not abort the pipeline.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// Molecule dropped because its structure could not be encoded.
    InvalidMolecule {
        /// Molecule identifier.
        id: String,
        /// Why encoding failed.
        reason: String,
    },
    /// Molecule kept but clustered alone because the similarity index could
    /// not compare it with anything.
    Unclustered {
        /// Molecule identifier.
        id: String,
        /// Why no similarity could be computed.
        reason: String,
    },
    /// Shadow run excluded from the statistics.
    ShadowRunFailed {
        /// Index of the failed run.
        run_id: usize,
        /// Why the run failed.
        reason: String,
        /// Whether the run was interrupted by the deadline.
        cancelled: bool,
    },
    /// A partition deviates from its target size by more than the tolerance.
    SplitDeviation {
        /// Partition name.
        partition: String,
        /// Target number of molecules.
        target: usize,
        /// Assigned number of molecules.
        actual: usize,
    },
    /// Molecule scored with pooled statistics on at least one side.
    PooledFallback {
        /// Molecule identifier.
        id: String,
        /// Observed "in" count.
        n_in: usize,
        /// Observed "out" count.
        n_out: usize,
    },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidMolecule { id, reason } => {
                write!(f, "dropped molecule {id}: {reason}")
            }
            Self::Unclustered { id, reason } => {
                write!(f, "molecule {id} kept as its own cluster: {reason}")
            }
            Self::ShadowRunFailed {
                run_id,
                reason,
                cancelled,
            } => {
                let what = if *cancelled { "cancelled" } else { "failed" };
                write!(f, "shadow run {run_id} {what}: {reason}")
            }
            Self::SplitDeviation {
                partition,
                target,
                actual,
            } => write!(f, "partition {partition} holds {actual} molecules (target {target})"),
            Self::PooledFallback { id, n_in, n_out } => write!(
                f,
                "molecule {id} uses pooled statistics ({n_in} in / {n_out} out observations)"
            ),
        }
    }
}
