//! Core types for membership-inference audits of molecular property predictors.
//!
//! This crate holds what every stage shares: molecules and the encoder seam,
//! the audit configuration, deterministic seed derivation, the scalar
//! statistic computed from predictor outputs, and the error/warning taxonomy.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod deadline;
pub mod error;
pub mod molecule;
pub mod seed;
pub mod transform;
pub mod warning;

pub use config::{AuditConfig, FallbackPolicy, FingerprintConfig, SplitRatios, VarianceMode};
pub use deadline::Deadline;
pub use error::{MiaError, PipelineStage, Result};
pub use molecule::{load_molecules, Encoder, FeatureVector, Molecule, MoleculeId, RawRecord};
pub use seed::SeedKey;
pub use transform::{OutputTransform, PredictorOutput};
pub use warning::PipelineWarning;

/// Common imports for downstream users.
pub mod prelude {
    pub use crate::{
        load_molecules, AuditConfig, Deadline, Encoder, FallbackPolicy, FeatureVector,
        FingerprintConfig, MiaError, Molecule, MoleculeId, OutputTransform, PipelineStage,
        PipelineWarning, PredictorOutput, RawRecord, Result, SeedKey, SplitRatios, VarianceMode,
    };
}
