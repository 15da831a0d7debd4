//! Molecules, raw dataset records and the encoder seam.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MiaError, Result};
use crate::warning::PipelineWarning;

/// Feature vector produced by an [`Encoder`].
pub type FeatureVector = Array1<f64>;

/// Canonical molecule identifier.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MoleculeId(pub String);

impl MoleculeId {
    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MoleculeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MoleculeId {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

impl From<String> for MoleculeId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A dataset row as delivered by an external loader.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Molecule identifier.
    pub id: String,
    /// Structure string (SMILES).
    pub structure: String,
    /// Property label.
    pub label: f64,
    /// Optional precomputed similarity key (e.g. a scaffold).
    #[serde(default)]
    pub similarity_key: Option<String>,
}

impl RawRecord {
    /// Create a record without a precomputed similarity key.
    pub fn new(id: impl Into<String>, structure: impl Into<String>, label: f64) -> Self {
        Self {
            id: id.into(),
            structure: structure.into(),
            label,
            similarity_key: None,
        }
    }

    /// Attach a precomputed similarity key.
    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.similarity_key = Some(key.into());
        self
    }
}

/// An encoded molecule. Immutable once loaded.
#[derive(Clone, Debug, PartialEq)]
pub struct Molecule {
    /// Canonical identifier.
    pub id: MoleculeId,
    /// Structure string the features were derived from.
    pub structure: String,
    /// Property label.
    pub label: f64,
    /// Precomputed similarity key, if the loader supplied one.
    pub similarity_key: Option<String>,
    /// Encoder output, shared between shadow runs.
    pub features: Arc<FeatureVector>,
}

/// Featurizer turning a structure string into a feature vector.
pub trait Encoder {
    /// Encode a structure. Fails with [`MiaError::InvalidMolecule`] on unparsable input.
    fn encode(&self, structure: &str) -> Result<FeatureVector>;
}

impl<E: Encoder + ?Sized> Encoder for &E {
    fn encode(&self, structure: &str) -> Result<FeatureVector> {
        (**self).encode(structure)
    }
}

/// Encode raw records, dropping (and reporting) the ones that fail.
///
/// Duplicate identifiers are invalid: only the first occurrence is kept.
pub fn load_molecules<E: Encoder + ?Sized>(
    records: &[RawRecord],
    encoder: &E,
) -> (Vec<Molecule>, Vec<PipelineWarning>) {
    let mut molecules = Vec::with_capacity(records.len());
    let mut warnings = Vec::new();
    let mut seen = HashSet::with_capacity(records.len());

    for record in records {
        let outcome = if !record.label.is_finite() {
            Err(MiaError::invalid_molecule(&record.id, "label is not finite"))
        } else if !seen.insert(record.id.as_str()) {
            Err(MiaError::invalid_molecule(&record.id, "duplicate identifier"))
        } else {
            encoder.encode(&record.structure)
        };

        match outcome {
            Ok(features) => molecules.push(Molecule {
                id: MoleculeId(record.id.clone()),
                structure: record.structure.clone(),
                label: record.label,
                similarity_key: record.similarity_key.clone(),
                features: Arc::new(features),
            }),
            Err(e) => {
                let reason = match e {
                    MiaError::InvalidMolecule { reason, .. } => reason,
                    other => other.to_string(),
                };
                warn!(molecule = %record.id, error = %reason, "dropping invalid molecule");
                warnings.push(PipelineWarning::InvalidMolecule {
                    id: record.id.clone(),
                    reason,
                });
            }
        }
    }

    debug!(
        loaded = molecules.len(),
        dropped = warnings.len(),
        "encoded dataset"
    );
    (molecules, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct LengthEncoder;

    impl Encoder for LengthEncoder {
        fn encode(&self, structure: &str) -> Result<FeatureVector> {
            if structure.is_empty() {
                return Err(MiaError::invalid_molecule(structure, "empty structure"));
            }
            Ok(Array1::from_vec(vec![structure.len() as f64]))
        }
    }

    #[test]
    fn invalid_and_duplicate_records_are_dropped() {
        let records = vec![
            RawRecord::new("a", "CCO", 1.0),
            RawRecord::new("b", "", 2.0),
            RawRecord::new("a", "CCN", 3.0),
            RawRecord::new("c", "CCC", f64::NAN),
            RawRecord::new("d", "c1ccccc1", 4.0).with_key("benzene"),
        ];
        let (molecules, warnings) = load_molecules(&records, &LengthEncoder);

        let ids: Vec<&str> = molecules.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "d"]);
        assert_eq!(molecules[1].similarity_key.as_deref(), Some("benzene"));
        assert_eq!(molecules[0].features[0], 3.0);

        let dropped: Vec<&str> = warnings
            .iter()
            .map(|w| match w {
                PipelineWarning::InvalidMolecule { id, .. } => id.as_str(),
                _ => panic!("unexpected warning"),
            })
            .collect();
        assert_eq!(dropped, vec!["b", "a", "c"]);
    }
}
