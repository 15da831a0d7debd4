//! Similarity indices grouping molecules into clusters.

use std::collections::HashMap;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use molmia_core::{FingerprintConfig, MiaError, Molecule, PipelineWarning, Result};

use crate::fingerprint::{path_fingerprint, tanimoto, Fingerprint};
use crate::union_find::DisjointSet;

/// A group of structurally similar molecules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    /// Cluster id, dense from 0.
    pub id: usize,
    /// Indices into the molecule slice the clusters were built from, ascending.
    pub members: Vec<usize>,
}

impl Cluster {
    /// Number of molecules.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the cluster is empty.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Partition of a molecule set into similarity clusters.
///
/// Implementations must return clusters that cover every input index exactly
/// once, with ids numbered in order of each cluster's first member.
pub trait SimilarityIndex {
    /// Cluster the molecules.
    fn clusters(&self, molecules: &[Molecule]) -> Result<Vec<Cluster>>;

    /// Cluster the molecules, also reporting molecules the index could only
    /// place in a cluster of their own.
    fn clusters_with_warnings(
        &self,
        molecules: &[Molecule],
    ) -> Result<(Vec<Cluster>, Vec<PipelineWarning>)> {
        Ok((self.clusters(molecules)?, Vec::new()))
    }
}

fn clusters_from_groups(groups: Vec<Vec<usize>>) -> Vec<Cluster> {
    groups
        .into_iter()
        .enumerate()
        .map(|(id, members)| Cluster { id, members })
        .collect()
}

/// Single-linkage clustering on Tanimoto similarity of path fingerprints.
///
/// Any two molecules with similarity at or above `threshold` end up in the
/// same cluster, so clusters never split a near-duplicate pair.
#[derive(Clone, Debug)]
pub struct TanimotoIndex {
    /// Similarity at or above which two molecules are linked.
    pub threshold: f64,
    /// Fingerprint parameters.
    pub fingerprint: FingerprintConfig,
}

impl TanimotoIndex {
    /// Create an index, validating the threshold.
    pub fn new(threshold: f64, fingerprint: FingerprintConfig) -> Result<Self> {
        if !(threshold > 0.0 && threshold <= 1.0) {
            return Err(MiaError::invalid(format!(
                "similarity threshold must be in (0, 1], got {threshold}"
            )));
        }
        Ok(Self {
            threshold,
            fingerprint,
        })
    }

    /// Fingerprint every molecule. Unparsable structures yield `None`.
    pub fn fingerprints(&self, molecules: &[Molecule]) -> Vec<Option<Fingerprint>> {
        self.try_fingerprints(molecules)
            .into_iter()
            .map(|fp| fp.ok())
            .collect()
    }

    fn try_fingerprints(&self, molecules: &[Molecule]) -> Vec<Result<Fingerprint>> {
        molecules
            .par_iter()
            .map(|m| {
                let fp = path_fingerprint(&m.structure, &self.fingerprint);
                if let Err(e) = &fp {
                    warn!(molecule = %m.id, error = %e, "no fingerprint, keeping as singleton");
                }
                fp
            })
            .collect()
    }

    /// Similarity of two molecules under this index (0 if either cannot be fingerprinted).
    pub fn similarity(&self, a: &Molecule, b: &Molecule) -> f64 {
        match (
            path_fingerprint(&a.structure, &self.fingerprint),
            path_fingerprint(&b.structure, &self.fingerprint),
        ) {
            (Ok(fa), Ok(fb)) => tanimoto(&fa, &fb),
            _ => 0.0,
        }
    }
}

impl SimilarityIndex for TanimotoIndex {
    fn clusters(&self, molecules: &[Molecule]) -> Result<Vec<Cluster>> {
        self.clusters_with_warnings(molecules)
            .map(|(clusters, _)| clusters)
    }

    fn clusters_with_warnings(
        &self,
        molecules: &[Molecule],
    ) -> Result<(Vec<Cluster>, Vec<PipelineWarning>)> {
        let mut warnings = Vec::new();
        let fps: Vec<Option<Fingerprint>> = self
            .try_fingerprints(molecules)
            .into_iter()
            .zip(molecules)
            .map(|(fp, m)| match fp {
                Ok(fp) => Some(fp),
                Err(e) => {
                    warnings.push(PipelineWarning::Unclustered {
                        id: m.id.to_string(),
                        reason: e.to_string(),
                    });
                    None
                }
            })
            .collect();
        let threshold = self.threshold;

        let edges: Vec<(usize, usize)> = (0..fps.len())
            .into_par_iter()
            .flat_map_iter(|i| {
                let fps = &fps;
                let row = fps[i].as_ref();
                (i + 1..fps.len()).filter_map(move |j| {
                    let (a, b) = (row?, fps[j].as_ref()?);
                    (tanimoto(a, b) >= threshold).then_some((i, j))
                })
            })
            .collect();

        let mut ds = DisjointSet::new(molecules.len());
        for &(i, j) in &edges {
            ds.union(i, j);
        }
        let clusters = clusters_from_groups(ds.groups());
        debug!(
            molecules = molecules.len(),
            links = edges.len(),
            clusters = clusters.len(),
            unfingerprinted = warnings.len(),
            threshold,
            "tanimoto clustering"
        );
        Ok((clusters, warnings))
    }
}

/// Clustering by a precomputed similarity key such as a scaffold.
///
/// Molecules without a key form singleton clusters.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeyIndex;

impl SimilarityIndex for KeyIndex {
    fn clusters(&self, molecules: &[Molecule]) -> Result<Vec<Cluster>> {
        let mut slot_of_key: HashMap<&str, usize> = HashMap::new();
        let mut groups: Vec<Vec<usize>> = Vec::new();
        for (i, m) in molecules.iter().enumerate() {
            let slot = match m.similarity_key.as_deref() {
                Some(key) => *slot_of_key.entry(key).or_insert_with(|| {
                    groups.push(Vec::new());
                    groups.len() - 1
                }),
                None => {
                    groups.push(Vec::new());
                    groups.len() - 1
                }
            };
            groups[slot].push(i);
        }
        Ok(clusters_from_groups(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use molmia_core::{load_molecules, FeatureVector, MoleculeId, RawRecord};
    use proptest::prelude::*;

    use crate::fingerprint::FingerprintEncoder;

    fn molecules(structures: &[&str]) -> Vec<Molecule> {
        let records: Vec<RawRecord> = structures
            .iter()
            .enumerate()
            .map(|(i, s)| RawRecord::new(format!("m{i}"), *s, i as f64))
            .collect();
        let (mols, warnings) = load_molecules(&records, &FingerprintEncoder::default());
        assert!(warnings.is_empty());
        mols
    }

    fn cluster_of(clusters: &[Cluster], n: usize) -> Vec<usize> {
        let mut of = vec![usize::MAX; n];
        for c in clusters {
            for &m in &c.members {
                of[m] = c.id;
            }
        }
        of
    }

    #[test]
    fn near_duplicates_share_a_cluster() {
        let mols = molecules(&["CCCCO", "NN", "OCCCC", "c1ccccc1", "BrBr", "c1ccccc1"]);
        let index = TanimotoIndex::new(0.9, FingerprintConfig::default()).unwrap();
        let clusters = index.clusters(&mols).unwrap();
        let of = cluster_of(&clusters, mols.len());

        assert_eq!(of[0], of[2]);
        assert_eq!(of[3], of[5]);
        assert_ne!(of[0], of[1]);
        assert_ne!(of[1], of[4]);
        assert_eq!(clusters.len(), 4);
        assert_eq!(clusters[0].members, vec![0, 2]);
        assert_eq!(clusters[1].id, 1);
    }

    #[test]
    fn unparsable_structures_become_warned_singletons() {
        let mut mols = molecules(&["CCCCO", "OCCCC"]);
        mols.push(Molecule {
            id: MoleculeId::from("broken"),
            structure: "C1CC(".to_string(),
            label: 0.0,
            similarity_key: None,
            features: Arc::new(FeatureVector::zeros(1)),
        });
        let index = TanimotoIndex::new(0.9, FingerprintConfig::default()).unwrap();
        let (clusters, warnings) = index.clusters_with_warnings(&mols).unwrap();

        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[1].members, vec![2]);
        assert_eq!(warnings.len(), 1);
        assert!(matches!(
            &warnings[0],
            PipelineWarning::Unclustered { id, .. } if id == "broken"
        ));
        assert!(KeyIndex.clusters_with_warnings(&mols).unwrap().1.is_empty());
    }

    #[test]
    fn key_index_groups_by_key() {
        let records = vec![
            RawRecord::new("a", "CCO", 0.0).with_key("s1"),
            RawRecord::new("b", "CCN", 0.0),
            RawRecord::new("c", "CCC", 0.0).with_key("s1"),
            RawRecord::new("d", "CCCl", 0.0).with_key("s2"),
        ];
        let (mols, _) = load_molecules(&records, &FingerprintEncoder::default());
        let clusters = KeyIndex.clusters(&mols).unwrap();
        let members: Vec<Vec<usize>> = clusters.into_iter().map(|c| c.members).collect();
        assert_eq!(members, vec![vec![0, 2], vec![1], vec![3]]);
    }

    #[test]
    fn rejects_bad_threshold() {
        assert!(TanimotoIndex::new(0.0, FingerprintConfig::default()).is_err());
        assert!(TanimotoIndex::new(1.5, FingerprintConfig::default()).is_err());
    }

    const VOCAB: [&str; 12] = [
        "CCO", "OCC", "CCN", "CCCO", "c1ccccc1", "c1ccccc1O", "ClCCl", "BrCBr", "CC(=O)O",
        "CC(=O)N", "NCCN", "C1CCCCC1",
    ];

    proptest! {
        #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]

        #[test]
        fn similar_pairs_never_straddle_clusters(
            picks in proptest::collection::vec(0usize..VOCAB.len(), 2..24),
            threshold in 0.2f64..1.0,
        ) {
            let structures: Vec<&str> = picks.iter().map(|&i| VOCAB[i]).collect();
            let mols = molecules(&structures);
            let index = TanimotoIndex::new(threshold, FingerprintConfig::default()).unwrap();
            let clusters = index.clusters(&mols).unwrap();
            let of = cluster_of(&clusters, mols.len());

            let total: usize = clusters.iter().map(Cluster::len).sum();
            prop_assert_eq!(total, mols.len());
            for i in 0..mols.len() {
                for j in i + 1..mols.len() {
                    if index.similarity(&mols[i], &mols[j]) >= threshold {
                        prop_assert_eq!(of[i], of[j]);
                    }
                }
            }
        }
    }
}
