//! Leakage-safe cluster split.
//!
//! Whole clusters are assigned to partitions, so two molecules that the
//! similarity index linked can never land on different sides of a boundary.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use molmia_core::{MiaError, PipelineWarning, Result, SplitRatios};

use crate::index::Cluster;

/// The four disjoint groups of an audit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Partition {
    /// Candidates that shadow runs may train on.
    ShadowTrain,
    /// Shadow-side molecules never trained on.
    ShadowHoldout,
    /// Molecules the target model trains on.
    TargetTrain,
    /// Target-side molecules the target model never sees.
    TargetHoldout,
}

impl Partition {
    /// All partitions in declaration order.
    pub const ALL: [Partition; 4] = [
        Partition::ShadowTrain,
        Partition::ShadowHoldout,
        Partition::TargetTrain,
        Partition::TargetHoldout,
    ];

    /// Position in [`Partition::ALL`].
    pub fn index(self) -> usize {
        self as usize
    }

    /// Whether the partition belongs to the shadow side.
    pub fn is_shadow(self) -> bool {
        matches!(self, Self::ShadowTrain | Self::ShadowHoldout)
    }

    /// Stable name used in reports.
    pub fn name(self) -> &'static str {
        match self {
            Self::ShadowTrain => "shadow_train",
            Self::ShadowHoldout => "shadow_holdout",
            Self::TargetTrain => "target_train",
            Self::TargetHoldout => "target_holdout",
        }
    }
}

impl fmt::Display for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of a cluster split.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SplitAssignment {
    clusters: Vec<Cluster>,
    cluster_partition: Vec<Partition>,
    molecule_partition: Vec<Partition>,
    targets: [usize; 4],
    sizes: [usize; 4],
}

impl SplitAssignment {
    /// Clusters the split was computed from.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Partition of a cluster.
    pub fn partition_of(&self, cluster: usize) -> Partition {
        self.cluster_partition[cluster]
    }

    /// Partition of a molecule, by index into the split molecule slice.
    pub fn partition_of_molecule(&self, molecule: usize) -> Partition {
        self.molecule_partition[molecule]
    }

    /// Per-molecule partitions, by molecule index.
    pub fn molecule_partitions(&self) -> &[Partition] {
        &self.molecule_partition
    }

    /// Molecule indices of a partition, ascending.
    pub fn members(&self, partition: Partition) -> Vec<usize> {
        self.molecule_partition
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| (p == partition).then_some(i))
            .collect()
    }

    /// Molecule count per partition, in [`Partition::ALL`] order.
    pub fn sizes(&self) -> [usize; 4] {
        self.sizes
    }

    /// Nominal target size per partition, in [`Partition::ALL`] order.
    pub fn targets(&self) -> [usize; 4] {
        self.targets
    }

    /// Molecules assigned beyond each partition's target.
    pub fn overshoot(&self) -> [usize; 4] {
        let mut out = [0; 4];
        for (o, (s, t)) in out.iter_mut().zip(self.sizes.iter().zip(&self.targets)) {
            *o = s.saturating_sub(*t);
        }
        out
    }

    /// Warnings for partitions deviating from target by more than `tolerance × N`.
    pub fn deviations(&self, tolerance: f64) -> Vec<PipelineWarning> {
        let n = self.molecule_partition.len() as f64;
        Partition::ALL
            .iter()
            .filter_map(|&p| {
                let (target, actual) = (self.targets[p.index()], self.sizes[p.index()]);
                let gap = (actual as f64 - target as f64).abs();
                (gap > tolerance * n).then(|| PipelineWarning::SplitDeviation {
                    partition: p.name().to_owned(),
                    target,
                    actual,
                })
            })
            .collect()
    }
}

/// Greedy cluster splitter.
#[derive(Clone, Debug)]
pub struct ClusterSplitter {
    /// Target ratios.
    pub ratios: SplitRatios,
}

impl ClusterSplitter {
    /// Create a splitter, validating the ratios.
    pub fn new(ratios: SplitRatios) -> Result<Self> {
        ratios.validate()?;
        Ok(Self { ratios })
    }

    /// Assign every cluster to a partition.
    ///
    /// `clusters` must partition `0..n_molecules`.
    pub fn split(&self, clusters: Vec<Cluster>, n_molecules: usize) -> Result<SplitAssignment> {
        check_cover(&clusters, n_molecules)?;
        let n = n_molecules as f64;
        let r = &self.ratios;

        let shadow_target = (n * r.shadow_fraction).round() as usize;
        let sides = greedy_assign(
            &clusters,
            &(0..clusters.len()).collect::<Vec<_>>(),
            &[shadow_target, n_molecules.saturating_sub(shadow_target)],
        );

        let mut cluster_partition = vec![Partition::ShadowTrain; clusters.len()];
        for (side, (fraction, train, holdout)) in [
            (
                r.shadow_train_fraction,
                Partition::ShadowTrain,
                Partition::ShadowHoldout,
            ),
            (
                r.target_train_fraction,
                Partition::TargetTrain,
                Partition::TargetHoldout,
            ),
        ]
        .into_iter()
        .enumerate()
        {
            let on_side: Vec<usize> = (0..clusters.len()).filter(|&c| sides[c] == side).collect();
            let side_size: usize = on_side.iter().map(|&c| clusters[c].len()).sum();
            let train_target = (side_size as f64 * fraction).round() as usize;
            let bins = greedy_assign(&clusters, &on_side, &[train_target, side_size - train_target]);
            for &c in &on_side {
                cluster_partition[c] = if bins[c] == 0 { train } else { holdout };
            }
        }

        let mut molecule_partition = vec![Partition::ShadowTrain; n_molecules];
        let mut sizes = [0usize; 4];
        for cluster in &clusters {
            let p = cluster_partition[cluster.id];
            sizes[p.index()] += cluster.len();
            for &m in &cluster.members {
                molecule_partition[m] = p;
            }
        }

        let target_n = n_molecules - shadow_target;
        let shadow_train = (shadow_target as f64 * r.shadow_train_fraction).round() as usize;
        let target_train = (target_n as f64 * r.target_train_fraction).round() as usize;
        let targets = [
            shadow_train,
            shadow_target - shadow_train,
            target_train,
            target_n - target_train,
        ];

        let non_empty = sizes.iter().filter(|&&s| s > 0).count();
        let shadow_side = sizes[0] + sizes[1];
        let target_side = sizes[2] + sizes[3];
        let target_unsplit = target_side > 0
            && ((r.target_train_fraction > 0.0 && sizes[2] == 0)
                || (r.target_train_fraction < 1.0 && sizes[3] == 0));
        if non_empty < 2 || shadow_side == 0 || target_side == 0 || sizes[0] == 0 || target_unsplit
        {
            // An unsplit target side is blamed on its own largest cluster.
            let blamed: Vec<&Cluster> = if target_unsplit {
                clusters
                    .iter()
                    .filter(|c| !cluster_partition[c.id].is_shadow())
                    .collect()
            } else {
                clusters.iter().collect()
            };
            let largest = blamed
                .into_iter()
                .max_by(|a, b| a.len().cmp(&b.len()).then(b.id.cmp(&a.id)))
                .map(|c| c.id);
            warn!(?sizes, largest_cluster = ?largest, "split infeasible");
            return Err(MiaError::infeasible(
                format!(
                    "{} clusters over {} molecules give partition sizes {:?}; \
                     need non-empty shadow-train, target-train and target-holdout partitions",
                    clusters.len(),
                    n_molecules,
                    sizes
                ),
                largest,
            ));
        }

        for p in Partition::ALL {
            let (size, target) = (sizes[p.index()], targets[p.index()]);
            if size > target {
                debug!(partition = %p, size, target, "partition overshoots target");
            }
        }
        info!(
            clusters = clusters.len(),
            shadow_train = sizes[0],
            shadow_holdout = sizes[1],
            target_train = sizes[2],
            target_holdout = sizes[3],
            "cluster split"
        );

        Ok(SplitAssignment {
            clusters,
            cluster_partition,
            molecule_partition,
            targets,
            sizes,
        })
    }
}

fn check_cover(clusters: &[Cluster], n_molecules: usize) -> Result<()> {
    let mut seen = vec![false; n_molecules];
    for (pos, c) in clusters.iter().enumerate() {
        if c.id != pos {
            return Err(MiaError::invalid(format!(
                "cluster ids must be dense: found id {} at position {pos}",
                c.id
            )));
        }
        for &m in &c.members {
            if m >= n_molecules || std::mem::replace(&mut seen[m], true) {
                return Err(MiaError::infeasible(
                    format!("molecule index {m} is out of range or in two clusters"),
                    Some(c.id),
                ));
            }
        }
    }
    if let Some(missing) = seen.iter().position(|s| !s) {
        return Err(MiaError::invalid(format!(
            "molecule index {missing} belongs to no cluster"
        )));
    }
    Ok(())
}

/// Greedily assign the selected clusters to bins with the given target sizes.
///
/// Clusters are visited by size descending, then id ascending; each goes to
/// the bin with the largest relative deficit, ties to the lowest bin. Bins
/// with a zero target never win against a bin with a positive target.
/// Returns a bin per cluster id (entries for unselected clusters are unspecified).
fn greedy_assign(clusters: &[Cluster], selected: &[usize], targets: &[usize]) -> Vec<usize> {
    let mut order = selected.to_vec();
    order.sort_by(|&a, &b| {
        clusters[b]
            .len()
            .cmp(&clusters[a].len())
            .then(clusters[a].id.cmp(&clusters[b].id))
    });

    let mut filled = vec![0usize; targets.len()];
    let mut bin_of = vec![0usize; clusters.len()];
    for c in order {
        let mut best = 0usize;
        let mut best_deficit = f64::NEG_INFINITY;
        for (bin, (&target, &have)) in targets.iter().zip(&filled).enumerate() {
            let deficit = if target == 0 {
                f64::NEG_INFINITY
            } else {
                (target as f64 - have as f64) / target as f64
            };
            if deficit > best_deficit {
                best = bin;
                best_deficit = deficit;
            }
        }
        filled[best] += clusters[c].len();
        bin_of[c] = best;
    }
    bin_of
}
