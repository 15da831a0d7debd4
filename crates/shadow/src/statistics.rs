//! Per-molecule membership statistics gathered across shadow runs.

use std::collections::HashMap;

use tracing::debug;

use molmia_core::{Molecule, MoleculeId, OutputTransform};

use crate::run::ShadowRun;

/// Observations of the membership statistic for one molecule.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Observations {
    /// Statistic values from runs that trained on the molecule.
    pub in_values: Vec<f64>,
    /// Statistic values from runs that did not.
    pub out_values: Vec<f64>,
}

/// Statistic observations for every population molecule, keyed by population index.
#[derive(Clone, Debug, PartialEq)]
pub struct PerExampleStatistics {
    ids: Vec<MoleculeId>,
    observations: Vec<Observations>,
    lookup: HashMap<MoleculeId, usize>,
    skipped: usize,
    runs: usize,
}

impl PerExampleStatistics {
    /// Fold the outputs of every run into per-molecule observations.
    ///
    /// Runs are merged in the order given. Non-finite statistic values are
    /// dropped.
    pub fn from_runs(population: &[Molecule], runs: &[ShadowRun], transform: OutputTransform) -> Self {
        let mut observations = vec![Observations::default(); population.len()];
        let mut skipped = 0;
        let mut used = 0;
        for run in runs {
            if run.outputs.len() != population.len() {
                debug!(run_id = run.run_id, "skipping run recorded against another population");
                continue;
            }
            used += 1;
            for (i, is_in, output) in run.records() {
                let phi = transform.apply(output, population[i].label);
                if !phi.is_finite() {
                    skipped += 1;
                    continue;
                }
                let slot = &mut observations[i];
                if is_in {
                    slot.in_values.push(phi);
                } else {
                    slot.out_values.push(phi);
                }
            }
        }
        let ids: Vec<MoleculeId> = population.iter().map(|m| m.id.clone()).collect();
        debug!(runs = used, skipped, "collected shadow statistics");
        let mut stats = Self::from_observations(ids, observations);
        stats.skipped = skipped;
        stats.runs = used;
        stats
    }

    /// Build directly from per-molecule observations.
    ///
    /// `ids` and `observations` are zipped; extra entries on either side are dropped.
    pub fn from_observations(mut ids: Vec<MoleculeId>, mut observations: Vec<Observations>) -> Self {
        let n = ids.len().min(observations.len());
        ids.truncate(n);
        observations.truncate(n);
        let lookup = ids.iter().cloned().enumerate().map(|(i, id)| (id, i)).collect();
        Self {
            ids,
            observations,
            lookup,
            skipped: 0,
            runs: 0,
        }
    }

    /// Number of molecules.
    pub fn len(&self) -> usize {
        self.ids.len()
    }

    /// Whether there are no molecules.
    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Molecule ids in population order.
    pub fn ids(&self) -> &[MoleculeId] {
        &self.ids
    }

    /// Observations of the molecule at population index `index`.
    pub fn get(&self, index: usize) -> Option<&Observations> {
        self.observations.get(index)
    }

    /// Population index of a molecule id.
    pub fn index_of(&self, id: &MoleculeId) -> Option<usize> {
        self.lookup.get(id).copied()
    }

    /// `(id, observations)` in population order.
    pub fn iter(&self) -> impl Iterator<Item = (&MoleculeId, &Observations)> + '_ {
        self.ids.iter().zip(&self.observations)
    }

    /// `(in, out)` observation counts for the molecule at `index`.
    pub fn counts(&self, index: usize) -> (usize, usize) {
        self.observations
            .get(index)
            .map_or((0, 0), |o| (o.in_values.len(), o.out_values.len()))
    }

    /// Molecules with fewer than `min` observations on either side, restricted to `indices`.
    pub fn short_molecules(&self, indices: &[usize], min: usize) -> Vec<MoleculeId> {
        indices
            .iter()
            .filter(|&&i| {
                let (n_in, n_out) = self.counts(i);
                n_in < min || n_out < min
            })
            .map(|&i| self.ids[i].clone())
            .collect()
    }

    /// Number of non-finite statistic values dropped.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Number of runs merged.
    pub fn runs(&self) -> usize {
        self.runs
    }
}
