//! The audit as a sequence of typed stages.
//!
//! `Audit::load → DataLoaded → Split → ShadowTrained → Calibrated → Evaluated`.
//! Each stage is produced by a method on the previous one, so no stage can be
//! skipped, and every stage is a function of its predecessor plus the
//! configuration. Fatal errors carry the stage that raised them.

use tracing::{info, info_span, warn};

use molmia_attack::{
    AttackReport, CalibratedScorer, Calibrator, Evaluator, TargetExample, TargetOutputs,
};
use molmia_core::{
    load_molecules, AuditConfig, Deadline, Encoder, MiaError, Molecule, PipelineStage,
    PipelineWarning, RawRecord, Result, SeedKey,
};
use molmia_shadow::{
    EnsembleOutcome, PerExampleStatistics, Predictor, PredictorConfig, PredictorFactory,
    RunContext, ShadowEnsemble, ShadowStore,
};
use molmia_split::{ClusterSplitter, Partition, SimilarityIndex, SplitAssignment, TanimotoIndex};

/// Entry point of the audit pipeline.
#[derive(Clone, Copy, Debug)]
pub struct Audit;

impl Audit {
    /// Validate the configuration and encode the dataset.
    ///
    /// Records that fail to encode are dropped with a warning.
    pub fn load<E: Encoder + ?Sized>(
        records: &[RawRecord],
        encoder: &E,
        config: AuditConfig,
    ) -> Result<DataLoaded> {
        let _span = info_span!("load").entered();
        config
            .validate()
            .map_err(|e| e.at_stage(PipelineStage::DataLoaded))?;
        let (molecules, warnings) = load_molecules(records, encoder);
        if molecules.is_empty() {
            return Err(MiaError::invalid(format!(
                "none of {} records could be loaded",
                records.len()
            ))
            .at_stage(PipelineStage::DataLoaded));
        }
        info!(
            loaded = molecules.len(),
            dropped = warnings.len(),
            "loaded molecules"
        );
        Ok(DataLoaded {
            config,
            molecules,
            warnings,
        })
    }
}

/// Encoded molecules ready to be split.
#[derive(Clone, Debug)]
pub struct DataLoaded {
    config: AuditConfig,
    molecules: Vec<Molecule>,
    warnings: Vec<PipelineWarning>,
}

impl DataLoaded {
    /// Loaded molecules, in input order.
    pub fn molecules(&self) -> &[Molecule] {
        &self.molecules
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Audit configuration.
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Cluster with `index` and assign whole clusters to partitions.
    pub fn split<I: SimilarityIndex + ?Sized>(self, index: &I) -> Result<Split> {
        let _span = info_span!("split").entered();
        let at = |e: MiaError| e.at_stage(PipelineStage::Split);
        let (clusters, unclustered) = index
            .clusters_with_warnings(&self.molecules)
            .map_err(at)?;
        let splitter = ClusterSplitter::new(self.config.ratios.clone()).map_err(at)?;
        let assignment = splitter
            .split(clusters, self.molecules.len())
            .map_err(at)?;

        let mut warnings = self.warnings;
        warnings.extend(unclustered);
        for deviation in assignment.deviations(self.config.ratio_tolerance) {
            warn!(%deviation, "split deviates from target ratio");
            warnings.push(deviation);
        }
        Ok(Split {
            config: self.config,
            molecules: self.molecules,
            assignment,
            warnings,
        })
    }

    /// Split using Tanimoto similarity of path fingerprints from the configuration.
    ///
    /// Molecules whose structure cannot be fingerprinted (possible when the
    /// loading encoder accepted it) stay in the audit as singleton clusters
    /// and are listed as [`PipelineWarning::Unclustered`].
    pub fn split_by_fingerprint(self) -> Result<Split> {
        let index = TanimotoIndex::new(
            self.config.similarity_threshold,
            self.config.fingerprint.clone(),
        )
        .map_err(|e| e.at_stage(PipelineStage::Split))?;
        self.split(&index)
    }
}

/// Molecules with a leakage-safe partition assignment.
#[derive(Clone, Debug)]
pub struct Split {
    config: AuditConfig,
    molecules: Vec<Molecule>,
    assignment: SplitAssignment,
    warnings: Vec<PipelineWarning>,
}

impl Split {
    /// Partition assignment.
    pub fn assignment(&self) -> &SplitAssignment {
        &self.assignment
    }

    /// All molecules, in input order.
    pub fn molecules(&self) -> &[Molecule] {
        &self.molecules
    }

    /// Molecules of one partition, in input order.
    pub fn partition(&self, partition: Partition) -> Vec<&Molecule> {
        self.assignment
            .members(partition)
            .into_iter()
            .map(|i| &self.molecules[i])
            .collect()
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Audit configuration.
    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    /// Train a target predictor on the target-train partition and collect its
    /// outputs on target train and holdout.
    pub fn train_target<F: PredictorFactory>(&self, factory: &F) -> Result<TargetOutputs> {
        let _span = info_span!("target").entered();
        let at = |e: MiaError| e.at_stage(PipelineStage::Split);
        let config = PredictorConfig {
            seed: SeedKey::new(self.config.seed)
                .fold_in_label("target")
                .value(),
            hyperparameters: self.config.hyperparameters.clone(),
        };
        let ctx = RunContext {
            run_id: None,
            deadline: Deadline::none(),
        };
        let train = self.partition(Partition::TargetTrain);
        let holdout = self.partition(Partition::TargetHoldout);

        let mut predictor = factory.new_predictor(&config).map_err(at)?;
        predictor.train(&train, &ctx).map_err(at)?;
        let collect = |molecules: &[&Molecule]| -> Result<Vec<TargetExample>> {
            let outputs = predictor.predict(molecules)?;
            if outputs.len() != molecules.len() {
                return Err(MiaError::invalid(format!(
                    "target predictor returned {} outputs for {} molecules",
                    outputs.len(),
                    molecules.len()
                )));
            }
            Ok(molecules
                .iter()
                .zip(outputs)
                .map(|(m, output)| TargetExample::new(m.id.clone(), m.label, output))
                .collect())
        };
        let outputs = TargetOutputs::new(
            collect(&train).map_err(at)?,
            collect(&holdout).map_err(at)?,
        );
        info!(
            train = outputs.train.len(),
            holdout = outputs.holdout.len(),
            "trained target model"
        );
        Ok(outputs)
    }

    /// Train the shadow ensemble.
    pub fn train_shadows<F: PredictorFactory>(self, factory: &F) -> Result<ShadowTrained> {
        self.train_shadows_with(factory, None)
    }

    /// Train the shadow ensemble, reusing and extending the runs in `store`.
    pub fn train_shadows_cached<F: PredictorFactory>(
        self,
        factory: &F,
        store: &ShadowStore,
    ) -> Result<ShadowTrained> {
        self.train_shadows_with(factory, Some(store))
    }

    fn train_shadows_with<F: PredictorFactory>(
        self,
        factory: &F,
        store: Option<&ShadowStore>,
    ) -> Result<ShadowTrained> {
        let _span = info_span!("shadow").entered();
        let at = |e: MiaError| e.at_stage(PipelineStage::ShadowTrained);
        let ensemble = ShadowEnsemble::from_config(&self.config);
        let candidates = self.assignment.members(Partition::ShadowTrain);
        let deadline = Deadline::from_budget(self.config.deadline());
        let outcome = match store {
            Some(store) => {
                ensemble.train_cached(&self.molecules, &candidates, factory, deadline, store)
            }
            None => ensemble.train(&self.molecules, &candidates, factory, deadline),
        }
        .map_err(at)?;

        let statistics =
            PerExampleStatistics::from_runs(&self.molecules, &outcome.runs, self.config.transform);
        let mut warnings = self.warnings;
        warnings.extend(outcome.warnings());
        Ok(ShadowTrained {
            config: self.config,
            assignment: self.assignment,
            candidates,
            outcome,
            statistics,
            warnings,
        })
    }
}

/// Shadow statistics for every molecule.
#[derive(Clone, Debug)]
pub struct ShadowTrained {
    config: AuditConfig,
    assignment: SplitAssignment,
    candidates: Vec<usize>,
    outcome: EnsembleOutcome,
    statistics: PerExampleStatistics,
    warnings: Vec<PipelineWarning>,
}

impl ShadowTrained {
    /// Completed and failed shadow runs.
    pub fn outcome(&self) -> &EnsembleOutcome {
        &self.outcome
    }

    /// Per-molecule statistics folded from the completed runs.
    pub fn statistics(&self) -> &PerExampleStatistics {
        &self.statistics
    }

    /// Partition assignment.
    pub fn assignment(&self) -> &SplitAssignment {
        &self.assignment
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Fit the membership scorer.
    pub fn calibrate(self) -> Result<Calibrated> {
        let _span = info_span!("calibrate").entered();
        let calibration = Calibrator::from_config(&self.config)
            .fit(&self.statistics, &self.candidates)
            .map_err(|e| e.at_stage(PipelineStage::Calibrated))?;
        let mut warnings = self.warnings;
        warnings.extend(calibration.warnings);
        Ok(Calibrated {
            config: self.config,
            scorer: calibration.scorer,
            warnings,
        })
    }
}

/// A fitted, immutable membership scorer.
#[derive(Clone, Debug)]
pub struct Calibrated {
    config: AuditConfig,
    scorer: CalibratedScorer,
    warnings: Vec<PipelineWarning>,
}

impl Calibrated {
    /// The fitted scorer.
    pub fn scorer(&self) -> &CalibratedScorer {
        &self.scorer
    }

    /// Warnings collected so far.
    pub fn warnings(&self) -> &[PipelineWarning] {
        &self.warnings
    }

    /// Score the target model and aggregate the report.
    ///
    /// Calling this twice with the same outputs yields identical reports.
    pub fn evaluate(&self, targets: &TargetOutputs) -> Result<Evaluated> {
        let _span = info_span!("evaluate").entered();
        let at = |e: MiaError| e.at_stage(PipelineStage::Evaluated);
        let evaluation = Evaluator::from_config(&self.config)
            .map_err(at)?
            .evaluate(&self.scorer, targets)
            .map_err(at)?;
        Ok(Evaluated {
            report: AttackReport::new(evaluation, self.warnings.clone(), self.config.clone()),
        })
    }
}

/// Final stage holding the report.
#[derive(Clone, Debug)]
pub struct Evaluated {
    report: AttackReport,
}

impl Evaluated {
    /// The attack report.
    pub fn report(&self) -> &AttackReport {
        &self.report
    }

    /// Take ownership of the report.
    pub fn into_report(self) -> AttackReport {
        self.report
    }
}
