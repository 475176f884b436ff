use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::detector::artifact::{DetectorPipeline, TrainingArtifact};
use crate::detector::boosting::{BoostingParams, GradientBoostedTrees};
use crate::detector::metrics::{ClassificationMetrics, CrossValidationSummary, DetectorMetrics, roc_auc, select_thresholds};
use crate::detector::scaler::StandardScaler;
use crate::detector::split::{class_counts, stratified_k_fold, stratified_split};
use crate::error::{Error, Result};
use crate::feature_extraction::feature_vector::FeatureTable;

pub mod artifact;
pub mod boosting;
pub mod metrics;
pub mod scaler;
pub mod split;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorConfig {
    pub boosting: BoostingParams,
    /// Recall the secondary operating point has to reach
    pub target_recall: f64,
    /// Fraction of each class held out for validation
    pub test_size: f64,
    pub seed: u64,
    pub n_splits: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        DetectorConfig {
            boosting: BoostingParams::default(),
            target_recall: 0.9,
            test_size: 0.2,
            seed: 42,
            n_splits: 5,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        self.boosting.validate()?;
        if !(self.target_recall > 0. && self.target_recall <= 1.) {
            return Err(Error::configuration(format!("target_recall must be in (0, 1], got {}", self.target_recall)));
        }
        if !(self.test_size > 0. && self.test_size < 1.) {
            return Err(Error::configuration(format!("test_size must be in (0, 1), got {}", self.test_size)));
        }
        if self.n_splits < 2 {
            return Err(Error::configuration(format!("n_splits must be at least 2, got {}", self.n_splits)));
        }
        Ok(())
    }
}

/// max(1, negatives / positives); 1 when there are no positives.
pub fn positive_class_weight(labels: &[u8]) -> f64 {
    let pos = labels.iter().filter(|&&l| l != 0).count();
    let neg = labels.len() - pos;
    if pos == 0 { 1. } else { (neg as f64 / pos as f64).max(1.) }
}

fn select<T: Clone>(items: &[T], idx: &[usize]) -> Vec<T> {
    idx.iter().map(|&i| items[i].clone()).collect()
}

/// Binary accident classifier over window feature tables.
pub struct AccidentDetector {
    config: DetectorConfig,
}

impl AccidentDetector {
    pub fn new(config: DetectorConfig) -> Result<Self> {
        config.validate()?;
        Ok(AccidentDetector { config })
    }

    fn params_for(&self, labels: &[u8]) -> BoostingParams {
        BoostingParams {
            scale_pos_weight: positive_class_weight(labels),
            seed: self.config.seed,
            ..self.config.boosting.clone()
        }
    }

    /// Scale on the training rows, then fit the boosted trees with a class weight from `labels`.
    fn fit_pipeline(&self, columns: Vec<String>, rows: &[Vec<f64>], labels: &[u8]) -> Result<DetectorPipeline> {
        let scaler = StandardScaler::fit(rows);
        let model = GradientBoostedTrees::fit(&scaler.transform(rows), labels, &self.params_for(labels))?;
        Ok(DetectorPipeline::new(columns, scaler, model))
    }

    /// Train on a stratified split of `table` and evaluate on the held-out part.
    pub fn fit(&self, table: &FeatureTable) -> Result<TrainingArtifact> {
        self.fit_with(table, None)
    }

    /// `fit`, with stratified k-fold scores over the whole table added to the metrics.
    pub fn fit_cross_validated(&self, table: &FeatureTable) -> Result<TrainingArtifact> {
        let summary = self.cross_validate(&table.matrix(), &table.labels())?;
        self.fit_with(table, Some(summary))
    }

    fn fit_with(&self, table: &FeatureTable, cross_validation: Option<CrossValidationSummary>) -> Result<TrainingArtifact> {
        let labels = table.labels();
        ensure_two_classes(&labels)?;

        let rows = table.matrix();
        let (train_idx, val_idx) = stratified_split(&labels, self.config.test_size, self.config.seed)?;
        let (x_train, y_train) = (select(&rows, &train_idx), select(&labels, &train_idx));
        let (x_val, y_val) = (select(&rows, &val_idx), select(&labels, &val_idx));

        let positive_weight = positive_class_weight(&y_train);
        info!(train = y_train.len(), validation = y_val.len(), positive_weight, "fitting detector");

        let pipeline = self.fit_pipeline(table.schema.names().to_vec(), &x_train, &y_train)?;

        let scores = pipeline.predict_proba_rows(&x_val)?;
        let predicted: Vec<u8> = scores.iter().map(|&p| (p > 0.5) as u8).collect();

        let metrics = DetectorMetrics {
            classification: ClassificationMetrics::compute(&y_val, &predicted, &scores),
            thresholds: select_thresholds(&y_val, &scores, self.config.target_recall),
            positive_weight,
            n_train: y_train.len(),
            n_validation: y_val.len(),
            cross_validation,
        };
        info!(
            roc_auc = metrics.classification.roc_auc,
            f1 = metrics.classification.f1,
            threshold = metrics.thresholds.optimal.threshold,
            "validation metrics"
        );

        Ok(TrainingArtifact::new(pipeline, metrics))
    }

    /// Stratified k-fold ROC-AUC and recall (at 0.5) of the detector on `rows`.
    ///
    /// Each fold gets its own scaler and class weight.
    pub fn cross_validate(&self, rows: &[Vec<f64>], labels: &[u8]) -> Result<CrossValidationSummary> {
        ensure_two_classes(labels)?;
        let folds = stratified_k_fold(labels, self.config.n_splits, self.config.seed)?;

        let mut aucs = Vec::with_capacity(folds.len());
        let mut recalls = Vec::with_capacity(folds.len());

        for (k, (train_idx, val_idx)) in folds.iter().enumerate() {
            let y_train = select(labels, train_idx);
            let pipeline = self.fit_pipeline(Vec::new(), &select(rows, train_idx), &y_train)?;

            let y_val = select(labels, val_idx);
            let scores = pipeline.predict_proba_rows(&select(rows, val_idx))?;

            let positives = y_val.iter().filter(|&&y| y != 0).count();
            let hits = y_val.iter().zip(scores.iter()).filter(|&(&y, &p)| y != 0 && p >= 0.5).count();
            let recall = hits as f64 / positives.max(1) as f64;
            let auc = roc_auc(&y_val, &scores);

            debug!(fold = k, auc, recall, "cross-validation fold");
            aucs.push(auc);
            recalls.push(recall);
        }

        let summary = CrossValidationSummary::from_folds(&aucs, &recalls);
        info!(auc_mean = summary.auc_mean, recall_mean = summary.recall_mean, folds = folds.len(), "cross-validated");
        Ok(summary)
    }
}

fn ensure_two_classes(labels: &[u8]) -> Result<()> {
    let counts = class_counts(labels);
    if counts.len() < 2 {
        return Err(Error::configuration(format!(
            "Training data needs two label classes, found {} window(s) with {} class(es)", labels.len(), counts.len()
        )));
    }
    Ok(())
}
