use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::detector::boosting::GradientBoostedTrees;
use crate::detector::metrics::DetectorMetrics;
use crate::detector::scaler::StandardScaler;
use crate::error::{Error, Result};
use crate::feature_extraction::feature_vector::FeatureTable;

/// Scaler and classifier, bound to the feature column order they were fit on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorPipeline {
    feature_columns: Vec<String>,
    scaler: StandardScaler,
    model: GradientBoostedTrees,
}

impl DetectorPipeline {
    pub fn new(feature_columns: Vec<String>, scaler: StandardScaler, model: GradientBoostedTrees) -> Self {
        DetectorPipeline { feature_columns, scaler, model }
    }

    pub fn feature_columns(&self) -> &[String] {
        &self.feature_columns
    }

    pub fn model(&self) -> &GradientBoostedTrees {
        &self.model
    }

    /// Accident probability of raw (unscaled) feature rows.
    pub fn predict_proba_rows(&self, rows: &[Vec<f64>]) -> Result<Vec<f64>> {
        let width = self.feature_columns.len();
        if let Some(bad) = rows.iter().find(|r| r.len() != width) {
            return Err(Error::validation(format!("Row has {} features, pipeline expects {}", bad.len(), width)));
        }
        self.model.predict_proba(&self.scaler.transform(rows))
    }

    /// Accident probability per window of `table`.
    ///
    /// The table's feature columns must equal, in order, the columns the
    /// pipeline was fit on.
    pub fn predict_proba(&self, table: &FeatureTable) -> Result<Vec<f64>> {
        let names = table.schema.names();
        if names != self.feature_columns.as_slice() {
            let missing: Vec<&String> = self.feature_columns.iter().filter(|c| !names.contains(c)).collect();
            let unexpected: Vec<&String> = names.iter().filter(|c| !self.feature_columns.contains(c)).collect();
            return Err(Error::validation(format!(
                "Feature columns differ from training (missing: {:?}, unexpected: {:?}, {} vs {} columns)",
                missing, unexpected, names.len(), self.feature_columns.len()
            )));
        }

        self.predict_proba_rows(&table.matrix())
    }

    pub fn write<W: Write>(&self, writer: W) -> Result<()> {
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn read<R: Read>(reader: R) -> Result<Self> {
        Ok(bincode::deserialize_from(reader)?)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(path)?);
        self.write(&mut writer)?;
        writer.flush()?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::read(BufReader::new(File::open(path)?))
    }
}

/// Output of one `fit`: the pipeline, its validation metrics and the chosen threshold.
#[derive(Debug, Clone)]
pub struct TrainingArtifact {
    pipeline: DetectorPipeline,
    metrics: DetectorMetrics,
    threshold: f64,
}

impl TrainingArtifact {
    pub fn new(pipeline: DetectorPipeline, metrics: DetectorMetrics) -> Self {
        let threshold = metrics.thresholds.optimal.threshold;
        TrainingArtifact { pipeline, metrics, threshold }
    }

    pub fn pipeline(&self) -> &DetectorPipeline {
        &self.pipeline
    }

    pub fn feature_columns(&self) -> &[String] {
        self.pipeline.feature_columns()
    }

    pub fn metrics(&self) -> &DetectorMetrics {
        &self.metrics
    }

    /// The F1-optimal decision threshold.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn save_model<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.pipeline.save(&path)?;
        info!(path = %path.as_ref().display(), "saved model");
        Ok(())
    }

    pub fn save_metrics<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = BufWriter::new(File::create(&path)?);
        self.write_metrics(&mut writer)?;
        writer.flush()?;
        info!(path = %path.as_ref().display(), "saved metrics");
        Ok(())
    }

    pub fn write_metrics<W: Write>(&self, writer: W) -> Result<()> {
        serde_json::to_writer_pretty(writer, &self.metrics)?;
        Ok(())
    }
}

pub fn load_metrics<P: AsRef<Path>>(path: P) -> Result<DetectorMetrics> {
    Ok(serde_json::from_reader(BufReader::new(File::open(path)?))?)
}

pub const DEFAULT_THRESHOLD: f64 = 0.5;

/// Decision threshold for inference: `explicit` if given (must lie in [0, 1]),
/// else the optimal threshold of the metrics document at `metrics_path`,
/// else `DEFAULT_THRESHOLD` when that document is missing or unreadable.
pub fn resolve_threshold<P: AsRef<Path>>(explicit: Option<f64>, metrics_path: P) -> Result<f64> {
    if let Some(t) = explicit {
        if !(0. ..=1.).contains(&t) {
            return Err(Error::configuration(format!("Decision threshold must be in [0, 1], got {}", t)));
        }
        return Ok(t);
    }

    let path = metrics_path.as_ref();
    match load_metrics(path) {
        Ok(metrics) => {
            let t = metrics.thresholds.optimal.threshold;
            info!(path = %path.display(), threshold = t, "using optimal threshold from metrics");
            Ok(t)
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "no usable metrics file, using default threshold");
            Ok(DEFAULT_THRESHOLD)
        }
    }
}


#[cfg(test)]
mod tests {
    use crate::detector::artifact::{DEFAULT_THRESHOLD, DetectorPipeline, load_metrics, resolve_threshold};
    use crate::detector::AccidentDetector;
    use crate::detector::DetectorConfig;
    use crate::detector::boosting::BoostingParams;
    use crate::error::Error;
    use crate::feature_extraction::feature_vector::{FeatureSchema, FeatureTable, FeatureVector};

    fn table(names: &[&str], n: usize) -> FeatureTable {
        let schema = FeatureSchema::from_names(names.iter().map(|s| s.to_string()).collect());
        let rows = (0..n).map(|i| {
            let label = (i % 4 == 0) as u8;
            FeatureVector {
                vehicle_id: "v".to_string(),
                window_index: i,
                window_start_ts: i as f64,
                window_end_ts: i as f64 + 1.,
                label,
                positive_ratio: label as f64,
                values: (0..names.len()).map(|j| label as f64 * 3. + ((i * (j + 3)) % 5) as f64 * 0.1).collect(),
            }
        }).collect();
        FeatureTable::new(schema, rows).unwrap()
    }

    fn detector() -> AccidentDetector {
        AccidentDetector::new(DetectorConfig {
            boosting: BoostingParams { n_estimators: 20, min_child_weight: 0.5, ..Default::default() },
            ..Default::default()
        }).unwrap()
    }

    #[test]
    fn round_trip() {
        let data = table(&["a", "b"], 80);
        let artifact = detector().fit(&data).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let model_path = dir.path().join("model.bin");
        let metrics_path = dir.path().join("metrics.json");
        artifact.save_model(&model_path).unwrap();
        artifact.save_metrics(&metrics_path).unwrap();

        let loaded = DetectorPipeline::load(&model_path).unwrap();
        assert_eq!(&loaded, artifact.pipeline());

        let threshold = load_metrics(&metrics_path).unwrap().thresholds.optimal.threshold;
        assert_eq!(threshold, artifact.threshold());

        let before = artifact.pipeline().predict_proba(&data).unwrap();
        let after = loaded.predict_proba(&data).unwrap();
        let classes = |p: &[f64]| p.iter().map(|&p| p >= threshold).collect::<Vec<_>>();
        assert_eq!(classes(&before), classes(&after));
    }

    #[test]
    fn rejects_mismatched_columns() {
        let artifact = detector().fit(&table(&["a", "b"], 40)).unwrap();

        for names in vec![vec!["a"], vec!["b", "a"], vec!["a", "b", "c"]] {
            let result = artifact.pipeline().predict_proba(&table(&names, 4));
            assert!(matches!(result, Err(Error::Validation(_))), "{:?} accepted", names);
        }
    }

    #[test]
    fn missing_model_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(DetectorPipeline::load(dir.path().join("nope.bin")), Err(Error::Io(_))));
    }

    #[test]
    fn rejects_wrong_row_width() {
        let artifact = detector().fit(&table(&["a", "b"], 40)).unwrap();
        let pipeline = artifact.pipeline();

        assert!(matches!(pipeline.predict_proba_rows(&[vec![1.]]), Err(Error::Validation(_))));
        assert!(matches!(pipeline.predict_proba_rows(&[vec![1., 2.], vec![1., 2., 3.]]), Err(Error::Validation(_))));
        assert_eq!(pipeline.predict_proba_rows(&[vec![1., 2.]]).unwrap().len(), 1);
    }

    #[test]
    fn explicit_threshold_wins() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = detector().fit(&table(&["a", "b"], 40)).unwrap();
        let metrics_path = dir.path().join("metrics.json");
        artifact.save_metrics(&metrics_path).unwrap();

        assert_eq!(resolve_threshold(Some(0.25), &metrics_path).unwrap(), 0.25);
        assert_eq!(resolve_threshold(Some(0.), &metrics_path).unwrap(), 0.);
        assert_eq!(resolve_threshold(Some(1.), &metrics_path).unwrap(), 1.);
    }

    #[test]
    fn threshold_from_metrics_file() {
        let dir = tempfile::tempdir().unwrap();
        let artifact = detector().fit(&table(&["a", "b"], 40)).unwrap();
        let metrics_path = dir.path().join("metrics.json");
        artifact.save_metrics(&metrics_path).unwrap();

        assert_eq!(resolve_threshold(None, &metrics_path).unwrap(), artifact.threshold());
    }

    #[test]
    fn default_threshold_without_metrics() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(resolve_threshold(None, dir.path().join("absent.json")).unwrap(), DEFAULT_THRESHOLD);

        // An emptied metrics file is unusable, not fatal
        let empty = dir.path().join("empty.json");
        std::fs::write(&empty, b"").unwrap();
        assert_eq!(resolve_threshold(None, &empty).unwrap(), 0.5);
    }

    #[test]
    fn out_of_range_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        for t in vec![-0.1, 1.5, f64::NAN] {
            assert!(matches!(resolve_threshold(Some(t), &path), Err(Error::Configuration(_))), "{} accepted", t);
        }
    }
}
