use std::io::Write;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::feature_extraction::spectral::SpectralFeatures;
use crate::feature_extraction::statistics::{JerkStatistics, SeriesStatistics};

pub const MAGNITUDE: &str = "magnitude";

/// Identity columns written in front of the feature columns.
pub const IDENTITY_COLUMNS: [&str; 6] = [
    "vehicle_id", "window_index", "window_start_ts", "window_end_ts", "label", "positive_ratio",
];

/// A fixed, ordered set of named features computed together.
pub trait FeatureGroup {
    const NAMES: &'static [&'static str];

    /// Values in `NAMES` order.
    fn values(&self) -> Vec<f64>;
}

/// Names of the columns of one extraction run, in row order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureSchema {
    names: Vec<String>,
}

impl FeatureSchema {
    pub fn new(sensor_names: &[String; 3], has_severity: bool, metadata_names: &[String]) -> Self {
        let mut names = Vec::new();
        let mut push_group = |prefix: &str, group: &[&str]| {
            names.extend(group.iter().map(|name| format!("{}_{}", prefix, name)));
        };

        for axis in sensor_names.iter() {
            push_group(axis, SeriesStatistics::NAMES);
        }
        push_group(MAGNITUDE, SeriesStatistics::NAMES);

        for axis in sensor_names.iter() {
            push_group(&format!("{}_jerk", axis), JerkStatistics::NAMES);
        }
        push_group(&format!("{}_jerk", MAGNITUDE), JerkStatistics::NAMES);

        for i in 0..3 {
            for j in (i + 1)..3 {
                let pair = format!("{}_{}", sensor_names[i], sensor_names[j]);
                push_group("corr", &[pair.as_str()]);
            }
        }

        for axis in sensor_names.iter() {
            push_group(&format!("{}_fft", axis), SpectralFeatures::NAMES);
        }
        push_group(&format!("{}_fft", MAGNITUDE), SpectralFeatures::NAMES);

        for meta in metadata_names {
            push_group(meta, &["last", "mode"]);
        }

        if has_severity {
            push_group("severity", &["max", "mean"]);
        }

        names.push("samples_in_window".to_string());

        FeatureSchema { names }
    }

    pub fn from_names(names: Vec<String>) -> Self {
        FeatureSchema { names }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }
}

/// One row of the feature table: window identity plus feature values in schema order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub vehicle_id: String,
    pub window_index: usize,
    pub window_start_ts: f64,
    pub window_end_ts: f64,
    pub label: u8,
    pub positive_ratio: f64,
    pub values: Vec<f64>,
}

impl FeatureVector {
    /// Replace NaN and +/-Inf feature values with 0.0.
    pub fn sanitize(&mut self) {
        for v in self.values.iter_mut() {
            if !v.is_finite() { *v = 0.; }
        }
    }

    fn identity_fields(&self) -> Vec<String> {
        vec![
            self.vehicle_id.clone(),
            self.window_index.to_string(),
            self.window_start_ts.to_string(),
            self.window_end_ts.to_string(),
            self.label.to_string(),
            self.positive_ratio.to_string(),
        ]
    }
}

/// Feature vectors of one run, all sharing one schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureTable {
    pub schema: FeatureSchema,
    pub rows: Vec<FeatureVector>,
}

impl FeatureTable {
    pub fn new(schema: FeatureSchema, rows: Vec<FeatureVector>) -> Result<Self> {
        if let Some(bad) = rows.iter().find(|r| r.values.len() != schema.len()) {
            return Err(Error::validation(format!(
                "Window {} of {} has {} values, schema has {}", bad.window_index, bad.vehicle_id, bad.values.len(), schema.len()
            )));
        }
        Ok(FeatureTable { schema, rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn labels(&self) -> Vec<u8> {
        self.rows.iter().map(|r| r.label).collect()
    }

    pub fn matrix(&self) -> Vec<Vec<f64>> {
        self.rows.iter().map(|r| r.values.clone()).collect()
    }

    /// Values of one named feature column.
    pub fn column(&self, name: &str) -> Option<Vec<f64>> {
        self.schema.position(name).map(|idx| self.rows.iter().map(|r| r.values[idx]).collect())
    }

    /// Write the table as CSV with a header row.
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<()> {
        self.write_rows(writer, &[], |_| Vec::new())
    }

    /// Write the table annotated with `accident_probability` and `predicted_accident`.
    pub fn write_predictions_csv<W: Write>(&self, writer: W, probabilities: &[f64], threshold: f64) -> Result<()> {
        if probabilities.len() != self.rows.len() {
            return Err(Error::validation(format!(
                "{} probabilities for {} windows", probabilities.len(), self.rows.len()
            )));
        }

        self.write_rows(writer, &["accident_probability", "predicted_accident"], |i| {
            let p = probabilities[i];
            vec![p.to_string(), ((p >= threshold) as u8).to_string()]
        })
    }

    fn write_rows<W, F>(&self, writer: W, extra_header: &[&str], extra: F) -> Result<()>
        where W: Write, F: Fn(usize) -> Vec<String>
    {
        let mut w = csv::WriterBuilder::new().has_headers(false).from_writer(writer);

        let header = IDENTITY_COLUMNS.iter()
            .map(|s| s.to_string())
            .chain(self.schema.names().iter().cloned())
            .chain(extra_header.iter().map(|s| s.to_string()));
        w.write_record(header)?;

        for (i, row) in self.rows.iter().enumerate() {
            let record = row.identity_fields().into_iter()
                .chain(row.values.iter().map(|v| v.to_string()))
                .chain(extra(i));
            w.write_record(record)?;
        }

        w.flush()?;
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use crate::feature_extraction::feature_vector::{FeatureSchema, FeatureTable, FeatureVector};

    fn axes() -> [String; 3] {
        ["accel_x".to_string(), "accel_y".to_string(), "accel_z".to_string()]
    }

    fn row(values: Vec<f64>) -> FeatureVector {
        FeatureVector {
            vehicle_id: "v".to_string(),
            window_index: 0,
            window_start_ts: 0.,
            window_end_ts: 1.,
            label: 1,
            positive_ratio: 0.5,
            values,
        }
    }

    #[test]
    fn schema_layout() {
        let schema = FeatureSchema::new(&axes(), false, &[]);

        // 4 series * 10 stats, 4 * 3 jerk, 3 correlations, 4 * 4 spectral, samples_in_window
        assert_eq!(schema.len(), 40 + 12 + 3 + 16 + 1);
        assert_eq!(schema.names()[0], "accel_x_mean");
        assert_eq!(schema.names()[30], "magnitude_mean");
        assert!(schema.position("magnitude_jerk_max").is_some());
        assert!(schema.position("corr_accel_x_accel_z").is_some());
        assert!(schema.position("magnitude_fft_spectral_entropy").is_some());
        assert_eq!(schema.names().last().unwrap(), "samples_in_window");
        assert!(schema.position("severity_max").is_none());
    }

    #[test]
    fn schema_with_optional_columns() {
        let schema = FeatureSchema::new(&axes(), true, &["speed".to_string()]);
        assert_eq!(schema.len(), 72 + 2 + 2);
        assert!(schema.position("severity_mean").is_some());
        assert!(schema.position("speed_last").is_some());
        assert!(schema.position("speed_mode").is_some());
    }

    #[test]
    fn sanitize() {
        let mut fv = row(vec![f64::NAN, f64::INFINITY, f64::NEG_INFINITY, 1.5]);
        fv.sanitize();
        assert_eq!(fv.values, vec![0., 0., 0., 1.5]);
    }

    #[test]
    fn mismatched_row_is_rejected() {
        let schema = FeatureSchema::from_names(vec!["a".to_string(), "b".to_string()]);
        assert!(FeatureTable::new(schema.clone(), vec![row(vec![1., 2.])]).is_ok());
        assert!(FeatureTable::new(schema, vec![row(vec![1.])]).is_err());
    }

    #[test]
    fn write_predictions() {
        let schema = FeatureSchema::from_names(vec!["a".to_string()]);
        let table = FeatureTable::new(schema, vec![row(vec![2.]), row(vec![3.])]).unwrap();

        let mut out: Vec<u8> = Vec::new();
        table.write_predictions_csv(&mut out, &[0.25, 0.75], 0.5).unwrap();

        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "vehicle_id,window_index,window_start_ts,window_end_ts,label,positive_ratio,a,accident_probability,predicted_accident");
        assert_eq!(lines[1], "v,0,0,1,1,0.5,2,0.25,0");
        assert_eq!(lines[2], "v,0,0,1,1,0.5,3,0.75,1");

        assert!(table.write_predictions_csv(&mut Vec::<u8>::new(), &[0.1], 0.5).is_err());
    }
}
