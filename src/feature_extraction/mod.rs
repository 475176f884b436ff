use rayon::iter::{IntoParallelIterator, ParallelIterator};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::feature_extraction::feature_vector::{FeatureGroup, FeatureSchema, FeatureTable, FeatureVector};
use crate::feature_extraction::segment::{Window, WindowConfig, WindowSegmenter};
use crate::feature_extraction::spectral::SpectrumAnalyzer;
use crate::feature_extraction::statistics::{JerkStatistics, magnitude, pearson, SeriesStatistics};
use crate::shared_interface::{SensorSample, SensorStream};

pub mod feature_vector;
pub mod segment;
pub mod spectral;
pub mod statistics;

/// Window a sensor stream per vehicle and compute one feature vector per window.
///
/// Vehicles are processed independently (in parallel); rows come back ordered by
/// vehicle id, then window index. Fails with `Error::NoWindows` when no vehicle
/// has at least `window_size` samples.
pub fn extract_features(config: &WindowConfig, stream: SensorStream) -> Result<FeatureTable> {
    let segmenter = WindowSegmenter::new(config)?;
    let schema = FeatureSchema::new(&stream.sensor_names, stream.has_severity, &stream.metadata_names);
    let has_severity = stream.has_severity;

    let groups: Vec<(String, Vec<SensorSample>)> = WindowSegmenter::group_by_vehicle(stream.samples)
        .into_iter()
        .collect();
    let n_vehicles = groups.len();

    let rows: Vec<FeatureVector> = groups
        .into_par_iter()
        .map(|(vehicle_id, group)| {
            let mut analyzer = SpectrumAnalyzer::new(config.sampling_rate);
            let rows: Vec<FeatureVector> = segmenter.windows(&vehicle_id, &group)
                .map(|window| window_features(&window, config.sampling_rate, has_severity, &mut analyzer))
                .collect();

            debug!(vehicle = %vehicle_id, samples = group.len(), windows = rows.len(), "windowed vehicle stream");
            rows
        })
        .flatten()
        .collect();

    if rows.is_empty() {
        return Err(Error::NoWindows);
    }

    info!(vehicles = n_vehicles, windows = rows.len(), features = schema.len(), "extracted window features");
    FeatureTable::new(schema, rows)
}

/// Features of a single window, in `FeatureSchema` order.
pub fn window_features(window: &Window, sampling_rate: f64, has_severity: bool, analyzer: &mut SpectrumAnalyzer) -> FeatureVector {
    let axes = [window.axis(0), window.axis(1), window.axis(2)];
    let mag = magnitude(&axes[0], &axes[1], &axes[2]);
    let series = [&axes[0], &axes[1], &axes[2], &mag];

    let mut values = Vec::new();

    for s in series.iter() {
        values.extend(SeriesStatistics::from_series(s).values());
    }

    for s in series.iter() {
        values.extend(JerkStatistics::from_series(s, sampling_rate).values());
    }

    for i in 0..3 {
        for j in (i + 1)..3 {
            values.push(pearson(&axes[i], &axes[j]));
        }
    }

    for s in series.iter() {
        values.extend(analyzer.features(s).values());
    }

    let n_meta = window.samples.first().map(|s| s.metadata.len()).unwrap_or(0);
    for m in 0..n_meta {
        let column: Vec<f64> = window.samples.iter().map(|s| s.metadata[m]).collect();
        let last = column.last().copied().unwrap_or(f64::NAN);
        values.push(last);
        values.push(mode(&column).unwrap_or(last));
    }

    if has_severity {
        let severity: Vec<f64> = window.samples.iter().map(|s| s.severity.unwrap_or(0.)).collect();
        values.push(severity.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
        values.push(severity.iter().sum::<f64>() / severity.len() as f64);
    }

    values.push(window.samples.len() as f64);

    let mut fv = FeatureVector {
        vehicle_id: window.vehicle_id.to_string(),
        window_index: window.index,
        window_start_ts: window.start_ts(),
        window_end_ts: window.end_ts(),
        label: window.label(),
        positive_ratio: window.positive_ratio(),
        values,
    };
    fv.sanitize();
    fv
}

/// Most frequent non-NaN value, the smallest one on ties.
fn mode(values: &[f64]) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().cloned().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut best: Option<(f64, usize)> = None;
    let mut i = 0;
    while i < sorted.len() {
        let run = sorted[i..].iter().take_while(|&&v| v == sorted[i]).count();
        if best.map_or(true, |(_, count)| run > count) {
            best = Some((sorted[i], run));
        }
        i += run;
    }

    best.map(|(v, _)| v)
}
