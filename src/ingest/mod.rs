use std::io::Read;

use indicatif::ProgressBar;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::shared_interface::{ColumnRoles, DEFAULT_VEHICLE_ID, SensorSample, SensorStream};

pub mod value;

/// What to do when the label column is absent from the input.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MissingLabel {
    Reject,
    Synthesize,
}

#[derive(Debug, Clone)]
pub struct IngestOpts {
    pub roles: ColumnRoles,
    pub sampling_rate: f64,
    pub missing_label: MissingLabel,
}

struct ColumnIndex {
    timestamp: Option<usize>,
    vehicle_id: Option<usize>,
    sensors: [usize; 3],
    label: Option<usize>,
    severity: Option<usize>,
    metadata: Vec<(String, usize)>,
}

impl ColumnIndex {
    fn resolve(headers: &csv::StringRecord, opts: &IngestOpts) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);
        let roles = &opts.roles;

        let missing: Vec<&str> = roles.sensors.iter()
            .filter(|name| find(name).is_none())
            .map(|name| name.as_str())
            .collect();
        if !missing.is_empty() {
            return Err(Error::validation(format!("Missing sensor columns: {:?}", missing)));
        }
        let sensors = [
            find(&roles.sensors[0]).unwrap_or_default(),
            find(&roles.sensors[1]).unwrap_or_default(),
            find(&roles.sensors[2]).unwrap_or_default(),
        ];

        let label = find(&roles.label);
        if label.is_none() {
            match opts.missing_label {
                MissingLabel::Reject => {
                    return Err(Error::validation(format!("Label column '{}' not found in input", roles.label)));
                }
                MissingLabel::Synthesize => warn!(column = %roles.label, "label column not found, using 0 for every sample"),
            }
        }

        let timestamp = find(&roles.timestamp);
        if timestamp.is_none() {
            warn!(column = %roles.timestamp, "timestamp column not found, synthesizing index / sampling_rate");
        }

        let vehicle_id = find(&roles.vehicle_id);
        if vehicle_id.is_none() {
            warn!(column = %roles.vehicle_id, "vehicle id column not found, using {}", DEFAULT_VEHICLE_ID);
        }

        let severity = roles.severity.as_deref().and_then(find);

        // Configured metadata columns that are not in the input are skipped
        let metadata = roles.metadata.iter()
            .filter_map(|name| find(name).map(|idx| (name.clone(), idx)))
            .collect();

        Ok(ColumnIndex { timestamp, vehicle_id, sensors, label, severity, metadata })
    }
}

/// Decode a CSV stream of accelerometer readings.
///
/// Sensor columns are required; timestamp, vehicle id and (depending on
/// `missing_label`) label columns are synthesized when absent.
pub fn read_samples<R: Read>(reader: R, opts: &IngestOpts, pb: Option<&ProgressBar>) -> Result<SensorStream> {
    if !(opts.sampling_rate > 0.) || !opts.sampling_rate.is_finite() {
        return Err(Error::validation(format!("sampling_rate must be positive, got {}", opts.sampling_rate)));
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(reader);

    let headers = csv_reader.headers()?.clone();
    let columns = ColumnIndex::resolve(&headers, opts)?;

    let mut samples = Vec::new();
    let mut record = csv::StringRecord::new();
    let mut row: usize = 0;

    while csv_reader.read_record(&mut record)? {
        let field = |idx: usize| record.get(idx).unwrap_or("");

        let mut accel = [0.; 3];
        for (axis, &idx) in columns.sensors.iter().enumerate() {
            accel[axis] = match value::parse_number(field(idx)) {
                Some(v) => v,
                None => return Err(Error::validation(format!(
                    "Row {}: invalid value {:?} in sensor column '{}'", row + 1, field(idx), opts.roles.sensors[axis]
                )))
            };
        }

        let ts = match columns.timestamp {
            Some(idx) => value::parse_timestamp(field(idx)),
            None => row as f64 / opts.sampling_rate
        };

        let vehicle_id = match columns.vehicle_id {
            Some(idx) => field(idx).trim().to_string(),
            None => DEFAULT_VEHICLE_ID.to_string()
        };

        samples.push(SensorSample {
            vehicle_id,
            ts,
            accel,
            label: columns.label.map(|idx| value::parse_label(field(idx))).unwrap_or(0),
            severity: columns.severity.map(|idx| value::parse_severity(field(idx))),
            metadata: columns.metadata.iter()
                .map(|(_, idx)| value::parse_number(field(*idx)).unwrap_or(f64::NAN))
                .collect(),
        });

        row += 1;
        if let Some(pb) = pb { pb.inc(1); }
    }

    debug!(rows = row, "decoded sensor samples");

    Ok(SensorStream {
        sensor_names: opts.roles.sensors.clone(),
        has_severity: columns.severity.is_some(),
        metadata_names: columns.metadata.into_iter().map(|(name, _)| name).collect(),
        samples,
    })
}
