use std::fmt;

use serde::{Deserialize, Serialize};

pub const DEFAULT_VEHICLE_ID: &str = "vehicle_0";

/// One accelerometer reading. `metadata` follows the order of
/// `SensorStream::metadata_names`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SensorSample {
    pub vehicle_id: String,
    pub ts: f64,
    pub accel: [f64; 3],
    pub label: u8,
    pub severity: Option<f64>,
    pub metadata: Vec<f64>,
}

impl fmt::Display for SensorSample {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "SensorSample<vehicle={}, ts={}, accel=({}, {}, {}), label={}>",
               self.vehicle_id, self.ts, self.accel[0], self.accel[1], self.accel[2], self.label)
    }
}

/// Explicit mapping of CSV columns to their role in the pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ColumnRoles {
    pub timestamp: String,
    pub vehicle_id: String,
    pub sensors: [String; 3],
    pub label: String,
    pub severity: Option<String>,
    pub metadata: Vec<String>,
}

impl Default for ColumnRoles {
    fn default() -> Self {
        ColumnRoles {
            timestamp: "timestamp".to_string(),
            vehicle_id: "vehicle_id".to_string(),
            sensors: ["accel_x".to_string(), "accel_y".to_string(), "accel_z".to_string()],
            label: "accident".to_string(),
            severity: Some("event_severity".to_string()),
            metadata: Vec::new(),
        }
    }
}

/// Decoded input: samples plus the optional columns that were actually present.
#[derive(Debug, Clone)]
pub struct SensorStream {
    pub sensor_names: [String; 3],
    pub has_severity: bool,
    pub metadata_names: Vec<String>,
    pub samples: Vec<SensorSample>,
}

impl SensorStream {
    /// Stream with the default axis names and no optional columns.
    pub fn from_samples(samples: Vec<SensorSample>) -> Self {
        SensorStream {
            sensor_names: ColumnRoles::default().sensors,
            has_severity: samples.iter().any(|s| s.severity.is_some()),
            metadata_names: Vec::new(),
            samples,
        }
    }
}
