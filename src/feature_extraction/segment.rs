use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::shared_interface::SensorSample;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowConfig {
    /// Hz
    pub sampling_rate: f64,
    /// Samples per window
    pub window_size: usize,
    /// Hop between window starts, half a window when unset
    pub step_size: Option<usize>,
}

impl Default for WindowConfig {
    fn default() -> Self {
        WindowConfig { sampling_rate: 50., window_size: 100, step_size: None }
    }
}

impl WindowConfig {
    pub fn step(&self) -> usize {
        self.step_size.unwrap_or_else(|| (self.window_size / 2).max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.window_size == 0 {
            return Err(Error::validation("window_size must be positive"));
        }
        if self.step_size == Some(0) {
            return Err(Error::validation("step_size must be positive"));
        }
        if !(self.sampling_rate > 0.) || !self.sampling_rate.is_finite() {
            return Err(Error::validation(format!("sampling_rate must be positive, got {}", self.sampling_rate)));
        }
        Ok(())
    }
}

/// Contiguous, time-ordered slice of one vehicle's samples.
#[derive(Debug)]
pub struct Window<'a> {
    pub vehicle_id: &'a str,
    pub index: usize,
    pub offset: usize,
    pub samples: &'a [SensorSample],
}

impl<'a> Window<'a> {
    pub fn label(&self) -> u8 {
        self.samples.iter().any(|s| s.label != 0) as u8
    }

    pub fn positive_ratio(&self) -> f64 {
        if self.samples.is_empty() { return 0.; }
        self.samples.iter().filter(|s| s.label != 0).count() as f64 / self.samples.len() as f64
    }

    pub fn start_ts(&self) -> f64 {
        self.samples.first().map(|s| s.ts).unwrap_or(0.)
    }

    pub fn end_ts(&self) -> f64 {
        self.samples.last().map(|s| s.ts).unwrap_or(0.)
    }

    /// Values of one raw axis (0 = x, 1 = y, 2 = z).
    pub fn axis(&self, axis: usize) -> Vec<f64> {
        self.samples.iter().map(|s| s.accel[axis]).collect()
    }
}

pub struct WindowSegmenter {
    window_size: usize,
    step_size: usize,
}

impl WindowSegmenter {
    pub fn new(config: &WindowConfig) -> Result<Self> {
        config.validate()?;
        Ok(WindowSegmenter { window_size: config.window_size, step_size: config.step() })
    }

    /// Split samples into per-vehicle groups, each sorted by timestamp.
    pub fn group_by_vehicle(samples: Vec<SensorSample>) -> BTreeMap<String, Vec<SensorSample>> {
        let mut groups: BTreeMap<String, Vec<SensorSample>> = BTreeMap::new();
        for sample in samples {
            groups.entry(sample.vehicle_id.clone()).or_insert_with(Vec::new).push(sample);
        }

        // Stable sort, unparsable (NaN) timestamps go last
        for group in groups.values_mut() {
            group.sort_by(|a, b| a.ts.total_cmp(&b.ts));
        }

        groups
    }

    /// Number of full windows in a group of `len` samples.
    pub fn window_count(&self, len: usize) -> usize {
        if len < self.window_size { return 0; }
        (len - self.window_size) / self.step_size + 1
    }

    /// Windows over one vehicle's sorted samples; partial trailing windows are dropped.
    pub fn windows<'a>(&self, vehicle_id: &'a str, group: &'a [SensorSample]) -> impl Iterator<Item=Window<'a>> + 'a {
        let window_size = self.window_size;
        let step_size = self.step_size;

        (0..self.window_count(group.len())).map(move |index| {
            let offset = index * step_size;
            Window { vehicle_id, index, offset, samples: &group[offset..offset + window_size] }
        })
    }
}


#[cfg(test)]
mod tests {
    use crate::error::Error;
    use crate::feature_extraction::segment::{WindowConfig, WindowSegmenter};
    use crate::shared_interface::SensorSample;

    fn sample(vehicle_id: &str, ts: f64, label: u8) -> SensorSample {
        SensorSample { vehicle_id: vehicle_id.to_string(), ts, accel: [ts, 0., 0.], label, severity: None, metadata: vec![] }
    }

    fn segmenter(window_size: usize, step_size: Option<usize>) -> WindowSegmenter {
        WindowSegmenter::new(&WindowConfig { sampling_rate: 50., window_size, step_size }).unwrap()
    }

    #[test]
    fn scenario_250_samples() {
        let seg = segmenter(100, Some(50));
        let group: Vec<SensorSample> = (0..250).map(|i| sample("v", i as f64, 0)).collect();

        let windows: Vec<_> = seg.windows("v", &group).collect();
        assert_eq!(windows.len(), 4);
        assert_eq!(windows.iter().map(|w| w.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(windows.iter().map(|w| w.offset).collect::<Vec<_>>(), vec![0, 50, 100, 150]);
        assert!(windows.iter().all(|w| w.samples.len() == 100));
        assert_eq!(windows[3].start_ts(), 150.);
        assert_eq!(windows[3].end_ts(), 249.);
    }

    #[test]
    fn window_count_formula() {
        for &(window_size, step_size) in &[(10, 5), (10, 10), (7, 3), (4, 1), (5, 12)] {
            let seg = segmenter(window_size, Some(step_size));
            for len in 0..60 {
                let expected = if len < window_size { 0 } else { (len - window_size) / step_size + 1 };
                let group: Vec<SensorSample> = (0..len).map(|i| sample("v", i as f64, 0)).collect();
                assert_eq!(seg.windows("v", &group).count(), expected);
                assert_eq!(seg.window_count(len), expected);
            }
        }
    }

    #[test]
    fn short_group_yields_nothing() {
        let seg = segmenter(100, None);
        let group: Vec<SensorSample> = (0..99).map(|i| sample("v", i as f64, 0)).collect();
        assert_eq!(seg.windows("v", &group).count(), 0);
    }

    #[test]
    fn default_step_is_half_window() {
        let config = WindowConfig { sampling_rate: 50., window_size: 100, step_size: None };
        assert_eq!(config.step(), 50);

        let config = WindowConfig { sampling_rate: 50., window_size: 1, step_size: None };
        assert_eq!(config.step(), 1);
    }

    #[test]
    fn invalid_config() {
        let bad = [
            WindowConfig { sampling_rate: 50., window_size: 0, step_size: None },
            WindowConfig { sampling_rate: 50., window_size: 10, step_size: Some(0) },
            WindowConfig { sampling_rate: 0., window_size: 10, step_size: None },
        ];
        for config in bad.iter() {
            assert!(matches!(WindowSegmenter::new(config), Err(Error::Validation(_))));
        }
    }

    #[test]
    fn groups_are_sorted_and_separated() {
        let samples = vec![
            sample("b", 2., 0),
            sample("a", 1., 0),
            sample("b", 0., 1),
            sample("a", 0., 0),
            sample("b", 1., 0),
        ];

        let groups = WindowSegmenter::group_by_vehicle(samples);
        assert_eq!(groups.keys().cloned().collect::<Vec<_>>(), vec!["a".to_string(), "b".to_string()]);
        assert_eq!(groups["b"].iter().map(|s| s.ts).collect::<Vec<_>>(), vec![0., 1., 2.]);

        let seg = segmenter(2, Some(1));
        for (vehicle_id, group) in groups.iter() {
            for window in seg.windows(vehicle_id, group) {
                assert!(window.samples.iter().all(|s| &s.vehicle_id == vehicle_id));
                assert!(window.samples.windows(2).all(|p| p[0].ts <= p[1].ts));
            }
        }
    }

    #[test]
    fn label_and_positive_ratio() {
        let seg = segmenter(4, Some(4));
        let labels = [0, 0, 1, 0, 0, 0, 0, 0];
        let group: Vec<SensorSample> = labels.iter().enumerate().map(|(i, &l)| sample("v", i as f64, l)).collect();

        let windows: Vec<_> = seg.windows("v", &group).collect();
        assert_eq!(windows[0].label(), 1);
        assert_eq!(windows[0].positive_ratio(), 0.25);
        assert_eq!(windows[1].label(), 0);
        assert_eq!(windows[1].positive_ratio(), 0.);
    }
}
