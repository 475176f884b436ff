use serde::{Deserialize, Serialize};

// Standard deviations below this are treated as zero (scale 1)
const MIN_SCALE: f64 = 10. * f64::EPSILON;

/// Zero-mean / unit-variance standardization, fit on training rows only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
}

impl StandardScaler {
    pub fn fit(rows: &[Vec<f64>]) -> Self {
        let n_features = rows.first().map(|r| r.len()).unwrap_or(0);
        let n = rows.len().max(1) as f64;

        let mut mean = vec![0.; n_features];
        for row in rows {
            for (m, v) in mean.iter_mut().zip(row.iter()) { *m += v; }
        }
        mean.iter_mut().for_each(|m| *m /= n);

        let mut var = vec![0.; n_features];
        for row in rows {
            for ((s, v), m) in var.iter_mut().zip(row.iter()).zip(mean.iter()) { *s += (v - m).powi(2); }
        }

        let scale = var.iter()
            .map(|s| (s / n).sqrt())
            .map(|std| if std < MIN_SCALE { 1. } else { std })
            .collect();

        StandardScaler { mean, scale }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn transform_row(&self, row: &[f64]) -> Vec<f64> {
        row.iter().zip(self.mean.iter()).zip(self.scale.iter())
            .map(|((v, m), s)| (v - m) / s)
            .collect()
    }

    pub fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<f64>> {
        rows.iter().map(|r| self.transform_row(r)).collect()
    }
}
