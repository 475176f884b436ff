use serde::Serialize;

use crate::feature_extraction::feature_vector::FeatureGroup;

// Relative variance below which skewness/kurtosis are undefined
const MOMENT_RESOLUTION: f64 = 1e-15;

/// Time-domain statistics of one series (raw axis or magnitude).
#[derive(Default, Debug, Clone, Serialize, PartialEq)]
pub struct SeriesStatistics {
    pub mean: f64,
    pub std: f64,
    pub max: f64,
    pub min: f64,
    pub range: f64,
    pub ptp: f64,
    pub energy: f64,
    pub skew: f64,
    pub kurtosis: f64,
    pub zcr: f64,
}

impl FeatureGroup for SeriesStatistics {
    const NAMES: &'static [&'static str] = &[
        "mean", "std", "max", "min", "range", "ptp", "energy", "skew", "kurtosis", "zcr",
    ];

    fn values(&self) -> Vec<f64> {
        vec![
            self.mean, self.std, self.max, self.min, self.range,
            self.ptp, self.energy, self.skew, self.kurtosis, self.zcr,
        ]
    }
}

impl SeriesStatistics {
    pub fn from_series(series: &[f64]) -> Self {
        if series.is_empty() {
            return SeriesStatistics::default();
        }

        let n = series.len() as f64;
        let mean = series.iter().sum::<f64>() / n;
        let max = series.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let min = series.iter().cloned().fold(f64::INFINITY, f64::min);

        // Central moments (population)
        let (mut m2, mut m3, mut m4) = (0f64, 0f64, 0f64);
        for x in series {
            let d = x - mean;
            let d2 = d * d;
            m2 += d2;
            m3 += d2 * d;
            m4 += d2 * d2;
        }
        m2 /= n;
        m3 /= n;
        m4 /= n;

        let degenerate = m2 <= (MOMENT_RESOLUTION * mean).powi(2) || m2 == 0.;
        let (skew, kurtosis) = if degenerate {
            (0., 0.)
        } else {
            (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.)
        };

        SeriesStatistics {
            mean,
            std: m2.sqrt(),
            max,
            min,
            range: max - min,
            ptp: max - min,
            energy: series.iter().map(|x| x * x).sum(),
            skew,
            kurtosis,
            zcr: zero_crossing_rate(series),
        }
    }
}

/// First-difference derivative statistics, scaled to units per second.
#[derive(Default, Debug, Clone, Serialize, PartialEq)]
pub struct JerkStatistics {
    pub mean: f64,
    pub std: f64,
    pub max: f64,
}

impl FeatureGroup for JerkStatistics {
    const NAMES: &'static [&'static str] = &["mean", "std", "max"];

    fn values(&self) -> Vec<f64> {
        vec![self.mean, self.std, self.max]
    }
}

impl JerkStatistics {
    pub fn from_series(series: &[f64], sampling_rate: f64) -> Self {
        if series.len() < 2 {
            return JerkStatistics::default();
        }

        let jerk: Vec<f64> = series.windows(2).map(|p| (p[1] - p[0]) * sampling_rate).collect();
        let n = jerk.len() as f64;
        let mean = jerk.iter().sum::<f64>() / n;
        let var = jerk.iter().map(|j| (j - mean).powi(2)).sum::<f64>() / n;

        JerkStatistics {
            mean,
            std: var.sqrt(),
            max: jerk.iter().map(|j| j.abs()).fold(0., f64::max),
        }
    }
}

/// Fraction of adjacent pairs whose mean-centered values change sign.
pub fn zero_crossing_rate(series: &[f64]) -> f64 {
    if series.len() < 2 { return 0.; }

    let mean = series.iter().sum::<f64>() / series.len() as f64;
    let crossings = series
        .windows(2)
        .filter(|p| (p[0] - mean).is_sign_negative() != (p[1] - mean).is_sign_negative())
        .count();

    crossings as f64 / (series.len() - 1) as f64
}

/// Pearson correlation coefficient, 0.0 when undefined (zero variance, too few samples).
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 { return 0.; }

    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0f64, 0f64, 0f64);
    for (x, y) in a[..n].iter().zip(b[..n].iter()) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    let r = cov / (var_a * var_b).sqrt();
    if r.is_finite() { r } else { 0. }
}

/// Euclidean norm of the three axes per sample.
pub fn magnitude(x: &[f64], y: &[f64], z: &[f64]) -> Vec<f64> {
    x.iter().zip(y.iter()).zip(z.iter())
        .map(|((x, y), z)| (x * x + y * y + z * z).sqrt())
        .collect()
}
