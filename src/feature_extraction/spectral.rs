use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::Serialize;

use crate::feature_extraction::feature_vector::FeatureGroup;

const ENTROPY_EPS: f64 = 1e-12;

#[derive(Default, Debug, Clone, Serialize, PartialEq)]
pub struct SpectralFeatures {
    pub dominant_freq: f64,
    pub dominant_power: f64,
    pub spectral_energy: f64,
    pub spectral_entropy: f64,
}

impl FeatureGroup for SpectralFeatures {
    const NAMES: &'static [&'static str] = &["dominant_freq", "dominant_power", "spectral_energy", "spectral_entropy"];

    fn values(&self) -> Vec<f64> {
        vec![self.dominant_freq, self.dominant_power, self.spectral_energy, self.spectral_entropy]
    }
}

/// Real-input spectrum summaries. Holds an FFT planner so plans are reused
/// across windows of the same length.
pub struct SpectrumAnalyzer {
    planner: FftPlanner<f64>,
    sampling_rate: f64,
}

impl SpectrumAnalyzer {
    pub fn new(sampling_rate: f64) -> Self {
        SpectrumAnalyzer { planner: FftPlanner::new(), sampling_rate }
    }

    /// Magnitudes of the non-negative frequency bins (n / 2 + 1 of them).
    pub fn magnitude_spectrum(&mut self, series: &[f64]) -> Vec<f64> {
        let n = series.len();
        if n == 0 { return Vec::new(); }

        let mut buffer: Vec<Complex<f64>> = series.iter().map(|&x| Complex::new(x, 0.)).collect();
        self.planner.plan_fft_forward(n).process(&mut buffer);

        buffer.iter().take(n / 2 + 1).map(|c| c.norm()).collect()
    }

    /// Frequency (Hz) of rfft bin `k` for a series of length `n`.
    pub fn bin_frequency(&self, k: usize, n: usize) -> f64 {
        k as f64 * self.sampling_rate / n as f64
    }

    pub fn features(&mut self, series: &[f64]) -> SpectralFeatures {
        if series.len() < 2 {
            return SpectralFeatures::default();
        }

        let mut spectrum = self.magnitude_spectrum(series);

        // Drop the DC offset before looking for the dominant component
        spectrum[0] = 0.;

        // First maximal bin, DC (0) for a flat spectrum
        let mut dominant = 0;
        for (k, &m) in spectrum.iter().enumerate() {
            if m > spectrum[dominant] { dominant = k; }
        }

        let total: f64 = spectrum.iter().sum();
        let spectral_entropy = spectrum.iter()
            .map(|m| m / (total + ENTROPY_EPS))
            .map(|p| p * -(p + ENTROPY_EPS).ln())
            .sum();

        SpectralFeatures {
            dominant_freq: self.bin_frequency(dominant, series.len()),
            dominant_power: spectrum[dominant],
            spectral_energy: spectrum.iter().map(|m| m * m).sum(),
            spectral_entropy,
        }
    }
}
