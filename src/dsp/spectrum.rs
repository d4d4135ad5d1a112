//! Spectrum Analyzer
//!
//! Per-frame visualization data: a time-averaged power spectrum smoothed
//! against the previous frame, its peak frequencies, RMS level and energy in
//! seven named bands.

use rustfft::FftPlanner;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::dsp::spectral::{averaged_periodogram, Scaling};
use crate::dsp::utils::{find_peaks, frame_rms};

// Weight of the previous spectrum in the exponential smoother.
// Increasing: calmer display, slower response; decreasing: jumpier display.
const SMOOTHING: f32 = 0.7;

/// Named bands as (name, low_hz, high_hz).
pub const BANDS: [(&str, f32, f32); 7] = [
    ("sub_bass", 20.0, 60.0),
    ("bass", 60.0, 250.0),
    ("low_mid", 250.0, 500.0),
    ("mid", 500.0, 2000.0),
    ("upper_mid", 2000.0, 4000.0),
    ("presence", 4000.0, 6000.0),
    ("brilliance", 6000.0, 20000.0),
];

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct VisualizationSnapshot {
    pub spectrum: Vec<f32>,
    pub frequencies: Vec<f32>,
    pub peak_frequencies: Vec<f32>,
    pub rms_level: f32,
    pub bands: BTreeMap<String, f32>,
}

pub struct SpectrumAnalyzer {
    sample_rate: f32,
    chunk_size: usize,
    previous: Option<Vec<f32>>,
}

impl SpectrumAnalyzer {
    pub fn new(sample_rate: f32, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
            previous: None,
        }
    }

    pub fn analyze(&mut self, x: &[f32], planner: &mut FftPlanner<f32>) -> VisualizationSnapshot {
        let (frequencies, current) = averaged_periodogram(
            planner,
            x,
            self.chunk_size,
            self.sample_rate,
            Scaling::Spectrum,
        );

        let spectrum = match self.previous.as_ref() {
            Some(prev) if prev.len() == current.len() => prev
                .iter()
                .zip(&current)
                .map(|(&p, &c)| SMOOTHING * p + (1.0 - SMOOTHING) * c)
                .collect(),
            _ => current,
        };
        self.previous = Some(spectrum.clone());

        let peak_frequencies = find_peaks(&spectrum)
            .into_iter()
            .filter_map(|i| frequencies.get(i).copied())
            .collect();

        let bands = self.band_energies(&spectrum);

        VisualizationSnapshot {
            peak_frequencies,
            rms_level: frame_rms(x),
            bands,
            spectrum,
            frequencies,
        }
    }

    /// Mean spectrum value over each band's index range.
    pub fn band_energies(&self, spectrum: &[f32]) -> BTreeMap<String, f32> {
        let resolution = self.sample_rate / self.chunk_size as f32;
        BANDS
            .iter()
            .map(|&(name, lo, hi)| {
                let lo_idx = ((lo / resolution) as usize).min(spectrum.len());
                let hi_idx = ((hi / resolution) as usize).min(spectrum.len());
                let slice = &spectrum[lo_idx..hi_idx.max(lo_idx)];
                let energy = if slice.is_empty() {
                    0.0
                } else {
                    slice.iter().sum::<f32>() / slice.len() as f32
                };
                (name.to_string(), energy)
            })
            .collect()
    }

    pub fn reset(&mut self) {
        self.previous = None;
    }
}
