//! Per-frame feature extraction.
//!
//! Produces the scalar metrics reported by `get_stats` and consumed by the
//! adapt-effects hook. `clarity` is derived here from the spectral centroid so
//! the hook never reads a field nobody writes.

use rustfft::FftPlanner;
use serde::Serialize;

use crate::dsp::spectral::{dominant_frequency, spectral_centroid, welch_psd};
use crate::dsp::spectrum::VisualizationSnapshot;
use crate::dsp::utils::{estimate_f0_autocorr, frame_rms, zero_crossing_rate};

// Centroid that maps to clarity 1.0.
// Increasing: the same voice reads as duller; decreasing: brighter.
const CLARITY_CENTROID_HZ: f32 = 4000.0;

// Pitch search range
const PITCH_MIN_HZ: f32 = 50.0;
const PITCH_MAX_HZ: f32 = 1000.0;

// Below this periodicity the pitch estimate is reported as 0.
const PITCH_MIN_PERIODICITY: f32 = 0.5;

#[derive(Debug, Clone, Copy, Default, Serialize, PartialEq)]
pub struct FrameMetrics {
    pub rms: f32,
    pub dominant_frequency: f32,
    pub spectral_centroid: f32,
    pub pitch: f32,
    pub zero_crossing_rate: f32,
    /// Spectral brightness in 0..1.
    pub clarity: f32,
}

/// Latest analysis results, replaced as a whole every frame.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct AnalysisSnapshot {
    pub metrics: FrameMetrics,
    pub visualization: VisualizationSnapshot,
}

pub struct FrameAnalyzer {
    sample_rate: f32,
}

impl FrameAnalyzer {
    pub fn new(sample_rate: f32) -> Self {
        Self { sample_rate }
    }

    pub fn analyze(&self, x: &[f32], planner: &mut FftPlanner<f32>) -> FrameMetrics {
        let (freqs, psd) = welch_psd(planner, x, self.sample_rate);
        let centroid = spectral_centroid(&freqs, &psd);
        let (periodicity, f0) =
            estimate_f0_autocorr(x, self.sample_rate, PITCH_MIN_HZ, PITCH_MAX_HZ);

        FrameMetrics {
            rms: frame_rms(x),
            dominant_frequency: dominant_frequency(&freqs, &psd),
            spectral_centroid: centroid,
            pitch: if periodicity >= PITCH_MIN_PERIODICITY { f0 } else { 0.0 },
            zero_crossing_rate: zero_crossing_rate(x),
            clarity: (centroid / CLARITY_CENTROID_HZ).clamp(0.0, 1.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn test_silence_profile() {
        let a = FrameAnalyzer::new(44_100.0);
        let m = a.analyze(&[0.0; 1024], &mut FftPlanner::new());
        assert_eq!(m.rms, 0.0);
        assert_eq!(m.pitch, 0.0);
        assert_eq!(m.clarity, 0.0);
    }

    #[test]
    fn test_sine_wave_profile() {
        let a = FrameAnalyzer::new(44_100.0);
        let m = a.analyze(&tone(220.0, 2048), &mut FftPlanner::new());
        assert!((m.rms - 0.3536).abs() < 0.01);
        assert!((m.pitch - 220.0).abs() < 5.0, "pitch {}", m.pitch);
        assert!(m.dominant_frequency < 400.0);
        // ~2 crossings per period
        let expected_zcr = 2.0 * 220.0 / 44_100.0;
        assert!((m.zero_crossing_rate - expected_zcr).abs() < 0.002);
    }

    #[test]
    fn test_clarity_tracks_brightness() {
        let a = FrameAnalyzer::new(44_100.0);
        let mut planner = FftPlanner::new();
        let dull = a.analyze(&tone(200.0, 2048), &mut planner);
        let bright = a.analyze(&tone(3000.0, 2048), &mut planner);
        assert!(bright.clarity > dull.clarity);
        assert!(bright.clarity <= 1.0 && dull.clarity >= 0.0);
    }
}
