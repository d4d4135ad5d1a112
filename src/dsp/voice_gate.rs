//! Voice Activity Gate
//!
//! Energy plus dominant-frequency heuristic over a short FIFO of recent frame
//! energies. The current frame's energy enters the history before the decision,
//! and silence never passes (`0 > 0` is false).

use rustfft::FftPlanner;
use std::collections::VecDeque;

use crate::config::VadConfig;
use crate::dsp::spectral::{dominant_frequency, welch_psd};
use crate::dsp::utils::mean_square;

pub struct VoiceActivityGate {
    cfg: VadConfig,
    sample_rate: f32,
    history: VecDeque<f32>,
    last_energy: f32,
    last_dominant_hz: f32,
}

impl VoiceActivityGate {
    pub fn new(cfg: VadConfig, sample_rate: f32) -> Self {
        Self {
            history: VecDeque::with_capacity(cfg.history_len),
            cfg,
            sample_rate,
            last_energy: 0.0,
            last_dominant_hz: 0.0,
        }
    }

    /// Classify a frame given as normalized samples.
    pub fn is_speech(&mut self, x: &[f32], planner: &mut FftPlanner<f32>) -> bool {
        let energy = mean_square(x);
        if self.history.len() == self.cfg.history_len {
            self.history.pop_front();
        }
        self.history.push_back(energy);
        let mean = self.history.iter().sum::<f32>() / self.history.len() as f32;

        let (freqs, psd) = welch_psd(planner, x, self.sample_rate);
        let dom = dominant_frequency(&freqs, &psd);

        self.last_energy = energy;
        self.last_dominant_hz = dom;

        energy > mean * self.cfg.energy_threshold
            && dom > self.cfg.band_low_hz
            && dom < self.cfg.band_high_hz
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    pub fn last_energy(&self) -> f32 {
        self.last_energy
    }

    pub fn last_dominant_hz(&self) -> f32 {
        self.last_dominant_hz
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.last_energy = 0.0;
        self.last_dominant_hz = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, amp: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| amp * (2.0 * PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    #[test]
    fn test_silence_never_active() {
        let mut gate = VoiceActivityGate::new(VadConfig::default(), 44_100.0);
        let mut planner = FftPlanner::new();
        for _ in 0..50 {
            assert!(!gate.is_speech(&[0.0; 1024], &mut planner));
        }
        assert_eq!(gate.history_len(), 10);
    }

    #[test]
    fn test_voice_band_tone_is_active() {
        let mut gate = VoiceActivityGate::new(VadConfig::default(), 44_100.0);
        let mut planner = FftPlanner::new();
        assert!(gate.is_speech(&tone(200.0, 0.3, 4096), &mut planner));
    }

    #[test]
    fn test_high_tone_rejected() {
        let mut gate = VoiceActivityGate::new(VadConfig::default(), 44_100.0);
        let mut planner = FftPlanner::new();
        assert!(!gate.is_speech(&tone(3000.0, 0.3, 1024), &mut planner));
        assert!(gate.last_dominant_hz() > 2500.0);
    }

    #[test]
    fn test_history_is_fifo_bounded() {
        let cfg = VadConfig {
            history_len: 3,
            ..VadConfig::default()
        };
        let mut gate = VoiceActivityGate::new(cfg, 44_100.0);
        let mut planner = FftPlanner::new();
        for _ in 0..7 {
            gate.is_speech(&tone(200.0, 0.1, 512), &mut planner);
        }
        assert_eq!(gate.history_len(), 3);
    }
}
