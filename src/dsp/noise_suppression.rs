//! Noise Suppression (static spectral subtraction)
//!
//! Removes a calibrated, stationary noise fingerprint from every frame.
//!
//! # Purpose
//! - Calibration is explicit: a noise-only sample is turned into a mean
//!   magnitude spectrum (`NoiseProfile`) off the callback thread.
//! - Processing subtracts that profile from each STFT magnitude, floors at zero,
//!   keeps the phase untouched and overlap-adds back to the input length.
//! - Until a profile exists, processing is the identity.
//!
//! # Design Notes
//! - The profile lives in a `ProfileSlot` shared with the control plane.
//!   The callback only `try_lock`s the slot to clone an `Arc`; when the slot is
//!   contended it keeps using the profile it saw last.
//! - Re-calibration replaces the profile wholesale. There is no way back to
//!   the uncalibrated state.

use rustfft::num_complex::Complex;
use std::sync::{Arc, Mutex};

use crate::error::{EngineError, EngineResult};
use crate::dsp::spectral::Stft;

#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    n_fft: usize,
    magnitudes: Vec<f32>,
}

impl NoiseProfile {
    /// Mean STFT magnitude per bin over a noise-only sample (normalized samples).
    pub fn from_sample(sample: &[f32], n_fft: usize, hop: usize) -> EngineResult<Self> {
        if sample.is_empty() {
            return Err(EngineError::InvalidConfig(
                "noise calibration sample is empty".into(),
            ));
        }
        let mut stft = Stft::new(n_fft, hop);
        let spectra = stft.analyze(sample);
        let mut magnitudes = vec![0.0f32; stft.bins()];
        for spec in &spectra {
            for (m, c) in magnitudes.iter_mut().zip(spec) {
                *m += c.norm();
            }
        }
        let inv = 1.0 / spectra.len().max(1) as f32;
        for m in &mut magnitudes {
            *m *= inv;
        }
        Ok(Self { n_fft, magnitudes })
    }

    pub fn magnitudes(&self) -> &[f32] {
        &self.magnitudes
    }

    pub fn n_fft(&self) -> usize {
        self.n_fft
    }
}

/// Shared home of the current noise profile.
#[derive(Clone, Default)]
pub struct ProfileSlot {
    inner: Arc<Mutex<Option<Arc<NoiseProfile>>>>,
}

impl ProfileSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn install(&self, profile: NoiseProfile) {
        let mut slot = match self.inner.lock() {
            Ok(s) => s,
            Err(poisoned) => poisoned.into_inner(),
        };
        *slot = Some(Arc::new(profile));
    }

    /// Build a profile from a noise-only sample (normalized) and install it.
    pub fn calibrate(&self, sample: &[f32], n_fft: usize, hop: usize) -> EngineResult<()> {
        let profile = NoiseProfile::from_sample(sample, n_fft, hop)?;
        self.install(profile);
        log::info!("noise profile calibrated from {} samples", sample.len());
        Ok(())
    }

    pub fn is_calibrated(&self) -> bool {
        match self.inner.lock() {
            Ok(s) => s.is_some(),
            Err(poisoned) => poisoned.into_inner().is_some(),
        }
    }

    /// Non-blocking read. `None` means contended, not uncalibrated.
    fn try_snapshot(&self) -> Option<Option<Arc<NoiseProfile>>> {
        self.inner.try_lock().ok().map(|s| s.clone())
    }
}

pub struct NoiseSuppressor {
    stft: Stft,
    n_fft: usize,
    hop: usize,
    slot: ProfileSlot,
    current: Option<Arc<NoiseProfile>>,
}

impl NoiseSuppressor {
    pub fn new(n_fft: usize, hop: usize, slot: ProfileSlot) -> Self {
        Self {
            stft: Stft::new(n_fft, hop),
            n_fft,
            hop,
            slot,
            current: None,
        }
    }

    pub fn slot(&self) -> &ProfileSlot {
        &self.slot
    }

    /// Compute a profile from a noise-only sample and install it.
    pub fn calibrate(&self, sample: &[f32]) -> EngineResult<()> {
        self.slot.calibrate(sample, self.n_fft, self.hop)
    }

    pub fn is_calibrated(&self) -> bool {
        self.current.is_some() || self.slot.is_calibrated()
    }

    /// Process normalized samples; the output always has the input's length.
    pub fn process(&mut self, x: &[f32]) -> EngineResult<Vec<f32>> {
        if let Some(latest) = self.slot.try_snapshot() {
            self.current = latest;
        }
        let Some(profile) = self.current.clone() else {
            return Ok(x.to_vec());
        };
        if profile.magnitudes.len() != self.stft.bins() {
            return Err(EngineError::stage(
                "noise_suppression",
                format!(
                    "profile has {} bins, expected {}",
                    profile.magnitudes.len(),
                    self.stft.bins()
                ),
            ));
        }

        let mut spectra = self.stft.analyze(x);
        for spec in &mut spectra {
            for (c, &noise) in spec.iter_mut().zip(&profile.magnitudes) {
                let mag = c.norm();
                let cleaned = (mag - noise).max(0.0);
                *c = if mag > 1e-20 {
                    *c * (cleaned / mag)
                } else {
                    Complex::default()
                };
            }
        }
        Ok(self.stft.synthesize(&spectra, x.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    // Deterministic white-ish noise (LCG)
    fn noise(n: usize, amp: f32, seed: u32) -> Vec<f32> {
        let mut s = seed;
        (0..n)
            .map(|_| {
                s = s.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
                amp * ((s >> 8) as f32 / (1u32 << 24) as f32 * 2.0 - 1.0)
            })
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_uncalibrated_is_identity() {
        let mut ns = NoiseSuppressor::new(2048, 512, ProfileSlot::new());
        let x = noise(1024, 0.3, 7);
        assert!(!ns.is_calibrated());
        assert_eq!(ns.process(&x).unwrap(), x);
    }

    #[test]
    fn test_preserves_length() {
        let ns_slot = ProfileSlot::new();
        let mut ns = NoiseSuppressor::new(2048, 512, ns_slot);
        ns.calibrate(&noise(44_100, 0.05, 3)).unwrap();
        for len in [1usize, 100, 1000, 1024, 3000] {
            assert_eq!(ns.process(&noise(len, 0.2, 11)).unwrap().len(), len);
        }
    }

    #[test]
    fn test_reduces_calibrated_noise() {
        let mut ns = NoiseSuppressor::new(2048, 512, ProfileSlot::new());
        ns.calibrate(&noise(44_100, 0.05, 3)).unwrap();
        assert!(ns.is_calibrated());
        let x = noise(4096, 0.05, 99);
        let y = ns.process(&x).unwrap();
        assert!(rms(&y) < 0.6 * rms(&x), "{} vs {}", rms(&y), rms(&x));
    }

    #[test]
    fn test_keeps_strong_tone() {
        let mut ns = NoiseSuppressor::new(2048, 512, ProfileSlot::new());
        ns.calibrate(&noise(44_100, 0.01, 3)).unwrap();
        let x: Vec<f32> = (0..4096)
            .map(|i| 0.5 * (2.0 * PI * 440.0 * i as f32 / 44_100.0).sin())
            .collect();
        let y = ns.process(&x).unwrap();
        assert!(rms(&y) > 0.8 * rms(&x));
    }

    #[test]
    fn test_slot_calibration_reaches_suppressor() {
        let slot = ProfileSlot::new();
        let mut ns = NoiseSuppressor::new(2048, 512, slot.clone());
        slot.calibrate(&noise(44_100, 0.05, 3), 2048, 512).unwrap();
        assert!(ns.is_calibrated());
        let x = noise(4096, 0.05, 99);
        assert!(rms(&ns.process(&x).unwrap()) < 0.6 * rms(&x));
    }

    #[test]
    fn test_empty_calibration_rejected() {
        let ns = NoiseSuppressor::new(2048, 512, ProfileSlot::new());
        assert!(ns.calibrate(&[]).is_err());
        assert!(!ns.is_calibrated());
    }
}
