//! Tonal Enhancer
//!
//! Fixed post-process after the effects chain: a 5 kHz high shelf for clarity
//! and a 200 Hz low shelf for warmth. Settings are shared atomics so the control
//! plane can move them without touching the callback's filter state.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::TonalConfig;
use crate::dsp::biquad::{Biquad, BUTTERWORTH_Q};

const CLARITY_HZ: f32 = 5000.0;
const WARMTH_HZ: f32 = 200.0;

// Shelf gain at setting 1.0.
// Increasing: more obvious colouring; decreasing: subtler.
const MAX_SHELF_DB: f32 = 6.0;

pub struct TonalSettings {
    enabled: AtomicBool,
    clarity: AtomicU32,
    warmth: AtomicU32,
}

impl TonalSettings {
    pub fn new(cfg: &TonalConfig) -> Self {
        let s = Self {
            enabled: AtomicBool::new(cfg.enabled),
            clarity: AtomicU32::new(0),
            warmth: AtomicU32::new(0),
        };
        s.set(cfg.clarity, cfg.warmth);
        s
    }

    /// Both values are clamped to 0..1.
    pub fn set(&self, clarity: f32, warmth: f32) {
        self.clarity
            .store(sanitize(clarity).to_bits(), Ordering::Relaxed);
        self.warmth.store(sanitize(warmth).to_bits(), Ordering::Relaxed);
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn clarity(&self) -> f32 {
        f32::from_bits(self.clarity.load(Ordering::Relaxed))
    }

    pub fn warmth(&self) -> f32 {
        f32::from_bits(self.warmth.load(Ordering::Relaxed))
    }
}

fn sanitize(v: f32) -> f32 {
    if v.is_finite() {
        v.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

pub struct TonalEnhancer {
    sample_rate: f32,
    settings: Arc<TonalSettings>,
    high_shelf: Biquad,
    low_shelf: Biquad,
    applied: Option<(f32, f32)>,
}

impl TonalEnhancer {
    pub fn new(sample_rate: f32, settings: Arc<TonalSettings>) -> Self {
        Self {
            sample_rate,
            settings,
            high_shelf: Biquad::new(),
            low_shelf: Biquad::new(),
            applied: None,
        }
    }

    fn refresh(&mut self) {
        let wanted = (self.settings.clarity(), self.settings.warmth());
        if self.applied == Some(wanted) {
            return;
        }
        let (clarity, warmth) = wanted;
        self.high_shelf.update_high_shelf(
            CLARITY_HZ,
            BUTTERWORTH_Q,
            MAX_SHELF_DB * clarity,
            self.sample_rate,
        );
        self.low_shelf.update_low_shelf(
            WARMTH_HZ,
            BUTTERWORTH_Q,
            MAX_SHELF_DB * warmth,
            self.sample_rate,
        );
        self.applied = Some(wanted);
    }

    /// In-place on normalized samples; length is untouched.
    pub fn process(&mut self, x: &mut [f32]) {
        if !self.settings.enabled() {
            return;
        }
        self.refresh();
        self.high_shelf.process_block(x);
        self.low_shelf.process_block(x);
    }

    pub fn reset(&mut self) {
        self.high_shelf.reset();
        self.low_shelf.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    fn tone(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.25 * (2.0 * PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_zero_settings_are_transparent() {
        let settings = Arc::new(TonalSettings::new(&TonalConfig {
            enabled: true,
            clarity: 0.0,
            warmth: 0.0,
        }));
        let mut t = TonalEnhancer::new(44_100.0, settings);
        let x = tone(1000.0, 1024);
        let mut y = x.clone();
        t.process(&mut y);
        for (a, b) in x.iter().zip(&y) {
            assert!((a - b).abs() < 1e-5);
        }
    }

    #[test]
    fn test_clarity_lifts_highs() {
        let settings = Arc::new(TonalSettings::new(&TonalConfig::default()));
        let mut t = TonalEnhancer::new(44_100.0, settings.clone());
        let mut hi = tone(12_000.0, 4096);
        let before = rms(&hi[2048..]);
        t.process(&mut hi);
        let gain_db = 20.0 * (rms(&hi[2048..]) / before).log10();
        // clarity 0.5 -> ~3 dB
        assert!(gain_db > 2.0 && gain_db < 4.0, "gain {}", gain_db);
    }

    #[test]
    fn test_settings_clamped_and_live() {
        let settings = Arc::new(TonalSettings::new(&TonalConfig::default()));
        settings.set(3.0, f32::NAN);
        assert_eq!(settings.clarity(), 1.0);
        assert_eq!(settings.warmth(), 0.0);
        settings.set_enabled(false);
        let mut t = TonalEnhancer::new(44_100.0, settings);
        let x = tone(100.0, 256);
        let mut y = x.clone();
        t.process(&mut y);
        assert_eq!(x, y);
    }
}
