//! Engine configuration.
//!
//! Every field has a default so a partial JSON document (or none at all) yields
//! a usable configuration. Validation runs once at pipeline construction.

use crate::error::{EngineError, EngineResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

// =============================================================================
// DEFAULTS
// =============================================================================

pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

// Normalized RMS a frame must exceed before heavy processing runs.
// Increasing: quiet speech passes through untouched; decreasing: room tone gets processed.
const DEFAULT_RMS_FLOOR: f32 = 0.01;

/// Which pitch-shift algorithm the chain uses. Chosen once, at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PitchShiftMode {
    /// Short-time phase vocoder inside the frame.
    #[default]
    PhaseVocoder,
    /// Whole-frame FFT bin rotation.
    SpectralRoll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VadConfig {
    pub enabled: bool,
    /// Multiplier on the mean history energy.
    pub energy_threshold: f32,
    pub history_len: usize,
    pub band_low_hz: f32,
    pub band_high_hz: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            energy_threshold: 0.1,
            history_len: 10,
            band_low_hz: 50.0,
            band_high_hz: 400.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TonalConfig {
    pub enabled: bool,
    /// 0..1, scales the 5 kHz high shelf.
    pub clarity: f32,
    /// 0..1, scales the 200 Hz low shelf.
    pub warmth: f32,
}

impl Default for TonalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clarity: 0.5,
            warmth: 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NoiseConfig {
    pub fft_size: usize,
    pub hop: usize,
}

impl Default for NoiseConfig {
    fn default() -> Self {
        Self {
            fft_size: 2048,
            hop: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub sample_rate: u32,
    pub chunk_size: usize,
    pub channels: u16,
    pub rms_floor: f32,
    pub vad: VadConfig,
    pub noise: NoiseConfig,
    pub tonal: TonalConfig,
    pub pitch_shift_mode: PitchShiftMode,
    pub enhancement_enabled: bool,
    pub adapt_effects: bool,
    pub automation_tick_hz: f32,
    /// Frames buffered between the callback and the recording worker.
    pub recording_queue_frames: usize,
    pub stats_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            chunk_size: DEFAULT_CHUNK_SIZE,
            channels: 1,
            rms_floor: DEFAULT_RMS_FLOOR,
            vad: VadConfig::default(),
            noise: NoiseConfig::default(),
            tonal: TonalConfig::default(),
            pitch_shift_mode: PitchShiftMode::default(),
            enhancement_enabled: false,
            adapt_effects: true,
            automation_tick_hz: 60.0,
            recording_queue_frames: 64,
            stats_path: Some(PathBuf::from("performance_stats.json")),
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(s: &str) -> EngineResult<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> EngineResult<()> {
        if self.sample_rate == 0 {
            return Err(EngineError::InvalidConfig("sample_rate must be > 0".into()));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::InvalidConfig("chunk_size must be > 0".into()));
        }
        if self.channels != 1 {
            return Err(EngineError::InvalidConfig(format!(
                "only mono streams are supported (got {} channels)",
                self.channels
            )));
        }
        if self.noise.fft_size < 2 || self.noise.hop == 0 || self.noise.hop > self.noise.fft_size
        {
            return Err(EngineError::InvalidConfig(format!(
                "noise hop {} must be within 1..={}",
                self.noise.hop, self.noise.fft_size
            )));
        }
        if self.vad.history_len == 0 || self.vad.band_low_hz >= self.vad.band_high_hz {
            return Err(EngineError::InvalidConfig(
                "vad band must be increasing and history non-empty".into(),
            ));
        }
        if !(self.automation_tick_hz > 0.0) {
            return Err(EngineError::InvalidConfig(
                "automation_tick_hz must be positive".into(),
            ));
        }
        if self.recording_queue_frames == 0 {
            return Err(EngineError::InvalidConfig(
                "recording_queue_frames must be > 0".into(),
            ));
        }
        Ok(())
    }

    /// Real-time budget of a single frame in seconds.
    pub fn frame_budget_secs(&self) -> f32 {
        self.chunk_size as f32 / self.sample_rate as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg =
            EngineConfig::from_json_str(r#"{"chunk_size": 512, "vad": {"enabled": false}}"#)
                .unwrap();
        assert_eq!(cfg.chunk_size, 512);
        assert_eq!(cfg.sample_rate, 44_100);
        assert!(!cfg.vad.enabled);
        assert_eq!(cfg.vad.history_len, 10);
        assert_eq!(cfg.pitch_shift_mode, PitchShiftMode::PhaseVocoder);
    }

    #[test]
    fn test_pitch_mode_names() {
        let cfg = EngineConfig::from_json_str(r#"{"pitch_shift_mode": "spectral_roll"}"#)
            .unwrap();
        assert_eq!(cfg.pitch_shift_mode, PitchShiftMode::SpectralRoll);
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(EngineConfig::from_json_str(r#"{"chunk_size": 0}"#).is_err());
        assert!(EngineConfig::from_json_str(r#"{"channels": 2}"#).is_err());
        assert!(
            EngineConfig::from_json_str(r#"{"noise": {"fft_size": 256, "hop": 512}}"#).is_err()
        );
        assert!(EngineConfig::from_json_str(
            r#"{"vad": {"band_low_hz": 400, "band_high_hz": 50}}"#
        )
        .is_err());
    }

    #[test]
    fn test_frame_budget() {
        let cfg = EngineConfig::default();
        let b = cfg.frame_budget_secs();
        assert!(b > 0.023 && b < 0.024);
    }
}
