//! PCM frame type and byte codec.
//!
//! Frames travel through the pipeline as owned 16-bit sample vectors. Stages
//! work on normalized f32 internally and convert back with clipping, never
//! wrapping.

use serde::{Deserialize, Serialize};

/// Full-scale value used for normalization.
pub const FULL_SCALE: f32 = i16::MAX as f32;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Frame {
    samples: Vec<i16>,
}

impl Frame {
    pub fn new(samples: Vec<i16>) -> Self {
        Self { samples }
    }

    pub fn silence(len: usize) -> Self {
        Self {
            samples: vec![0; len],
        }
    }

    /// Decode little-endian signed 16-bit PCM. A trailing odd byte is ignored.
    pub fn from_le_bytes(bytes: &[u8]) -> Self {
        let samples = bytes
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        Self { samples }
    }

    pub fn to_le_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.samples.len() * 2);
        for s in &self.samples {
            out.extend_from_slice(&s.to_le_bytes());
        }
        out
    }

    /// Build a frame from normalized samples (1.0 == full scale).
    pub fn from_normalized(x: &[f32]) -> Self {
        Self {
            samples: x.iter().map(|&v| to_i16(v * FULL_SCALE)).collect(),
        }
    }

    pub fn to_normalized(&self) -> Vec<f32> {
        self.samples.iter().map(|&s| s as f32 / FULL_SCALE).collect()
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Truncate or zero-pad to exactly `len` samples.
    pub fn fit_length(mut self, len: usize) -> Self {
        self.samples.resize(len, 0);
        self
    }

    pub fn mean_abs_diff(&self, other: &Frame) -> f32 {
        let n = self.len().min(other.len());
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = self
            .samples
            .iter()
            .zip(other.samples.iter())
            .map(|(&a, &b)| (a as f64 - b as f64).abs())
            .sum();
        (sum / n as f64) as f32
    }
}

impl From<Vec<i16>> for Frame {
    fn from(samples: Vec<i16>) -> Self {
        Self::new(samples)
    }
}

/// Round and clip a value in 16-bit amplitude units.
#[inline]
pub fn to_i16(v: f32) -> i16 {
    if !v.is_finite() {
        return 0;
    }
    v.round().clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

/// Resize a buffer to `len`, zero padding at the tail.
pub fn fit_len(mut x: Vec<f32>, len: usize) -> Vec<f32> {
    x.resize(len, 0.0);
    x
}
