//! Spectral analysis primitives
//!
//! Averaged periodograms (Welch density and spectrogram power) and a
//! centred STFT / inverse STFT pair.
//!
//! # Design Notes
//! - FFT plans come from a caller-owned `FftPlanner`, which caches plans by
//!   size. Frames of a new length cost one plan, then hit the cache.
//! - Segments are mean-detrended before windowing.
//! - One-sided spectra double every bin except DC and (for even sizes) Nyquist.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::dsp::utils::make_periodic_hann_window;

/// Default Welch segment length.
pub const WELCH_SEGMENT: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scaling {
    /// Power spectral density, units²/Hz.
    Density,
    /// Power spectrum, units².
    Spectrum,
}

/// One-sided averaged periodogram with 50% overlapping Hann segments.
/// Returns `(frequencies_hz, values)`; both are empty for an empty input.
pub fn averaged_periodogram(
    planner: &mut FftPlanner<f32>,
    x: &[f32],
    nperseg: usize,
    sample_rate: f32,
    scaling: Scaling,
) -> (Vec<f32>, Vec<f32>) {
    if x.is_empty() || nperseg == 0 {
        return (Vec::new(), Vec::new());
    }
    let nperseg = nperseg.min(x.len());
    let hop = (nperseg - nperseg / 2).max(1);
    let bins = nperseg / 2 + 1;
    let window = make_periodic_hann_window(nperseg);
    let fft = planner.plan_fft_forward(nperseg);

    let scale = match scaling {
        Scaling::Density => {
            let wss: f32 = window.iter().map(|w| w * w).sum();
            1.0 / (sample_rate * wss).max(1e-20)
        }
        Scaling::Spectrum => {
            let ws: f32 = window.iter().sum();
            1.0 / (ws * ws).max(1e-20)
        }
    };

    let mut acc = vec![0.0f32; bins];
    let mut buf = vec![Complex::default(); nperseg];
    let mut segments = 0usize;
    let mut start = 0usize;
    while start + nperseg <= x.len() {
        let seg = &x[start..start + nperseg];
        let mean = seg.iter().sum::<f32>() / nperseg as f32;
        for (i, c) in buf.iter_mut().enumerate() {
            *c = Complex::new((seg[i] - mean) * window[i], 0.0);
        }
        fft.process(&mut buf);
        for (k, a) in acc.iter_mut().enumerate() {
            *a += buf[k].norm_sqr();
        }
        segments += 1;
        start += hop;
    }

    let nyquist_bin = if nperseg % 2 == 0 { Some(bins - 1) } else { None };
    let norm = scale / segments.max(1) as f32;
    for (k, a) in acc.iter_mut().enumerate() {
        *a *= norm;
        if k != 0 && Some(k) != nyquist_bin {
            *a *= 2.0;
        }
    }

    let df = sample_rate / nperseg as f32;
    let freqs = (0..bins).map(|k| k as f32 * df).collect();
    (freqs, acc)
}

/// Welch PSD with the default segment length.
pub fn welch_psd(
    planner: &mut FftPlanner<f32>,
    x: &[f32],
    sample_rate: f32,
) -> (Vec<f32>, Vec<f32>) {
    averaged_periodogram(planner, x, WELCH_SEGMENT, sample_rate, Scaling::Density)
}

/// Frequency of the strongest Welch bin (0 for empty or silent input).
pub fn dominant_frequency(freqs: &[f32], psd: &[f32]) -> f32 {
    let mut best = 0usize;
    for (k, &p) in psd.iter().enumerate() {
        if p > psd[best] {
            best = k;
        }
    }
    freqs.get(best).copied().unwrap_or(0.0)
}

pub fn spectral_centroid(freqs: &[f32], psd: &[f32]) -> f32 {
    let total: f32 = psd.iter().sum();
    if total <= 1e-20 {
        return 0.0;
    }
    freqs.iter().zip(psd).map(|(f, p)| f * p).sum::<f32>() / total
}

// =============================================================================
// STFT
// =============================================================================

/// Centred STFT with zero padding of `n_fft / 2` on each side.
pub struct Stft {
    n_fft: usize,
    hop: usize,
    window: Vec<f32>,
    fft: Arc<dyn Fft<f32>>,
    ifft: Arc<dyn Fft<f32>>,
    scratch: Vec<Complex<f32>>,
}

impl Stft {
    pub fn new(n_fft: usize, hop: usize) -> Self {
        Self::with_planner(&mut FftPlanner::new(), n_fft, hop)
    }

    pub fn with_planner(planner: &mut FftPlanner<f32>, n_fft: usize, hop: usize) -> Self {
        let fft = planner.plan_fft_forward(n_fft);
        let ifft = planner.plan_fft_inverse(n_fft);
        let scratch_len = fft
            .get_inplace_scratch_len()
            .max(ifft.get_inplace_scratch_len());
        Self {
            n_fft,
            hop: hop.max(1),
            window: make_periodic_hann_window(n_fft),
            fft,
            ifft,
            scratch: vec![Complex::default(); scratch_len],
        }
    }

    pub fn bins(&self) -> usize {
        self.n_fft / 2 + 1
    }

    fn frame_count(&self, len: usize) -> usize {
        let padded = len + 2 * (self.n_fft / 2);
        if padded < self.n_fft {
            return 0;
        }
        1 + (padded - self.n_fft) / self.hop
    }

    /// One-sided spectra, one vector of `bins()` per analysis frame.
    pub fn analyze(&mut self, x: &[f32]) -> Vec<Vec<Complex<f32>>> {
        let pad = self.n_fft / 2;
        let frames = self.frame_count(x.len());
        let mut out = Vec::with_capacity(frames);
        let mut buf = vec![Complex::default(); self.n_fft];
        for f in 0..frames {
            let origin = f * self.hop;
            for (i, c) in buf.iter_mut().enumerate() {
                // Position in the unpadded signal
                let s = (origin + i)
                    .checked_sub(pad)
                    .and_then(|p| x.get(p))
                    .copied()
                    .unwrap_or(0.0);
                *c = Complex::new(s * self.window[i], 0.0);
            }
            self.fft.process_with_scratch(&mut buf, &mut self.scratch);
            out.push(buf[..self.bins()].to_vec());
        }
        out
    }

    /// Weighted overlap-add back to `len` samples.
    pub fn synthesize(&mut self, spectra: &[Vec<Complex<f32>>], len: usize) -> Vec<f32> {
        let pad = self.n_fft / 2;
        let bins = self.bins();
        let total = self.n_fft + self.hop * spectra.len().saturating_sub(1);
        let mut acc = vec![0.0f32; total];
        let mut wsum = vec![0.0f32; total];
        let mut buf = vec![Complex::default(); self.n_fft];
        let norm = 1.0 / self.n_fft as f32;

        for (f, spec) in spectra.iter().enumerate() {
            for (k, c) in buf.iter_mut().enumerate() {
                *c = if k < bins {
                    spec.get(k).copied().unwrap_or_default()
                } else {
                    // Conjugate symmetry for a real output
                    spec.get(self.n_fft - k).copied().unwrap_or_default().conj()
                };
            }
            self.ifft.process_with_scratch(&mut buf, &mut self.scratch);
            let origin = f * self.hop;
            for i in 0..self.n_fft {
                let w = self.window[i];
                acc[origin + i] += buf[i].re * norm * w;
                wsum[origin + i] += w * w;
            }
        }

        let mut out = vec![0.0f32; len];
        for (i, o) in out.iter_mut().enumerate() {
            let j = i + pad;
            if j < total && wsum[j] > 1e-8 {
                *o = acc[j] / wsum[j];
            }
        }
        out
    }
}
