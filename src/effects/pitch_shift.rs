//! Pitch shift by a number of cents.
//!
//! Two strategies, picked once from configuration:
//! - `PhaseVocoder`: centred STFT inside the frame. Each bin's true frequency
//!   comes from its phase advance, bins are remapped by the pitch ratio and the
//!   synthesis phase is accumulated at the new frequency.
//! - `SpectralRoll`: one FFT over the whole frame, rotated by the bin offset
//!   that moves the dominant partial to its shifted position. Crude, but cheap
//!   and length preserving.

use rustfft::num_complex::Complex;
use std::f32::consts::PI;

use crate::config::PitchShiftMode;
use crate::dsp::spectral::Stft;
use crate::effects::EffectContext;

pub const DEFAULT_SHIFT_CENTS: f32 = 200.0;

const VOCODER_FFT: usize = 1024;
const VOCODER_OVERSAMPLING: usize = 4;

pub fn ratio_from_cents(cents: f32) -> f32 {
    2.0f32.powf(cents / 1200.0)
}

pub fn apply(x: &[f32], cents: f32, ctx: &mut EffectContext) -> Vec<f32> {
    if cents == 0.0 || x.len() < 2 {
        return x.to_vec();
    }
    match ctx.pitch_mode {
        PitchShiftMode::PhaseVocoder => phase_vocoder(x, ratio_from_cents(cents), ctx),
        PitchShiftMode::SpectralRoll => spectral_roll(x, cents, ctx),
    }
}

fn wrap_phase(p: f32) -> f32 {
    let two_pi = 2.0 * PI;
    p - two_pi * ((p + PI) / two_pi).floor()
}

fn phase_vocoder(x: &[f32], ratio: f32, ctx: &mut EffectContext) -> Vec<f32> {
    let hop = VOCODER_FFT / VOCODER_OVERSAMPLING;
    let mut stft = Stft::with_planner(&mut ctx.planner, VOCODER_FFT, hop);
    let bins = stft.bins();
    let analysis = stft.analyze(x);

    // Phase advance of bin k over one hop, in radians
    let expected = 2.0 * PI * hop as f32 / VOCODER_FFT as f32;

    let mut last_phase = vec![0.0f32; bins];
    let mut synth_phase = vec![0.0f32; bins];
    let mut mag = vec![0.0f32; bins];
    let mut freq = vec![0.0f32; bins];
    let mut out = Vec::with_capacity(analysis.len());

    for (t, spec) in analysis.iter().enumerate() {
        mag.fill(0.0);
        freq.fill(0.0);
        for (k, c) in spec.iter().enumerate() {
            let phase = c.arg();
            // True frequency in fractional bins
            let true_bin = if t == 0 {
                k as f32
            } else {
                let dev = wrap_phase(phase - last_phase[k] - k as f32 * expected);
                k as f32 + dev / expected
            };
            last_phase[k] = phase;

            let j = (k as f32 * ratio).round() as usize;
            if j < bins {
                mag[j] += c.norm();
                freq[j] = true_bin * ratio;
                if t == 0 {
                    synth_phase[j] = phase;
                }
            }
        }

        let frame: Vec<Complex<f32>> = (0..bins)
            .map(|j| {
                if t > 0 {
                    synth_phase[j] = wrap_phase(synth_phase[j] + freq[j] * expected);
                }
                Complex::from_polar(mag[j], synth_phase[j])
            })
            .collect();
        out.push(frame);
    }

    stft.synthesize(&out, x.len())
}

fn spectral_roll(x: &[f32], cents: f32, ctx: &mut EffectContext) -> Vec<f32> {
    let n = x.len();
    let fft = ctx.planner.plan_fft_forward(n);
    let ifft = ctx.planner.plan_fft_inverse(n);

    let mut buf: Vec<Complex<f32>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
    fft.process(&mut buf);

    let bins = n / 2 + 1;
    let dominant = (1..bins)
        .max_by(|&a, &b| buf[a].norm_sqr().total_cmp(&buf[b].norm_sqr()))
        .unwrap_or(1);

    let raw = (dominant as f32 * (ratio_from_cents(cents) - 1.0)).round() as isize;
    let offset = if raw == 0 { cents.signum() as isize } else { raw };

    // Rotate the one-sided spectrum; bins shifted in from outside are zero.
    let mut shifted = vec![Complex::default(); bins];
    for (k, s) in shifted.iter_mut().enumerate() {
        let src = k as isize - offset;
        if src >= 0 && (src as usize) < bins {
            *s = buf[src as usize];
        }
    }

    // Rebuild a conjugate-symmetric spectrum for a real result
    shifted[0] = Complex::new(shifted[0].re, 0.0);
    if n % 2 == 0 {
        let nyq = bins - 1;
        shifted[nyq] = Complex::new(shifted[nyq].re, 0.0);
    }
    for k in 0..n {
        buf[k] = if k < bins {
            shifted[k]
        } else {
            shifted[n - k].conj()
        };
    }
    ifft.process(&mut buf);

    let norm = 1.0 / n as f32;
    buf.iter().map(|c| c.re * norm).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(freq: f32, n: usize) -> Vec<f32> {
        (0..n)
            .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / 44_100.0).sin())
            .collect()
    }

    fn dominant_hz(x: &[f32]) -> f32 {
        let mut planner = rustfft::FftPlanner::new();
        let fft = planner.plan_fft_forward(x.len());
        let mut buf: Vec<Complex<f32>> = x.iter().map(|&v| Complex::new(v, 0.0)).collect();
        fft.process(&mut buf);
        let k = (1..x.len() / 2)
            .max_by(|&a, &b| buf[a].norm_sqr().total_cmp(&buf[b].norm_sqr()))
            .unwrap();
        k as f32 * 44_100.0 / x.len() as f32
    }

    #[test]
    fn test_vocoder_moves_tone_up_an_octave() {
        let mut ctx = EffectContext::new(44_100.0, PitchShiftMode::PhaseVocoder);
        let x = tone(440.0, 8192);
        let y = apply(&x, 1200.0, &mut ctx);
        assert_eq!(y.len(), x.len());
        let f = dominant_hz(&y[1024..7168]);
        assert!((f - 880.0).abs() < 30.0, "dominant {}", f);
    }

    #[test]
    fn test_roll_moves_dominant_partial() {
        let mut ctx = EffectContext::new(44_100.0, PitchShiftMode::SpectralRoll);
        let x = tone(441.0, 4410);
        let y = apply(&x, 1200.0, &mut ctx);
        assert_eq!(y.len(), x.len());
        assert!((dominant_hz(&y) - 882.0).abs() < 15.0);
    }

    #[test]
    fn test_small_shift_still_changes_output() {
        for mode in [PitchShiftMode::PhaseVocoder, PitchShiftMode::SpectralRoll] {
            let mut ctx = EffectContext::new(44_100.0, mode);
            let x = tone(440.0, 4410);
            let y = apply(&x, 100.0, &mut ctx);
            assert_eq!(y.len(), x.len());
            let diff: f32 = x.iter().zip(&y).map(|(a, b)| (a - b).abs()).sum::<f32>();
            assert!(diff / x.len() as f32 > 1e-3, "{:?}", mode);
        }
    }

    #[test]
    fn test_zero_shift_is_identity() {
        let mut ctx = EffectContext::new(44_100.0, PitchShiftMode::PhaseVocoder);
        let x = tone(440.0, 1024);
        assert_eq!(apply(&x, 0.0, &mut ctx), x);
    }
}
