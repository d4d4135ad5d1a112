//! Three-band zero-phase equalizer with crossovers at 200 Hz and 2 kHz.

use crate::dsp::biquad::{filtfilt_cascade, Biquad, BUTTERWORTH_Q};

pub const LOW_CROSSOVER_HZ: f32 = 200.0;
pub const HIGH_CROSSOVER_HZ: f32 = 2000.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BandGains {
    pub low: f32,
    pub mid: f32,
    pub high: f32,
}

pub fn apply(x: &[f32], gains: BandGains, sample_rate: f32) -> Vec<f32> {
    let low = filtfilt_cascade(
        &[Biquad::lowpass(LOW_CROSSOVER_HZ, BUTTERWORTH_Q, sample_rate)],
        x,
    );
    let mid = filtfilt_cascade(
        &[
            Biquad::highpass(LOW_CROSSOVER_HZ, BUTTERWORTH_Q, sample_rate),
            Biquad::lowpass(HIGH_CROSSOVER_HZ, BUTTERWORTH_Q, sample_rate),
        ],
        x,
    );
    let high = filtfilt_cascade(
        &[Biquad::highpass(HIGH_CROSSOVER_HZ, BUTTERWORTH_Q, sample_rate)],
        x,
    );

    low.iter()
        .zip(&mid)
        .zip(&high)
        .map(|((l, m), h)| l * gains.low + m * gains.mid + h * gains.high)
        .collect()
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

    fn rms(x: &[f32]) -> f32 {
        (x.iter().map(|v| v * v).sum::<f32>() / x.len() as f32).sqrt()
    }

    #[test]
    fn test_high_gain_only_touches_highs() {
        let gains = BandGains {
            low: 1.0,
            mid: 1.0,
            high: 0.0,
        };
        let lo = tone(60.0, 4096);
        let hi = tone(10_000.0, 4096);
        let ylo = apply(&lo, gains, 44_100.0);
        let yhi = apply(&hi, gains, 44_100.0);
        assert!(rms(&ylo[512..3584]) > 0.8 * rms(&lo[512..3584]));
        assert!(rms(&yhi[512..3584]) < 0.1 * rms(&hi[512..3584]));
    }

    #[test]
    fn test_flat_gains_leave_frame_edges_intact() {
        let flat = BandGains {
            low: 1.0,
            mid: 1.0,
            high: 1.0,
        };
        let x = tone(440.0, 1024);
        let y = apply(&x, flat, 44_100.0);
        let err = |r: std::ops::Range<usize>| {
            x[r.clone()]
                .iter()
                .zip(&y[r])
                .map(|(a, b)| (a - b).abs())
                .fold(0.0f32, f32::max)
        };
        assert!(err(896..1024) < 0.01, "tail err {}", err(896..1024));
        assert!(err(0..128) < 0.01, "head err {}", err(0..128));
    }

    #[test]
    fn test_zero_gains_silence() {
        let gains = BandGains {
            low: 0.0,
            mid: 0.0,
            high: 0.0,
        };
        assert!(apply(&tone(440.0, 512), gains, 44_100.0)
            .iter()
            .all(|v| *v == 0.0));
    }
}
