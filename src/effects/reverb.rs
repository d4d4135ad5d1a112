//! Convolution reverb with a decaying exponential impulse response.
//!
//! The response is `exp(-3 n / M)` with `M = room_size * sample_rate` taps and
//! the convolution is centred ("same" mode), so output sample `i` lines up with
//! tap `(M - 1) / 2`. The response is scaled to unit sum over all `M` taps, so
//! the wet level depends on the room and not on the frame length. Only the
//! stretch of the response a frame can actually reach is transformed, which
//! keeps the cost bounded by the frame length rather than the room size.

use rustfft::num_complex::Complex;

use crate::effects::EffectContext;

pub const DEFAULT_ROOM_SIZE: f32 = 0.8;

/// Fixed wet gain applied to the convolved signal.
pub const WET_GAIN: f32 = 0.6;

fn impulse(taps: usize, n: usize) -> f32 {
    (-3.0 * n as f32 / taps as f32).exp()
}

/// Sum of the whole response, as a geometric series.
fn impulse_sum(taps: usize) -> f32 {
    let r = (-3.0 / taps as f64).exp();
    let total = (1.0 - r.powi(taps as i32)) / (1.0 - r);
    (total as f32).max(1e-12)
}

/// `mix` of `None` returns the wet signal alone.
pub fn apply(
    x: &[f32],
    room_size: f32,
    mix: Option<f32>,
    ctx: &mut EffectContext,
) -> Vec<f32> {
    let len = x.len();
    if len == 0 {
        return Vec::new();
    }
    let taps = ((room_size.clamp(0.0, 1.0) * ctx.sample_rate).round() as usize).max(1);
    let centre = (taps - 1) / 2;

    // Response indices a frame of `len` samples can touch
    let lo = centre.saturating_sub(len - 1);
    let hi = (centre + len).min(taps);
    let segment: Vec<f32> = (lo..hi).map(|n| impulse(taps, n)).collect();

    let norm = impulse_sum(taps);

    let conv_len = len + segment.len() - 1;
    let size = conv_len.next_power_of_two();
    let fft = ctx.planner.plan_fft_forward(size);
    let ifft = ctx.planner.plan_fft_inverse(size);

    let mut a = vec![Complex::default(); size];
    let mut b = vec![Complex::default(); size];
    for (d, &v) in a.iter_mut().zip(x) {
        *d = Complex::new(v, 0.0);
    }
    for (d, &v) in b.iter_mut().zip(&segment) {
        *d = Complex::new(v, 0.0);
    }
    fft.process(&mut a);
    fft.process(&mut b);
    for (p, q) in a.iter_mut().zip(&b) {
        *p *= q;
    }
    ifft.process(&mut a);

    let scale = WET_GAIN / (size as f32 * norm);
    let offset = centre - lo;
    let wet = (0..len).map(|i| a.get(i + offset).map_or(0.0, |c| c.re * scale));

    match mix {
        None => wet.collect(),
        Some(m) => {
            let m = m.clamp(0.0, 1.0);
            x.iter().zip(wet).map(|(&d, w)| d * (1.0 - m) + w * m).collect()
        }
    }
}
