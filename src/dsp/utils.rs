use std::f32::consts::PI;

pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t.clamp(0.0, 1.0)
}

pub fn db_to_gain(db: f32) -> f32 {
    (10.0f32).powf(db / 20.0)
}

pub fn frame_rms(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    (s / (x.len().max(1) as f32)).sqrt()
}

pub fn mean_square(x: &[f32]) -> f32 {
    let mut s = 0.0f32;
    for &v in x {
        s += v * v;
    }
    s / (x.len().max(1) as f32)
}

/// Fraction of adjacent sample pairs whose sign bit differs.
pub fn zero_crossing_rate(x: &[f32]) -> f32 {
    if x.len() < 2 {
        return 0.0;
    }
    let crossings = x
        .windows(2)
        .filter(|w| w[0].is_sign_negative() != w[1].is_sign_negative())
        .count();
    crossings as f32 / (x.len() - 1) as f32
}

/// Symmetric Hann window (both endpoints zero).
pub fn make_hann_window(size: usize) -> Vec<f32> {
    if size < 2 {
        return vec![1.0; size];
    }
    let denom = (size - 1) as f32;
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / denom).cos())
        .collect()
}

/// Periodic Hann window, the STFT convention.
pub fn make_periodic_hann_window(size: usize) -> Vec<f32> {
    (0..size)
        .map(|i| 0.5 - 0.5 * (2.0 * PI * i as f32 / size.max(1) as f32).cos())
        .collect()
}

/// Indices of strict local maxima (plateaus report their middle sample).
pub fn find_peaks(x: &[f32]) -> Vec<usize> {
    let mut peaks = Vec::new();
    let n = x.len();
    let mut i = 1;
    while i + 1 < n {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead + 1 < n && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                peaks.push((i + ahead - 1) / 2);
                i = ahead;
                continue;
            }
        }
        i += 1;
    }
    peaks
}

/// Autocorrelation-based F0 estimation.
/// Returns (periodicity 0..1, f0_hz); f0 is 0 when nothing periodic is found.
pub fn estimate_f0_autocorr(
    frame: &[f32],
    sample_rate: f32,
    f0_min: f32,
    f0_max: f32,
) -> (f32, f32) {
    let n = frame.len();
    if n < 64 || f0_min <= 0.0 || f0_max <= f0_min {
        return (0.0, 0.0);
    }

    let mean = frame.iter().sum::<f32>() / n as f32;
    let x: Vec<f32> = frame.iter().map(|v| v - mean).collect();

    // Energy gate
    if mean_square(&x) < 1e-9 {
        return (0.0, 0.0);
    }

    let lag_min = ((sample_rate / f0_max).floor() as usize).clamp(2, n / 2);
    let lag_max = ((sample_rate / f0_min).ceil() as usize)
        .min(n / 2)
        .max(lag_min + 1);

    let mut corr = vec![0.0f32; lag_max + 2];
    for lag in lag_min.saturating_sub(1)..=(lag_max + 1).min(n - 1) {
        let mut s = 0.0f32;
        let mut e1 = 0.0f32;
        let mut e2 = 0.0f32;
        for i in 0..(n - lag) {
            let a = x[i];
            let b = x[i + lag];
            s += a * b;
            e1 += a * a;
            e2 += b * b;
        }
        corr[lag] = (s / (e1 * e2).sqrt().max(1e-12)).clamp(-1.0, 1.0);
    }

    let best = corr[lag_min..=lag_max]
        .iter()
        .copied()
        .fold(0.0f32, f32::max);
    if best <= 0.0 {
        return (0.0, 0.0);
    }

    // Earliest local maximum close to the global one, so period multiples lose.
    let best_lag = (lag_min..=lag_max)
        .find(|&lag| {
            corr[lag] >= 0.9 * best && corr[lag] >= corr[lag - 1] && corr[lag] >= corr[lag + 1]
        })
        .unwrap_or(lag_min);

    // Parabolic refinement around the best lag
    let (ym, y0, yp) = (corr[best_lag - 1], corr[best_lag], corr[best_lag + 1]);
    let denom = ym - 2.0 * y0 + yp;
    let shift = if denom.abs() > 1e-12 {
        (0.5 * (ym - yp) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    (corr[best_lag].clamp(0.0, 1.0), sample_rate / (best_lag as f32 + shift))
}
