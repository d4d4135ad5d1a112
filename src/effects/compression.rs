//! Hard-knee, zero-attack compressor on individual samples.

pub const DEFAULT_THRESHOLD: f32 = 0.5;
pub const DEFAULT_RATIO: f32 = 4.0;

/// `|x| > threshold` maps to `threshold + (|x| - threshold) / ratio`, sign kept.
pub fn apply(x: &[f32], threshold: f32, ratio: f32) -> Vec<f32> {
    let t = threshold.clamp(0.0, 1.0);
    let r = ratio.max(1.0);
    x.iter()
        .map(|&v| {
            let a = v.abs();
            if a > t {
                (t + (a - t) / r).copysign(v)
            } else {
                v
            }
        })
        .collect()
}
