//! Ring modulation against a unit sine carrier.

use std::f32::consts::PI;

pub const DEFAULT_FREQUENCY_HZ: f32 = 50.0;

pub fn apply(x: &[f32], frequency_hz: f32, sample_rate: f32) -> Vec<f32> {
    let w = 2.0 * PI * frequency_hz / sample_rate.max(1.0);
    x.iter()
        .enumerate()
        .map(|(n, &v)| (v * (w * n as f32).sin()).clamp(-1.0, 1.0))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_at_zero_phase() {
        let y = apply(&[1.0; 4], 50.0, 44_100.0);
        assert_eq!(y[0], 0.0);
        assert!(y[1] > 0.0);
    }

    #[test]
    fn test_carrier_bounded() {
        let y = apply(&[1.0; 2000], 50.0, 44_100.0);
        assert!(y.iter().all(|v| v.abs() <= 1.0));
        let peak = y.iter().cloned().fold(0.0f32, f32::max);
        assert!(peak > 0.99);
    }
}
