//! Lock-free meters shared between the callback thread and the control plane.
//!
//! Floats are stored as their bit patterns in `AtomicU32` so the callback can
//! publish levels without taking a lock.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Default)]
pub struct Meters {
    input_rms: AtomicU32,
    output_peak: AtomicU32,
    output_loudness_lufs: AtomicU32,
    latency_avg_ms: AtomicU32,
    voice_active: AtomicBool,
    frames_processed: AtomicU64,
    stage_failures: AtomicU64,
    critical_failures: AtomicU64,
    recording_dropped: AtomicU64,
}

impl Meters {
    pub fn new() -> Self {
        let m = Self::default();
        m.set_output_loudness_lufs(f32::NEG_INFINITY);
        m
    }

    pub fn set_input_rms(&self, val: f32) {
        self.input_rms.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_peak(&self, val: f32) {
        self.output_peak.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_output_loudness_lufs(&self, val: f32) {
        self.output_loudness_lufs
            .store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_latency_avg_ms(&self, val: f32) {
        self.latency_avg_ms.store(val.to_bits(), Ordering::Relaxed);
    }

    pub fn set_voice_active(&self, active: bool) {
        self.voice_active.store(active, Ordering::Relaxed);
    }

    pub fn inc_frames(&self) {
        self.frames_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stage_failures(&self) {
        self.stage_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the new total.
    pub fn inc_critical_failures(&self) -> u64 {
        self.critical_failures.fetch_add(1, Ordering::Relaxed) + 1
    }

    pub fn inc_recording_dropped(&self) {
        self.recording_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_input_rms(&self) -> f32 {
        f32::from_bits(self.input_rms.load(Ordering::Relaxed))
    }

    pub fn get_output_peak(&self) -> f32 {
        f32::from_bits(self.output_peak.load(Ordering::Relaxed))
    }

    pub fn get_output_loudness_lufs(&self) -> f32 {
        f32::from_bits(self.output_loudness_lufs.load(Ordering::Relaxed))
    }

    pub fn get_latency_avg_ms(&self) -> f32 {
        f32::from_bits(self.latency_avg_ms.load(Ordering::Relaxed))
    }

    pub fn get_voice_active(&self) -> bool {
        self.voice_active.load(Ordering::Relaxed)
    }

    pub fn get_frames(&self) -> u64 {
        self.frames_processed.load(Ordering::Relaxed)
    }

    pub fn get_stage_failures(&self) -> u64 {
        self.stage_failures.load(Ordering::Relaxed)
    }

    pub fn get_critical_failures(&self) -> u64 {
        self.critical_failures.load(Ordering::Relaxed)
    }

    pub fn get_recording_dropped(&self) -> u64 {
        self.recording_dropped.load(Ordering::Relaxed)
    }
}
