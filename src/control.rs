//! Control plane
//!
//! `PipelineHandle` is the cloneable handle GUI, CLI and network collaborators
//! hold while the callback thread owns the `VoicePipeline`. Everything it
//! touches is shared state behind short locks or atomics; nothing here runs on
//! the callback thread.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;

use crate::automation::{
    param_writer, task_key, AutomationScheduler, AutomationTask, ChainState, Curve,
    SharedChainState,
};
use crate::config::EngineConfig;
use crate::debug;
use crate::device::FrameSource;
use crate::dsp::analyzer::AnalysisSnapshot;
use crate::dsp::enhancer::EnhancementFlags;
use crate::dsp::noise_suppression::ProfileSlot;
use crate::dsp::tonal::TonalSettings;
use crate::effects::{EffectKind, EffectSpec, EffectsChain};
use crate::error::{EngineError, EngineResult};
use crate::meters::Meters;
use crate::monitor::{MemoryUsage, PerformanceMonitor};
use crate::presets::{PresetDescriptor, PresetLibrary};
use crate::recording::{Recorder, RecordingSink};
use crate::routing::{Route, Router};

/// State shared between the callback and the control plane.
pub(crate) struct Shared {
    pub(crate) config: EngineConfig,
    pub(crate) chain: SharedChainState,
    pub(crate) scheduler: AutomationScheduler,
    pub(crate) router: Router,
    pub(crate) noise_profile: ProfileSlot,
    pub(crate) tonal: Arc<TonalSettings>,
    pub(crate) enhancement: Arc<EnhancementFlags>,
    pub(crate) monitor: PerformanceMonitor,
    pub(crate) meters: Arc<Meters>,
    pub(crate) analysis: Mutex<Arc<AnalysisSnapshot>>,
    pub(crate) recorder: Mutex<Recorder>,
    pub(crate) presets: PresetLibrary,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    match m.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Structured snapshot returned by `get_stats`.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub latency_avg_ms: f32,
    pub stage_timings_ms: BTreeMap<String, f64>,
    pub cpu_percent: f64,
    pub memory: MemoryUsage,
    pub analysis: AnalysisSnapshot,
    pub voice_active: bool,
    pub input_rms: f32,
    pub output_peak: f32,
    /// Momentary loudness of the processed output; `None` before any audio.
    pub output_loudness_lufs: Option<f32>,
    pub frames_processed: u64,
    pub stage_failures: u64,
    pub critical_failures: u64,
    pub enhancement_enabled: bool,
    pub enhancement_degraded: bool,
    pub noise_calibrated: bool,
    pub effects: Vec<EffectSpec>,
    pub pending_automation: usize,
    pub recording: bool,
    pub recording_dropped_frames: u64,
    pub log_dropped_messages: usize,
}

#[derive(Clone)]
pub struct PipelineHandle {
    pub(crate) shared: Arc<Shared>,
}

impl PipelineHandle {
    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }

    // =========================================================================
    // EFFECTS CHAIN
    // =========================================================================

    /// Append an effect. Unknown names leave the chain untouched.
    pub fn add_effect(&self, name: &str, params: BTreeMap<String, f32>) -> EngineResult<()> {
        let spec = EffectSpec {
            name: name.to_string(),
            params,
        };
        let result = lock(&self.shared.chain).chain.push(spec);
        match &result {
            Ok(()) => {
                log::info!("added effect '{}'", name);
                self.shared.scheduler.start();
            }
            Err(e) => log::warn!("add_effect rejected: {}", e),
        }
        result
    }

    pub fn clear_effects(&self) {
        lock(&self.shared.chain).chain.clear();
        log::info!("effects cleared");
    }

    /// Replace the whole chain with the preset's list, or change nothing.
    pub fn load_preset(&self, preset: &PresetDescriptor) -> EngineResult<()> {
        let result = lock(&self.shared.chain)
            .chain
            .replace_all(preset.effects.clone());
        match &result {
            Ok(()) => {
                log::info!(
                    "loaded preset '{}' ({} effects)",
                    preset.name,
                    preset.effects.len()
                );
                self.shared.scheduler.start();
            }
            Err(e) => log::warn!("preset '{}' rejected: {}", preset.name, e),
        }
        result
    }

    pub fn load_preset_named(&self, name: &str) -> EngineResult<()> {
        let preset = self.shared.presets.get(name).map_err(|e| {
            log::warn!("{}", e);
            e
        })?;
        self.load_preset(preset)
    }

    pub fn preset_names(&self) -> Vec<String> {
        self.shared.presets.names().map(str::to_string).collect()
    }

    pub fn effects(&self) -> EffectsChain {
        lock(&self.shared.chain).chain.clone()
    }

    // =========================================================================
    // AUTOMATION
    // =========================================================================

    /// Ramp `param` on every instance of `effect`, replacing any running ramp.
    pub fn automate(
        &self,
        effect: &str,
        param: &str,
        start_value: f32,
        end_value: f32,
        duration_secs: f32,
        curve: Curve,
    ) -> EngineResult<()> {
        let kind = EffectKind::from_name(effect)
            .ok_or_else(|| EngineError::UnknownEffect(effect.to_string()))?;
        let task = AutomationTask::new(
            start_value,
            end_value,
            duration_secs,
            curve,
            param_writer(kind, param),
        );
        self.shared.scheduler.schedule(task_key(kind, param), task)
    }

    /// Run `f` with the chain and automation tasks locked.
    pub fn with_chain_state<R>(&self, f: impl FnOnce(&mut ChainState) -> R) -> R {
        let out = f(&mut lock(&self.shared.chain));
        self.shared.scheduler.start();
        out
    }

    pub fn pending_automation(&self) -> usize {
        self.shared.scheduler.pending()
    }

    pub fn stop_automation(&self) {
        self.shared.scheduler.stop();
    }

    // =========================================================================
    // STATS
    // =========================================================================

    pub fn analysis(&self) -> Arc<AnalysisSnapshot> {
        Arc::clone(&lock(&self.shared.analysis))
    }

    /// Also drains the callback's log queue into `log`.
    pub fn get_stats(&self) -> EngineStats {
        debug::drain_realtime_log();
        let s = &self.shared;
        let loudness = s.meters.get_output_loudness_lufs();
        let (effects, pending) = {
            let st = lock(&s.chain);
            (st.chain.effects().to_vec(), st.pending())
        };
        EngineStats {
            latency_avg_ms: s.meters.get_latency_avg_ms(),
            stage_timings_ms: s.monitor.average_timings_ms(),
            cpu_percent: s.monitor.cpu_percent(),
            memory: s.monitor.memory_usage(),
            analysis: self.analysis().as_ref().clone(),
            voice_active: s.meters.get_voice_active(),
            input_rms: s.meters.get_input_rms(),
            output_peak: s.meters.get_output_peak(),
            output_loudness_lufs: loudness.is_finite().then_some(loudness),
            frames_processed: s.meters.get_frames(),
            stage_failures: s.meters.get_stage_failures(),
            critical_failures: s.meters.get_critical_failures(),
            enhancement_enabled: s.enhancement.enabled(),
            enhancement_degraded: s.enhancement.degraded(),
            noise_calibrated: s.noise_profile.is_calibrated(),
            effects,
            pending_automation: pending,
            recording: lock(&s.recorder).is_recording(),
            recording_dropped_frames: s.meters.get_recording_dropped(),
            log_dropped_messages: debug::dropped_messages(),
        }
    }

    pub fn save_statistics(&self, path: &Path) -> EngineResult<()> {
        self.shared.monitor.save_statistics(path)
    }

    pub fn drain_realtime_log(&self) -> usize {
        debug::drain_realtime_log()
    }

    // =========================================================================
    // RECORDING
    // =========================================================================

    pub fn start_recording(&self, sink: Box<dyn RecordingSink>) -> EngineResult<()> {
        lock(&self.shared.recorder).start(sink)
    }

    /// Returns the written file for file-backed sinks.
    pub fn stop_recording(&self) -> EngineResult<Option<PathBuf>> {
        lock(&self.shared.recorder).stop()
    }

    pub fn is_recording(&self) -> bool {
        lock(&self.shared.recorder).is_recording()
    }

    // =========================================================================
    // NOISE
    // =========================================================================

    /// Blocking: reads `duration_secs` of noise-only audio from `source`.
    /// Must not be called from the callback thread.
    pub fn calibrate_noise(
        &self,
        source: &mut dyn FrameSource,
        duration_secs: f32,
    ) -> EngineResult<()> {
        let cfg = &self.shared.config;
        if !(duration_secs > 0.0) {
            return Err(EngineError::InvalidConfig(format!(
                "calibration duration must be positive, got {}",
                duration_secs
            )));
        }
        let wanted = (duration_secs * cfg.sample_rate as f32).ceil() as usize;
        let mut sample = Vec::with_capacity(wanted);
        while sample.len() < wanted {
            let frame = source.read_frame()?;
            if frame.is_empty() {
                break;
            }
            sample.extend(frame.to_normalized());
        }
        sample.truncate(wanted);
        self.calibrate_noise_from(&sample)
    }

    /// Install a profile built from normalized noise-only samples.
    pub fn calibrate_noise_from(&self, sample: &[f32]) -> EngineResult<()> {
        let cfg = &self.shared.config;
        self.shared
            .noise_profile
            .calibrate(sample, cfg.noise.fft_size, cfg.noise.hop)
    }

    pub fn is_noise_calibrated(&self) -> bool {
        self.shared.noise_profile.is_calibrated()
    }

    // =========================================================================
    // ROUTING
    // =========================================================================

    pub fn add_route(&self, route: Route) {
        self.shared.router.add_route(route);
    }

    pub fn remove_route(&self, source: &str, destination: &str) -> usize {
        self.shared.router.remove_route(source, destination)
    }

    pub fn set_route_active(&self, source: &str, destination: &str, active: bool) -> usize {
        self.shared.router.set_route_active(source, destination, active)
    }

    pub fn set_route_volume(&self, source: &str, destination: &str, volume: f32) -> usize {
        self.shared.router.set_route_volume(source, destination, volume)
    }

    pub fn set_route_pan(&self, source: &str, destination: &str, pan: f32) -> usize {
        self.shared.router.set_route_pan(source, destination, pan)
    }

    pub fn routes(&self) -> Vec<Route> {
        self.shared.router.routes()
    }

    // =========================================================================
    // STAGE TOGGLES
    // =========================================================================

    pub fn set_tonal(&self, clarity: f32, warmth: f32) {
        self.shared.tonal.set(clarity, warmth);
    }

    pub fn set_tonal_enabled(&self, on: bool) {
        self.shared.tonal.set_enabled(on);
    }

    /// No effect once the stage has degraded.
    pub fn set_enhancement_enabled(&self, on: bool) {
        if self.shared.enhancement.degraded() {
            log::warn!("learned enhancement is degraded; ignoring toggle");
        }
        self.shared.enhancement.set_enabled(on);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Frame;
    use crate::VoicePipeline;

    struct Constant(i16, usize);

    impl FrameSource for Constant {
        fn read_frame(&mut self) -> EngineResult<Frame> {
            Ok(Frame::new(vec![self.0; self.1]))
        }
    }

    fn handle() -> PipelineHandle {
        VoicePipeline::new(EngineConfig::default()).unwrap().1
    }

    #[test]
    fn test_add_and_clear_effects() {
        let h = handle();
        h.add_effect("reverb", BTreeMap::new()).unwrap();
        assert_eq!(
            h.add_effect("flanger", BTreeMap::new()).unwrap_err(),
            EngineError::UnknownEffect("flanger".into())
        );
        assert_eq!(h.effects().len(), 1);
        h.clear_effects();
        h.clear_effects();
        assert!(h.effects().is_empty());
    }

    #[test]
    fn test_load_preset_is_atomic() {
        let h = handle();
        h.load_preset_named("robot").unwrap();
        assert_eq!(h.effects().len(), 2);

        let bad = PresetDescriptor::new(
            "broken",
            vec![EffectSpec::new("eq"), EffectSpec::new("vocoder")],
        );
        assert!(h.load_preset(&bad).is_err());
        assert!(h.effects().contains(EffectKind::RobotModulation));

        assert_eq!(
            h.load_preset_named("alien").unwrap_err(),
            EngineError::UnknownPreset("alien".into())
        );
        assert_eq!(h.effects().len(), 2);
    }

    #[test]
    fn test_calibrate_noise_reads_enough_frames() {
        let h = handle();
        assert!(!h.is_noise_calibrated());
        let mut src = Constant(50, 1024);
        h.calibrate_noise(&mut src, 0.1).unwrap();
        assert!(h.is_noise_calibrated());
        assert!(h.calibrate_noise(&mut src, 0.0).is_err());
    }

    #[test]
    fn test_calibrate_from_samples_uses_shared_profile() {
        let h = handle();
        assert!(h.calibrate_noise_from(&[]).is_err());
        assert!(!h.is_noise_calibrated());
        h.calibrate_noise_from(&vec![0.01; 4096]).unwrap();
        assert!(h.is_noise_calibrated());
    }

    #[test]
    fn test_automate_rejects_unknown_effect() {
        let h = handle();
        assert!(h
            .automate("wah", "depth", 0.0, 1.0, 0.1, Curve::Linear)
            .is_err());
        h.stop_automation();
        assert!(h
            .automate("reverb", "mix", 0.0, 1.0, 0.1, Curve::Linear)
            .is_err());
    }

    #[test]
    fn test_stats_serialize() {
        let h = handle();
        let stats = h.get_stats();
        assert_eq!(stats.frames_processed, 0);
        assert!(stats.output_loudness_lufs.is_none());
        let json = serde_json::to_string(&stats).unwrap();
        assert!(json.contains("stage_timings_ms"));
    }

    #[test]
    fn test_presets_and_tonal_controls() {
        let h = handle();
        assert_eq!(h.preset_names(), vec!["high_pitch", "natural", "robot"]);
        h.set_tonal(1.5, 0.25);
        assert_eq!(h.shared.tonal.clarity(), 1.0);
        assert_eq!(h.shared.tonal.warmth(), 0.25);
        h.set_tonal_enabled(false);
        assert!(!h.shared.tonal.enabled());
    }

    #[test]
    fn test_with_chain_state_sees_tasks_and_chain() {
        let h = handle();
        h.add_effect("reverb", BTreeMap::new()).unwrap();
        h.automate("reverb", "mix", 0.0, 1.0, 10.0, Curve::Linear)
            .unwrap();
        let (effects, task) =
            h.with_chain_state(|st| (st.chain.len(), st.task("reverb.mix").is_some()));
        assert_eq!(effects, 1);
        assert!(task);
        h.stop_automation();
    }
}
