//! OrionWave: real-time voice transformation engine.
//!
//! `VoicePipeline` runs once per device callback on fixed-size 16-bit mono
//! frames: analysis, voice-activity gating, learned enhancement, noise
//! suppression, a user-configurable effects chain, tonal shaping, recording
//! hand-off and fan-out to virtual channels. `PipelineHandle` is the matching
//! control plane.
//!
//! # Design Notes
//! - Every stage runs inside `catch_unwind` and is timed by the monitor. A
//!   failing stage is counted and logged and the frame continues with that
//!   stage's input. A failure outside any stage returns the raw input frame.
//! - The callback only `try_lock`s shared state. The chain is snapshot-copied
//!   and applied with no lock held; a contended lock reuses the previous
//!   snapshot.
//! - Logging from the callback goes through `rt_log!`, never straight to `log`.

#[macro_use]
pub mod debug;

pub mod automation;
pub mod config;
pub mod control;
pub mod device;
pub mod dsp;
pub mod effects;
pub mod error;
pub mod frame;
pub mod meters;
pub mod monitor;
pub mod presets;
pub mod recording;
pub mod routing;

use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, TryLockError};
use std::time::Instant;

use ebur128::{EbuR128, Mode};

use crate::automation::{
    param_writer, task_key, AutomationScheduler, AutomationTask, ChainState, Curve,
};
use crate::control::Shared;
use crate::dsp::analyzer::{AnalysisSnapshot, FrameAnalyzer, FrameMetrics};
use crate::dsp::enhancer::{EnhancementFlags, EnhancementModel, LearnedEnhancer};
use crate::dsp::noise_suppression::{NoiseSuppressor, ProfileSlot};
use crate::dsp::spectrum::SpectrumAnalyzer;
use crate::dsp::tonal::{TonalEnhancer, TonalSettings};
use crate::dsp::utils::{db_to_gain, frame_rms};
use crate::dsp::voice_gate::VoiceActivityGate;
use crate::effects::{apply_chain, compression, EffectContext, EffectKind, EffectsChain};
use crate::meters::Meters;
use crate::monitor::PerformanceMonitor;
use crate::presets::PresetLibrary;
use crate::recording::{recording_channel, RecordingTap};
use crate::routing::{RoutedFrame, Router, INPUT};

pub use crate::config::EngineConfig;
pub use crate::control::{EngineStats, PipelineHandle};
pub use crate::error::{EngineError, EngineResult};
pub use crate::frame::Frame;

// Adapt-effects ramps.
// Increasing: smoother parameter moves; decreasing: faster tracking of the voice.
const ADAPT_RAMP_SECS: f32 = 0.2;
// Ramps are only replaced when the target moves further than this.
const ADAPT_EPSILON: f32 = 0.01;
const DEFAULT_REVERB_MIX: f32 = 0.5;

// Smoothing of the frame latency meter.
const LATENCY_EMA_ALPHA: f32 = 0.1;

// =============================================================================
// FRAME OUTPUT
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum FrameStatus {
    /// Every stage ran.
    Processed,
    /// Gate closed; the raw frame was forwarded.
    PassThrough,
    /// These stages failed and were bypassed for this frame.
    StageFailures(Vec<&'static str>),
    /// The frame callback itself failed; the raw frame was returned.
    /// `total` counts critical failures since start.
    Critical { total: u64 },
}

#[derive(Debug, Clone)]
pub struct FrameOutput {
    pub frame: Frame,
    /// Per destination channel, from the router.
    pub routed: BTreeMap<String, RoutedFrame>,
    pub voice_active: bool,
    pub status: FrameStatus,
}

// =============================================================================
// STAGE GUARD
// =============================================================================

/// Times a stage and contains its failures.
struct StageRunner<'a> {
    monitor: &'a PerformanceMonitor,
    meters: &'a Meters,
    failed: Vec<&'static str>,
    #[cfg(test)]
    inject: Option<&'static str>,
}

impl StageRunner<'_> {
    fn run<T>(&mut self, name: &'static str, f: impl FnOnce() -> EngineResult<T>) -> Option<T> {
        let _t = self.monitor.measure(name);
        #[cfg(test)]
        let inject = self.inject == Some(name);
        let result = catch_unwind(AssertUnwindSafe(|| {
            #[cfg(test)]
            if inject {
                panic!("injected fault in {}", name);
            }
            f()
        }));
        let reason = match result {
            Ok(Ok(v)) => return Some(v),
            Ok(Err(e)) => e.to_string(),
            Err(_) => "panicked".to_string(),
        };
        self.meters.inc_stage_failures();
        rt_log!(log::Level::Warn, "stage '{}' bypassed: {}", name, reason);
        self.failed.push(name);
        None
    }

    /// Sample stages fall back to their input.
    fn samples(
        &mut self,
        name: &'static str,
        input: Vec<f32>,
        f: impl FnOnce(&[f32]) -> EngineResult<Vec<f32>>,
    ) -> Vec<f32> {
        match self.run(name, || f(&input)) {
            Some(y) => frame::fit_len(y, input.len()),
            None => input,
        }
    }
}

// =============================================================================
// PIPELINE
// =============================================================================

pub struct VoicePipeline {
    shared: Arc<Shared>,
    effect_ctx: EffectContext,
    gate: VoiceActivityGate,
    analyzer: FrameAnalyzer,
    spectrum: SpectrumAnalyzer,
    enhancer: LearnedEnhancer,
    suppressor: NoiseSuppressor,
    tonal: TonalEnhancer,
    recording: RecordingTap,
    loudness_meter: Option<EbuR128>,
    chain_snapshot: EffectsChain,
    last_metrics: FrameMetrics,
    latency_ema_ms: Option<f32>,
    #[cfg(test)]
    inject_fault: Option<&'static str>,
}

impl VoicePipeline {
    /// Build the pipeline and its control handle. Fails on invalid configuration.
    pub fn new(config: EngineConfig) -> EngineResult<(Self, PipelineHandle)> {
        config.validate()?;
        let sr = config.sample_rate as f32;

        let meters = Arc::new(Meters::new());
        let tonal_settings = Arc::new(TonalSettings::new(&config.tonal));
        let enhancement = Arc::new(EnhancementFlags::new(config.enhancement_enabled));
        let noise_profile = ProfileSlot::new();
        let chain = Arc::new(Mutex::new(ChainState::new(EffectsChain::new())));
        let (recording, recorder) =
            recording_channel(config.recording_queue_frames, Arc::clone(&meters));

        let shared = Arc::new(Shared {
            scheduler: AutomationScheduler::new(Arc::clone(&chain), config.automation_tick_hz),
            chain,
            router: Router::with_default_routes(),
            noise_profile: noise_profile.clone(),
            tonal: Arc::clone(&tonal_settings),
            enhancement: Arc::clone(&enhancement),
            monitor: PerformanceMonitor::new(),
            meters,
            analysis: Mutex::new(Arc::new(AnalysisSnapshot::default())),
            recorder: Mutex::new(recorder),
            presets: PresetLibrary::builtin(),
            config: config.clone(),
        });

        let pipeline = Self {
            effect_ctx: EffectContext::new(sr, config.pitch_shift_mode),
            gate: VoiceActivityGate::new(config.vad.clone(), sr),
            analyzer: FrameAnalyzer::new(sr),
            spectrum: SpectrumAnalyzer::new(sr, config.chunk_size),
            enhancer: LearnedEnhancer::new(None, enhancement),
            suppressor: NoiseSuppressor::new(config.noise.fft_size, config.noise.hop, noise_profile),
            tonal: TonalEnhancer::new(sr, tonal_settings),
            recording,
            loudness_meter: EbuR128::new(1, config.sample_rate, Mode::M).ok(),
            chain_snapshot: EffectsChain::new(),
            last_metrics: FrameMetrics::default(),
            latency_ema_ms: None,
            shared,
            #[cfg(test)]
            inject_fault: None,
        };
        let handle = pipeline.handle();
        log::info!(
            "pipeline ready: {} Hz, {} samples per frame, {:.1} ms budget",
            config.sample_rate,
            config.chunk_size,
            config.frame_budget_secs() * 1000.0
        );
        Ok((pipeline, handle))
    }

    pub fn with_enhancement_model(mut self, model: Box<dyn EnhancementModel>) -> Self {
        self.enhancer.set_model(model);
        self
    }

    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Little-endian PCM in, little-endian PCM out. An odd trailing byte is ignored.
    pub fn process_bytes(&mut self, bytes: &[u8]) -> Vec<u8> {
        let frame = Frame::from_le_bytes(bytes);
        self.process_frame(frame.samples()).frame.to_le_bytes()
    }

    /// Process one frame. Never panics and never returns fewer samples than given.
    pub fn process_frame(&mut self, raw: &[i16]) -> FrameOutput {
        let started = Instant::now();
        let shared = Arc::clone(&self.shared);
        let raw = Frame::new(raw.to_vec());

        let result = {
            let _t = shared.monitor.measure("process_frame");
            catch_unwind(AssertUnwindSafe(|| self.process_internal(&raw, &shared)))
        };
        let output = match result {
            Ok(out) => out,
            Err(_) => {
                let total = shared.meters.inc_critical_failures();
                rt_log!(
                    log::Level::Error,
                    "frame callback failed; raw frame returned ({} critical failures)",
                    total
                );
                FrameOutput {
                    frame: raw,
                    routed: BTreeMap::new(),
                    voice_active: false,
                    status: FrameStatus::Critical { total },
                }
            }
        };

        shared.meters.inc_frames();
        let ms = started.elapsed().as_secs_f32() * 1000.0;
        let ema = match self.latency_ema_ms {
            Some(prev) => prev + LATENCY_EMA_ALPHA * (ms - prev),
            None => ms,
        };
        self.latency_ema_ms = Some(ema);
        shared.meters.set_latency_avg_ms(ema);
        output
    }

    fn process_internal(&mut self, raw: &Frame, shared: &Shared) -> FrameOutput {
        #[cfg(test)]
        if self.inject_fault == Some("frame") {
            panic!("injected frame fault");
        }

        let cfg = &shared.config;
        let mut stages = StageRunner {
            monitor: &shared.monitor,
            meters: &shared.meters,
            failed: Vec::new(),
            #[cfg(test)]
            inject: self.inject_fault,
        };
        let x = raw.to_normalized();

        // 1. Analysis runs on every frame so stats stay live.
        let planner = &mut self.effect_ctx.planner;
        let analyzer = &self.analyzer;
        let spectrum = &mut self.spectrum;
        if let Some((metrics, visualization)) = stages.run("analysis", || {
            Ok((analyzer.analyze(&x, planner), spectrum.analyze(&x, planner)))
        }) {
            self.last_metrics = metrics;
            publish_analysis(shared, AnalysisSnapshot {
                metrics,
                visualization,
            });
        }

        // 2. Gate
        let rms = frame_rms(&x);
        shared.meters.set_input_rms(rms);
        let gate_open = if cfg.vad.enabled {
            let gate = &mut self.gate;
            let planner = &mut self.effect_ctx.planner;
            stages
                .run("voice_gate", || Ok(gate.is_speech(&x, planner)))
                .unwrap_or(false)
        } else {
            true
        };
        let voice_active = gate_open && rms > cfg.rms_floor;
        shared.meters.set_voice_active(voice_active);

        // 3-7. Heavy processing only while someone is talking.
        let (out, cur) = if voice_active {
            let mut cur = x;

            if shared.enhancement.active() {
                let enhancer = &mut self.enhancer;
                cur = stages.samples("enhancement", cur, |s| Ok(enhancer.process(s)));
            }

            let suppressor = &mut self.suppressor;
            cur = stages.samples("noise_suppression", cur, |s| suppressor.process(s));

            if cfg.adapt_effects {
                let metrics = self.last_metrics;
                stages.run("adapt_effects", || adapt_effects(shared, &metrics));
            }

            self.refresh_chain_snapshot(shared);
            let chain = &self.chain_snapshot;
            let ctx = &mut self.effect_ctx;
            cur = stages.samples("effects", cur, |s| {
                Ok(apply_chain(chain, s, ctx, &shared.monitor))
            });

            let tonal = &mut self.tonal;
            cur = stages.samples("tonal", cur, |s| {
                let mut y = s.to_vec();
                tonal.process(&mut y);
                Ok(y)
            });

            (Frame::from_normalized(&cur), cur)
        } else {
            (raw.clone(), x)
        };

        // 8. Fire-and-forget recording
        self.recording.offer(&out);

        // 9. Fan-out and output meters
        let routed = stages
            .run("routing", || Ok(shared.router.process_routing(&cur, INPUT)))
            .unwrap_or_default();
        self.update_output_meters(shared, &cur);

        let status = if !stages.failed.is_empty() {
            FrameStatus::StageFailures(stages.failed)
        } else if voice_active {
            FrameStatus::Processed
        } else {
            FrameStatus::PassThrough
        };
        FrameOutput {
            frame: out,
            routed,
            voice_active,
            status,
        }
    }

    fn refresh_chain_snapshot(&mut self, shared: &Shared) {
        match shared.chain.try_lock() {
            Ok(st) => self.chain_snapshot.clone_from(&st.chain),
            Err(TryLockError::Poisoned(p)) => self.chain_snapshot.clone_from(&p.into_inner().chain),
            // Automation or the control plane holds it; reuse the last snapshot.
            Err(TryLockError::WouldBlock) => {}
        }
    }

    fn update_output_meters(&mut self, shared: &Shared, out: &[f32]) {
        let peak = out.iter().fold(0.0f32, |m, v| m.max(v.abs()));
        shared.meters.set_output_peak(peak);
        if let Some(meter) = self.loudness_meter.as_mut() {
            if meter.add_frames_f32(out).is_ok() {
                if let Ok(lufs) = meter.loudness_momentary() {
                    shared.meters.set_output_loudness_lufs(lufs as f32);
                }
            }
        }
    }

    #[cfg(test)]
    fn inject_fault(&mut self, stage: Option<&'static str>) {
        self.inject_fault = stage;
    }
}

fn publish_analysis(shared: &Shared, snapshot: AnalysisSnapshot) {
    let snapshot = Arc::new(snapshot);
    match shared.analysis.try_lock() {
        Ok(mut slot) => *slot = snapshot,
        Err(TryLockError::Poisoned(p)) => *p.into_inner() = snapshot,
        // A reader holds it; the next frame will publish.
        Err(TryLockError::WouldBlock) => {}
    }
}

// =============================================================================
// ADAPT EFFECTS
// =============================================================================

/// Steer reverb mix from clarity and compressor threshold from level.
/// Skips the frame when the chain lock is busy.
fn adapt_effects(shared: &Shared, metrics: &FrameMetrics) -> EngineResult<()> {
    if shared.scheduler.is_stopped() {
        return Ok(());
    }
    let mut st = match shared.chain.try_lock() {
        Ok(st) => st,
        Err(TryLockError::WouldBlock) => return Ok(()),
        Err(TryLockError::Poisoned(p)) => p.into_inner(),
    };

    if st.chain.contains(EffectKind::Reverb) {
        let target = 0.3 + 0.6 * metrics.clarity.clamp(0.0, 1.0);
        let current = st
            .chain
            .param(EffectKind::Reverb, "mix")
            .unwrap_or(DEFAULT_REVERB_MIX);
        steer(
            &shared.scheduler,
            &mut st,
            EffectKind::Reverb,
            "mix",
            current,
            target,
            Curve::Linear,
        )?;
    }

    if st.chain.contains(EffectKind::Compression) {
        let target = db_to_gain(-20.0 + 10.0 * metrics.rms);
        let current = st
            .chain
            .param(EffectKind::Compression, "threshold")
            .unwrap_or(compression::DEFAULT_THRESHOLD);
        steer(
            &shared.scheduler,
            &mut st,
            EffectKind::Compression,
            "threshold",
            current,
            target,
            Curve::Exponential,
        )?;
    }
    Ok(())
}

fn steer(
    scheduler: &AutomationScheduler,
    st: &mut ChainState,
    kind: EffectKind,
    param: &str,
    current: f32,
    target: f32,
    curve: Curve,
) -> EngineResult<()> {
    let key = task_key(kind, param);
    let heading_to = st.task(&key).map_or(current, |t| t.end_value());
    if (heading_to - target).abs() <= ADAPT_EPSILON {
        return Ok(());
    }
    let task = AutomationTask::new(
        current,
        target,
        ADAPT_RAMP_SECS,
        curve,
        param_writer(kind, param),
    );
    scheduler.schedule_locked(st, key, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use std::f32::consts::PI;

    fn tone(freq: f32, amp: f32, n: usize) -> Vec<i16> {
        (0..n)
            .map(|i| (amp * 32767.0 * (2.0 * PI * freq * i as f32 / 44_100.0).sin()) as i16)
            .collect()
    }

    fn open_gate_config() -> EngineConfig {
        let mut cfg = EngineConfig::default();
        cfg.vad.enabled = false;
        cfg.stats_path = None;
        cfg
    }

    #[test]
    fn test_silence_passes_through() {
        let (mut p, h) = VoicePipeline::new(EngineConfig::default()).unwrap();
        let out = p.process_frame(&vec![0i16; 1024]);
        assert_eq!(out.status, FrameStatus::PassThrough);
        assert!(!out.voice_active);
        assert_eq!(out.frame.samples(), &vec![0i16; 1024][..]);
        assert_eq!(h.get_stats().frames_processed, 1);
    }

    #[test]
    fn test_stage_failure_falls_back_to_stage_input() {
        let mut cfg = open_gate_config();
        cfg.tonal.enabled = false;
        let (mut p, h) = VoicePipeline::new(cfg).unwrap();
        h.add_effect("robot", BTreeMap::new()).unwrap();
        let input = tone(1000.0, 0.3, 1024);

        p.inject_fault(Some("effects"));
        let out = p.process_frame(&input);
        assert_eq!(out.status, FrameStatus::StageFailures(vec!["effects"]));
        // Robot modulation was bypassed; every other stage is transparent here.
        assert_eq!(out.frame.samples(), &input[..]);

        p.inject_fault(None);
        let out = p.process_frame(&input);
        assert_eq!(out.status, FrameStatus::Processed);
        assert!(out.frame.mean_abs_diff(&Frame::new(input.clone())) > 100.0);
        assert_eq!(h.get_stats().stage_failures, 1);
    }

    #[test]
    fn test_critical_failure_returns_raw_frame() {
        let (mut p, h) = VoicePipeline::new(open_gate_config()).unwrap();
        h.add_effect("robot", BTreeMap::new()).unwrap();
        let input = tone(220.0, 0.3, 512);
        p.inject_fault(Some("frame"));
        let first = p.process_frame(&input);
        let second = p.process_frame(&input);
        assert_eq!(first.frame.samples(), &input[..]);
        assert_eq!(first.status, FrameStatus::Critical { total: 1 });
        assert_eq!(second.status, FrameStatus::Critical { total: 2 });
        assert_eq!(h.get_stats().critical_failures, 2);
    }

    #[test]
    fn test_analysis_runs_while_gate_closed() {
        let (mut p, h) = VoicePipeline::new(EngineConfig::default()).unwrap();
        // Far below the RMS floor
        p.process_frame(&tone(1000.0, 0.001, 2048));
        let stats = h.get_stats();
        assert!(!stats.voice_active);
        assert!(stats.analysis.metrics.rms > 0.0);
        assert!(!stats.analysis.visualization.spectrum.is_empty());
    }

    #[test]
    fn test_adapt_hook_schedules_reverb_mix() {
        let (mut p, h) = VoicePipeline::new(open_gate_config()).unwrap();
        h.add_effect("reverb", BTreeMap::from([("room_size".to_string(), 0.05)]))
            .unwrap();
        p.process_frame(&tone(440.0, 0.3, 1024));

        let target = 0.3 + 0.6 * h.analysis().metrics.clarity;
        let deadline = Instant::now() + std::time::Duration::from_secs(2);
        while h.pending_automation() > 0 && Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        let mix = h.effects().param(EffectKind::Reverb, "mix").unwrap();
        assert!((mix - target).abs() < 1e-3, "mix {} target {}", mix, target);
        h.stop_automation();
    }

    #[test]
    fn test_process_bytes_keeps_length() {
        let (mut p, _h) = VoicePipeline::new(open_gate_config()).unwrap();
        let bytes: Vec<u8> = Frame::new(tone(300.0, 0.2, 256)).to_le_bytes();
        let mut odd = bytes.clone();
        odd.push(7);
        assert_eq!(p.process_bytes(&bytes).len(), bytes.len());
        assert_eq!(p.process_bytes(&odd).len(), bytes.len());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cfg = EngineConfig::default();
        cfg.chunk_size = 0;
        assert!(matches!(
            VoicePipeline::new(cfg),
            Err(EngineError::InvalidConfig(_))
        ));
    }
}
