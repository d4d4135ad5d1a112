//! Effects Chain
//!
//! An ordered list of named, parameterised effects. Insertion order is
//! application order and the same effect may appear more than once.
//!
//! # Design Notes
//! - Every effect is a pure function of (samples, params, sample rate). The only
//!   state carried between calls is the FFT planner cache in `EffectContext`.
//! - The callback applies a cloned snapshot of the chain, so parameter writes
//!   from automation land on the next frame, never halfway through one.
//! - Samples are normalized f32 and are clipped to full scale after every effect.

pub mod compression;
pub mod equalizer;
pub mod pitch_shift;
pub mod reverb;
pub mod robot;

use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::PitchShiftMode;
use crate::error::{EngineError, EngineResult};
use crate::monitor::PerformanceMonitor;
use crate::rt_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    PitchShift,
    RobotModulation,
    Reverb,
    Compression,
    Equalizer,
}

impl EffectKind {
    pub const ALL: [EffectKind; 5] = [
        EffectKind::PitchShift,
        EffectKind::RobotModulation,
        EffectKind::Reverb,
        EffectKind::Compression,
        EffectKind::Equalizer,
    ];

    /// Resolve a registered effect name or alias.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "pitch_shift" | "pitch" => Some(Self::PitchShift),
            "robot" | "robot_modulation" => Some(Self::RobotModulation),
            "reverb" => Some(Self::Reverb),
            "compression" | "compressor" => Some(Self::Compression),
            "equalizer" | "eq" => Some(Self::Equalizer),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::PitchShift => "pitch_shift",
            Self::RobotModulation => "robot_modulation",
            Self::Reverb => "reverb",
            Self::Compression => "compression",
            Self::Equalizer => "equalizer",
        }
    }

    fn timing_name(&self) -> &'static str {
        match self {
            Self::PitchShift => "effect_pitch_shift",
            Self::RobotModulation => "effect_robot_modulation",
            Self::Reverb => "effect_reverb",
            Self::Compression => "effect_compression",
            Self::Equalizer => "effect_equalizer",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectSpec {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, f32>,
}

impl EffectSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: f32) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    pub fn kind(&self) -> Option<EffectKind> {
        EffectKind::from_name(&self.name)
    }

    /// First present key wins; non-finite values fall back to `default`.
    pub fn param(&self, keys: &[&str], default: f32) -> f32 {
        keys.iter()
            .find_map(|k| self.params.get(*k))
            .copied()
            .filter(|v| v.is_finite())
            .unwrap_or(default)
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct EffectsChain {
    effects: Vec<EffectSpec>,
}

impl EffectsChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a registered effect.
    pub fn push(&mut self, spec: EffectSpec) -> EngineResult<()> {
        if spec.kind().is_none() {
            return Err(EngineError::UnknownEffect(spec.name));
        }
        self.effects.push(spec);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.effects.clear();
    }

    pub fn len(&self) -> usize {
        self.effects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &[EffectSpec] {
        &self.effects
    }

    pub fn contains(&self, kind: EffectKind) -> bool {
        self.effects.iter().any(|e| e.kind() == Some(kind))
    }

    /// Current value of a parameter on the first instance of `kind`.
    pub fn param(&self, kind: EffectKind, key: &str) -> Option<f32> {
        self.effects
            .iter()
            .find(|e| e.kind() == Some(kind))
            .and_then(|e| e.params.get(key).copied())
    }

    /// Write `key` on every instance of `kind`. Returns how many were updated.
    pub fn set_param(&mut self, kind: EffectKind, key: &str, value: f32) -> usize {
        let mut n = 0;
        for e in self.effects.iter_mut().filter(|e| e.kind() == Some(kind)) {
            e.params.insert(key.to_string(), value);
            n += 1;
        }
        n
    }

    /// Swap in a fully validated list. Nothing changes if any entry is unknown.
    pub fn replace_all(&mut self, specs: Vec<EffectSpec>) -> EngineResult<()> {
        if let Some(bad) = specs.iter().find(|s| s.kind().is_none()) {
            return Err(EngineError::UnknownEffect(bad.name.clone()));
        }
        self.effects = specs;
        Ok(())
    }
}

/// Per-callback resources shared by all effects.
pub struct EffectContext {
    pub sample_rate: f32,
    pub pitch_mode: PitchShiftMode,
    pub planner: FftPlanner<f32>,
}

impl EffectContext {
    pub fn new(sample_rate: f32, pitch_mode: PitchShiftMode) -> Self {
        Self {
            sample_rate,
            pitch_mode,
            planner: FftPlanner::new(),
        }
    }
}

/// Run one effect on normalized samples. Output length equals input length.
pub fn apply_effect(
    kind: EffectKind,
    spec: &EffectSpec,
    x: &[f32],
    ctx: &mut EffectContext,
) -> Vec<f32> {
    let mut y = match kind {
        EffectKind::PitchShift => {
            let cents = spec.param(
                &["shift", "shift_cents"],
                pitch_shift::DEFAULT_SHIFT_CENTS,
            );
            pitch_shift::apply(x, cents, ctx)
        }
        EffectKind::RobotModulation => {
            let freq = spec.param(
                &["frequency", "frequency_hz"],
                robot::DEFAULT_FREQUENCY_HZ,
            );
            robot::apply(x, freq, ctx.sample_rate)
        }
        EffectKind::Reverb => {
            let room = spec.param(&["room_size"], reverb::DEFAULT_ROOM_SIZE);
            let mix = spec.params.get("mix").copied().filter(|m| m.is_finite());
            reverb::apply(x, room, mix, ctx)
        }
        EffectKind::Compression => compression::apply(
            x,
            spec.param(&["threshold"], compression::DEFAULT_THRESHOLD),
            spec.param(&["ratio"], compression::DEFAULT_RATIO),
        ),
        EffectKind::Equalizer => equalizer::apply(
            x,
            equalizer::BandGains {
                low: spec.param(&["low"], 1.0),
                mid: spec.param(&["mid"], 1.0),
                high: spec.param(&["high"], 1.0),
            },
            ctx.sample_rate,
        ),
    };
    y.resize(x.len(), 0.0);
    for v in &mut y {
        *v = if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 };
    }
    y
}

/// Apply a chain snapshot in order. Unknown entries are skipped with a warning.
pub fn apply_chain(
    chain: &EffectsChain,
    x: &[f32],
    ctx: &mut EffectContext,
    monitor: &PerformanceMonitor,
) -> Vec<f32> {
    let mut cur = x.to_vec();
    for spec in chain.effects() {
        let Some(kind) = spec.kind() else {
            rt_log!(log::Level::Warn, "skipping unknown effect '{}'", spec.name);
            continue;
        };
        let _t = monitor.measure(kind.timing_name());
        cur = apply_effect(kind, spec, &cur, ctx);
    }
    cur
}
