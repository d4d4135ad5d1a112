//! Learned Enhancement Stage
//!
//! Optional per-frame transform through a fixed-size model. The model runs on
//! fixed blocks; frames are split into blocks, the tail block is zero padded
//! and the output trimmed back to the frame length.
//!
//! # Design Notes
//! - The first failure of any kind (error, non-finite output, panic) flips the
//!   stage into degraded mode for the rest of the session. Degraded frames pass
//!   through unchanged and the model is never called again.
//! - `ConvEnhancer` is a small 1-D convolutional network (1→32→64→32→1,
//!   kernel 3, same padding, ReLU between layers) whose weights load from JSON.

use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{EngineError, EngineResult};
use crate::rt_log;

/// Block length the convolutional model was trained on.
pub const MODEL_BLOCK: usize = 2048;

const CHANNELS: [usize; 5] = [1, 32, 64, 32, 1];
const KERNEL: usize = 3;

/// A model mapping a block of normalized samples to a block of the same size.
pub trait EnhancementModel: Send {
    fn block_size(&self) -> usize;
    fn infer(&mut self, input: &[f32], output: &mut [f32]) -> EngineResult<()>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvLayer {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    /// Flattened `[out][in][k]`.
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
}

impl ConvLayer {
    fn zeros(in_channels: usize, out_channels: usize) -> Self {
        Self {
            in_channels,
            out_channels,
            kernel: KERNEL,
            weights: vec![0.0; out_channels * in_channels * KERNEL],
            bias: vec![0.0; out_channels],
        }
    }

    fn set_center_tap(&mut self, out: usize, input: usize, w: f32) {
        let idx = (out * self.in_channels + input) * self.kernel + self.kernel / 2;
        self.weights[idx] = w;
    }

    /// Same-padded 1-D convolution over `len` time steps.
    fn forward(&self, input: &[f32], len: usize, output: &mut Vec<f32>, relu: bool) {
        output.clear();
        output.resize(self.out_channels * len, 0.0);
        let half = (self.kernel / 2) as isize;
        for o in 0..self.out_channels {
            let dst = &mut output[o * len..(o + 1) * len];
            dst.fill(self.bias[o]);
            for i in 0..self.in_channels {
                let src = &input[i * len..(i + 1) * len];
                let base = (o * self.in_channels + i) * self.kernel;
                let taps = &self.weights[base..base + self.kernel];
                for (k, &w) in taps.iter().enumerate() {
                    if w == 0.0 {
                        continue;
                    }
                    let offset = k as isize - half;
                    for (t, d) in dst.iter_mut().enumerate() {
                        let s = t as isize + offset;
                        if s >= 0 && (s as usize) < len {
                            *d += w * src[s as usize];
                        }
                    }
                }
            }
            if relu {
                for d in dst.iter_mut() {
                    *d = d.max(0.0);
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvEnhancer {
    layers: Vec<ConvLayer>,
    scratch: (Vec<f32>, Vec<f32>),
}

impl ConvEnhancer {
    pub fn from_layers(layers: Vec<ConvLayer>) -> EngineResult<Self> {
        if layers.len() != CHANNELS.len() - 1 {
            return Err(EngineError::Model(format!(
                "expected {} layers, got {}",
                CHANNELS.len() - 1,
                layers.len()
            )));
        }
        for (n, l) in layers.iter().enumerate() {
            let (cin, cout) = (CHANNELS[n], CHANNELS[n + 1]);
            if l.in_channels != cin
                || l.out_channels != cout
                || l.kernel != KERNEL
                || l.weights.len() != cin * cout * KERNEL
                || l.bias.len() != cout
            {
                return Err(EngineError::Model(format!(
                    "layer {} has shape {}x{}x{}, expected {}x{}x{}",
                    n, l.out_channels, l.in_channels, l.kernel, cout, cin, KERNEL
                )));
            }
        }
        Ok(Self {
            layers,
            scratch: (Vec::new(), Vec::new()),
        })
    }

    pub fn from_json_str(s: &str) -> EngineResult<Self> {
        let layers: Vec<ConvLayer> =
            serde_json::from_str(s).map_err(|e| EngineError::Model(e.to_string()))?;
        Self::from_layers(layers)
    }

    pub fn from_file(path: impl AsRef<Path>) -> EngineResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let model = Self::from_json_str(&text)?;
        log::info!("loaded enhancement model from {}", path.as_ref().display());
        Ok(model)
    }

    /// Weights that reproduce the input exactly: relu(x) - relu(-x).
    pub fn passthrough() -> Self {
        let mut layers: Vec<ConvLayer> = CHANNELS
            .windows(2)
            .map(|w| ConvLayer::zeros(w[0], w[1]))
            .collect();
        layers[0].set_center_tap(0, 0, 1.0);
        layers[0].set_center_tap(1, 0, -1.0);
        for l in layers.iter_mut().take(3).skip(1) {
            l.set_center_tap(0, 0, 1.0);
            l.set_center_tap(1, 1, 1.0);
        }
        layers[3].set_center_tap(0, 0, 1.0);
        layers[3].set_center_tap(0, 1, -1.0);
        Self {
            layers,
            scratch: (Vec::new(), Vec::new()),
        }
    }
}

impl EnhancementModel for ConvEnhancer {
    fn block_size(&self) -> usize {
        MODEL_BLOCK
    }

    fn infer(&mut self, input: &[f32], output: &mut [f32]) -> EngineResult<()> {
        let len = input.len();
        if output.len() != len {
            return Err(EngineError::Model("output block size mismatch".into()));
        }
        let (a, b) = &mut self.scratch;
        a.clear();
        a.extend_from_slice(input);
        let last = self.layers.len() - 1;
        for (n, layer) in self.layers.iter().enumerate() {
            layer.forward(a, len, b, n != last);
            std::mem::swap(a, b);
        }
        output.copy_from_slice(&a[..len]);
        Ok(())
    }
}

/// Enable and degraded flags shared with the control plane.
#[derive(Default)]
pub struct EnhancementFlags {
    enabled: AtomicBool,
    degraded: AtomicBool,
}

impl EnhancementFlags {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            degraded: AtomicBool::new(false),
        }
    }

    pub fn set_enabled(&self, on: bool) {
        self.enabled.store(on, Ordering::Relaxed);
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    pub fn degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Enabled, not degraded.
    pub fn active(&self) -> bool {
        self.enabled() && !self.degraded()
    }

    fn degrade(&self) {
        self.degraded.store(true, Ordering::Relaxed);
    }
}

pub struct LearnedEnhancer {
    model: Option<Box<dyn EnhancementModel>>,
    flags: Arc<EnhancementFlags>,
    block_in: Vec<f32>,
    block_out: Vec<f32>,
}

impl LearnedEnhancer {
    pub fn new(model: Option<Box<dyn EnhancementModel>>, flags: Arc<EnhancementFlags>) -> Self {
        Self {
            model,
            flags,
            block_in: Vec::new(),
            block_out: Vec::new(),
        }
    }

    pub fn set_model(&mut self, model: Box<dyn EnhancementModel>) {
        self.model = Some(model);
    }

    pub fn flags(&self) -> &Arc<EnhancementFlags> {
        &self.flags
    }

    /// Returns the input unchanged when disabled, degraded or without a model.
    pub fn process(&mut self, x: &[f32]) -> Vec<f32> {
        if !self.flags.active() {
            return x.to_vec();
        }
        let Some(model) = self.model.as_mut() else {
            return x.to_vec();
        };

        let block_in = &mut self.block_in;
        let block_out = &mut self.block_out;
        let result = catch_unwind(AssertUnwindSafe(|| {
            run_blocks(model.as_mut(), x, block_in, block_out)
        }))
        .unwrap_or_else(|_| Err(EngineError::Model("model panicked".into())));

        match result {
            Ok(y) => y,
            Err(e) => {
                self.flags.degrade();
                rt_log!(log::Level::Error, "learned enhancement disabled: {}", e);
                x.to_vec()
            }
        }
    }
}

fn run_blocks(
    model: &mut dyn EnhancementModel,
    x: &[f32],
    block_in: &mut Vec<f32>,
    block_out: &mut Vec<f32>,
) -> EngineResult<Vec<f32>> {
    let block = model.block_size();
    if block == 0 {
        return Err(EngineError::Model("model block size is zero".into()));
    }
    block_in.resize(block, 0.0);
    block_out.resize(block, 0.0);

    let mut y = Vec::with_capacity(x.len());
    for chunk in x.chunks(block) {
        block_in[..chunk.len()].copy_from_slice(chunk);
        block_in[chunk.len()..].fill(0.0);
        model.infer(block_in, block_out)?;
        if block_out.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::Model("non-finite model output".into()));
        }
        y.extend_from_slice(&block_out[..chunk.len()]);
    }
    Ok(y)
}
