pub mod analyzer;
pub mod biquad;
pub mod enhancer;
pub mod noise_suppression;
pub mod spectral;
pub mod spectrum;
pub mod tonal;
pub mod utils;
pub mod voice_gate;

pub use biquad::Biquad;
pub use enhancer::{ConvEnhancer, EnhancementModel, LearnedEnhancer};
pub use noise_suppression::{NoiseProfile, NoiseSuppressor};
pub use spectrum::{SpectrumAnalyzer, VisualizationSnapshot};
pub use tonal::TonalEnhancer;
pub use voice_gate::VoiceActivityGate;
