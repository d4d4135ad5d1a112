//! Error taxonomy for the engine.
//!
//! Configuration problems are reported to the caller and leave state untouched.
//! Stage failures never cross the frame boundary; they are counted and logged
//! and the variant only exists so stages can describe what went wrong.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    #[error("unknown effect '{0}'")]
    UnknownEffect(String),

    #[error("unknown preset '{0}'")]
    UnknownPreset(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stage '{stage}' failed: {reason}")]
    StageFailure { stage: &'static str, reason: String },

    #[error("resource error: {0}")]
    Resource(String),

    #[error("running degraded: {0}")]
    Degraded(String),

    #[error("enhancement model error: {0}")]
    Model(String),
}

impl EngineError {
    pub fn stage(stage: &'static str, reason: impl Into<String>) -> Self {
        Self::StageFailure {
            stage,
            reason: reason.into(),
        }
    }

    pub fn resource(err: impl std::fmt::Display) -> Self {
        Self::Resource(err.to_string())
    }

    /// Configuration errors turn the requested operation into a no-op.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnknownEffect(_) | Self::UnknownPreset(_) | Self::InvalidConfig(_)
        )
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Resource(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfig(err.to_string())
    }
}

impl From<hound::Error> for EngineError {
    fn from(err: hound::Error) -> Self {
        Self::Resource(err.to_string())
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
