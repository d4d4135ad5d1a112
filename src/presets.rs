use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::effects::EffectSpec;
use crate::error::{EngineError, EngineResult};

// =============================================================================
// PRESET DESCRIPTORS
// =============================================================================

/// An ordered effect list under a name. Loading one replaces the whole chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PresetDescriptor {
    pub name: String,
    #[serde(default)]
    pub effects: Vec<EffectSpec>,
}

impl PresetDescriptor {
    pub fn new(name: impl Into<String>, effects: Vec<EffectSpec>) -> Self {
        Self {
            name: name.into(),
            effects,
        }
    }

    pub fn from_json_str(s: &str) -> EngineResult<Self> {
        Ok(serde_json::from_str(s)?)
    }
}

// =============================================================================
// PRESET LIBRARY
// =============================================================================

#[derive(Debug, Default, Clone)]
pub struct PresetLibrary {
    presets: BTreeMap<String, PresetDescriptor>,
}

impl PresetLibrary {
    /// Factory presets baked in from `presets.json`. This is fallible but non-fatal:
    /// a malformed file yields an empty library.
    pub fn builtin() -> Self {
        let presets_str = include_str!("../presets.json");
        match Self::from_json_str(presets_str) {
            Ok(lib) => lib,
            Err(e) => {
                log::error!("built-in presets failed to parse: {}", e);
                Self::default()
            }
        }
    }

    /// A JSON array of descriptors. Later entries replace earlier ones by name.
    pub fn from_json_str(s: &str) -> EngineResult<Self> {
        let list: Vec<PresetDescriptor> = serde_json::from_str(s)?;
        let mut lib = Self::default();
        for p in list {
            lib.insert(p);
        }
        Ok(lib)
    }

    pub fn insert(&mut self, preset: PresetDescriptor) {
        self.presets.insert(preset.name.clone(), preset);
    }

    pub fn get(&self, name: &str) -> EngineResult<&PresetDescriptor> {
        self.presets
            .get(name)
            .ok_or_else(|| EngineError::UnknownPreset(name.to_string()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
