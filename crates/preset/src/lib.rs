//! Versioned brush preset blobs.
//!
//! Presets are stored as JSON. The current schema is version 2; version-1
//! blobs are migrated on load, anything newer or unknown is rejected. A
//! preset that parses but fails engine validation is rejected too, never
//! silently coerced into range.

use std::collections::BTreeMap;

use model::{BrushShape, ConfigValidationError, EngineConfig};
use serde::{Deserialize, Serialize};

pub const CURRENT_VERSION: u32 = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrushPreset {
    pub version: u32,
    pub name: String,
    pub engine: EngineConfig,
    /// Base64-encoded PNG preview, when the editor captured one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl BrushPreset {
    pub fn new(name: impl Into<String>, engine: EngineConfig) -> Self {
        Self {
            version: CURRENT_VERSION,
            name: name.into(),
            engine,
            thumbnail: None,
            metadata: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub enum PresetError {
    Json(serde_json::Error),
    MissingVersion,
    UnsupportedVersion(u64),
    Config(ConfigValidationError),
}

impl From<serde_json::Error> for PresetError {
    fn from(error: serde_json::Error) -> Self {
        Self::Json(error)
    }
}

impl From<ConfigValidationError> for PresetError {
    fn from(error: ConfigValidationError) -> Self {
        Self::Config(error)
    }
}

/// Version-1 schema: a single `jitter` knob and optional tuning fields.
#[derive(Debug, Deserialize)]
struct PresetV1 {
    name: String,
    engine: EngineV1,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    metadata: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct EngineV1 {
    #[serde(default = "v1_default_shape")]
    shape: BrushShape,
    #[serde(default = "v1_default_spacing")]
    spacing: f32,
    #[serde(default = "v1_default_hardness")]
    hardness: f32,
    #[serde(default = "v1_default_flow")]
    flow: f32,
    #[serde(default)]
    jitter: f32,
    #[serde(default = "v1_default_true")]
    pressure_affects_size: bool,
    #[serde(default)]
    pressure_affects_flow: bool,
}

fn v1_default_shape() -> BrushShape {
    BrushShape::Round
}

fn v1_default_spacing() -> f32 {
    0.25
}

fn v1_default_hardness() -> f32 {
    0.8
}

fn v1_default_flow() -> f32 {
    1.0
}

fn v1_default_true() -> bool {
    true
}

/// Parse a preset blob, migrating older schema versions to the current one.
pub fn from_json(text: &str) -> Result<BrushPreset, PresetError> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let version = value
        .get("version")
        .and_then(serde_json::Value::as_u64)
        .ok_or(PresetError::MissingVersion)?;

    let preset = match version {
        1 => migrate_v1(serde_json::from_value(value)?),
        2 => serde_json::from_value(value)?,
        other => return Err(PresetError::UnsupportedVersion(other)),
    };
    preset.engine.validate()?;
    Ok(preset)
}

pub fn to_json(preset: &BrushPreset) -> Result<String, PresetError> {
    Ok(serde_json::to_string_pretty(preset)?)
}

/// The v1 `jitter` field was positional only; it becomes `scatter`, and the
/// new `size_jitter` axis starts at zero.
fn migrate_v1(old: PresetV1) -> BrushPreset {
    BrushPreset {
        version: CURRENT_VERSION,
        name: old.name,
        engine: EngineConfig {
            shape: old.engine.shape,
            spacing: old.engine.spacing,
            hardness: old.engine.hardness,
            flow: old.engine.flow,
            scatter: old.engine.jitter,
            size_jitter: 0.0,
            pressure_affects_size: old.engine.pressure_affects_size,
            pressure_affects_flow: old.engine.pressure_affects_flow,
        },
        thumbnail: old.thumbnail,
        metadata: old.metadata,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn v2_blob_round_trips() {
        let mut preset = BrushPreset::new("ink", EngineConfig::default());
        preset
            .metadata
            .insert("author".to_owned(), "studio".to_owned());
        let text = to_json(&preset).expect("serialize preset");
        let reloaded = from_json(&text).expect("parse serialized preset");
        assert_eq!(reloaded, preset);
    }

    #[test]
    fn v1_blob_migrates_jitter_and_missing_spacing() {
        let text = r#"{
            "version": 1,
            "name": "old charcoal",
            "engine": { "shape": "Flat", "hardness": 0.5, "flow": 0.9, "jitter": 0.6 }
        }"#;
        let preset = from_json(text).expect("migrate v1 preset");
        assert_eq!(preset.version, CURRENT_VERSION);
        assert_eq!(preset.name, "old charcoal");
        assert_eq!(preset.engine.shape, BrushShape::Flat);
        assert_eq!(preset.engine.spacing, 0.25);
        assert_eq!(preset.engine.scatter, 0.6);
        assert_eq!(preset.engine.size_jitter, 0.0);
        assert!(preset.engine.pressure_affects_size);
    }

    #[test]
    fn migrated_preset_survives_a_save_reload_cycle() {
        let text = r#"{"version": 1, "name": "pen", "engine": {"jitter": 0.2}}"#;
        let migrated = from_json(text).expect("migrate v1 preset");
        let saved = to_json(&migrated).expect("serialize migrated preset");
        let reloaded = from_json(&saved).expect("reload migrated preset");
        assert_eq!(reloaded, migrated);
    }

    #[test]
    fn unknown_version_is_rejected() {
        let text = r#"{"version": 3, "name": "future", "engine": {}}"#;
        assert!(matches!(
            from_json(text),
            Err(PresetError::UnsupportedVersion(3))
        ));
    }

    #[test]
    fn missing_version_is_rejected() {
        let text = r#"{"name": "unversioned", "engine": {}}"#;
        assert!(matches!(from_json(text), Err(PresetError::MissingVersion)));
    }

    #[test]
    fn out_of_range_engine_values_are_rejected_not_coerced() {
        let text = r#"{
            "version": 2,
            "name": "too hot",
            "engine": {
                "shape": "Round", "spacing": 0.25, "hardness": 0.8, "flow": 3.0,
                "scatter": 0.0, "size_jitter": 0.0,
                "pressure_affects_size": true, "pressure_affects_flow": false
            }
        }"#;
        assert!(matches!(
            from_json(text),
            Err(PresetError::Config(ConfigValidationError::FlowOutOfRange))
        ));
    }
}
