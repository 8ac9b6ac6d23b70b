//! Projector presets database.
//!
//! Each preset is a complete projector configuration for one marker
//! placement style. Built-in presets are embedded at compile time from
//! `contrib/presets/*.toml`; user presets use the same file layout.

use goldeneyes_core::projector::ConfigError;
use goldeneyes_core::ProjectorConfig;
use serde::Deserialize;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

const PRESET_EYE_JOINTS: &str = include_str!("../../../contrib/presets/eye-joints.toml");
const PRESET_FORWARD_UP: &str = include_str!("../../../contrib/presets/forward-up.toml");
const PRESET_PARENT_RELATIVE: &str = include_str!("../../../contrib/presets/parent-relative.toml");

/// Preset used when none is configured.
pub const DEFAULT_PRESET: &str = "forward-up";

static PRESET_DB: OnceLock<Vec<PresetFile>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum PresetError {
    #[error("unknown preset: {0}")]
    Unknown(String),
    #[error("failed to read preset file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse preset: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid preset {name}: {source}")]
    Invalid { name: String, source: ConfigError },
}

/// Top-level preset file structure.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetFile {
    pub preset: PresetInfo,
    pub projector: ProjectorConfig,
}

/// Identification fields from the `[preset]` section.
#[derive(Debug, Clone, Deserialize)]
pub struct PresetInfo {
    pub name: String,
    #[serde(default)]
    pub description: String,
}

impl PresetFile {
    /// Parse and validate a preset from TOML source.
    pub fn from_toml(src: &str) -> Result<Self, PresetError> {
        let preset: PresetFile = toml::from_str(src)?;
        preset
            .projector
            .validate()
            .map_err(|source| PresetError::Invalid {
                name: preset.preset.name.clone(),
                source,
            })?;
        Ok(preset)
    }

    /// Load a user preset from disk.
    pub fn load(path: &Path) -> Result<Self, PresetError> {
        let src = std::fs::read_to_string(path).map_err(|source| PresetError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let preset = Self::from_toml(&src)?;
        tracing::info!(path = %path.display(), name = %preset.preset.name, "loaded preset file");
        Ok(preset)
    }
}

fn preset_db() -> &'static Vec<PresetFile> {
    PRESET_DB.get_or_init(|| {
        let mut db = Vec::new();
        for src in [PRESET_EYE_JOINTS, PRESET_FORWARD_UP, PRESET_PARENT_RELATIVE] {
            match PresetFile::from_toml(src) {
                Ok(p) => db.push(p),
                Err(e) => tracing::error!(error = %e, "bad built-in preset"),
            }
        }
        db
    })
}

/// Look up a built-in preset by name.
pub fn lookup_preset(name: &str) -> Result<&'static PresetFile, PresetError> {
    preset_db()
        .iter()
        .find(|p| p.preset.name == name)
        .ok_or_else(|| PresetError::Unknown(name.to_string()))
}

/// List all built-in presets.
pub fn list_presets() -> &'static [PresetFile] {
    preset_db()
}

#[cfg(test)]
mod tests {
    use super::*;
    use goldeneyes_core::{LostFacePolicy, PlacementPolicy};

    #[test]
    fn test_builtin_presets_parse() {
        let names: Vec<&str> = list_presets()
            .iter()
            .map(|p| p.preset.name.as_str())
            .collect();
        assert_eq!(names, ["eye-joints", "forward-up", "parent-relative"]);
    }

    #[test]
    fn test_default_preset_exists() {
        let preset = lookup_preset(DEFAULT_PRESET).unwrap();
        assert_eq!(preset.projector.base_scale, 1.0);
        assert_eq!(preset.projector.scale_factor, 2.0);
        assert!(matches!(
            preset.projector.placement,
            PlacementPolicy::ForwardUp { .. }
        ));
    }

    #[test]
    fn test_parent_relative_preset_hides_on_lost_face() {
        let preset = lookup_preset("parent-relative").unwrap();
        assert_eq!(preset.projector.lost_face, LostFacePolicy::Hide);
        assert_eq!(preset.projector.scale_factor, 1.6);
    }

    #[test]
    fn test_unknown_preset() {
        assert!(matches!(
            lookup_preset("googly"),
            Err(PresetError::Unknown(name)) if name == "googly"
        ));
    }

    #[test]
    fn test_defaults_fill_optional_fields() {
        let src = r#"
            [preset]
            name = "minimal"

            [projector]
            base_scale = 1.0
            scale_factor = 0.5

            [projector.placement]
            policy = "forward_up"
            forward_offset = 0.04
            upward_offset = 0.0
        "#;
        let preset = PresetFile::from_toml(src).unwrap();
        assert_eq!(preset.projector.min_scale, 0.01);
        assert_eq!(preset.projector.lost_face, LostFacePolicy::Freeze);
        assert!(preset.preset.description.is_empty());
    }

    #[test]
    fn test_invalid_preset_rejected() {
        let src = r#"
            [preset]
            name = "broken"

            [projector]
            base_scale = 1.0
            scale_factor = 0.5
            min_scale = -1.0

            [projector.placement]
            policy = "forward_up"
            forward_offset = 0.04
            upward_offset = 0.0
        "#;
        assert!(matches!(
            PresetFile::from_toml(src),
            Err(PresetError::Invalid { name, .. }) if name == "broken"
        ));
    }

    #[test]
    fn test_load_missing_file() {
        let err = PresetFile::load(Path::new("/nonexistent/goldeneyes/preset.toml")).unwrap_err();
        assert!(matches!(err, PresetError::Read { .. }));
    }
}
