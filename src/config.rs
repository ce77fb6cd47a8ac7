//! Renderer configuration.
//!
//! Configuration is plain serde data loaded from TOML. Every field has a
//! default, so a config file only needs to name what it changes:
//!
//! ```toml
//! clear_color = [0.02, 0.02, 0.05, 1.0]
//! light_overflow = "multi_pass"
//!
//! [post_process]
//! exposure = 1.2
//! blur_iterations = 4
//! bloom_range = [0.8, 1.6]
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::post_process::PostProcessSettings;
use crate::render_graph::ColorFormat;

/// Loading and saving for serde-backed configuration types.
pub trait Config: Serialize + for<'de> Deserialize<'de> + Default {
    /// Load configuration from a `.toml` file.
    fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        check_extension(path)?;
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }

    /// Save configuration to a `.toml` file.
    fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        check_extension(path)?;
        let contents =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    /// Parse configuration from TOML text.
    fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn check_extension(path: &Path) -> Result<(), ConfigError> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => Ok(()),
        _ => Err(ConfigError::UnsupportedFormat(path.display().to_string())),
    }
}

/// Configuration errors
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    Parse(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialize(String),

    /// Unsupported format
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
}

/// What the forward pass does when a program's light arrays cannot hold every
/// light in the frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LightOverflowPolicy {
    /// Draw once with the nearest lights that fit and report the overflow.
    #[default]
    Truncate,
    /// Redraw additively with the next batch of lights until all are consumed.
    MultiPass,
}

/// Top-level renderer settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Color the scene target (or screen) is cleared to each frame.
    pub clear_color: [f32; 4],
    pub light_overflow: LightOverflowPolicy,
    /// Format of the offscreen scene target used when post effects are active.
    pub scene_format: ColorFormat,
    pub post_process: PostProcessSettings,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
            light_overflow: LightOverflowPolicy::default(),
            scene_format: ColorFormat::Rgba16Float,
            post_process: PostProcessSettings::default(),
        }
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::post_process::ToneMapping;

    #[test]
    fn empty_toml_gives_defaults() {
        let config = RendererConfig::from_toml_str("").unwrap();
        assert_eq!(config, RendererConfig::default());
    }

    #[test]
    fn partial_toml_overrides_named_fields() {
        let config = RendererConfig::from_toml_str(
            r#"
            light_overflow = "multi_pass"
            scene_format = "rgba8_unorm"

            [post_process]
            exposure = 2.0
            blur_iterations = 2
            tone_mapping = "reinhard"
            "#,
        )
        .unwrap();

        assert_eq!(config.light_overflow, LightOverflowPolicy::MultiPass);
        assert_eq!(config.scene_format, ColorFormat::Rgba8Unorm);
        assert_eq!(config.post_process.exposure, 2.0);
        assert_eq!(config.post_process.blur_iterations, 2);
        assert_eq!(config.post_process.tone_mapping, ToneMapping::Reinhard);
        assert_eq!(config.post_process.contrast, 1.0);
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        let err = RendererConfig::from_toml_str("light_overflow = 3").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn non_toml_paths_are_rejected() {
        let err = RendererConfig::load_from_file("renderer.ron").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn save_then_load_preserves_settings() {
        let path = std::env::temp_dir().join(format!("lantern-config-{}.toml", std::process::id()));
        let mut config = RendererConfig::default();
        config.post_process.saturation = 0.25;
        config.light_overflow = LightOverflowPolicy::MultiPass;

        config.save_to_file(&path).unwrap();
        let loaded = RendererConfig::load_from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);

        assert_eq!(loaded, config);
    }
}
