//! Renderer configuration
//!
//! Runtime-tunable settings for the Vulkan backend, loadable from TOML.
//! Everything has a sensible default so applications can start with
//! `RendererConfig::default()` and only override what they care about.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration loading errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The TOML document could not be parsed
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config file could not be read
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
}

/// Renderer backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name reported to the Vulkan driver
    pub app_name: String,
    /// Number of frames the CPU may prepare ahead of the GPU
    pub frames_in_flight: u32,
    /// Prefer a vsync (FIFO) present mode over low-latency mailbox
    pub vsync: bool,
    /// Clear color for the color attachment (RGBA)
    pub clear_color: [f32; 4],
    /// Maximum number of materials the shared descriptor pool is sized for.
    /// Pool exhaustion is a capacity-planning bug, so pick a generous bound.
    pub max_materials: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            app_name: "render_engine".to_string(),
            frames_in_flight: 2,
            vsync: false,
            clear_color: [0.02, 0.02, 0.05, 1.0],
            max_materials: 256,
        }
    }
}

impl RendererConfig {
    /// Parse a configuration from a TOML document
    pub fn from_toml_str(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load a configuration from a TOML file on disk
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = RendererConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert!(config.max_materials >= 1);
    }

    #[test]
    fn partial_toml_overrides_defaults() {
        let config = RendererConfig::from_toml_str(
            r#"
            app_name = "demo"
            frames_in_flight = 3
            "#,
        )
        .unwrap();

        assert_eq!(config.app_name, "demo");
        assert_eq!(config.frames_in_flight, 3);
        // untouched fields keep their defaults
        assert_eq!(config.max_materials, RendererConfig::default().max_materials);
    }

    #[test]
    fn malformed_toml_is_an_error() {
        assert!(RendererConfig::from_toml_str("frames_in_flight = \"two\"").is_err());
    }
}
