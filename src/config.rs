// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Everything the renderer would otherwise hard-code (window size, validation
// toggle, shader locations, present mode preference) lives here and is passed
// down explicitly at construction time.

use anyhow::{Context, Result};
use ash::vk;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Root configuration structure
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub debug: DebugConfig,
    pub shaders: ShaderConfig,
}

/// Window settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Vulkan Triangle".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GraphicsConfig {
    /// Preferred present mode; FIFO is used when the surface lacks it
    pub present_mode: String,
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct DebugConfig {
    /// Only honored in debug builds
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_level: "info".to_string(),
        }
    }
}

/// Compiled SPIR-V locations
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ShaderConfig {
    pub vertex: PathBuf,
    pub fragment: PathBuf,
}

impl Default for ShaderConfig {
    fn default() -> Self {
        Self {
            vertex: PathBuf::from("shaders/triangle.vert.spv"),
            fragment: PathBuf::from("shaders/triangle.frag.spv"),
        }
    }
}

impl Config {
    /// Load configuration from file, falling back to defaults on any error.
    ///
    /// Runs before the logger exists, so the error is handed back for the
    /// caller to report instead of being logged here.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> (Self, Option<anyhow::Error>) {
        match Self::load_from_path(path) {
            Ok(config) => (config, None),
            Err(e) => (Config::default(), Some(e)),
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    /// Validation layers are a development aid and never ship in release builds
    pub fn validation_enabled(&self) -> bool {
        cfg!(debug_assertions) && self.debug.validation_layers
    }

    /// Get preferred present mode as Vulkan enum
    pub fn preferred_present_mode(&self) -> vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => vk::PresentModeKHR::MAILBOX,
            "fifo" => vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn log_level(&self) -> log::LevelFilter {
        self.debug.log_level.parse().unwrap_or_else(|_| {
            eprintln!(
                "Unknown log level '{}', defaulting to info",
                self.debug.log_level
            );
            log::LevelFilter::Info
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_black_triangle_window() {
        let config = Config::default();

        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
        assert_eq!(config.shaders.vertex, PathBuf::from("shaders/triangle.vert.spv"));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let config: Config = toml::from_str(
            r#"
            [window]
            width = 1024

            [graphics]
            present_mode = "FIFO"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Vulkan Triangle");
        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::FIFO);
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let mut config = Config::default();
        config.graphics.present_mode = "vsync-ish".to_string();

        assert_eq!(config.preferred_present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn log_level_parses_case_insensitively() {
        let mut config = Config::default();
        config.debug.log_level = "DEBUG".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Debug);

        config.debug.log_level = "chatty".to_string();
        assert_eq!(config.log_level(), log::LevelFilter::Info);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.window.title, "Vulkan Triangle");
    }

    #[test]
    fn malformed_file_falls_back_with_error() {
        let path = std::env::temp_dir().join("triangle-renderer-fallback-config.toml");
        std::fs::write(&path, "[graphics]\nclear_color = \"red\"\n").unwrap();

        let (config, error) = Config::load_or_default(&path);
        let _ = std::fs::remove_file(&path);

        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
        let error = error.expect("malformed config should be reported");
        assert!(format!("{:#}", error).contains("Failed to parse config file"));
    }

    #[test]
    fn missing_file_falls_back_without_error() {
        let (config, error) = Config::load_or_default("does/not/exist/config.toml");

        assert!(error.is_none());
        assert_eq!(config.window.width, 800);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let path = std::env::temp_dir().join("triangle-renderer-malformed-config.toml");
        std::fs::write(&path, "[window\nwidth = ").unwrap();

        let result = Config::load_from_path(&path);
        let _ = std::fs::remove_file(&path);

        assert!(result.is_err());
    }
}
