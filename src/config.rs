// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section and field has a default, so a partial (or missing) config
// file is always valid. Command line flags are applied on top.

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cli::Args;

/// Root configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Mesh Viewer".to_string(),
            width: 800,
            height: 600,
            fullscreen: false,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GraphicsConfig {
    pub present_mode: String,
    pub clear_color: [f32; 4],
    pub max_frames_in_flight: usize,
    /// 0 means "highest the GPU supports"; anything else is an upper bound.
    pub msaa_samples: u32,
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            present_mode: "mailbox".to_string(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
            max_frames_in_flight: 2,
            msaa_samples: 0,
        }
    }
}

/// Asset locations, relative to the working directory
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AssetsConfig {
    pub model: PathBuf,
    pub texture: PathBuf,
    pub fallback_texture: PathBuf,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
    pub hot_reload_shaders: bool,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            model: PathBuf::from("models/viking_room.obj"),
            texture: PathBuf::from("textures/viking_room.png"),
            fallback_texture: PathBuf::from("textures/texture.jpg"),
            vertex_shader: PathBuf::from("shaders/model.vert.spv"),
            fragment_shader: PathBuf::from("shaders/model.frag.spv"),
            hot_reload_shaders: true,
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_to_file: bool,
    pub log_file: PathBuf,
    pub log_level: String,
    pub show_fps: bool,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: true,
            log_to_file: false,
            log_file: PathBuf::from("vulkan_debug.log"),
            log_level: "info".to_string(),
            show_fps: true,
        }
    }
}

impl Config {
    /// Load configuration from a specific path.
    ///
    /// A missing file is not an error and yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Ok(Config::default());
        }

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply command line overrides on top of the file settings
    pub fn apply_cli(&mut self, args: &Args) {
        if let Some(model) = &args.model {
            self.assets.model = model.clone();
        }
        if let Some(texture) = &args.texture {
            self.assets.texture = texture.clone();
        }
        if let Some(mode) = &args.present_mode {
            self.graphics.present_mode = mode.clone();
        }
        if args.no_validation {
            self.debug.validation_layers = false;
        }
    }

    /// Frames the CPU may record ahead of the GPU (never less than one)
    pub fn frames_in_flight(&self) -> usize {
        self.graphics.max_frames_in_flight.max(1)
    }

    /// Get present mode as Vulkan enum
    pub fn present_mode(&self) -> ash::vk::PresentModeKHR {
        match self.graphics.present_mode.to_lowercase().as_str() {
            "immediate" => ash::vk::PresentModeKHR::IMMEDIATE,
            "mailbox" => ash::vk::PresentModeKHR::MAILBOX,
            "fifo" => ash::vk::PresentModeKHR::FIFO,
            "fifo_relaxed" => ash::vk::PresentModeKHR::FIFO_RELAXED,
            _ => {
                log::warn!(
                    "Unknown present mode '{}', defaulting to MAILBOX",
                    self.graphics.present_mode
                );
                ash::vk::PresentModeKHR::MAILBOX
            }
        }
    }

    pub fn log_level(&self) -> LevelFilter {
        self.debug.log_level.parse().unwrap_or(LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk;
    use clap::Parser;

    #[test]
    fn empty_file_yields_defaults() {
        let config = Config::from_toml_str("").unwrap();
        assert_eq!(config.window.width, 800);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.graphics.max_frames_in_flight, 2);
        assert_eq!(config.assets.model, PathBuf::from("models/viking_room.obj"));
        assert!(config.debug.validation_layers);
    }

    #[test]
    fn partial_sections_keep_remaining_defaults() {
        let config = Config::from_toml_str(
            r#"
            [window]
            width = 1920

            [graphics]
            present_mode = "fifo"
            msaa_samples = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.window.title, "Mesh Viewer");
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert_eq!(config.graphics.msaa_samples, 4);
        assert_eq!(config.graphics.clear_color, [0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::from_toml_str("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_yields_defaults() {
        let config = Config::load_from_path("does/not/exist/config.toml").unwrap();
        assert_eq!(config.graphics.present_mode, "mailbox");
    }

    #[test]
    fn present_mode_names_are_case_insensitive() {
        let mut config = Config::default();
        config.graphics.present_mode = "Immediate".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::IMMEDIATE);

        config.graphics.present_mode = "FIFO_RELAXED".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO_RELAXED);
    }

    #[test]
    fn unknown_present_mode_falls_back_to_mailbox() {
        let mut config = Config::default();
        config.graphics.present_mode = "triple".to_string();
        assert_eq!(config.present_mode(), vk::PresentModeKHR::MAILBOX);
    }

    #[test]
    fn frames_in_flight_is_at_least_one() {
        let mut config = Config::default();
        config.graphics.max_frames_in_flight = 0;
        assert_eq!(config.frames_in_flight(), 1);
    }

    #[test]
    fn log_level_parses_or_defaults_to_info() {
        let mut config = Config::default();
        config.debug.log_level = "debug".to_string();
        assert_eq!(config.log_level(), LevelFilter::Debug);

        config.debug.log_level = "loud".to_string();
        assert_eq!(config.log_level(), LevelFilter::Info);
    }

    #[test]
    fn cli_overrides_file_settings() {
        let args = Args::parse_from([
            "mesh-viewer",
            "cube.obj",
            "cube.png",
            "--present-mode",
            "fifo",
            "--no-validation",
        ]);
        let mut config = Config::default();
        config.apply_cli(&args);

        assert_eq!(config.assets.model, PathBuf::from("cube.obj"));
        assert_eq!(config.assets.texture, PathBuf::from("cube.png"));
        assert_eq!(config.present_mode(), vk::PresentModeKHR::FIFO);
        assert!(!config.debug.validation_layers);
    }

    #[test]
    fn cli_without_arguments_changes_nothing() {
        let args = Args::parse_from(["mesh-viewer"]);
        let mut config = Config::default();
        config.apply_cli(&args);

        assert_eq!(config.assets.texture, PathBuf::from("textures/viking_room.png"));
        assert!(config.debug.validation_layers);
    }
}
