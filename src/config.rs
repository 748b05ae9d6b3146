// =============================================================================
// CONFIGURATION - Load settings from config.toml
// =============================================================================
//
// Every section is optional; a missing or broken file yields the defaults.

use crate::assets::ArchiveVersion;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

/// Root configuration structure
#[derive(Debug, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct Config {
    pub window: WindowConfig,
    pub graphics: GraphicsConfig,
    pub assets: AssetsConfig,
    pub debug: DebugConfig,
}

/// Window settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct WindowConfig {
    pub title: String,
    pub width: u32,
    pub height: u32,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            title: "Mini Renderer".to_string(),
            width: 800,
            height: 600,
        }
    }
}

/// Graphics settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct GraphicsConfig {
    pub clear_color: [f32; 4],
}

impl Default for GraphicsConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}

/// Where the scene comes from
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AssetsConfig {
    pub archive: PathBuf,
    /// `mipmapped`, or `legacy` for archives written with `asset-packer --legacy`
    pub archive_version: ArchiveVersion,
    /// Texture name inside the archive; none draws untextured white
    pub texture: Option<String>,
    /// Model name inside the archive; none draws the built-in quads
    pub model: Option<String>,
    pub vertex_shader: PathBuf,
    pub fragment_shader: PathBuf,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            archive: PathBuf::from("assets/assets.bin"),
            archive_version: ArchiveVersion::Mipmapped,
            texture: None,
            model: None,
            vertex_shader: PathBuf::from("shaders/scene.vert.spv"),
            fragment_shader: PathBuf::from("shaders/scene.frag.spv"),
        }
    }
}

/// Debug settings
#[derive(Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct DebugConfig {
    pub validation_layers: bool,
    pub log_level: String,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            validation_layers: cfg!(debug_assertions),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from `config.toml`, falling back to defaults
    pub fn load() -> Self {
        Self::load_or_default(DEFAULT_CONFIG_PATH)
    }

    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        Self::load_from_path(path).unwrap_or_else(|e| {
            log::warn!("Failed to load {:?}: {:#}. Using defaults.", path, e);
            Config::default()
        })
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

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        log::info!("Loaded configuration from {:?}", path);
        log::debug!("Config: {:?}", config);

        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// `debug.log_level` as a log filter, `info` when unrecognized
    pub fn log_filter(&self) -> log::LevelFilter {
        self.debug
            .log_level
            .parse()
            .unwrap_or(log::LevelFilter::Info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(Config::parse("").unwrap(), Config::default());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let config = Config::parse(
            r#"
            [window]
            width = 1024

            [assets]
            texture = "texture"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.width, 1024);
        assert_eq!(config.window.height, 600);
        assert_eq!(config.assets.texture.as_deref(), Some("texture"));
        assert_eq!(config.assets.model, None);
        assert_eq!(config.assets.archive_version, ArchiveVersion::Mipmapped);
        assert_eq!(config.graphics, GraphicsConfig::default());
    }

    #[test]
    fn full_file_parses() {
        let config = Config::parse(
            r#"
            [window]
            title = "Demo"
            width = 640
            height = 480

            [graphics]
            clear_color = [0.1, 0.2, 0.3, 1.0]

            [assets]
            archive = "out/assets.bin"
            archive_version = "legacy"
            texture = "wall"
            model = "cube"
            vertex_shader = "a.spv"
            fragment_shader = "b.spv"

            [debug]
            validation_layers = false
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.window.title, "Demo");
        assert_eq!(config.graphics.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_eq!(config.assets.archive, PathBuf::from("out/assets.bin"));
        assert_eq!(config.assets.archive_version, ArchiveVersion::Legacy);
        assert_eq!(config.assets.model.as_deref(), Some("cube"));
        assert!(!config.debug.validation_layers);
        assert_eq!(config.log_filter(), log::LevelFilter::Debug);
    }

    #[test]
    fn unknown_archive_version_is_an_error() {
        assert!(Config::parse("[assets]\narchive_version = \"v3\"").is_err());
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(Config::parse("[window]\nwidth = \"wide\"").is_err());
    }

    #[test]
    fn missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("mini-renderer-no-such-config.toml");
        assert_eq!(Config::load_from_path(&path).unwrap(), Config::default());
    }

    #[test]
    fn broken_file_falls_back_to_defaults() {
        let path = std::env::temp_dir().join(format!("mini-renderer-broken-{}.toml", std::process::id()));
        std::fs::write(&path, "[[[").unwrap();
        assert_eq!(Config::load_or_default(&path), Config::default());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn unknown_log_level_falls_back_to_info() {
        let mut config = Config::default();
        config.debug.log_level = "chatty".into();
        assert_eq!(config.log_filter(), log::LevelFilter::Info);
    }
}
