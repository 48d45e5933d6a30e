use anyhow::{Context, Result};
use common::{HandlerConfig, HostInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::validate_enum;

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralSettings,

    #[serde(default)]
    pub key: Vec<KeyConfig>,

    #[serde(default)]
    pub knob: Vec<KnobConfig>,
}

/// General daemon settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralSettings {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// TTF/OTF font for text overlays; system fonts are probed otherwise
    #[serde(default)]
    pub font: Option<String>,

    /// Directory receiving the latest frame of every control as PNG
    #[serde(default)]
    pub output_dir: Option<String>,

    #[serde(default = "default_icon_size")]
    pub icon_size: u32,

    #[serde(default = "default_lcd_width")]
    pub lcd_width: u32,

    #[serde(default = "default_lcd_height")]
    pub lcd_height: u32,
}

impl Default for GeneralSettings {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            font: None,
            output_dir: None,
            icon_size: default_icon_size(),
            lcd_width: default_lcd_width(),
            lcd_height: default_lcd_height(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_icon_size() -> u32 {
    72
}
fn default_lcd_width() -> u32 {
    200
}
fn default_lcd_height() -> u32 {
    100
}

impl GeneralSettings {
    pub fn host_info(&self) -> HostInfo {
        HostInfo {
            icon_size: self.icon_size,
            lcd_width: self.lcd_width,
            lcd_height: self.lcd_height,
        }
    }

    pub fn font_path(&self) -> Option<PathBuf> {
        self.font.as_deref().map(expand)
    }

    pub fn output_dir(&self) -> Option<PathBuf> {
        self.output_dir.as_deref().map(expand)
    }
}

/// One key: an optional icon handler and an optional press handler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KeyConfig {
    pub index: u8,

    #[serde(default)]
    pub icon_handler: Option<String>,

    #[serde(default)]
    pub icon_fields: HandlerConfig,

    #[serde(default)]
    pub key_handler: Option<String>,

    #[serde(default)]
    pub key_fields: HandlerConfig,
}

/// One knob: an optional LCD segment handler and an optional input handler
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct KnobConfig {
    pub index: u8,

    #[serde(default)]
    pub lcd_handler: Option<String>,

    #[serde(default)]
    pub lcd_fields: HandlerConfig,

    #[serde(default)]
    pub knob_handler: Option<String>,

    #[serde(default)]
    pub knob_fields: HandlerConfig,
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

impl Config {
    /// Load configuration from the default location
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;
        Self::load_from_path(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!(
                "Config file not found at {}, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = Self::parse(&contents)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;

        log::info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("Failed to parse config")?;
        config.validate()?;
        Ok(config)
    }

    /// Get the default config file path
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .context("Failed to get config directory")?
            .join("deckhand");

        Ok(config_dir.join("config.toml"))
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        self.validate_log_level(&self.general.log_level)?;

        let general = &self.general;
        if general.icon_size == 0 || general.lcd_width == 0 || general.lcd_height == 0 {
            anyhow::bail!("Control sizes must be non-zero");
        }

        Self::validate_indices("key", self.key.iter().map(|k| k.index))?;
        Self::validate_indices("knob", self.knob.iter().map(|k| k.index))?;

        Ok(())
    }

    fn validate_log_level(&self, level: &str) -> Result<()> {
        validate_enum!(level, "trace", "debug", "info", "warn", "error")
    }

    fn validate_indices(kind: &str, indices: impl Iterator<Item = u8>) -> Result<()> {
        let mut seen = HashSet::new();
        for index in indices {
            if !seen.insert(index) {
                anyhow::bail!("Duplicate {} index: {}", kind, index);
            }
        }
        Ok(())
    }
}
