//! Configuration system for the unpsp unpacker

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    pub output: OutputConfig,
    pub extract: ExtractConfig,
    pub logging: LoggingConfig,
}

/// Where and how extracted content is written
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Storage device root; `ISO/` and `PSP/` are created below it
    pub root: PathBuf,
    pub image_format: ImageFormat,
}

/// Disc image output format
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum ImageFormat {
    #[default]
    Iso,
    Cso,
}

impl ImageFormat {
    /// File extension for the format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Iso => "iso",
            Self::Cso => "cso",
        }
    }
}

/// Extraction behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractConfig {
    pub partial_output: PartialOutputPolicy,
    /// Delete the package once every item was extracted
    pub remove_source: bool,
}

/// What happens to a half-written output file when an item fails or is cancelled
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum PartialOutputPolicy {
    #[default]
    Remove,
    Keep,
}

/// Logging settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

/// Logging level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("unpsp"),
            image_format: ImageFormat::default(),
        }
    }
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            partial_output: PartialOutputPolicy::default(),
            remove_source: false,
        }
    }
}

impl Config {
    /// Load configuration from the default location, or create it if it doesn't exist
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path();

        if path.exists() {
            Self::load_from(&path)
        } else {
            let config = Self::default();
            config.save_to(&path)?;
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("unpsp")
            .join("config.toml")
    }
}
