//! Configuration management for PlaneCalibrate

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// A 2D point in image pixel coordinates
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Integer pixel position, truncated toward zero
    pub fn to_pixel(&self) -> (i64, i64) {
        (self.x as i64, self.y as i64)
    }

    /// Whether the point lies inside an image of the given size
    pub fn within(&self, width: u32, height: u32) -> bool {
        self.x >= 0.0 && self.y >= 0.0 && self.x < width as f64 && self.y < height as f64
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl From<(f64, f64)> for Point {
    fn from((x, y): (f64, f64)) -> Self {
        Self { x, y }
    }
}

/// Web UI server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8092,
        }
    }
}

/// Input handling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputConfig {
    /// Where the first frame of a video is written before calibration
    pub first_frame: PathBuf,
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            first_frame: PathBuf::from("first_frame.jpg"),
        }
    }
}

/// Output artifacts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Array file holding the source quadrilateral, overwritten on every save
    pub points_file: PathBuf,
    /// JPEG quality used when publishing frames to the UI
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

fn default_jpeg_quality() -> u8 {
    85
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            points_file: PathBuf::from("source_points.npy"),
            jpeg_quality: default_jpeg_quality(),
        }
    }
}

/// Rectified preview settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewConfig {
    /// Preview width as a fraction of the image height
    pub width_ratio: f64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self { width_ratio: 0.5 }
    }
}

/// Overlay drawing settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverlayConfig {
    pub marker_radius: i32,
    pub line_thickness: u32,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            marker_radius: 5,
            line_thickness: 2,
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub input: InputConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub preview: PreviewConfig,

    #[serde(default)]
    pub overlay: OverlayConfig,
}

impl Config {
    /// Load configuration from a file, or create default if it doesn't exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {:?}", path))?;
            let config: Config = toml::from_str(&content)
                .with_context(|| format!("Failed to parse config from {:?}", path))?;
            config.validate()?;
            tracing::info!("Loaded configuration from {:?}", path);
            Ok(config)
        } else {
            let config = Config::default();
            config.save(path)?;
            tracing::info!("Created default configuration at {:?}", path);
            Ok(config)
        }
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .context("Failed to serialize configuration")?;

        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config to {:?}", path))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(self.preview.width_ratio.is_finite() && self.preview.width_ratio > 0.0) {
            anyhow::bail!(
                "preview.width_ratio must be a positive number, got {}",
                self.preview.width_ratio
            );
        }
        if self.overlay.marker_radius < 0 {
            anyhow::bail!("overlay.marker_radius must not be negative");
        }
        if !(1..=100).contains(&self.output.jpeg_quality) {
            anyhow::bail!("output.jpeg_quality must be within 1..=100");
        }
        Ok(())
    }
}
