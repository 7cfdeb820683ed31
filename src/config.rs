//! Application configuration loaded from TOML.
//!
//! Every field has a default, so an empty file (or no file) is valid:
//!
//! ```toml
//! [fetch]
//! url = "https://example.org/cube_s3d.fits"
//! timeout_secs = 120
//!
//! [extraction]
//! method = "exact"            # or "center", "subpixel", "subpixel:10"
//! reference_wavelength_um = 4.5
//! scale_with_wavelength = true
//! mask_non_finite = true
//! convert_to_jy = true
//!
//! [display]
//! colormap = "heat"
//! stretch = { percentile = 99.5 }
//! ```

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::color::{ColorMapKind, Stretch};
use crate::photometry::ExtractionParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Top-level configuration shared by the viewer and the CLI.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub fetch: FetchConfig,
    pub extraction: ExtractionParams,
    pub display: DisplayConfig,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(&path)?;
        Self::parse(&contents)
    }

    pub fn parse(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Load `path` if given, otherwise fall back to defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ConfigError> {
        match path {
            Some(p) => {
                let cfg = Self::load_from_file(p)?;
                log::info!("Loaded configuration from {}", p.display());
                Ok(cfg)
            }
            None => Ok(Self::default()),
        }
    }
}

/// Where and how sample data is downloaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Sample cube URL; there is no built-in default.
    pub url: Option<String>,
    /// Override for the download cache directory.
    pub cache_dir: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            url: None,
            cache_dir: None,
            timeout_secs: 300,
        }
    }
}

impl FetchConfig {
    /// Configured cache directory, else `$HOME/.cache/rusty-cube`.
    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            let home = env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".cache").join("rusty-cube")
        })
    }
}

/// How slices are rendered in the viewer and in previews.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub stretch: Stretch,
    pub colormap: ColorMapKind,
}
