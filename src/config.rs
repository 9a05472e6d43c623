//! Runtime configuration, loaded from a JSON file.
//!
//! Every field has a default so an empty object (or no file at all) is a
//! valid configuration.

use anyhow::{Context as _, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// How characters without a keystroke in the active layout are typed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnicodeFallback {
    /// Drop the character silently.
    Skip,
    /// Drop the character and log it.
    #[default]
    Warn,
    /// Decompose and keep the printable ASCII part, or type `?`.
    Ascii,
}

impl std::str::FromStr for UnicodeFallback {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "skip" => Ok(Self::Skip),
            "warn" => Ok(Self::Warn),
            "ascii" => Ok(Self::Ascii),
            other => Err(anyhow::anyhow!("unknown unicode fallback mode: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// argv of the program that yields an elevated shell reading commands on stdin.
    pub elevate: Vec<String>,
    pub state_file: Option<PathBuf>,
    pub typing_speed_factor: f64,
    pub risky_fast_mode: bool,
    pub unicode_fallback: UnicodeFallback,
    pub host_wait_timeout_ms: u64,
    /// 0 disables connection polling.
    pub udc_poll_interval_ms: u64,
    pub hid_active_grace_ms: u64,
    pub configfs_root: String,
    pub hid_device_prefix: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            elevate: vec!["su".to_string()],
            state_file: None,
            typing_speed_factor: 1.0,
            risky_fast_mode: false,
            unicode_fallback: UnicodeFallback::Warn,
            host_wait_timeout_ms: 10_000,
            udc_poll_interval_ms: 2_000,
            hid_active_grace_ms: 1_500,
            configfs_root: "/config/usb_gadget".to_string(),
            hid_device_prefix: "/dev/hidg".to_string(),
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// An explicit `path` must exist. Without one, the per-user config file is
    /// used when present and defaults otherwise.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let resolved = match path {
            Some(p) => Some(p.to_path_buf()),
            None => default_config_path().filter(|p| p.is_file()),
        };
        let Some(file) = resolved else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(&file)
            .with_context(|| format!("Failed to read config file: {}", file.display()))?;
        let config: Config = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse config file: {}", file.display()))?;
        Ok(config.normalized())
    }

    fn normalized(mut self) -> Self {
        if self.elevate.is_empty() {
            self.elevate = Self::default().elevate;
        }
        self.hid_active_grace_ms = self.hid_active_grace_ms.min(5_000);
        self
    }

    /// Where the active gadget record is persisted.
    pub fn state_file_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("hidscript")
                .join("active_gadget.json")
        })
    }
}

pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("hidscript").join("config.json"))
}
