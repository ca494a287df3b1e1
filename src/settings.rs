//! Daemon settings
//!
//! Read from TOML. Every field is optional; a missing default file means
//! all defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{validate_device_name, DEFAULT_BATTERY, DEFAULT_USB};
use crate::error::SettingsError;
use crate::pd_mode::DEFAULT_PD_VERIFED_PATH;
use crate::power_supply::DEFAULT_ROOT;
use crate::scheduler::SchedulerConfig;

/// Settings file used when none is given
pub const DEFAULT_SETTINGS_PATH: &str = "/etc/chg-override/config.toml";

/// Which D-Bus bus the control interface lives on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Battery power supply name
    pub battery: String,
    /// USB input power supply name
    pub usb: String,
    /// Heartbeat re-applies after a silent pd_verifed reset
    pub auto_reapply: bool,
    /// Debug logging
    pub verbose: bool,
    /// Vendor `pd_verifed` node
    pub pd_verifed_path: PathBuf,
    /// Power supply class directory
    pub power_supply_root: PathBuf,
    pub debounce_ms: u64,
    pub heartbeat_secs: u64,
    pub bus: BusKind,
    /// Batch applied once at startup, in control-channel syntax
    pub initial: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            battery: DEFAULT_BATTERY.to_string(),
            usb: DEFAULT_USB.to_string(),
            auto_reapply: true,
            verbose: false,
            pd_verifed_path: PathBuf::from(DEFAULT_PD_VERIFED_PATH),
            power_supply_root: PathBuf::from(DEFAULT_ROOT),
            debounce_ms: 200,
            heartbeat_secs: 5,
            bus: BusKind::System,
            initial: None,
        }
    }
}

impl Settings {
    pub fn default_path() -> PathBuf {
        PathBuf::from(DEFAULT_SETTINGS_PATH)
    }

    /// Load settings.
    ///
    /// An explicit path must exist. Without one, the default path is tried
    /// and defaults are used if it is absent.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (Self::default_path(), false),
        };
        if !required && !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&path).map_err(|source| SettingsError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content, &path)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, SettingsError> {
        let settings: Settings = toml::from_str(content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        validate_device_name(&self.battery)?;
        validate_device_name(&self.usb)?;
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            debounce: Duration::from_millis(self.debounce_ms.max(1)),
            heartbeat: Duration::from_secs(self.heartbeat_secs.max(1)),
        }
    }
}
