/*!
Configuration management for the I-Scan Wizard.
*/

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use shared::operation::check_delay_secs;
use shared::rig::{DEFAULT_MOTOR_SPEED, DEFAULT_WHEEL_DIAMETER_MM};
use shared::scan_plan::ScanPlanConfig;
use shared::TargetingGeometry;
use std::path::Path;
use std::time::Duration;

/// Default configuration file name
pub const DEFAULT_CONFIG_FILE: &str = "iscan-wizard.toml";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub device: DeviceConfig,
    pub rig: RigConfig,
    pub executor: ExecutorConfig,
    pub home: HomeConfig,
    pub scan: ScanPlanConfig,
    pub gui: GuiConfig,
}

impl AppConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self {
            device: DeviceConfig::default(),
            rig: RigConfig::default(),
            executor: ExecutorConfig::default(),
            home: HomeConfig::default(),
            scan: ScanPlanConfig::default(),
            gui: GuiConfig::default(),
        }
    }

    /// Load configuration from a TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse config file as TOML")?;

        config.validate()?;
        Ok(config)
    }

    /// Load the file if it exists, otherwise fall back to defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        if path.as_ref().exists() {
            Self::load_from_file(path)
        } else {
            Ok(Self::new())
        }
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .with_context(|| "Failed to serialize config to TOML")?;

        std::fs::write(path.as_ref(), content)
            .with_context(|| format!("Failed to write config file: {}", path.as_ref().display()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.rig
            .geometry
            .validate()
            .context("Invalid rig geometry")?;
        shared::rig::validate_diameter(self.rig.wheel_diameter_mm).context("Invalid rig settings")?;
        anyhow::ensure!(
            !self.device.base_url.trim().is_empty(),
            "device.base_url must not be empty"
        );
        anyhow::ensure!(
            self.device.timeout_ms > 0,
            "device.timeout_ms must be greater than zero"
        );
        for (name, value) in [
            ("executor.operation_delay_secs", self.executor.operation_delay_secs),
            ("executor.photo_delay_secs", self.executor.photo_delay_secs),
            ("home.release_poll_secs", self.home.release_poll_secs),
            ("home.settle_secs", self.home.settle_secs),
            ("home.poll_interval_secs", self.home.poll_interval_secs),
        ] {
            check_delay_secs(name, value)?;
        }
        self.scan.validate().context("Invalid scan plan settings")?;
        Ok(())
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Connection to the rig's HTTP API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Base URL of the microcontroller's web server
    pub base_url: String,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,
}

impl DeviceConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            base_url: "http://192.168.137.7".to_string(),
            timeout_ms: 5000,
        }
    }
}

/// Physical rig description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RigConfig {
    pub geometry: TargetingGeometry,

    /// Drive wheel diameter in millimetres
    pub wheel_diameter_mm: f64,

    /// Motor speed used when an operation does not name one
    pub motor_speed: u32,

    /// Keep the servo aimed at the target after every move
    pub tracking: bool,
}

impl Default for RigConfig {
    fn default() -> Self {
        Self {
            geometry: TargetingGeometry::default(),
            wheel_diameter_mm: DEFAULT_WHEEL_DIAMETER_MM,
            motor_speed: DEFAULT_MOTOR_SPEED,
            tracking: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Pause between queued operations
    pub operation_delay_secs: f64,

    /// Autofocus delay for photo operations without their own `delay`
    pub photo_delay_secs: f64,
}

impl ExecutorConfig {
    pub fn operation_delay(&self) -> Duration {
        Duration::from_secs_f64(self.operation_delay_secs)
    }
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            operation_delay_secs: 0.5,
            photo_delay_secs: 2.0,
        }
    }
}

/// Home routine tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
    /// Button polls while waiting for a held switch to release
    pub release_attempts: u32,
    pub release_poll_secs: f64,

    /// Wait after the release phase before moving
    pub settle_secs: f64,

    /// Steps per seek move
    pub step_size: u32,

    /// Seek moves before giving up on the switch
    pub max_attempts: u32,
    pub poll_interval_secs: f64,

    /// Speed sent with every home move
    pub speed: Option<u32>,
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            release_attempts: 10,
            release_poll_secs: 1.0,
            settle_secs: 1.0,
            step_size: 100,
            max_attempts: 100,
            poll_interval_secs: 0.5,
            speed: None,
        }
    }
}

/// GUI specific configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuiConfig {
    /// Window width
    pub window_width: f32,

    /// Window height
    pub window_height: f32,

    /// Enable dark mode
    pub dark_mode: bool,

    /// Auto-save configuration on exit
    pub auto_save_config: bool,

    /// Lines kept in the log panel
    pub max_log_lines: usize,
}

impl Default for GuiConfig {
    fn default() -> Self {
        Self {
            window_width: 1200.0,
            window_height: 800.0,
            dark_mode: true,
            auto_save_config: true,
            max_log_lines: 500,
        }
    }
}
