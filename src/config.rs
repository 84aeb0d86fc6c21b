use std::{fs, path::Path, path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_GPIO_LINE: u32 = 23;
pub const DEFAULT_OFF_DELAY_SECS: u64 = 180;
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_GPIO_CHIP: &str = "/dev/gpiochip0";
pub const DEFAULT_SIGNAL_INTERFACE: &str = "com.redhat.PrinterSpooler";
pub const DEFAULT_SIGNAL_MEMBER: &str = "JobQueuedLocal";

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Sysfs,
    Gpiod,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum BusKind {
    #[default]
    System,
    Session,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct GpioConfig {
    pub line: u32,
    pub backend: BackendKind,
    pub sysfs_root: PathBuf,
    pub chip: PathBuf,
    pub active_low: bool,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            line: DEFAULT_GPIO_LINE,
            backend: BackendKind::default(),
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            chip: PathBuf::from(DEFAULT_GPIO_CHIP),
            active_low: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct BusConfig {
    pub bus: BusKind,
    pub interface: String,
    pub member: String,
    pub sender: Option<String>,
    pub path: Option<String>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            bus: BusKind::default(),
            interface: DEFAULT_SIGNAL_INTERFACE.to_string(),
            member: DEFAULT_SIGNAL_MEMBER.to_string(),
            sender: None,
            path: None,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub gpio: GpioConfig,
    pub off_delay_secs: u64,
    pub power_on_at_start: bool,
    pub bus: BusConfig,
    pub job_queue_capacity: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            gpio: GpioConfig::default(),
            off_delay_secs: DEFAULT_OFF_DELAY_SECS,
            power_on_at_start: false,
            bus: BusConfig::default(),
            job_queue_capacity: 32,
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.off_delay_secs == 0 {
            return Err(AppError::Config(
                "off_delay_secs must be a positive number of seconds".into(),
            ));
        }
        if self.job_queue_capacity == 0 {
            return Err(AppError::Config("job_queue_capacity must be non-zero".into()));
        }
        if self.bus.interface.is_empty() || self.bus.member.is_empty() {
            return Err(AppError::Config(
                "bus interface and member must not be empty".into(),
            ));
        }
        Ok(())
    }

    pub fn off_delay(&self) -> Duration {
        Duration::from_secs(self.off_delay_secs)
    }
}
