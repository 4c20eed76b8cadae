//! Layered configuration (TOML file + environment), mirroring the
//! teacher's `figment`-based `Settings` loader. `AppConfig` is the
//! deserialization target; [`DeviceProfile`] and the [`aperture_executor::IsolationConfig`]
//! it builds are what the rest of the binary actually consumes.

use aperture_executor::{IsolationConfig, IsolationLevel};
use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

fn default_device_name() -> String {
    "SimCam".into()
}
fn default_connect_timeout_s() -> f64 {
    5.0
}
fn default_max_retry() -> u32 {
    3
}
fn default_wheel_settle_s() -> f64 {
    30.0
}
fn default_max_memory_mb() -> u64 {
    512
}
fn default_max_cpu_percent() -> u8 {
    100
}
fn default_timeout_s() -> f64 {
    300.0
}

/// On-disk/env shape for the device profile, before resolving `f64` second
/// counts into [`Duration`]s.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceProfileFile {
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default = "default_connect_timeout_s")]
    pub connect_timeout_s: f64,
    #[serde(default = "default_max_retry")]
    pub max_retry: u32,
    #[serde(default = "default_wheel_settle_s")]
    pub wheel_settle_s: f64,
    pub thermal_setpoint_c: Option<f64>,
}

impl Default for DeviceProfileFile {
    fn default() -> Self {
        Self {
            device_name: default_device_name(),
            connect_timeout_s: default_connect_timeout_s(),
            max_retry: default_max_retry(),
            wheel_settle_s: default_wheel_settle_s(),
            thermal_setpoint_c: None,
        }
    }
}

/// Resolved device profile used by the composition root to drive
/// `DeviceCore::connect` and, if present, `ThermalController::start_cooling`.
#[derive(Debug, Clone)]
pub struct DeviceProfile {
    pub device_name: String,
    pub connect_timeout: Duration,
    pub max_retry: u32,
    pub wheel_settle: Duration,
    pub thermal_setpoint_c: Option<f64>,
}

impl From<DeviceProfileFile> for DeviceProfile {
    fn from(file: DeviceProfileFile) -> Self {
        Self {
            device_name: file.device_name,
            connect_timeout: Duration::from_secs_f64(file.connect_timeout_s),
            max_retry: file.max_retry,
            wheel_settle: Duration::from_secs_f64(file.wheel_settle_s),
            thermal_setpoint_c: file.thermal_setpoint_c,
        }
    }
}

/// On-disk/env shape for isolation settings. `level` is a plain string so
/// the TOML file and `APERTURE_ISOLATION_LEVEL` env var can both set it
/// without needing a custom figment value parser.
#[derive(Debug, Clone, Deserialize)]
pub struct IsolationConfigFile {
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default = "default_max_memory_mb")]
    pub max_memory_mb: u64,
    #[serde(default = "default_max_cpu_percent")]
    pub max_cpu_percent: u8,
    #[serde(default = "default_timeout_s")]
    pub timeout_s: f64,
    #[serde(default)]
    pub allow_network: bool,
    #[serde(default = "default_true")]
    pub allow_filesystem: bool,
    #[serde(default)]
    pub worker_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for IsolationConfigFile {
    fn default() -> Self {
        Self {
            level: None,
            max_memory_mb: default_max_memory_mb(),
            max_cpu_percent: default_max_cpu_percent(),
            timeout_s: default_timeout_s(),
            allow_network: false,
            allow_filesystem: true,
            worker_path: None,
        }
    }
}

impl From<IsolationConfigFile> for IsolationConfig {
    fn from(file: IsolationConfigFile) -> Self {
        let level = match file.level.as_deref() {
            Some("none") => IsolationLevel::None,
            Some("sandboxed") => IsolationLevel::Sandboxed,
            _ => IsolationLevel::Subprocess,
        };
        IsolationConfig {
            level,
            max_memory_mb: file.max_memory_mb,
            max_cpu_percent: file.max_cpu_percent,
            timeout: Duration::from_secs_f64(file.timeout_s),
            allow_network: file.allow_network,
            allow_filesystem: file.allow_filesystem,
            worker_path: file.worker_path,
            ..IsolationConfig::default()
        }
    }
}

/// Top-level configuration file shape: `[device]` and `[isolation]` tables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub device: DeviceProfileFile,
    #[serde(default)]
    pub isolation: IsolationConfigFile,
}

/// Loads configuration from `path` (if it exists) merged with
/// `APERTURE_`-prefixed environment variables, env taking precedence.
/// Example: `APERTURE_DEVICE_MAX_RETRY=5` overrides `[device] max_retry`.
pub fn load(path: Option<&std::path::Path>) -> anyhow::Result<AppConfig> {
    let mut figment = Figment::new();
    if let Some(path) = path {
        if path.is_file() {
            figment = figment.merge(Toml::file(path));
        }
    }
    figment = figment.merge(Env::prefixed("APERTURE_").split("_"));
    figment
        .extract()
        .map_err(|e| anyhow::anyhow!("failed to load configuration: {e}"))
}
