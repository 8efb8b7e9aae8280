use std::{fs, path::Path, path::PathBuf};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";
pub const DEFAULT_LOG_DIR: &str = "logs";

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct HttpConfig {
    pub unix_socket: Option<String>,
    pub host: Option<String>,
    pub path: String,
    pub timeout: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct GpioConfig {
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default)]
    pub pins: FxHashMap<u32, String>,
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            pins: FxHashMap::default(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct TaskConfig {
    pub command: String,
    #[serde(default)]
    pub failure_codes: Vec<i32>,
    #[serde(default)]
    pub log_file: Option<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub http: HttpConfig,
    #[serde(default)]
    pub gpio: GpioConfig,
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    #[serde(default)]
    pub tasks: FxHashMap<String, TaskConfig>,
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}

fn default_log_dir() -> PathBuf {
    PathBuf::from(DEFAULT_LOG_DIR)
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, AppError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_json(&contents)
    }

    pub fn from_json(contents: &str) -> Result<Self, AppError> {
        let config: Self = serde_json::from_str(contents)
            .map_err(|e| AppError::Config(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if self.http.unix_socket.is_none() && self.http.host.is_none() {
            return Err(AppError::Config(
                "either 'unix_socket' or 'host' must be specified".into(),
            ));
        }
        if let Some((name, _)) = self
            .tasks
            .iter()
            .find(|(_, task)| task.command.split_whitespace().next().is_none())
        {
            return Err(AppError::Config(format!("task '{name}' has an empty command")));
        }
        Ok(())
    }
}
