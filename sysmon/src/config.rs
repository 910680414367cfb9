use crate::sampler::DEFAULT_CPU_INTERVAL;
use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::Path;
use std::time::Duration;

const MAX_CPU_SAMPLE_INTERVAL_S: f64 = 60.0;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub server: ServerConfig,
    pub log: LogConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigValidationError {
    #[error("Invalid port: {0}")]
    InvalidPort(u16),
    #[error("Invalid host: {0}")]
    InvalidHost(String),
    #[error("Invalid {0}: must be > 0")]
    ZeroCapacity(&'static str),
    #[error("Invalid cpu_sample_interval_s: {0} (must be between 0 and 60)")]
    InvalidCpuInterval(f64),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Options the dashboard recognizes. Serialized as-is by the config endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DashboardConfig {
    /// Client poll interval for metrics.
    pub refresh_rate_ms: u64,
    pub max_history_points: usize,
    /// Client-side idle cutoff.
    pub idle_timeout_ms: u64,
    pub console_max_lines: usize,
    /// Client poll interval for the console.
    pub console_refresh_ms: u64,
    pub cpu_sample_interval_s: f64,
    /// Lines containing any of these are never captured.
    pub console_filters: Vec<String>,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            refresh_rate_ms: 2500,
            max_history_points: 30,
            idle_timeout_ms: 300_000,
            console_max_lines: 100,
            console_refresh_ms: 5000,
            cpu_sample_interval_s: DEFAULT_CPU_INTERVAL.as_secs_f64(),
            console_filters: vec![
                "GET /update_data".to_string(),
                "GET /get-console-output".to_string(),
            ],
        }
    }
}

impl DashboardConfig {
    pub fn cpu_sample_interval(&self) -> Duration {
        Duration::from_secs_f64(self.cpu_sample_interval_s)
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.max_history_points == 0 {
            return Err(ConfigValidationError::ZeroCapacity("max_history_points"));
        }
        if self.console_max_lines == 0 {
            return Err(ConfigValidationError::ZeroCapacity("console_max_lines"));
        }
        let interval = self.cpu_sample_interval_s;
        if !interval.is_finite() || !(0.0..=MAX_CPU_SAMPLE_INTERVAL_S).contains(&interval) {
            return Err(ConfigValidationError::InvalidCpuInterval(interval));
        }
        Ok(())
    }
}

impl Settings {
    /// Load settings, highest priority first:
    ///
    /// 1. Environment variables (`SYSMON__DASHBOARD__MAX_HISTORY_POINTS`, ...)
    /// 2. File named by `SYSMON_CONFIG_PATH`
    /// 3. `sysmon.toml` in the working directory
    /// 4. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_paths(&["sysmon"])
    }

    pub fn load_from_paths(paths: &[&str]) -> Result<Self, ConfigError> {
        let custom_path = std::env::var("SYSMON_CONFIG_PATH").ok();
        Self::load_with(paths, custom_path.as_deref())
    }

    /// Like [`Settings::load_from_paths`], with the explicit config path passed in.
    /// A `custom_path` that does not exist is an error, not a silent fallback.
    pub fn load_with(paths: &[&str], custom_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = ConfigLoader::builder();

        for path in paths {
            builder = builder.add_source(File::with_name(path).required(false));
        }

        if let Some(custom_path) = custom_path {
            if !Path::new(custom_path).exists() {
                return Err(ConfigError::NotFound(format!(
                    "SYSMON_CONFIG_PATH points at a missing file: {}",
                    custom_path
                )));
            }
            builder = builder.add_source(File::with_name(custom_path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("SYSMON")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("dashboard.console_filters")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.server.port == 0 {
            return Err(ConfigValidationError::InvalidPort(self.server.port));
        }
        if self.server.host.parse::<IpAddr>().is_err() {
            return Err(ConfigValidationError::InvalidHost(self.server.host.clone()));
        }
        self.dashboard.validate()
    }

    pub fn load_and_validate() -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let settings = Self::load()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Only meaningful after [`Settings::validate`] succeeded.
    pub fn bind_addr(&self) -> Result<SocketAddr, ConfigValidationError> {
        let ip: IpAddr = self
            .server
            .host
            .parse()
            .map_err(|_| ConfigValidationError::InvalidHost(self.server.host.clone()))?;
        Ok(SocketAddr::new(ip, self.server.port))
    }

    pub fn print_summary(&self) {
        let d = &self.dashboard;
        println!("Configuration:");
        println!("   Server: http://{}:{}", self.server.host, self.server.port);
        println!("   History: {} points, CPU window {}s", d.max_history_points, d.cpu_sample_interval_s);
        println!("   Console: {} lines, filters {:?}", d.console_max_lines, d.console_filters);
        println!(
            "   Client: refresh {}ms, console refresh {}ms, idle after {}ms",
            d.refresh_rate_ms, d.console_refresh_ms, d.idle_timeout_ms
        );
    }
}
