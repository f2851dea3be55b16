use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

use crate::registry::METRIC_CARDINALITY;

/// Top-level configuration for the kernwatch agent.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging verbosity (trace, debug, info, warn, error). Default: "info".
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Maximum number of distinct metric ids the store admits.
    /// Default: registry size plus headroom.
    #[serde(default = "default_capacity")]
    pub capacity: usize,

    /// Snapshot export configuration.
    #[serde(default)]
    pub export: ExportConfig,

    /// Synthetic event source configuration.
    #[serde(default)]
    pub synthetic: SyntheticConfig,
}

/// Snapshot export configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ExportConfig {
    /// Interval between scheduled exports. Default: 5s.
    #[serde(default = "default_export_interval", with = "humantime_serde")]
    pub interval: Duration,

    /// Stdout exporter configuration.
    #[serde(default)]
    pub stdout: StdoutExportConfig,

    /// HTTP push exporter configuration.
    #[serde(default)]
    pub http: HttpExportConfig,

    /// Pull-style snapshot server configuration.
    #[serde(default)]
    pub server: SnapshotServerConfig,
}

/// Stdout exporter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StdoutExportConfig {
    /// Enable the stdout exporter. Default: true.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

/// HTTP push exporter configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpExportConfig {
    /// Enable the HTTP exporter. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// HTTP endpoint to POST snapshots to.
    #[serde(default)]
    pub address: String,

    /// Additional HTTP headers.
    #[serde(default)]
    pub headers: HashMap<String, String>,

    /// Maximum duration for one export request. Default: 30s.
    #[serde(default = "default_http_export_timeout", with = "humantime_serde")]
    pub export_timeout: Duration,

    /// Enable HTTP keep-alive connections. Default: true.
    #[serde(default = "default_true")]
    pub keep_alive: bool,
}

/// Pull-style snapshot server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SnapshotServerConfig {
    /// Enable the snapshot server. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Listen address. Default: ":9464".
    #[serde(default = "default_server_addr")]
    pub addr: String,
}

/// Synthetic event source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SyntheticConfig {
    /// Enable the synthetic event source. Default: false.
    #[serde(default)]
    pub enabled: bool,

    /// Interval between synthetic event bursts. Default: 100ms.
    #[serde(default = "default_synthetic_interval", with = "humantime_serde")]
    pub interval: Duration,
}

// --- Default value functions ---

fn default_log_level() -> String {
    "info".to_string()
}

fn default_capacity() -> usize {
    METRIC_CARDINALITY + 4
}

fn default_export_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_true() -> bool {
    true
}

fn default_http_export_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_server_addr() -> String {
    ":9464".to_string()
}

fn default_synthetic_interval() -> Duration {
    Duration::from_millis(100)
}

// --- Default trait impls ---

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            capacity: default_capacity(),
            export: ExportConfig::default(),
            synthetic: SyntheticConfig::default(),
        }
    }
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            interval: default_export_interval(),
            stdout: StdoutExportConfig::default(),
            http: HttpExportConfig::default(),
            server: SnapshotServerConfig::default(),
        }
    }
}

impl Default for StdoutExportConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for HttpExportConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: String::new(),
            headers: HashMap::new(),
            export_timeout: default_http_export_timeout(),
            keep_alive: true,
        }
    }
}

impl Default for SnapshotServerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_server_addr(),
        }
    }
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: default_synthetic_interval(),
        }
    }
}

// --- Validation and loading ---

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;

        let cfg: Config = serde_yaml::from_str(&data)
            .with_context(|| format!("parsing config file {}", path.display()))?;

        cfg.validate()?;

        Ok(cfg)
    }

    /// Validate the configuration for required fields and consistency.
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            bail!("capacity must be positive");
        }

        if self.export.interval.is_zero() {
            bail!("export.interval must be positive");
        }

        if !self.export.stdout.enabled && !self.export.http.enabled && !self.export.server.enabled
        {
            bail!("at least one export path must be enabled");
        }

        if self.export.http.enabled {
            if self.export.http.address.is_empty() {
                bail!("export.http.address is required when enabled");
            }
            if self.export.http.export_timeout.is_zero() {
                bail!("export.http.export_timeout must be positive");
            }
        }

        if self.export.server.enabled && self.export.server.addr.is_empty() {
            bail!("export.server.addr is required when enabled");
        }

        if self.synthetic.enabled && self.synthetic.interval.is_zero() {
            bail!("synthetic.interval must be positive");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = Config::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity, METRIC_CARDINALITY + 4);
        assert_eq!(cfg.export.interval, Duration::from_secs(5));
        assert!(cfg.export.stdout.enabled);
        assert!(!cfg.export.http.enabled);
        assert!(!cfg.synthetic.enabled);
    }

    #[test]
    fn test_parse_minimal_yaml() {
        let cfg: Config = serde_yaml::from_str("capacity: 4\n").unwrap();
        assert_eq!(cfg.capacity, 4);
        assert_eq!(cfg.log_level, "info");
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
log_level: debug
capacity: 32
export:
  interval: 1s
  stdout:
    enabled: false
  http:
    enabled: true
    address: "http://localhost:8686/ingest"
    headers:
      Authorization: "Bearer abc"
    export_timeout: 10s
    keep_alive: false
  server:
    enabled: true
    addr: ":9464"
synthetic:
  enabled: true
  interval: 250ms
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.capacity, 32);
        assert_eq!(cfg.export.interval, Duration::from_secs(1));
        assert!(!cfg.export.stdout.enabled);
        assert!(cfg.export.http.enabled);
        assert_eq!(cfg.export.http.address, "http://localhost:8686/ingest");
        assert_eq!(
            cfg.export.http.headers.get("Authorization").map(String::as_str),
            Some("Bearer abc")
        );
        assert!(!cfg.export.http.keep_alive);
        assert!(cfg.export.server.enabled);
        assert!(cfg.synthetic.enabled);
        assert_eq!(cfg.synthetic.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_validation_zero_capacity() {
        let cfg = Config {
            capacity: 0,
            ..Default::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn test_validation_http_requires_address() {
        let mut cfg = Config::default();
        cfg.export.http.enabled = true;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("export.http.address"));

        cfg.export.http.address = "http://localhost:8686".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_validation_no_export_path() {
        let mut cfg = Config::default();
        cfg.export.stdout.enabled = false;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("at least one export path"));
    }

    #[test]
    fn test_validation_zero_export_interval() {
        let mut cfg = Config::default();
        cfg.export.interval = Duration::ZERO;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("export.interval"));
    }
}
