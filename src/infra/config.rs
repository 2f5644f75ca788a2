//! Configuration loading from TOML files
//!
//! Config file is selected via:
//! 1. --config <path> command line argument
//! 2. CONFIG_FILE environment variable
//! 3. Default: config/gateway.toml

use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct LinkConfig {
    /// WebSocket endpoint of the session-coordination service
    pub url: String,
    /// Device identity assigned by the service
    pub fandomat_id: u32,
    /// Device authentication token
    pub device_token: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_reconnect_secs")]
    pub reconnect_secs: u64,
    #[serde(default = "default_correlation_timeout_secs")]
    pub correlation_timeout_secs: u64,
}

fn default_version() -> String {
    "1.0.0".to_string()
}

fn default_reconnect_secs() -> u64 {
    3
}

fn default_correlation_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize)]
pub struct SerialConfig {
    #[serde(default = "default_acceptor_port")]
    pub acceptor_port: String,
    #[serde(default = "default_scanner_port")]
    pub scanner_port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_retry_secs")]
    pub retry_secs: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            acceptor_port: default_acceptor_port(),
            scanner_port: default_scanner_port(),
            baud: default_baud(),
            retry_secs: default_retry_secs(),
        }
    }
}

fn default_acceptor_port() -> String {
    "/dev/ttyUSB0".to_string()
}

fn default_scanner_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baud() -> u32 {
    9600
}

fn default_retry_secs() -> u64 {
    2
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    #[serde(default = "default_flush_timeout_ms")]
    pub flush_timeout_ms: u64,
    #[serde(default = "default_max_line_len")]
    pub max_line_len: usize,
    /// Log every raw chunk as hex + ASCII (noisy, for bring-up)
    #[serde(default)]
    pub log_raw_chunks: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            flush_timeout_ms: default_flush_timeout_ms(),
            max_line_len: default_max_line_len(),
            log_raw_chunks: false,
        }
    }
}

fn default_flush_timeout_ms() -> u64 {
    150
}

fn default_max_line_len() -> usize {
    512
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_inactivity_timeout_secs")]
    pub inactivity_timeout_secs: u64,
    #[serde(default = "default_watchdog_poll_secs")]
    pub watchdog_poll_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            inactivity_timeout_secs: default_inactivity_timeout_secs(),
            watchdog_poll_secs: default_watchdog_poll_secs(),
        }
    }
}

fn default_inactivity_timeout_secs() -> u64 {
    90
}

fn default_watchdog_poll_secs() -> u64 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_sequence_file")]
    pub sequence_file: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            sequence_file: default_sequence_file(),
        }
    }
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_sequence_file() -> String {
    "bottle_seq".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct TomlConfig {
    pub link: LinkConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Main configuration struct used throughout the application.
/// Loaded once at startup, never mutated.
#[derive(Debug, Clone)]
pub struct Config {
    ws_url: String,
    fandomat_id: u32,
    device_token: String,
    version: String,
    reconnect_delay: Duration,
    correlation_timeout: Duration,
    acceptor_port: String,
    scanner_port: String,
    baud: u32,
    serial_retry_delay: Duration,
    flush_timeout: Duration,
    max_line_len: usize,
    log_raw_chunks: bool,
    inactivity_timeout: Duration,
    watchdog_poll: Duration,
    log_dir: String,
    sequence_file: String,
    config_file: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ws_url: "wss://api.yaxshi.link/ws/fandomats".to_string(),
            fandomat_id: 0,
            device_token: String::new(),
            version: default_version(),
            reconnect_delay: Duration::from_secs(default_reconnect_secs()),
            correlation_timeout: Duration::from_secs(default_correlation_timeout_secs()),
            acceptor_port: default_acceptor_port(),
            scanner_port: default_scanner_port(),
            baud: default_baud(),
            serial_retry_delay: Duration::from_secs(default_retry_secs()),
            flush_timeout: Duration::from_millis(default_flush_timeout_ms()),
            max_line_len: default_max_line_len(),
            log_raw_chunks: false,
            inactivity_timeout: Duration::from_secs(default_inactivity_timeout_secs()),
            watchdog_poll: Duration::from_secs(default_watchdog_poll_secs()),
            log_dir: default_log_dir(),
            sequence_file: default_sequence_file(),
            config_file: "default".to_string(),
        }
    }
}

impl Config {
    /// Determine config file path from args or environment
    pub fn resolve_config_path(args: &[String]) -> String {
        for (i, arg) in args.iter().enumerate() {
            if arg == "--config" {
                if let Some(path) = args.get(i + 1) {
                    return path.clone();
                }
            }
            if let Some(path) = arg.strip_prefix("--config=") {
                return path.to_string();
            }
        }

        if let Ok(path) = env::var("CONFIG_FILE") {
            return path;
        }

        "config/gateway.toml".to_string()
    }

    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;

        let toml_config: TomlConfig = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;

        Ok(Self {
            ws_url: toml_config.link.url,
            fandomat_id: toml_config.link.fandomat_id,
            device_token: toml_config.link.device_token,
            version: toml_config.link.version,
            reconnect_delay: Duration::from_secs(toml_config.link.reconnect_secs),
            correlation_timeout: Duration::from_secs(toml_config.link.correlation_timeout_secs),
            acceptor_port: toml_config.serial.acceptor_port,
            scanner_port: toml_config.serial.scanner_port,
            baud: toml_config.serial.baud,
            serial_retry_delay: Duration::from_secs(toml_config.serial.retry_secs),
            flush_timeout: Duration::from_millis(toml_config.scanner.flush_timeout_ms),
            max_line_len: toml_config.scanner.max_line_len,
            log_raw_chunks: toml_config.scanner.log_raw_chunks,
            inactivity_timeout: Duration::from_secs(toml_config.session.inactivity_timeout_secs),
            watchdog_poll: Duration::from_secs(toml_config.session.watchdog_poll_secs),
            log_dir: toml_config.storage.log_dir,
            sequence_file: toml_config.storage.sequence_file,
            config_file: path.display().to_string(),
        })
    }

    /// Load configuration - tries the TOML file first, falls back to defaults
    pub fn load_from_path(path: &str) -> Self {
        match Self::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn ws_url(&self) -> &str {
        &self.ws_url
    }

    pub fn fandomat_id(&self) -> u32 {
        self.fandomat_id
    }

    pub fn device_token(&self) -> &str {
        &self.device_token
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn reconnect_delay(&self) -> Duration {
        self.reconnect_delay
    }

    pub fn correlation_timeout(&self) -> Duration {
        self.correlation_timeout
    }

    pub fn acceptor_port(&self) -> &str {
        &self.acceptor_port
    }

    pub fn scanner_port(&self) -> &str {
        &self.scanner_port
    }

    pub fn baud(&self) -> u32 {
        self.baud
    }

    pub fn serial_retry_delay(&self) -> Duration {
        self.serial_retry_delay
    }

    pub fn flush_timeout(&self) -> Duration {
        self.flush_timeout
    }

    pub fn max_line_len(&self) -> usize {
        self.max_line_len
    }

    pub fn log_raw_chunks(&self) -> bool {
        self.log_raw_chunks
    }

    pub fn inactivity_timeout(&self) -> Duration {
        self.inactivity_timeout
    }

    pub fn watchdog_poll(&self) -> Duration {
        self.watchdog_poll
    }

    pub fn log_dir(&self) -> &str {
        &self.log_dir
    }

    pub fn sequence_file(&self) -> &str {
        &self.sequence_file
    }

    pub fn config_file(&self) -> &str {
        &self.config_file
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.baud(), 9600);
        assert_eq!(config.acceptor_port(), "/dev/ttyUSB0");
        assert_eq!(config.scanner_port(), "/dev/ttyACM0");
        assert_eq!(config.reconnect_delay(), Duration::from_secs(3));
        assert_eq!(config.serial_retry_delay(), Duration::from_secs(2));
        assert_eq!(config.correlation_timeout(), Duration::from_secs(10));
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(90));
        assert_eq!(config.watchdog_poll(), Duration::from_secs(1));
        assert_eq!(config.flush_timeout(), Duration::from_millis(150));
        assert_eq!(config.max_line_len(), 512);
        assert!(!config.log_raw_chunks());
    }

    #[test]
    fn test_resolve_config_path_default() {
        let args: Vec<String> = vec!["rvm-gateway".to_string()];
        assert_eq!(Config::resolve_config_path(&args), "config/gateway.toml");
    }

    #[test]
    fn test_resolve_config_path_from_arg() {
        let args: Vec<String> = vec![
            "rvm-gateway".to_string(),
            "--config".to_string(),
            "config/site.toml".to_string(),
        ];
        assert_eq!(Config::resolve_config_path(&args), "config/site.toml");
    }

    #[test]
    fn test_from_file_minimal() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[link]
url = "wss://example.test/ws/fandomats"
fandomat_id = 3
device_token = "secret"
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.ws_url(), "wss://example.test/ws/fandomats");
        assert_eq!(config.fandomat_id(), 3);
        assert_eq!(config.device_token(), "secret");
        // Everything else falls back to section defaults
        assert_eq!(config.version(), "1.0.0");
        assert_eq!(config.baud(), 9600);
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn test_from_file_overrides() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[link]
url = "ws://localhost:8000/ws/fandomats"
fandomat_id = 7
device_token = "tok"
reconnect_secs = 1
correlation_timeout_secs = 2

[serial]
acceptor_port = "/dev/ttyAMA1"
baud = 115200

[scanner]
flush_timeout_ms = 50
max_line_len = 64
log_raw_chunks = true

[session]
inactivity_timeout_secs = 30
"#
        )
        .unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.reconnect_delay(), Duration::from_secs(1));
        assert_eq!(config.correlation_timeout(), Duration::from_secs(2));
        assert_eq!(config.acceptor_port(), "/dev/ttyAMA1");
        assert_eq!(config.baud(), 115200);
        assert_eq!(config.flush_timeout(), Duration::from_millis(50));
        assert_eq!(config.max_line_len(), 64);
        assert!(config.log_raw_chunks());
        assert_eq!(config.inactivity_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_load_from_path_missing_file_uses_defaults() {
        let config = Config::load_from_path("/nonexistent/gateway.toml");
        assert_eq!(config.fandomat_id(), 0);
        assert_eq!(config.config_file(), "default");
    }
}
