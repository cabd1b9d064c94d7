//! ==============================================================================
//! config.rs - Runtime Configuration Loader
//! ==============================================================================
//!
//! purpose:
//!     defines the schema for `host.toml`.
//!     loads configuration from file or falls back to defaults.
//!
//! structure:
//!     - NetworkConfig: UDP port and broadcast target shared by the swarm.
//!     - WindowConfig / DisplayConfig: sliding window horizon and the
//!       downsampled ring that feeds the LED matrix.
//!     - ResetConfig / GpioConfig: reset dwell period and control pins.
//!     - TelemetryConfig: outbound topics and rate limit.
//!     - PersistenceConfig: where rotated master logs are written.
//!
//! every section is optional in the file; missing sections and fields take
//! the defaults below.
//!
//! ==============================================================================

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct HostConfig {
    pub network: NetworkConfig,
    pub window: WindowConfig,
    pub display: DisplayConfig,
    pub reset: ResetConfig,
    pub gpio: GpioConfig,
    pub telemetry: TelemetryConfig,
    pub persistence: PersistenceConfig,
    pub dashboard: DashboardConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct NetworkConfig {
    pub port: u16,
    pub bind_address: String,
    pub broadcast_address: String,
    /// largest datagram we read; longer payloads are truncated and then
    /// fail frame validation
    pub max_datagram: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WindowConfig {
    pub horizon_seconds: u64,
    /// hard cap on retained readings, oldest evicted first
    pub max_entries: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DisplayConfig {
    pub slice_seconds: u64,
    pub ring_capacity: usize,
    pub matrix_width: usize,
    pub matrix_height: usize,
    pub max_reading: u16,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ResetConfig {
    pub dwell_seconds: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GpioConfig {
    pub button_pin: u8,
    pub indicator_pin: u8,
    pub poll_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct TelemetryConfig {
    pub enabled: bool,
    /// base url; events are POSTed to `<endpoint>/<topic>`.
    /// when unset, events are only logged.
    pub endpoint: Option<String>,
    pub reading_topic: String,
    pub reset_topic: String,
    pub duration_topic: String,
    pub min_interval_ms: u64,
    pub queue_depth: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub directory: PathBuf,
    pub max_entries_per_sender: usize,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub show_frames: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            port: 4210,
            bind_address: "0.0.0.0".to_string(),
            broadcast_address: "255.255.255.255".to_string(),
            max_datagram: 1024,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { horizon_seconds: 30, max_entries: 4096 }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            slice_seconds: 4,
            ring_capacity: 8,
            matrix_width: 8,
            matrix_height: 8,
            max_reading: 1023,
        }
    }
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self { dwell_seconds: 3 }
    }
}

impl Default for GpioConfig {
    fn default() -> Self {
        Self { button_pin: 22, indicator_pin: 26, poll_ms: 100 }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: None,
            reading_topic: "analogReading".to_string(),
            reset_topic: "resetRequest".to_string(),
            duration_topic: "masterDuration".to_string(),
            min_interval_ms: 1000,
            queue_depth: 64,
        }
    }
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            directory: PathBuf::from("logs"),
            max_entries_per_sender: 10_000,
        }
    }
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self { enabled: true, bind: "0.0.0.0:3000".to_string() }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), show_frames: false }
    }
}

impl HostConfig {
    /// Load configuration from file
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| anyhow::anyhow!("Failed to read config file: {}", e))?;

        Self::parse(&content)
    }

    /// Parse configuration from a toml string
    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: HostConfig = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("Failed to parse config: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Load with default fallback
    pub fn load_or_default() -> Self {
        let paths = [
            PathBuf::from("config").join("host.toml"),
            PathBuf::from("..").join("config").join("host.toml"),
        ];

        for path in &paths {
            if path.exists() {
                match Self::load(path) {
                    Ok(config) => {
                        println!("[CONFIG] Loaded from {}", path.display());
                        return config;
                    }
                    Err(e) => {
                        println!("[CONFIG] Warning: Failed to load {}: {}", path.display(), e);
                    }
                }
            }
        }

        println!("[CONFIG] Warning: No config file found - using defaults");
        Self::default()
    }

    fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.window.horizon_seconds > 0, "window.horizon_seconds must be > 0");
        anyhow::ensure!(self.display.slice_seconds > 0, "display.slice_seconds must be > 0");
        anyhow::ensure!(self.display.ring_capacity > 0, "display.ring_capacity must be > 0");
        anyhow::ensure!(self.display.matrix_height > 0, "display.matrix_height must be > 0");
        anyhow::ensure!(self.display.max_reading > 0, "display.max_reading must be > 0");
        anyhow::ensure!(self.gpio.poll_ms > 0, "gpio.poll_ms must be > 0");
        anyhow::ensure!(self.telemetry.queue_depth > 0, "telemetry.queue_depth must be > 0");
        anyhow::ensure!(self.telemetry.min_interval_ms > 0, "telemetry.min_interval_ms must be > 0");
        Ok(())
    }

    pub fn slice_interval(&self) -> Duration {
        Duration::from_secs(self.display.slice_seconds)
    }

    pub fn dwell(&self) -> Duration {
        Duration::from_secs(self.reset.dwell_seconds)
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry.min_interval_ms)
    }

    /// Print configuration summary
    pub fn print_summary(&self) {
        println!("┌─────────────────────────────────────────┐");
        println!("│           HOST CONFIGURATION            │");
        println!("├─────────────────────────────────────────┤");
        println!("│ UDP Port: {}", self.network.port);
        println!("│ Window: {}s", self.window.horizon_seconds);
        println!("│ Slice: {}s x {} slots", self.display.slice_seconds, self.display.ring_capacity);
        println!("│ Reset Dwell: {}s", self.reset.dwell_seconds);
        println!("│ Button/Indicator: GPIO {} / GPIO {}", self.gpio.button_pin, self.gpio.indicator_pin);
        match &self.telemetry.endpoint {
            Some(url) if self.telemetry.enabled => println!("│ Telemetry: {}", url),
            _ if self.telemetry.enabled => println!("│ Telemetry: log only"),
            _ => println!("│ Telemetry: disabled"),
        }
        println!("│ Log Level: {}", self.logging.level);
        println!("└─────────────────────────────────────────┘");
    }
}
