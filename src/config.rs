//! Configuration management for KeyMidi
//!
//! Handles loading and saving of the YAML application settings. Every section
//! has defaults, so a missing or partial file still yields a working setup.
//! Mapping rules live in their own JSON files (see [`crate::mapping`]).

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::fs;
use tracing::info;

use crate::input::hid::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_REPORT_LEN};
use crate::input::keyboard::DEFAULT_QUEUE_CAPACITY;

/// Root configuration structure
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub midi: MidiConfig,
    pub keyboard: KeyboardConfig,
    pub hid: HidConfig,
    pub mappings: MappingsConfig,
    pub monitor: MonitorConfig,
}

/// MIDI output configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MidiConfig {
    /// Output port name (exact, or a case-insensitive substring)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_port: Option<String>,
    /// Output port index, used when no name is given
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port_index: Option<usize>,
    pub client_name: String,
    /// Open the output port at startup
    pub auto_connect: bool,
}

/// Keyboard hook configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct KeyboardConfig {
    pub enabled: bool,
    /// Backlog of unprocessed key events that triggers a lag warning
    pub queue_capacity: usize,
}

/// HID polling configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HidConfig {
    pub poll_interval_ms: u64,
    /// Read buffer size, raised to the length the device declares
    pub report_buffer_len: usize,
    /// Device paths opened at startup
    pub devices: Vec<String>,
}

/// Mapping file locations (relative paths resolve against the data directory)
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MappingsConfig {
    pub key_file: String,
    pub hid_file: String,
    /// Reload mapping files when they change on disk
    pub watch: bool,
}

/// Console monitor configuration
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    /// Hide auto-repeats in the monitor (MIDI output is unaffected)
    pub ignore_repeats: bool,
    pub capacity: usize,
}

impl Default for MidiConfig {
    fn default() -> Self {
        Self {
            output_port: None,
            port_index: None,
            client_name: default_client_name(),
            auto_connect: true,
        }
    }
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl Default for HidConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: DEFAULT_POLL_INTERVAL_MS,
            report_buffer_len: DEFAULT_REPORT_LEN,
            devices: Vec::new(),
        }
    }
}

impl Default for MappingsConfig {
    fn default() -> Self {
        Self {
            key_file: "mappings.json".to_string(),
            hid_file: "hid_mappings.json".to_string(),
            watch: true,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ignore_repeats: false,
            capacity: crate::monitor::DEFAULT_CAPACITY,
        }
    }
}

impl HidConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Load configuration from file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: AppConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration, falling back to defaults when the file is missing
    pub async fn load_or_default(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            info!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(path).await
    }

    /// Save configuration to file
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml)
            .await
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.hid.poll_interval_ms == 0 {
            anyhow::bail!("hid.poll_interval_ms must be at least 1");
        }
        if self.hid.report_buffer_len == 0 || self.hid.report_buffer_len > 4096 {
            anyhow::bail!(
                "hid.report_buffer_len {} is invalid (must be 1-4096)",
                self.hid.report_buffer_len
            );
        }
        if self.keyboard.queue_capacity == 0 {
            anyhow::bail!("keyboard.queue_capacity must be at least 1");
        }
        if self.midi.client_name.trim().is_empty() {
            anyhow::bail!("midi.client_name cannot be empty");
        }
        if self.mappings.key_file.is_empty() || self.mappings.hid_file.is_empty() {
            anyhow::bail!("mapping file names cannot be empty");
        }
        Ok(())
    }
}

fn default_client_name() -> String { "KeyMidi".to_string() }

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
midi:
  output_port: "loopMIDI Port"
hid:
  devices:
    - "\\\\?\\hid#vid_046d&pid_c21d"
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(config.midi.output_port.as_deref(), Some("loopMIDI Port"));
        assert!(config.midi.auto_connect);
        assert_eq!(config.midi.client_name, "KeyMidi");
        assert_eq!(config.hid.poll_interval_ms, 10);
        assert_eq!(config.hid.devices.len(), 1);
        assert!(config.keyboard.enabled);
        assert_eq!(config.mappings.key_file, "mappings.json");
        assert!(!config.monitor.enabled);
    }

    #[test]
    fn test_empty_yaml_is_default() {
        let config: AppConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config, AppConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = AppConfig::default();
        config.hid.poll_interval_ms = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.hid.report_buffer_len = 0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("config.yaml");

        let mut config = AppConfig::default();
        config.midi.port_index = Some(2);
        config.monitor.ignore_repeats = true;
        config.save(&path).await?;

        let loaded = AppConfig::load(&path).await?;
        assert_eq!(loaded, config);
        Ok(())
    }

    #[tokio::test]
    async fn test_missing_file_falls_back_to_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let config = AppConfig::load_or_default(dir.path().join("absent.yaml")).await?;
        assert_eq!(config, AppConfig::default());
        Ok(())
    }
}
