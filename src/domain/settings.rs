use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_false")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_false")]
    pub show_file_line: bool,
    #[serde(default = "default_true")]
    pub show_thread_ids: bool,
    #[serde(default = "default_true")]
    pub show_target: bool,
    #[serde(default = "default_true")]
    pub ansi_colors: bool,
    #[serde(default = "default_rotation")]
    pub rotation: String, // "daily", "hourly", "minutely", "never"
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_logging_enabled: default_false(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_false(),
            show_thread_ids: default_true(),
            show_target: default_true(),
            ansi_colors: default_true(),
            rotation: default_rotation(),
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_false() -> bool {
    false
}
fn default_log_dir() -> String {
    "logs".to_string()
}
fn default_prefix() -> String {
    "ble_toolkit".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// What happens to the previously displayed service's worker on a switch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPolicy {
    /// Keep polling in the background, only detach its output.
    KeepAlive,
    /// Stop and join the previous worker before swapping.
    StopOnSwitch,
}

impl Default for SwitchPolicy {
    fn default() -> Self {
        Self::KeepAlive
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub log_settings: LogSettings,

    // Discovery
    #[serde(default = "default_scan_window_ms")]
    pub scan_window_ms: u64,
    #[serde(default = "default_device_timeout_ms")]
    pub device_timeout_ms: u64,

    // Connection
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    #[serde(default = "default_busy_retry_delay_ms")]
    pub busy_retry_delay_ms: u64,
    #[serde(default = "default_max_busy_retries")]
    pub max_busy_retries: u32,

    // Polling
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default)]
    pub switch_policy: SwitchPolicy,

    #[serde(default)]
    pub known_addresses: Vec<String>,
    #[serde(default)]
    pub last_connected_address: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            scan_window_ms: default_scan_window_ms(),
            device_timeout_ms: default_device_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            busy_retry_delay_ms: default_busy_retry_delay_ms(),
            max_busy_retries: default_max_busy_retries(),
            poll_interval_ms: default_poll_interval_ms(),
            switch_policy: SwitchPolicy::default(),
            known_addresses: Vec::new(),
            last_connected_address: None,
        }
    }
}

impl Settings {
    pub fn scan_window(&self) -> Duration {
        Duration::from_millis(self.scan_window_ms)
    }

    pub fn device_timeout(&self) -> Duration {
        Duration::from_millis(self.device_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn busy_retry_delay(&self) -> Duration {
        Duration::from_millis(self.busy_retry_delay_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

fn default_scan_window_ms() -> u64 {
    2000
}
fn default_device_timeout_ms() -> u64 {
    5000
}
fn default_connect_timeout_ms() -> u64 {
    3000
}
fn default_busy_retry_delay_ms() -> u64 {
    500
}
fn default_max_busy_retries() -> u32 {
    1
}
fn default_poll_interval_ms() -> u64 {
    1000
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    /// Load from the per-user config directory, falling back to defaults.
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit path, falling back to defaults.
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = match Self::load_from_file(&settings_path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::debug!(
                    "Using default settings ({}): {}",
                    settings_path.display(),
                    e
                );
                Settings::default()
            }
        };

        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("BLEToolkit");
        fs::create_dir_all(&path)?;
        path.push("settings.json");
        Ok(path)
    }

    fn load_from_file(path: &Path) -> anyhow::Result<Settings> {
        let contents = fs::read_to_string(path)?;
        let settings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub fn save(&self) -> anyhow::Result<()> {
        if let Some(parent) = self.settings_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.settings)?;
        fs::write(&self.settings_path, json)?;
        Ok(())
    }

    pub fn get(&self) -> &Settings {
        &self.settings
    }

    #[cfg(test)]
    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    /// Record a peer we managed to connect to.
    pub fn remember_peer(&mut self, address: &str) -> anyhow::Result<()> {
        if !self.settings.known_addresses.iter().any(|a| a == address) {
            self.settings.known_addresses.push(address.to_string());
        }
        self.settings.last_connected_address = Some(address.to_string());
        self.save()
    }
}
