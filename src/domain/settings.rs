use crate::domain::models::DeviceTarget;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSettings {
    #[serde(default = "default_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_true")]
    pub file_logging_enabled: bool,
    #[serde(default = "default_true")]
    pub console_logging_enabled: bool,
    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_prefix")]
    pub file_name_prefix: String,
    #[serde(default = "default_true")]
    pub show_file_line: bool,
    #[serde(default = "default_false")]
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
            file_logging_enabled: default_true(),
            console_logging_enabled: default_true(),
            log_dir: default_log_dir(),
            file_name_prefix: default_prefix(),
            show_file_line: default_true(),
            show_thread_ids: default_false(),
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
    "pingpong_remote".to_string()
}
fn default_rotation() -> String {
    "daily".to_string()
}

/// Timing and framing knobs for the robot link
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkSettings {
    /// Write size for transports with a small MTU (BLE)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Pause between tearing down a held link and opening the next one
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Bound on each step of a teardown (disconnect notice, close)
    #[serde(default = "default_teardown_timeout_ms")]
    pub teardown_timeout_ms: u64,
    #[serde(default = "default_reconnect_interval_ms")]
    pub reconnect_interval_ms: u64,
    #[serde(default = "default_live_aim_throttle_ms")]
    pub live_aim_throttle_ms: u64,
    #[serde(default = "default_live_aim_debounce_ms")]
    pub live_aim_debounce_ms: u64,
    #[serde(default = "default_timer_poll_ms")]
    pub timer_poll_ms: u64,
    #[serde(default = "default_scan_timeout_ms")]
    pub scan_timeout_ms: u64,
    /// Name announced to the robot; falls back to the host name
    #[serde(default)]
    pub controller_name: Option<String>,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            connect_timeout_ms: default_connect_timeout_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            teardown_timeout_ms: default_teardown_timeout_ms(),
            reconnect_interval_ms: default_reconnect_interval_ms(),
            live_aim_throttle_ms: default_live_aim_throttle_ms(),
            live_aim_debounce_ms: default_live_aim_debounce_ms(),
            timer_poll_ms: default_timer_poll_ms(),
            scan_timeout_ms: default_scan_timeout_ms(),
            controller_name: None,
        }
    }
}

impl LinkSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }
    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
    pub fn reconnect_interval(&self) -> Duration {
        Duration::from_millis(self.reconnect_interval_ms)
    }
    pub fn live_aim_throttle(&self) -> Duration {
        Duration::from_millis(self.live_aim_throttle_ms)
    }
    pub fn live_aim_debounce(&self) -> Duration {
        Duration::from_millis(self.live_aim_debounce_ms)
    }
    pub fn timer_poll(&self) -> Duration {
        Duration::from_millis(self.timer_poll_ms)
    }
    pub fn scan_timeout(&self) -> Duration {
        Duration::from_millis(self.scan_timeout_ms)
    }
}

fn default_chunk_size() -> usize {
    20
}
fn default_connect_timeout_ms() -> u64 {
    15_000
}
fn default_settle_delay_ms() -> u64 {
    500
}
fn default_teardown_timeout_ms() -> u64 {
    1_000
}
fn default_reconnect_interval_ms() -> u64 {
    8_000
}
fn default_live_aim_throttle_ms() -> u64 {
    80
}
fn default_live_aim_debounce_ms() -> u64 {
    400
}
fn default_timer_poll_ms() -> u64 {
    250
}
fn default_scan_timeout_ms() -> u64 {
    10_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    // Logging Settings
    #[serde(default)]
    pub log_settings: LogSettings,

    #[serde(default)]
    pub link: LinkSettings,

    /// Robot picked by the user; the reconnect loop targets it
    #[serde(default)]
    pub last_device: Option<DeviceTarget>,
    #[serde(default = "default_true")]
    pub auto_reconnect: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_settings: LogSettings::default(),
            link: LinkSettings::default(),
            last_device: None,
            auto_reconnect: default_true(),
        }
    }
}

pub struct SettingsService {
    settings: Settings,
    settings_path: PathBuf,
}

impl SettingsService {
    pub fn new() -> anyhow::Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Ok(Self::with_path(settings_path))
    }

    /// Load from an explicit file, falling back to defaults when it is missing or invalid
    pub fn with_path(settings_path: PathBuf) -> Self {
        let settings = Self::load_from_file(&settings_path).unwrap_or_default();
        Self {
            settings,
            settings_path,
        }
    }

    fn get_settings_path() -> anyhow::Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        path.push("PingPongRemote");
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

    pub fn get_mut(&mut self) -> &mut Settings {
        &mut self.settings
    }

    pub fn path(&self) -> &Path {
        &self.settings_path
    }

    pub fn remember_device(&mut self, target: DeviceTarget) -> anyhow::Result<()> {
        if self.settings.last_device.as_ref() != Some(&target) {
            self.settings.last_device = Some(target);
            self.save()?;
        }
        Ok(())
    }

    pub fn forget_device(&mut self) -> anyhow::Result<()> {
        if self.settings.last_device.take().is_some() {
            self.save()?;
        }
        Ok(())
    }
}
