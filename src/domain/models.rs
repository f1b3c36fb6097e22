use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Selectable run timer lengths, indexed by `RobotConfig::timer_index`
pub const TIMER_DURATIONS: [Option<Duration>; 6] = [
    None, // OFF
    Some(Duration::from_secs(15)),
    Some(Duration::from_secs(30)),
    Some(Duration::from_secs(60)),
    Some(Duration::from_secs(120)),
    Some(Duration::from_secs(300)),
];

/// How one aiming axis moves during a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AxisMode {
    /// Follows the live-aim target
    #[default]
    Live,
    /// Continuous sweep between min and max
    Auto1,
    /// Stepped sweep with a pause at each step
    Auto2,
    /// Random positions with a minimum jump distance
    Random,
    /// Value written by a newer app version
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SpinDirection {
    #[default]
    None,
    N,
    Ne,
    E,
    Se,
    S,
    Sw,
    W,
    Nw,
    #[serde(other)]
    Unknown,
}

/// Ball feeder cadence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FeederMode {
    #[default]
    #[serde(rename = "CONT")]
    Continuous,
    #[serde(rename = "P1/1")]
    Pulse1On1Off,
    #[serde(rename = "P2/1")]
    Pulse2On1Off,
    #[serde(rename = "P2/2")]
    Pulse2On2Off,
    #[serde(rename = "CUSTOM")]
    Custom,
    #[serde(other)]
    Unknown,
}

/// Per-axis aiming parameters. Ratios are in natural units in [-1, 1].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AxisConfig {
    pub mode: AxisMode,
    pub target: f64,
    pub min: f64,
    pub max: f64,
    /// AUTO1 sweep speed
    pub auto1_speed: f64,
    /// AUTO2 step size
    pub auto2_step: f64,
    pub auto2_pause_ms: u32,
    /// RANDOM minimum jump distance
    pub random_min_jump: f64,
    pub random_pause_ms: u32,
}

impl Default for AxisConfig {
    fn default() -> Self {
        Self {
            mode: AxisMode::Live,
            target: 0.0,
            min: -1.0,
            max: 1.0,
            auto1_speed: 0.5,
            auto2_step: 0.25,
            auto2_pause_ms: 500,
            random_min_jump: 0.3,
            random_pause_ms: 800,
        }
    }
}

/// Complete desired robot behavior, sent as one `C` frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RobotConfig {
    pub pan: AxisConfig,
    pub tilt: AxisConfig,

    // Launcher
    pub launcher_power: u16,
    pub spin_direction: SpinDirection,
    /// Passed to the robot as-is; the firmware ceiling (255 or 512) is unconfirmed
    pub spin_intensity: u16,
    pub spin_random: bool,
    pub spin_random_interval_sec: f64,

    // Feeder
    pub feeder_mode: FeederMode,
    pub feeder_speed: u16,
    pub feeder_custom_on_ms: u32,
    pub feeder_custom_off_ms: u32,

    // Timer
    pub timer_index: usize,
    pub timer_sound_alert: bool,
}

impl Default for RobotConfig {
    fn default() -> Self {
        Self {
            pan: AxisConfig::default(),
            tilt: AxisConfig::default(),
            launcher_power: 128,
            spin_direction: SpinDirection::None,
            spin_intensity: 0,
            spin_random: false,
            spin_random_interval_sec: 3.0,
            feeder_mode: FeederMode::Continuous,
            feeder_speed: 128,
            feeder_custom_on_ms: 300,
            feeder_custom_off_ms: 700,
            timer_index: 0,
            timer_sound_alert: true,
        }
    }
}

impl RobotConfig {
    /// Selected run length, `None` when the timer is OFF or the index is out of range
    pub fn timer_duration(&self) -> Option<Duration> {
        TIMER_DURATIONS.get(self.timer_index).copied().flatten()
    }

    /// Both axes follow live aim
    pub fn is_live_aim(&self) -> bool {
        self.pan.mode == AxisMode::Live && self.tilt.mode == AxisMode::Live
    }
}

/// A pan/tilt pair in [-1, 1]
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AimPoint {
    pub pan: f64,
    pub tilt: f64,
}

impl AimPoint {
    pub fn new(pan: f64, tilt: f64) -> Self {
        Self { pan, tilt }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Snapshot of the link as seen by everything above the connection manager
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnectionState {
    pub status: ConnectionStatus,
    pub error: Option<String>,
    pub device_name: Option<String>,
}

impl ConnectionState {
    pub fn disconnected() -> Self {
        Self::default()
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            error: Some(reason.into()),
            device_name: None,
        }
    }

    pub fn connecting(device_name: Option<String>) -> Self {
        Self {
            status: ConnectionStatus::Connecting,
            error: None,
            device_name,
        }
    }

    pub fn connected(device_name: Option<String>) -> Self {
        Self {
            status: ConnectionStatus::Connected,
            error: None,
            device_name,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }
}

/// Active training run. Both fields are set together or both are `None`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunState {
    pub run_start_time: Option<SystemTime>,
    pub run_config: Option<RobotConfig>,
}

impl RunState {
    pub fn is_running(&self) -> bool {
        self.run_start_time.is_some()
    }
}

/// A robot the user can pick, from discovery or the bonded list
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub id: String,
    pub display_name: String,
}

impl DeviceTarget {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScannedDevice {
    pub target: DeviceTarget,
    pub signal_strength: Option<i16>,
    pub bonded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timer_duration_lookup() {
        let mut config = RobotConfig::default();
        assert_eq!(config.timer_duration(), None);

        config.timer_index = 3;
        assert_eq!(config.timer_duration(), Some(Duration::from_secs(60)));

        config.timer_index = 42;
        assert_eq!(config.timer_duration(), None);
    }

    #[test]
    fn test_unknown_mode_deserializes_leniently() {
        let json = r#"{"pan":{"mode":"ORBIT"},"feeder_mode":"P9/9","spin_direction":"UP"}"#;
        let config: RobotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.pan.mode, AxisMode::Unknown);
        assert_eq!(config.tilt.mode, AxisMode::Live);
        assert_eq!(config.feeder_mode, FeederMode::Unknown);
        assert_eq!(config.spin_direction, SpinDirection::Unknown);
    }

    #[test]
    fn test_feeder_mode_names() {
        let json = serde_json::to_string(&FeederMode::Pulse2On1Off).unwrap();
        assert_eq!(json, "\"P2/1\"");
        let json = serde_json::to_string(&AxisMode::Auto2).unwrap();
        assert_eq!(json, "\"AUTO2\"");
    }
}
