//! Robot Wire Protocol
//!
//! Line-oriented ASCII commands understood by the launcher firmware. Every
//! frame is a single line terminated by `\n`. Ratios travel as integers
//! scaled by 1000 so frames stay short and free of locale-dependent decimal
//! formatting.
//!
//! | Command           | Format                          |
//! |-------------------|---------------------------------|
//! | Config            | `C,<26 integers>\n`             |
//! | Start             | `S\n`                           |
//! | Stop              | `P\n`                           |
//! | Device name       | `N,<name, max 24 chars>\n`      |
//! | Disconnect notice | `D\n`                           |
//! | Live aim          | `A,<pan*1000>,<tilt*1000>\n`    |

use crate::domain::models::{AxisConfig, AxisMode, FeederMode, RobotConfig, SpinDirection};
use thiserror::Error;

/// Number of integer fields in a `C` frame
pub const CONFIG_FIELD_COUNT: usize = 26;

/// Longest device name the robot display accepts
pub const MAX_DEVICE_NAME_LEN: usize = 24;

/// Ratio scale applied at the wire boundary
pub const RATIO_SCALE: f64 = 1000.0;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty frame")]
    Empty,
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error("Expected {expected} fields, got {actual}")]
    FieldCount { expected: usize, actual: usize },
    #[error("Invalid integer field {index}: {value:?}")]
    InvalidField { index: usize, value: String },
}

/// Enums whose wire value is their position in a fixed declared order
pub trait WireEnum: Copy + PartialEq + 'static {
    const ORDER: &'static [Self];

    /// Position in `ORDER`; values outside the order encode as 0
    fn wire_index(self) -> i64 {
        Self::ORDER.iter().position(|v| *v == self).unwrap_or(0) as i64
    }

    /// Inverse of `wire_index`; out-of-range indices decode to the first entry
    fn from_wire_index(index: i64) -> Self {
        usize::try_from(index)
            .ok()
            .and_then(|i| Self::ORDER.get(i))
            .copied()
            .unwrap_or(Self::ORDER[0])
    }
}

impl WireEnum for AxisMode {
    const ORDER: &'static [Self] = &[Self::Live, Self::Auto1, Self::Auto2, Self::Random];
}

impl WireEnum for FeederMode {
    const ORDER: &'static [Self] = &[
        Self::Continuous,
        Self::Pulse1On1Off,
        Self::Pulse2On1Off,
        Self::Pulse2On2Off,
        Self::Custom,
    ];
}

impl WireEnum for SpinDirection {
    const ORDER: &'static [Self] = &[
        Self::None,
        Self::N,
        Self::Ne,
        Self::E,
        Self::Se,
        Self::S,
        Self::Sw,
        Self::W,
        Self::Nw,
    ];
}

/// A decoded robot command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Config(RobotConfig),
    Start,
    Stop,
    DeviceName(String),
    DisconnectNotice,
    LiveAim { pan: f64, tilt: f64 },
}

impl Command {
    /// Wire line for this command, including the trailing newline
    pub fn encode(&self) -> String {
        match self {
            Self::Config(config) => encode_config(config),
            Self::Start => encode_start(),
            Self::Stop => encode_stop(),
            Self::DeviceName(name) => encode_device_name(name),
            Self::DisconnectNotice => encode_disconnect_notice(),
            Self::LiveAim { pan, tilt } => encode_live_aim(*pan, *tilt),
        }
    }

    /// Short label for logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::DeviceName(_) => "device-name",
            Self::DisconnectNotice => "disconnect",
            Self::LiveAim { .. } => "live-aim",
        }
    }
}

/// Scale a ratio to its wire integer
pub fn scale(value: f64) -> i64 {
    (value * RATIO_SCALE).round() as i64
}

/// Inverse of [`scale`]
pub fn unscale(value: i64) -> f64 {
    value as f64 / RATIO_SCALE
}

/// [auto1 speed, auto2 step, auto2 pause, random jump, random pause]
fn axis_fields(axis: &AxisConfig) -> [i64; 5] {
    [
        scale(axis.auto1_speed),
        scale(axis.auto2_step),
        i64::from(axis.auto2_pause_ms),
        scale(axis.random_min_jump),
        i64::from(axis.random_pause_ms),
    ]
}

/// Field values of a `C` frame in wire order
pub fn config_fields(config: &RobotConfig) -> [i64; CONFIG_FIELD_COUNT] {
    let pan = axis_fields(&config.pan);
    let tilt = axis_fields(&config.tilt);
    // 0 means fixed spin, so random spin never encodes below 1
    let spin_interval = if config.spin_random {
        scale(config.spin_random_interval_sec).max(1)
    } else {
        0
    };

    [
        config.pan.mode.wire_index(),
        config.tilt.mode.wire_index(),
        scale(config.pan.target),
        scale(config.tilt.target),
        scale(config.pan.min),
        scale(config.pan.max),
        scale(config.tilt.min),
        scale(config.tilt.max),
        pan[0],
        tilt[0],
        pan[1],
        pan[2],
        tilt[1],
        tilt[2],
        pan[3],
        pan[4],
        tilt[3],
        tilt[4],
        i64::from(config.launcher_power),
        config.spin_direction.wire_index(),
        i64::from(config.spin_intensity),
        spin_interval,
        config.feeder_mode.wire_index(),
        i64::from(config.feeder_speed),
        i64::from(config.feeder_custom_on_ms),
        i64::from(config.feeder_custom_off_ms),
    ]
}

/// Encode the full configuration frame
///
/// # Field order
///
/// ```text
///  1 pan mode            2 tilt mode
///  3 pan target          4 tilt target
///  5 pan min             6 pan max
///  7 tilt min            8 tilt max
///  9 pan AUTO1 speed    10 tilt AUTO1 speed
/// 11 pan AUTO2 step     12 pan AUTO2 pause (ms)
/// 13 tilt AUTO2 step    14 tilt AUTO2 pause (ms)
/// 15 pan RANDOM jump    16 pan RANDOM pause (ms)
/// 17 tilt RANDOM jump   18 tilt RANDOM pause (ms)
/// 19 launcher power     20 spin direction
/// 21 spin intensity     22 random spin interval (s x1000, 0 = fixed spin)
/// 23 feeder mode        24 feeder speed
/// 25 custom on (ms)     26 custom off (ms)
/// ```
pub fn encode_config(config: &RobotConfig) -> String {
    let fields: Vec<String> = config_fields(config).iter().map(i64::to_string).collect();
    format!("C,{}\n", fields.join(","))
}

pub fn encode_start() -> String {
    "S\n".to_string()
}

pub fn encode_stop() -> String {
    "P\n".to_string()
}

pub fn encode_disconnect_notice() -> String {
    "D\n".to_string()
}

/// Strip protocol delimiters from a display name and cap its length
pub fn sanitize_device_name(name: &str) -> String {
    name.chars()
        .filter(|c| !matches!(c, '\n' | '\r' | ','))
        .take(MAX_DEVICE_NAME_LEN)
        .collect()
}

pub fn encode_device_name(name: &str) -> String {
    format!("N,{}\n", sanitize_device_name(name))
}

/// Smallest frame in the protocol, sent at high rate while aiming by hand
pub fn encode_live_aim(pan: f64, tilt: f64) -> String {
    format!("A,{},{}\n", scale(pan), scale(tilt))
}

fn parse_fields(raw: &str) -> Result<Vec<i64>, ProtocolError> {
    raw.split(',')
        .enumerate()
        .map(|(index, value)| {
            value
                .trim()
                .parse::<i64>()
                .map_err(|_| ProtocolError::InvalidField {
                    index,
                    value: value.to_string(),
                })
        })
        .collect()
}

fn saturating_u16(value: i64) -> u16 {
    value.clamp(0, i64::from(u16::MAX)) as u16
}

fn saturating_u32(value: i64) -> u32 {
    value.clamp(0, i64::from(u32::MAX)) as u32
}

/// Rebuild a configuration from `C` frame fields.
///
/// Timer settings are not part of the frame and keep their defaults.
pub fn decode_config_fields(fields: &[i64]) -> Result<RobotConfig, ProtocolError> {
    let f: &[i64; CONFIG_FIELD_COUNT] =
        fields
            .try_into()
            .map_err(|_| ProtocolError::FieldCount {
                expected: CONFIG_FIELD_COUNT,
                actual: fields.len(),
            })?;

    let axis = |mode, target, min, max, auto1, auto2_step, auto2_pause, jump, pause| AxisConfig {
        mode: AxisMode::from_wire_index(mode),
        target: unscale(target),
        min: unscale(min),
        max: unscale(max),
        auto1_speed: unscale(auto1),
        auto2_step: unscale(auto2_step),
        auto2_pause_ms: saturating_u32(auto2_pause),
        random_min_jump: unscale(jump),
        random_pause_ms: saturating_u32(pause),
    };

    Ok(RobotConfig {
        pan: axis(f[0], f[2], f[4], f[5], f[8], f[10], f[11], f[14], f[15]),
        tilt: axis(f[1], f[3], f[6], f[7], f[9], f[12], f[13], f[16], f[17]),
        launcher_power: saturating_u16(f[18]),
        spin_direction: SpinDirection::from_wire_index(f[19]),
        spin_intensity: saturating_u16(f[20]),
        spin_random: f[21] > 0,
        spin_random_interval_sec: if f[21] > 0 {
            unscale(f[21])
        } else {
            RobotConfig::default().spin_random_interval_sec
        },
        feeder_mode: FeederMode::from_wire_index(f[22]),
        feeder_speed: saturating_u16(f[23]),
        feeder_custom_on_ms: saturating_u32(f[24]),
        feeder_custom_off_ms: saturating_u32(f[25]),
        ..RobotConfig::default()
    })
}

/// Parse one line (with or without its trailing newline)
pub fn decode_frame(line: &str) -> Result<Command, ProtocolError> {
    let line = line.trim_end_matches(['\n', '\r']);
    if line.is_empty() {
        return Err(ProtocolError::Empty);
    }

    let (tag, rest) = match line.split_once(',') {
        Some((tag, rest)) => (tag, Some(rest)),
        None => (line, None),
    };

    match (tag, rest) {
        ("C", Some(rest)) => decode_config_fields(&parse_fields(rest)?).map(Command::Config),
        ("S", None) => Ok(Command::Start),
        ("P", None) => Ok(Command::Stop),
        ("D", None) => Ok(Command::DisconnectNotice),
        ("N", rest) => Ok(Command::DeviceName(rest.unwrap_or_default().to_string())),
        ("A", Some(rest)) => match parse_fields(rest)?.as_slice() {
            [pan, tilt] => Ok(Command::LiveAim {
                pan: unscale(*pan),
                tilt: unscale(*tilt),
            }),
            other => Err(ProtocolError::FieldCount {
                expected: 2,
                actual: other.len(),
            }),
        },
        _ => Err(ProtocolError::UnknownCommand(line.to_string())),
    }
}
