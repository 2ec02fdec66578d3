//! Firmware operations and their code tables.
//!
//! Two firmware revisions are in the field and they number the same operations
//! differently. Each revision is a static table from [`Command`] to code; lookups in
//! either direction go through that table.

use crate::frame::Cmd;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Code carrying UTF-8 diagnostic text.
pub const CODE_TEXT: u8 = 0x26;
/// Code carrying an echoed millisecond timestamp.
pub const CODE_ECHO: u8 = 0x27;
/// Code carrying the firmware protocol version.
pub const CODE_PROTOCOL_VERSION: u8 = 0xFE;

/// Firmware revision selecting the code table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Firmware {
    /// Torque control and IMU codes in the 0x60 block.
    #[default]
    Current,
    /// Earlier build without torque control; IMU codes follow the servo block.
    Legacy,
}

impl Firmware {
    fn table(self) -> &'static [(Command, u8)] {
        match self {
            Firmware::Current => CURRENT_CODES,
            Firmware::Legacy => LEGACY_CODES,
        }
    }

    /// Returns the code for `command`, or `None` if this revision lacks it.
    pub fn code(self, command: Command) -> Option<u8> {
        self.table()
            .iter()
            .find(|(c, _)| *c == command)
            .map(|&(_, code)| code)
    }

    /// Returns the command a received code belongs to.
    pub fn command(self, code: u8) -> Option<Command> {
        self.table()
            .iter()
            .find(|&&(_, c)| c == code)
            .map(|&(command, _)| command)
    }

    /// Returns whether this revision implements `command`.
    pub fn supports(self, command: Command) -> bool {
        self.code(command).is_some()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Firmware::Current => "current",
            Firmware::Legacy => "legacy",
        }
    }
}

impl fmt::Display for Firmware {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Firmware {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "current" => Ok(Firmware::Current),
            "legacy" => Ok(Firmware::Legacy),
            other => Err(format!(
                "unknown firmware revision '{}' (expected current or legacy)",
                other
            )),
        }
    }
}

/// Shape of the payload a response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLayout {
    /// No meaningful payload; the reply only acknowledges.
    Empty,
    /// One status byte.
    Flag,
    /// One little-endian 16-bit word per servo.
    ServoWords,
    /// Accelerometer then gyroscope, three `f32` each.
    SixDof,
    /// Quaternion, velocity vector and two status bytes.
    Attitude,
    Text,
    /// Signed 64-bit millisecond timestamp.
    Timestamp,
    /// Little-endian unsigned integer as wide as the payload.
    Version,
}

/// Operation understood by the controller firmware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    ServosEnable,
    ServosDisable,
    TorqueEnable,
    TorqueDisable,
    ServosIsEnabled,
    TorqueIsEnabled,
    SetPosition,
    GetPosition,
    GetFeedback,
    GetSpeed,
    GetLoad,
    GetVoltage,
    GetTemperature,
    GetMove,
    GetCurrent,
    ServoPing,
    ImuSixDof,
    ImuAttitude,
    Text,
    Echo,
    ProtocolVersion,
}

impl Command {
    pub const ALL: [Command; 21] = [
        Command::ServosEnable,
        Command::ServosDisable,
        Command::TorqueEnable,
        Command::TorqueDisable,
        Command::ServosIsEnabled,
        Command::TorqueIsEnabled,
        Command::SetPosition,
        Command::GetPosition,
        Command::GetFeedback,
        Command::GetSpeed,
        Command::GetLoad,
        Command::GetVoltage,
        Command::GetTemperature,
        Command::GetMove,
        Command::GetCurrent,
        Command::ServoPing,
        Command::ImuSixDof,
        Command::ImuAttitude,
        Command::Text,
        Command::Echo,
        Command::ProtocolVersion,
    ];

    /// Message class the request is sent with.
    pub fn cmd(self) -> Cmd {
        match self {
            Command::ServosEnable
            | Command::ServosDisable
            | Command::TorqueEnable
            | Command::TorqueDisable
            | Command::SetPosition => Cmd::WRITE,
            _ => Cmd::READ,
        }
    }

    /// Layout of the response payload.
    pub fn layout(self) -> PayloadLayout {
        match self {
            Command::ServosEnable
            | Command::ServosDisable
            | Command::TorqueEnable
            | Command::TorqueDisable
            | Command::SetPosition => PayloadLayout::Empty,
            Command::ServosIsEnabled | Command::TorqueIsEnabled => PayloadLayout::Flag,
            Command::GetPosition
            | Command::GetFeedback
            | Command::GetSpeed
            | Command::GetLoad
            | Command::GetVoltage
            | Command::GetTemperature
            | Command::GetMove
            | Command::GetCurrent
            | Command::ServoPing => PayloadLayout::ServoWords,
            Command::ImuSixDof => PayloadLayout::SixDof,
            Command::ImuAttitude => PayloadLayout::Attitude,
            Command::Text => PayloadLayout::Text,
            Command::Echo => PayloadLayout::Timestamp,
            Command::ProtocolVersion => PayloadLayout::Version,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Command::ServosEnable => "servos_enable",
            Command::ServosDisable => "servos_disable",
            Command::TorqueEnable => "torque_enable",
            Command::TorqueDisable => "torque_disable",
            Command::ServosIsEnabled => "servos_is_enabled",
            Command::TorqueIsEnabled => "torque_is_enabled",
            Command::SetPosition => "set_position",
            Command::GetPosition => "get_position",
            Command::GetFeedback => "get_feedback",
            Command::GetSpeed => "get_speed",
            Command::GetLoad => "get_load",
            Command::GetVoltage => "get_voltage",
            Command::GetTemperature => "get_temperature",
            Command::GetMove => "get_move",
            Command::GetCurrent => "get_current",
            Command::ServoPing => "servo_ping",
            Command::ImuSixDof => "imu_six_dof",
            Command::ImuAttitude => "imu_attitude",
            Command::Text => "text",
            Command::Echo => "echo",
            Command::ProtocolVersion => "protocol_version",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

static CURRENT_CODES: &[(Command, u8)] = &[
    (Command::ServosEnable, 0x70),
    (Command::TorqueDisable, 0x71),
    (Command::TorqueEnable, 0x72),
    (Command::ServosDisable, 0x73),
    (Command::ServosIsEnabled, 0x74),
    (Command::TorqueIsEnabled, 0x75),
    (Command::SetPosition, 0x76),
    (Command::GetPosition, 0x77),
    (Command::GetFeedback, 0x78),
    (Command::GetSpeed, 0x79),
    (Command::GetLoad, 0x7A),
    (Command::GetVoltage, 0x7B),
    (Command::GetTemperature, 0x7C),
    (Command::GetMove, 0x7D),
    (Command::GetCurrent, 0x7E),
    (Command::ServoPing, 0x7F),
    (Command::ImuSixDof, 0x60),
    (Command::ImuAttitude, 0x61),
    (Command::Text, CODE_TEXT),
    (Command::Echo, CODE_ECHO),
    (Command::ProtocolVersion, CODE_PROTOCOL_VERSION),
];

static LEGACY_CODES: &[(Command, u8)] = &[
    (Command::ServosEnable, 0x70),
    (Command::ServosDisable, 0x71),
    (Command::ServosIsEnabled, 0x72),
    (Command::SetPosition, 0x73),
    (Command::GetPosition, 0x74),
    (Command::GetFeedback, 0x75),
    (Command::GetSpeed, 0x76),
    (Command::GetLoad, 0x77),
    (Command::GetVoltage, 0x78),
    (Command::GetTemperature, 0x79),
    (Command::GetMove, 0x7A),
    (Command::GetCurrent, 0x7B),
    (Command::ServoPing, 0x7C),
    (Command::ImuSixDof, 0x7D),
    (Command::ImuAttitude, 0x7E),
    (Command::Text, CODE_TEXT),
    (Command::Echo, CODE_ECHO),
    (Command::ProtocolVersion, CODE_PROTOCOL_VERSION),
];
