//! Payload marshaling.
//!
//! Decoding is keyed by code through the firmware's code table; codes outside the table
//! come back as [`Telemetry::Raw`] rather than an error. All multi-byte values are
//! little-endian.

use crate::command::{Command, Firmware, PayloadLayout};
use crate::error::ProtocolError;
use crate::SERVO_COUNT;
use serde::Serialize;

/// One 16-bit word per servo, in servo id order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ServoValues(Vec<u16>);

impl ServoValues {
    pub fn new(values: Vec<u16>) -> Self {
        Self(values)
    }

    pub fn values(&self) -> &[u16] {
        &self.0
    }

    /// Value for 1-based servo `id`.
    pub fn get(&self, id: usize) -> Option<u16> {
        id.checked_sub(1).and_then(|i| self.0.get(i).copied())
    }

    /// Reinterprets each word as two's complement, as load readings are.
    pub fn signed(&self) -> Vec<i16> {
        self.0.iter().map(|&v| v as i16).collect()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_inner(self) -> Vec<u16> {
        self.0
    }
}

/// Raw accelerometer and gyroscope sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuSixDof {
    pub acc: [f32; 3],
    pub gyro: [f32; 3],
}

/// Fused attitude increment from the IMU's attitude engine.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ImuAttitude {
    /// Orientation increment quaternion.
    pub dq: [f32; 4],
    /// Velocity increment.
    pub dv: [f32; 3],
    pub ae_reg1: u8,
    pub ae_reg2: u8,
}

/// A decoded response payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Telemetry {
    /// Write acknowledged; any payload is ignored.
    Ack,
    Flag(bool),
    Servo(ServoValues),
    SixDof(ImuSixDof),
    Attitude(ImuAttitude),
    Text(String),
    ProtocolVersion(u64),
    /// Millisecond timestamp echoed back by the controller.
    Echo(i64),
    /// Payload of a code the firmware table does not name.
    Raw(Vec<u8>),
}

const SIX_DOF_SIZE: usize = 24;
// Two status bytes follow the seven floats; the struct is padded to 32 on the wire.
const ATTITUDE_STATUS_OFFSET: usize = 28;
const ATTITUDE_MIN_SIZE: usize = ATTITUDE_STATUS_OFFSET + 2;
const ECHO_SIZE: usize = 8;
const VERSION_MAX_SIZE: usize = 8;

/// Decodes the payload of a packet with `code` using `firmware`'s table.
pub fn decode_payload(
    firmware: Firmware,
    code: u8,
    payload: &[u8],
) -> Result<Telemetry, ProtocolError> {
    match firmware.command(code) {
        Some(command) => decode_command(command, code, payload),
        None => Ok(Telemetry::Raw(payload.to_vec())),
    }
}

/// Decodes the payload of a response to `command`.
pub fn decode_command(
    command: Command,
    code: u8,
    payload: &[u8],
) -> Result<Telemetry, ProtocolError> {
    match command.layout() {
        PayloadLayout::Empty => Ok(Telemetry::Ack),
        PayloadLayout::Flag => match payload.first() {
            Some(&b) => Ok(Telemetry::Flag(b != 0)),
            None => Err(ProtocolError::malformed(code, "missing status byte")),
        },
        PayloadLayout::ServoWords => decode_words(code, payload).map(Telemetry::Servo),
        PayloadLayout::SixDof => {
            let floats = decode_floats::<6>(code, payload, SIX_DOF_SIZE)?;
            Ok(Telemetry::SixDof(ImuSixDof {
                acc: [floats[0], floats[1], floats[2]],
                gyro: [floats[3], floats[4], floats[5]],
            }))
        }
        PayloadLayout::Attitude => {
            let floats = decode_floats::<7>(code, payload, ATTITUDE_MIN_SIZE)?;
            Ok(Telemetry::Attitude(ImuAttitude {
                dq: [floats[0], floats[1], floats[2], floats[3]],
                dv: [floats[4], floats[5], floats[6]],
                ae_reg1: payload[ATTITUDE_STATUS_OFFSET],
                ae_reg2: payload[ATTITUDE_STATUS_OFFSET + 1],
            }))
        }
        PayloadLayout::Text => std::str::from_utf8(payload)
            .map(|s| Telemetry::Text(s.to_string()))
            .map_err(|e| ProtocolError::malformed(code, format!("invalid UTF-8: {}", e))),
        PayloadLayout::Timestamp => {
            let bytes: [u8; ECHO_SIZE] = payload.try_into().map_err(|_| {
                ProtocolError::malformed(
                    code,
                    format!("expected {} timestamp bytes, got {}", ECHO_SIZE, payload.len()),
                )
            })?;
            Ok(Telemetry::Echo(i64::from_le_bytes(bytes)))
        }
        PayloadLayout::Version => {
            if payload.len() > VERSION_MAX_SIZE {
                return Err(ProtocolError::malformed(
                    code,
                    format!("version integer of {} bytes", payload.len()),
                ));
            }
            let version = payload
                .iter()
                .rev()
                .fold(0u64, |acc, &b| (acc << 8) | b as u64);
            Ok(Telemetry::ProtocolVersion(version))
        }
    }
}

fn decode_words(code: u8, payload: &[u8]) -> Result<ServoValues, ProtocolError> {
    if payload.len() % 2 != 0 {
        return Err(ProtocolError::malformed(
            code,
            format!("odd servo payload length {}", payload.len()),
        ));
    }
    Ok(ServoValues(
        payload
            .chunks_exact(2)
            .map(|w| u16::from_le_bytes([w[0], w[1]]))
            .collect(),
    ))
}

fn decode_floats<const N: usize>(
    code: u8,
    payload: &[u8],
    min_len: usize,
) -> Result<[f32; N], ProtocolError> {
    if payload.len() < min_len {
        return Err(ProtocolError::malformed(
            code,
            format!("expected at least {} bytes, got {}", min_len, payload.len()),
        ));
    }
    let mut out = [0f32; N];
    for (slot, chunk) in out.iter_mut().zip(payload.chunks_exact(4)) {
        *slot = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(out)
}

/// Request payload setting all servos at once.
pub fn positions_payload(positions: &[u16; SERVO_COUNT]) -> Vec<u8> {
    positions.iter().flat_map(|p| p.to_le_bytes()).collect()
}

/// Request payload setting one servo.
pub fn single_position_payload(id: u16, position: u16) -> Vec<u8> {
    let mut data = Vec::with_capacity(4);
    data.extend_from_slice(&id.to_le_bytes());
    data.extend_from_slice(&position.to_le_bytes());
    data
}

/// Request payload for an echo stamped at `now_ms`.
pub fn echo_payload(now_ms: i64) -> Vec<u8> {
    now_ms.to_le_bytes().to_vec()
}

/// Round-trip time of an echo that came back with `echoed_ms`.
pub fn echo_latency_ms(now_ms: i64, echoed_ms: i64) -> i64 {
    now_ms.saturating_sub(echoed_ms)
}
