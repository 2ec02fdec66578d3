//! High-level client API.

use crate::config::Config;
use crate::error::ClientError;
use crate::session::{ConnectionConfig, Session};
use crate::transport::Transport;
use pupperlink_protocol::payload::{self, decode_command};
use pupperlink_protocol::{
    Command, Firmware, ImuAttitude, ImuSixDof, ProtocolError, ServoValues, Telemetry,
    SERVO_COUNT,
};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};

/// Per-servo quantity that can be read back from the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServoQuantity {
    Position,
    Feedback,
    Speed,
    Load,
    Voltage,
    Temperature,
    Move,
    Current,
    Ping,
}

impl ServoQuantity {
    pub const ALL: [ServoQuantity; 9] = [
        ServoQuantity::Position,
        ServoQuantity::Feedback,
        ServoQuantity::Speed,
        ServoQuantity::Load,
        ServoQuantity::Voltage,
        ServoQuantity::Temperature,
        ServoQuantity::Move,
        ServoQuantity::Current,
        ServoQuantity::Ping,
    ];

    pub fn command(self) -> Command {
        match self {
            ServoQuantity::Position => Command::GetPosition,
            ServoQuantity::Feedback => Command::GetFeedback,
            ServoQuantity::Speed => Command::GetSpeed,
            ServoQuantity::Load => Command::GetLoad,
            ServoQuantity::Voltage => Command::GetVoltage,
            ServoQuantity::Temperature => Command::GetTemperature,
            ServoQuantity::Move => Command::GetMove,
            ServoQuantity::Current => Command::GetCurrent,
            ServoQuantity::Ping => Command::ServoPing,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ServoQuantity::Position => "position",
            ServoQuantity::Feedback => "feedback",
            ServoQuantity::Speed => "speed",
            ServoQuantity::Load => "load",
            ServoQuantity::Voltage => "voltage",
            ServoQuantity::Temperature => "temperature",
            ServoQuantity::Move => "move",
            ServoQuantity::Current => "current",
            ServoQuantity::Ping => "ping",
        }
    }

    /// Load readings are two's complement; everything else is unsigned.
    pub fn is_signed(self) -> bool {
        matches!(self, ServoQuantity::Load)
    }
}

impl fmt::Display for ServoQuantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServoQuantity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        ServoQuantity::ALL
            .into_iter()
            .find(|q| q.as_str() == lower)
            .ok_or_else(|| {
                let names: Vec<&str> = ServoQuantity::ALL.iter().map(|q| q.as_str()).collect();
                format!("unknown quantity '{}' (expected one of: {})", s, names.join(", "))
            })
    }
}

/// Result of an echo round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EchoResult {
    /// Timestamp written into the request.
    pub sent_ms: i64,
    /// Timestamp the controller echoed back.
    pub echoed_ms: i64,
    /// `now - echoed` when the reply arrived.
    pub latency_ms: i64,
}

/// High-level client for the servo/IMU controller.
pub struct Client<S = Transport> {
    session: Arc<Session<S>>,
}

impl<S> Clone for Client<S> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
        }
    }
}

impl Client<Transport> {
    /// Opens the configured transport and starts a session on it.
    pub async fn connect(config: &Config) -> Result<Self, ClientError> {
        let transport = Transport::open(&config.transport).await?;
        Ok(Self::new(transport, config.connection()))
    }
}

impl<S> Client<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Creates a client over an already open transport.
    pub fn new(stream: S, config: ConnectionConfig) -> Self {
        Self::from_session(Session::new(stream, config))
    }

    pub fn from_session(session: Session<S>) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Returns the underlying session.
    pub fn session(&self) -> &Arc<Session<S>> {
        &self.session
    }

    pub fn firmware(&self) -> Firmware {
        self.session.firmware()
    }

    /// Closes the transport.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.session.close().await
    }

    // =========================================================================
    // Helper methods
    // =========================================================================

    /// Executes `command` and decodes the reply.
    pub async fn request(&self, command: Command, data: &[u8]) -> Result<Telemetry, ClientError> {
        let firmware = self.firmware();
        let code = firmware
            .code(command)
            .ok_or(ClientError::UnsupportedCommand {
                command,
                revision: firmware,
            })?;

        let packet = self.session.execute(command.cmd(), code, data).await?;
        Ok(decode_command(command, code, &packet.payload)?)
    }

    fn unexpected(&self, command: Command, telemetry: &Telemetry) -> ClientError {
        ClientError::Protocol(ProtocolError::MalformedPayload {
            code: self.firmware().code(command).unwrap_or_default(),
            reason: format!("{} returned {:?}", command, telemetry),
        })
    }

    async fn write(&self, command: Command, data: &[u8]) -> Result<(), ClientError> {
        self.request(command, data).await.map(|_| ())
    }

    async fn flag(&self, command: Command) -> Result<bool, ClientError> {
        match self.request(command, &[]).await? {
            Telemetry::Flag(value) => Ok(value),
            other => Err(self.unexpected(command, &other)),
        }
    }

    // =========================================================================
    // Servo power
    // =========================================================================

    pub async fn servos_enable(&self) -> Result<(), ClientError> {
        self.write(Command::ServosEnable, &[]).await
    }

    pub async fn servos_disable(&self) -> Result<(), ClientError> {
        self.write(Command::ServosDisable, &[]).await
    }

    /// Enables holding torque. Current firmware only.
    pub async fn torque_enable(&self) -> Result<(), ClientError> {
        self.write(Command::TorqueEnable, &[]).await
    }

    /// Disables holding torque. Current firmware only.
    pub async fn torque_disable(&self) -> Result<(), ClientError> {
        self.write(Command::TorqueDisable, &[]).await
    }

    pub async fn servos_is_enabled(&self) -> Result<bool, ClientError> {
        self.flag(Command::ServosIsEnabled).await
    }

    pub async fn torque_is_enabled(&self) -> Result<bool, ClientError> {
        self.flag(Command::TorqueIsEnabled).await
    }

    // =========================================================================
    // Servo motion and telemetry
    // =========================================================================

    /// Sets all twelve servo positions.
    pub async fn set_positions(&self, positions: &[u16; SERVO_COUNT]) -> Result<(), ClientError> {
        self.write(Command::SetPosition, &payload::positions_payload(positions))
            .await
    }

    /// Sets a single servo, addressed by 1-based id.
    pub async fn set_position(&self, id: u16, position: u16) -> Result<(), ClientError> {
        self.write(
            Command::SetPosition,
            &payload::single_position_payload(id, position),
        )
        .await
    }

    /// Reads one quantity for every servo.
    pub async fn servo_values(&self, quantity: ServoQuantity) -> Result<ServoValues, ClientError> {
        let command = quantity.command();
        match self.request(command, &[]).await? {
            Telemetry::Servo(values) => Ok(values),
            other => Err(self.unexpected(command, &other)),
        }
    }

    pub async fn get_positions(&self) -> Result<ServoValues, ClientError> {
        self.servo_values(ServoQuantity::Position).await
    }

    /// Reads servo loads as signed values.
    pub async fn get_loads(&self) -> Result<Vec<i16>, ClientError> {
        Ok(self.servo_values(ServoQuantity::Load).await?.signed())
    }

    /// Pings every servo; absent servos report 0.
    pub async fn servo_ping(&self) -> Result<ServoValues, ClientError> {
        self.servo_values(ServoQuantity::Ping).await
    }

    // =========================================================================
    // IMU
    // =========================================================================

    pub async fn imu_six_dof(&self) -> Result<ImuSixDof, ClientError> {
        match self.request(Command::ImuSixDof, &[]).await? {
            Telemetry::SixDof(sample) => Ok(sample),
            other => Err(self.unexpected(Command::ImuSixDof, &other)),
        }
    }

    pub async fn imu_attitude(&self) -> Result<ImuAttitude, ClientError> {
        match self.request(Command::ImuAttitude, &[]).await? {
            Telemetry::Attitude(attitude) => Ok(attitude),
            other => Err(self.unexpected(Command::ImuAttitude, &other)),
        }
    }

    // =========================================================================
    // Link diagnostics
    // =========================================================================

    /// Sends the current time and measures how long the controller takes to echo it.
    pub async fn echo(&self) -> Result<EchoResult, ClientError> {
        let sent_ms = now_ms();
        match self
            .request(Command::Echo, &payload::echo_payload(sent_ms))
            .await?
        {
            Telemetry::Echo(echoed_ms) => Ok(EchoResult {
                sent_ms,
                echoed_ms,
                latency_ms: payload::echo_latency_ms(now_ms(), echoed_ms),
            }),
            other => Err(self.unexpected(Command::Echo, &other)),
        }
    }

    pub async fn protocol_version(&self) -> Result<u64, ClientError> {
        match self.request(Command::ProtocolVersion, &[]).await? {
            Telemetry::ProtocolVersion(version) => Ok(version),
            other => Err(self.unexpected(Command::ProtocolVersion, &other)),
        }
    }
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
