//! # pupperlink-client
//!
//! Async client for the quadruped's motion controller.
//!
//! This crate provides:
//! - Serial and UNIX socket transports
//! - A request/response session with timeouts and statistics
//! - Typed operations for servo control and IMU reads
//! - A periodic poller for streaming telemetry
//! - A client for the servo proxy daemon

pub mod client;
pub mod config;
pub mod error;
pub mod poller;
pub mod proxy;
pub mod session;
pub mod transport;

pub use client::{now_ms, Client, EchoResult, ServoQuantity};
pub use config::{
    CalibrationConfig, Config, ConfigError, PollerConfig, SessionConfig, TransportConfig,
    TransportKind,
};
pub use error::ClientError;
pub use poller::{PollRequest, Poller, PollerHandle, PollerSummary, Sample};
pub use proxy::{ProxyClient, ProxyOpcode, DEFAULT_PROXY_SOCKET};
pub use session::{ConnectionConfig, Session, SessionStats, StatsSnapshot};
pub use transport::{SeqPacketStream, SerialPort, Transport};
