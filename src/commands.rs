//! Command execution.

use crate::{CalibrationAction, Commands, ImuKind, ProxyAction, TorqueState};
use colored::Colorize;
use pupperlink_client::{
    Client, ClientError, Config, PollRequest, Poller, PollerConfig, ProxyClient, ServoQuantity,
};
use pupperlink_protocol::{ServoValues, Telemetry, SERVO_COUNT};
use pupperlink_storage::{Calibration, CalibrationStore};
use serde::Serialize;
use serde_json::json;
use std::path::Path;

type CommandResult = Result<String, Box<dyn std::error::Error>>;

/// Executes a one-shot controller command and returns the formatted output.
pub async fn execute(client: &Client, cmd: Commands, json: bool) -> CommandResult {
    match cmd {
        Commands::Calibration { .. } | Commands::Proxy { .. } | Commands::Monitor { .. } => {
            unreachable!()
        }

        Commands::Enable => {
            client.servos_enable().await?;
            Ok(done(json, "Servos enabled"))
        }

        Commands::Disable => {
            client.servos_disable().await?;
            Ok(done(json, "Servos disabled"))
        }

        Commands::Torque { state } => {
            match state {
                TorqueState::On => client.torque_enable().await?,
                TorqueState::Off => client.torque_disable().await?,
            }
            let label = match state {
                TorqueState::On => "Torque enabled",
                TorqueState::Off => "Torque disabled",
            };
            Ok(done(json, label))
        }

        Commands::Status => {
            let servos = client.servos_is_enabled().await?;
            let torque = match client.torque_is_enabled().await {
                Ok(torque) => Some(torque),
                Err(ClientError::UnsupportedCommand { .. }) => None,
                Err(e) => return Err(e.into()),
            };

            if json {
                return to_json(&json!({
                    "firmware": client.firmware(),
                    "servos_enabled": servos,
                    "torque_enabled": torque,
                }));
            }
            Ok(format!(
                "{}\n  Firmware: {}\n  Servos: {}\n  Torque: {}",
                "Controller status".bold(),
                client.firmware(),
                on_off(Some(servos)),
                on_off(torque)
            ))
        }

        Commands::SetPosition {
            positions,
            id,
            position,
        } => match (id, position) {
            (Some(id), Some(position)) => {
                check_servo_id(id)?;
                client.set_position(id, position).await?;
                Ok(done(json, &format!("Servo {} set to {}", id, position)))
            }
            _ => {
                let positions = parse_positions(&positions)?;
                client.set_positions(&positions).await?;
                Ok(done(json, "Positions set"))
            }
        },

        Commands::Get { quantity } => {
            let values = client.servo_values(quantity).await?;
            Ok(format_servo_values(quantity, &values, json))
        }

        Commands::Imu { kind } => match kind {
            ImuKind::SixDof => {
                let sample = client.imu_six_dof().await?;
                if json {
                    return to_json(&sample);
                }
                Ok(format!(
                    "{}\n  acc:  {}\n  gyro: {}",
                    "IMU six-dof".bold(),
                    format_floats(&sample.acc[..]),
                    format_floats(&sample.gyro[..])
                ))
            }
            ImuKind::Attitude => {
                let attitude = client.imu_attitude().await?;
                if json {
                    return to_json(&attitude);
                }
                Ok(format!(
                    "{}\n  dq: {}\n  dv: {}\n  AE_REG1: 0x{:02x}  AE_REG2: 0x{:02x}",
                    "IMU attitude".bold(),
                    format_floats(&attitude.dq[..]),
                    format_floats(&attitude.dv[..]),
                    attitude.ae_reg1,
                    attitude.ae_reg2
                ))
            }
        },

        Commands::Echo => {
            let echo = client.echo().await?;
            if json {
                return to_json(&echo);
            }
            Ok(format!(
                "{} latency {} ms",
                "ECHO".green(),
                echo.latency_ms.to_string().cyan()
            ))
        }

        Commands::Version => {
            let version = client.protocol_version().await?;
            if json {
                return to_json(&json!({ "protocol_version": version }));
            }
            Ok(format!("Protocol version: {}", version.to_string().cyan()))
        }
    }
}

/// Polls `quantity` and prints each sample until interrupted or `count` samples arrive.
pub async fn monitor(
    client: Client,
    quantity: ServoQuantity,
    config: &PollerConfig,
    count: Option<u64>,
    json: bool,
) -> CommandResult {
    let (handle, mut rx) = Poller::new(client, PollRequest::new(quantity.command()))
        .with_config(config.clone())
        .spawn()?;

    eprintln!(
        "{} {} every {} ms",
        "Monitoring".green(),
        quantity.as_str().cyan(),
        config.interval_ms
    );
    eprintln!("{}", "Press Ctrl+C to stop...".dimmed());

    let mut printed = 0u64;
    loop {
        tokio::select! {
            sample = rx.recv() => {
                let Some(sample) = sample else {
                    eprintln!("{}", "Connection closed".red());
                    break;
                };
                match sample.result {
                    Ok(Telemetry::Servo(values)) => {
                        let line = if json {
                            serde_json::to_string(&json!({
                                "seq": sample.seq,
                                "at": sample.at,
                                "quantity": quantity,
                                "values": servo_json(quantity, &values),
                            }))?
                        } else {
                            format!(
                                "{} {}",
                                format!("{:>6}", sample.seq).dimmed(),
                                format_values(quantity, &values)
                            )
                        };
                        println!("{}", line);
                        printed += 1;
                    }
                    Ok(other) => eprintln!("{}: unexpected reply {:?}", "Warning".yellow(), other),
                    Err(e) => eprintln!("{}: {}", "Warning".yellow(), e),
                }
                if count.is_some_and(|n| printed >= n) {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", "Stopping monitor...".dimmed());
                break;
            }
        }
    }
    drop(rx);

    let (client, summary) = handle.stop().await?;
    let stats = client.session().stats().snapshot();
    eprintln!(
        "{} {} ticks, {} errors, {} dropped, {} corrupt frames, {} stale packets",
        "Summary:".bold(),
        summary.ticks,
        summary.errors,
        summary.dropped,
        stats.corrupt_frames,
        stats.stale_packets
    );
    Ok(String::new())
}

/// Shows or resets the calibration record.
pub fn calibration(config: &Config, action: CalibrationAction, json: bool) -> CommandResult {
    let store = CalibrationStore::open(&config.calibration.path)?;

    let (label, calibration) = match action {
        CalibrationAction::Show => {
            if store.exists() {
                ("Calibration", store.load()?)
            } else {
                ("Calibration (default, not stored)", Calibration::default())
            }
        }
        CalibrationAction::Reset => ("Calibration reset", store.reset()?),
    };

    if json {
        return to_json(&calibration);
    }

    let mut output = format!(
        "{} {}\n  Scale factor: {:.4}\n  Neutral angles (deg):",
        label.bold(),
        store.path().display().to_string().dimmed(),
        calibration.scale_factor
    );
    for (joint, row) in calibration.neutral_angles.iter().enumerate() {
        output.push_str(&format!("\n    joint {}: {}", joint, format_floats(&row[..])));
    }
    Ok(output)
}

/// Runs a request against the servo proxy daemon.
pub async fn proxy(config: &Config, socket: &Path, action: ProxyAction, json: bool) -> CommandResult {
    let mut proxy = ProxyClient::connect(socket, config.session.request_timeout())
        .await
        .map_err(|e| {
            eprintln!("{}: {}", "Proxy connection failed".red(), e);
            e
        })?;

    match action {
        ProxyAction::GetPositions => {
            let words = proxy.get_positions().await?;
            format_words("positions", &words, json)
        }
        ProxyAction::GetLoads => {
            let words = proxy.get_loads().await?;
            format_words("loads", &words, json)
        }
        ProxyAction::SetPositions { positions } => {
            let positions = parse_positions(&positions)?;
            proxy.set_positions(&positions).await?;
            Ok(done(json, "Positions set"))
        }
    }
}

/// Checks that exactly one position per servo was given.
fn parse_positions(values: &[u16]) -> Result<[u16; SERVO_COUNT], String> {
    <[u16; SERVO_COUNT]>::try_from(values).map_err(|_| {
        format!(
            "expected {} positions, got {} (use --id/--position for a single servo)",
            SERVO_COUNT,
            values.len()
        )
    })
}

fn check_servo_id(id: u16) -> Result<(), String> {
    if (1..=SERVO_COUNT as u16).contains(&id) {
        Ok(())
    } else {
        Err(format!("servo id must be 1-{}, got {}", SERVO_COUNT, id))
    }
}

fn servo_json(quantity: ServoQuantity, values: &ServoValues) -> serde_json::Value {
    if quantity.is_signed() {
        json!(values.signed())
    } else {
        json!(values.values())
    }
}

fn format_servo_values(quantity: ServoQuantity, values: &ServoValues, json: bool) -> String {
    if json {
        return serde_json::to_string_pretty(&json!({
            "quantity": quantity,
            "values": servo_json(quantity, values),
        }))
        .unwrap_or_default();
    }
    format!(
        "{}\n  {}",
        format!("Servo {}", quantity).bold(),
        format_values(quantity, values)
    )
}

fn format_values(quantity: ServoQuantity, values: &ServoValues) -> String {
    let cells: Vec<String> = if quantity.is_signed() {
        values.signed().iter().map(|v| format!("{:>6}", v)).collect()
    } else {
        values.values().iter().map(|v| format!("{:>6}", v)).collect()
    };
    cells.join(" ")
}

fn format_words(label: &str, words: &[i16; SERVO_COUNT], json: bool) -> CommandResult {
    if json {
        return to_json(&json!({ label: words }));
    }
    let cells: Vec<String> = words.iter().map(|v| format!("{:>6}", v)).collect();
    Ok(format!("{}\n  {}", format!("Proxy {}", label).bold(), cells.join(" ")))
}

fn format_floats(values: &[impl std::fmt::Display]) -> String {
    values
        .iter()
        .map(|v| format!("{:>10.4}", v))
        .collect::<Vec<_>>()
        .join(" ")
}

fn on_off(state: Option<bool>) -> String {
    match state {
        Some(true) => "on".green().to_string(),
        Some(false) => "off".yellow().to_string(),
        None => "n/a".dimmed().to_string(),
    }
}

fn done(json: bool, message: &str) -> String {
    if json {
        json!({ "ok": true }).to_string()
    } else {
        message.green().to_string()
    }
}

fn to_json<T: Serialize>(value: &T) -> CommandResult {
    Ok(serde_json::to_string_pretty(value)?)
}
