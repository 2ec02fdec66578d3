//! Periodic polling.
//!
//! A poller repeats one command on a fixed period from a single task and publishes each
//! decoded reply on a bounded channel. The task is the only user of the session while it
//! runs, so writes and reads on the transport never interleave.

use crate::client::Client;
use crate::config::PollerConfig;
use crate::error::ClientError;
use pupperlink_protocol::{Command, Telemetry};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// One poll result.
#[derive(Debug)]
pub struct Sample {
    /// Tick number, starting at zero. Gaps mean samples were dropped.
    pub seq: u64,
    pub at: chrono::DateTime<chrono::Utc>,
    pub result: Result<Telemetry, ClientError>,
}

/// What a poller task sends on every tick.
#[derive(Debug, Clone)]
pub struct PollRequest {
    pub command: Command,
    pub data: Vec<u8>,
}

impl PollRequest {
    pub fn new(command: Command) -> Self {
        Self {
            command,
            data: Vec::new(),
        }
    }

    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }
}

/// Totals reported when a poller stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollerSummary {
    pub ticks: u64,
    pub errors: u64,
    /// Samples discarded because the channel was full.
    pub dropped: u64,
}

/// Handle to a running poller task.
pub struct PollerHandle<S> {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<(Client<S>, PollerSummary)>,
}

impl<S> PollerHandle<S> {
    /// Returns whether the task has exited on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the task and returns the client it was using.
    pub async fn stop(mut self) -> Result<(Client<S>, PollerSummary), ClientError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        (&mut self.task).await.map_err(|e| {
            tracing::warn!(error = %e, "poller task failed");
            ClientError::PollerStopped
        })
    }
}

/// Builder for a poller task.
pub struct Poller<S> {
    client: Client<S>,
    request: PollRequest,
    config: PollerConfig,
}

impl<S> Poller<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub fn new(client: Client<S>, request: PollRequest) -> Self {
        Self {
            client,
            request,
            config: PollerConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PollerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.config.interval_ms = interval.as_millis().max(1) as u64;
        self
    }

    /// Starts the task. See [`spawn`].
    pub fn spawn(self) -> Result<(PollerHandle<S>, mpsc::Receiver<Sample>), ClientError> {
        spawn(self.client, self.request, &self.config)
    }
}

/// Spawns a poller that runs `request` every `config.interval()`.
///
/// Ticks that fall behind are skipped, never burst. The task ends when stopped, when the
/// receiver is dropped, or when the transport goes away.
pub fn spawn<S>(
    client: Client<S>,
    request: PollRequest,
    config: &PollerConfig,
) -> Result<(PollerHandle<S>, mpsc::Receiver<Sample>), ClientError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let firmware = client.firmware();
    if !firmware.supports(request.command) {
        return Err(ClientError::UnsupportedCommand {
            command: request.command,
            revision: firmware,
        });
    }

    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let (stop_tx, stop_rx) = oneshot::channel();
    let period = config.interval().max(Duration::from_millis(1));

    tracing::info!(
        command = %request.command,
        period_ms = period.as_millis() as u64,
        "starting poller"
    );
    let task = tokio::spawn(run(client, request, period, tx, stop_rx));

    Ok((
        PollerHandle {
            stop: Some(stop_tx),
            task,
        },
        rx,
    ))
}

async fn run<S>(
    client: Client<S>,
    request: PollRequest,
    period: Duration,
    tx: mpsc::Sender<Sample>,
    mut stop: oneshot::Receiver<()>,
) -> (Client<S>, PollerSummary)
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut summary = PollerSummary::default();

    loop {
        tokio::select! {
            biased;
            _ = &mut stop => break,
            _ = tx.closed() => break,
            _ = ticker.tick() => {}
        }

        let result = client.request(request.command, &request.data).await;
        let fatal = matches!(
            result,
            Err(ClientError::TransportClosed) | Err(ClientError::NotConnected)
        );
        if result.is_err() {
            summary.errors += 1;
        }

        let sample = Sample {
            seq: summary.ticks,
            at: chrono::Utc::now(),
            result,
        };
        summary.ticks += 1;

        match tx.try_send(sample) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(sample)) => {
                summary.dropped += 1;
                tracing::debug!(seq = sample.seq, "poller channel full, dropping sample");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => break,
        }

        if fatal {
            tracing::info!("transport gone, stopping poller");
            break;
        }
    }

    tracing::debug!(
        ticks = summary.ticks,
        errors = summary.errors,
        dropped = summary.dropped,
        "poller stopped"
    );
    (client, summary)
}
