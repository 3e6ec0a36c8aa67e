//! Keeps one device connected and polled.
//!
//! Each device runs as a single task: discover, connect, subscribe, then hand
//! the link to a [`PollSession`]. A device that is out of range is searched for
//! indefinitely. Connect and subscribe failures are retried a bounded number of
//! times before the device is given up on and the consumer told once. When a
//! session dies the link is torn down and the whole sequence starts again with
//! a fresh attempt budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;
use crate::profile::DeviceProfile;
use crate::session::{PollSession, SessionTiming, WriteCommand};
use crate::sink::{Publisher, RecordSink};
use crate::transport::{BleTransport, DeviceSelector, Notifications};

pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 15;
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_DISCOVERY_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Queued register writes per device.
const COMMAND_BUFFER: usize = 8;

/// Where a device is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Discovering,
    Connecting,
    Subscribing,
    /// Subscribed; the first request has not gone out yet.
    Ready,
    Polling,
    /// Gave up after too many failed connection attempts.
    Faulted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorPolicy {
    /// Connect/subscribe attempts per connection before giving up.
    pub max_reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Pause before scanning again when the device was not seen.
    pub discovery_retry_delay: Duration,
}

impl Default for SupervisorPolicy {
    fn default() -> Self {
        Self {
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            discovery_retry_delay: DEFAULT_DISCOVERY_RETRY_DELAY,
        }
    }
}

/// Everything needed to run one device.
#[derive(Debug, Clone)]
pub struct DeviceSettings {
    pub selector: DeviceSelector,
    pub profile: Arc<DeviceProfile>,
    pub timing: SessionTiming,
    pub policy: SupervisorPolicy,
    /// Publish only these fields; empty publishes everything.
    pub fields: Vec<String>,
}

impl DeviceSettings {
    pub fn new(selector: DeviceSelector, profile: DeviceProfile) -> Self {
        Self {
            selector,
            timing: SessionTiming::for_profile(&profile),
            profile: Arc::new(profile),
            policy: SupervisorPolicy::default(),
            fields: Vec::new(),
        }
    }
}

/// Control surface of a running device task.
#[derive(Debug)]
pub struct EngineHandle {
    device: String,
    profile: Arc<DeviceProfile>,
    cancel: CancellationToken,
    state: watch::Receiver<ConnectionState>,
    commands: mpsc::Sender<WriteCommand>,
    task: JoinHandle<()>,
}

impl EngineHandle {
    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Write a single holding register. The write is sent between poll cycles
    /// and resolves once the device acknowledges it.
    pub async fn write_register(&self, register: u16, value: u16) -> Result<(), EngineError> {
        if self.profile.is_notify_only() {
            return Err(EngineError::WriteUnsupported(self.profile.name.clone()));
        }
        let (reply, response) = oneshot::channel();
        self.commands
            .send(WriteCommand {
                register,
                value,
                reply,
            })
            .await
            .map_err(|_| EngineError::Stopped)?;
        response.await.map_err(|_| EngineError::Stopped)?
    }

    /// Ask the task to stop. Any open connection is closed first.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the task to end.
    pub async fn join(self) {
        if let Err(e) = self.task.await {
            error!(device = %self.device, error = %e, "device task failed");
        }
    }
}

/// Start supervising one device on the current tokio runtime.
pub fn spawn_device<T: BleTransport>(
    transport: Arc<T>,
    settings: DeviceSettings,
    sink: Arc<dyn RecordSink>,
) -> EngineHandle {
    let device = settings.selector.describe();
    let profile = Arc::clone(&settings.profile);
    let cancel = CancellationToken::new();
    let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
    let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);

    let supervisor = Supervisor {
        publisher: Publisher::new(device.clone(), sink, settings.fields.clone()),
        transport,
        settings,
        state: state_tx,
        commands: commands_rx,
        cancel: cancel.clone(),
    };
    let task = tokio::spawn(supervisor.run());

    EngineHandle {
        device,
        profile,
        cancel,
        state: state_rx,
        commands: commands_tx,
        task,
    }
}

enum Exit {
    /// Polling is disabled and the single cycle is done.
    Finished,
    Cancelled,
    Faulted(EngineError),
}

struct Supervisor<T: BleTransport> {
    transport: Arc<T>,
    settings: DeviceSettings,
    publisher: Publisher,
    state: watch::Sender<ConnectionState>,
    commands: mpsc::Receiver<WriteCommand>,
    cancel: CancellationToken,
}

impl<T: BleTransport> Supervisor<T> {
    async fn run(mut self) {
        info!(
            device = %self.publisher.device(),
            profile = %self.settings.profile.name,
            adapter = %self.settings.selector.adapter,
            "starting"
        );

        match self.lifecycle().await {
            Exit::Finished => {
                info!(device = %self.publisher.device(), "polling disabled, done");
            }
            Exit::Cancelled => {
                info!(device = %self.publisher.device(), "stopped");
                self.set_state(ConnectionState::Disconnected);
            }
            Exit::Faulted(err) => {
                error!(device = %self.publisher.device(), error = %err, "giving up");
                self.set_state(ConnectionState::Faulted);
                self.publisher.error(&err);
            }
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            let _ = command.reply.send(Err(EngineError::Stopped));
        }
    }

    async fn lifecycle(&mut self) -> Exit {
        let cancel = self.cancel.clone();
        loop {
            let Some(device) = until_cancelled(&cancel, self.discover()).await else {
                return Exit::Cancelled;
            };
            let (connection, mut notifications) = match self.establish(&device).await {
                None => return Exit::Cancelled,
                Some(Err(e)) => return Exit::Faulted(e),
                Some(Ok(link)) => link,
            };

            self.set_state(ConnectionState::Polling);
            let mut session = PollSession::new(
                self.publisher.device(),
                Arc::clone(&self.settings.profile),
                self.settings.timing,
            );
            let outcome = until_cancelled(
                &cancel,
                session.run(
                    self.transport.as_ref(),
                    &connection,
                    &mut notifications,
                    &self.publisher,
                    &mut self.commands,
                ),
            )
            .await;

            self.transport.disconnect(&connection).await;
            self.set_state(ConnectionState::Disconnected);

            match outcome {
                None => return Exit::Cancelled,
                Some(Ok(())) => return Exit::Finished,
                Some(Err(e)) => {
                    warn!(
                        device = %self.publisher.device(),
                        error = %EngineError::from(e),
                        delay_s = self.settings.policy.reconnect_delay.as_secs(),
                        "session ended, reconnecting"
                    );
                    let delay = sleep(self.settings.policy.reconnect_delay);
                    if until_cancelled(&cancel, delay).await.is_none() {
                        return Exit::Cancelled;
                    }
                }
            }
        }
    }

    /// Scan until the device shows up.
    async fn discover(&self) -> T::Device {
        loop {
            self.set_state(ConnectionState::Discovering);
            match self.transport.discover(&self.settings.selector).await {
                Ok(device) => return device,
                Err(e) => {
                    info!(
                        device = %self.publisher.device(),
                        error = %e,
                        retry_s = self.settings.policy.discovery_retry_delay.as_secs(),
                        "device not found"
                    );
                    sleep(self.settings.policy.discovery_retry_delay).await;
                }
            }
        }
    }

    /// Connect and subscribe, retrying up to the policy's attempt limit.
    /// `None` when cancelled; a connection made by then is closed first.
    async fn establish(
        &self,
        device: &T::Device,
    ) -> Option<Result<(T::Connection, Notifications), EngineError>> {
        let policy = self.settings.policy;
        let notify = self.settings.profile.notify_characteristic;
        let mut last_error = String::from("no attempts made");

        for attempt in 1..=policy.max_reconnect_attempts {
            self.set_state(ConnectionState::Connecting);
            let connected = until_cancelled(&self.cancel, self.transport.connect(device)).await?;
            let failure = match connected {
                Ok(connection) => {
                    self.set_state(ConnectionState::Subscribing);
                    let subscribed =
                        until_cancelled(&self.cancel, self.transport.subscribe(&connection, notify))
                            .await;
                    match subscribed {
                        Some(Ok(notifications)) => {
                            info!(device = %self.publisher.device(), attempt, "connected");
                            self.set_state(ConnectionState::Ready);
                            return Some(Ok((connection, notifications)));
                        }
                        Some(Err(e)) => {
                            self.transport.disconnect(&connection).await;
                            e
                        }
                        None => {
                            self.transport.disconnect(&connection).await;
                            return None;
                        }
                    }
                }
                Err(e) => e,
            };

            warn!(
                device = %self.publisher.device(),
                attempt,
                max_attempts = policy.max_reconnect_attempts,
                error = %failure,
                "connection attempt failed"
            );
            last_error = failure.to_string();
            if attempt < policy.max_reconnect_attempts {
                until_cancelled(&self.cancel, sleep(policy.reconnect_delay)).await?;
            }
        }

        Some(Err(EngineError::MaxReconnectAttemptsExceeded {
            attempts: policy.max_reconnect_attempts,
            last_error,
        }))
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(
                device = %self.publisher.device(),
                from = ?previous,
                to = ?state,
                "state change"
            );
        }
    }
}

async fn until_cancelled<F: Future>(cancel: &CancellationToken, future: F) -> Option<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => None,
        output = future => Some(output),
    }
}
