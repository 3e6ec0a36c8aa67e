//! An in-memory [`BleTransport`] with scripted responses, for tests and demos.
//!
//! ```
//! use shuntread::{build_read_request, mock::MockTransport};
//!
//! let transport = MockTransport::new();
//! transport.respond(&build_read_request(1, 0x0100, 1), vec![vec![0x01, 0x03]]);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::TransportError;
use crate::transport::{BleTransport, DeviceSelector, Notifications, NOTIFICATION_BUFFER};

#[derive(Debug, Default)]
struct MockState {
    absent_scans: usize,
    connect_failures: usize,
    subscribe_failures: usize,
    subscribe_delay: Duration,
    write_failures: usize,
    responses: HashMap<Vec<u8>, Vec<Vec<u8>>>,
    on_subscribe: Vec<Vec<u8>>,
    notifier: Option<mpsc::Sender<Vec<u8>>>,
    writes: Vec<Vec<u8>>,
    discover_calls: usize,
    connect_attempts: Vec<Instant>,
    subscriptions: usize,
    disconnects: usize,
}

/// Scripted transport. Clones share state, so a test can keep one handle while
/// the engine owns another.
#[derive(Debug, Clone, Default)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

#[derive(Debug)]
pub struct MockDevice;

#[derive(Debug)]
pub struct MockConnection;

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        // A poisoned lock only happens after a test already panicked.
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Answer every write of `request` with these notifications, in order.
    pub fn respond(&self, request: &[u8], notifications: Vec<Vec<u8>>) -> &Self {
        self.state()
            .responses
            .insert(request.to_vec(), notifications);
        self
    }

    /// Push these notifications as soon as a subscription is made.
    pub fn on_subscribe(&self, notifications: Vec<Vec<u8>>) -> &Self {
        self.state().on_subscribe = notifications;
        self
    }

    /// Report the device as absent for the next `scans` discoveries.
    pub fn absent_for(&self, scans: usize) -> &Self {
        self.state().absent_scans = scans;
        self
    }

    /// Fail the next `attempts` connects.
    pub fn fail_connects(&self, attempts: usize) -> &Self {
        self.state().connect_failures = attempts;
        self
    }

    pub fn fail_subscribes(&self, attempts: usize) -> &Self {
        self.state().subscribe_failures = attempts;
        self
    }

    /// Make every subscription take this long to complete.
    pub fn delay_subscribes(&self, delay: Duration) -> &Self {
        self.state().subscribe_delay = delay;
        self
    }

    pub fn fail_writes(&self, writes: usize) -> &Self {
        self.state().write_failures = writes;
        self
    }

    /// Deliver a notification on the current subscription. Returns false when
    /// nobody is subscribed.
    pub fn push(&self, notification: Vec<u8>) -> bool {
        match &self.state().notifier {
            Some(tx) => tx.try_send(notification).is_ok(),
            None => false,
        }
    }

    /// End the current notification stream, as a dropped link would.
    pub fn close_notifications(&self) {
        self.state().notifier = None;
    }

    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.state().writes.clone()
    }

    pub fn discover_calls(&self) -> usize {
        self.state().discover_calls
    }

    pub fn connect_attempts(&self) -> Vec<Instant> {
        self.state().connect_attempts.clone()
    }

    pub fn subscriptions(&self) -> usize {
        self.state().subscriptions
    }

    pub fn disconnects(&self) -> usize {
        self.state().disconnects
    }
}

#[async_trait]
impl BleTransport for MockTransport {
    type Device = MockDevice;
    type Connection = MockConnection;

    async fn discover(&self, selector: &DeviceSelector) -> Result<MockDevice, TransportError> {
        let mut state = self.state();
        state.discover_calls += 1;
        if state.absent_scans > 0 {
            state.absent_scans -= 1;
            return Err(TransportError::NotFound(selector.describe()));
        }
        Ok(MockDevice)
    }

    async fn connect(&self, _device: &MockDevice) -> Result<MockConnection, TransportError> {
        let mut state = self.state();
        state.connect_attempts.push(Instant::now());
        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(TransportError::Connect("connection refused".to_owned()));
        }
        Ok(MockConnection)
    }

    async fn subscribe(
        &self,
        _connection: &MockConnection,
        _characteristic: Uuid,
    ) -> Result<Notifications, TransportError> {
        let delay = self.state().subscribe_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state();
        state.subscriptions += 1;
        if state.subscribe_failures > 0 {
            state.subscribe_failures -= 1;
            return Err(TransportError::Subscribe("notify not permitted".to_owned()));
        }
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        for notification in &state.on_subscribe {
            let _ = tx.try_send(notification.clone());
        }
        state.notifier = Some(tx);
        Ok(rx)
    }

    async fn write(
        &self,
        _connection: &MockConnection,
        characteristic: Option<Uuid>,
        data: &[u8],
    ) -> Result<(), TransportError> {
        characteristic.ok_or(TransportError::NoWriteCharacteristic)?;
        let mut state = self.state();
        state.writes.push(data.to_vec());
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(TransportError::Write("link lost".to_owned()));
        }
        let replies = state.responses.get(data).cloned().unwrap_or_default();
        if let Some(tx) = &state.notifier {
            for reply in replies {
                let _ = tx.try_send(reply);
            }
        }
        Ok(())
    }

    async fn disconnect(&self, _connection: &MockConnection) {
        let mut state = self.state();
        state.disconnects += 1;
        state.notifier = None;
    }
}
