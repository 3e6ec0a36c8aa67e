//! The request/response loop run over one live connection.
//!
//! Sections are read strictly one at a time: a request is written, then the
//! session waits for the matching response before anything else is sent.
//! Responses arrive over one or more notifications and are buffered until a
//! whole frame is present. A section whose response is corrupt or an error
//! reply is skipped; a section that never answers ends the session, since that
//! usually means the link rather than the register is bad.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep, sleep_until, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{EngineError, SessionError};
use crate::frame::{
    assemble, build_read_request, build_write_request, read_response_len, validate_and_extract,
    Assembly, EXCEPTION_FLAG, READ_HOLDING_REGISTERS,
};
use crate::profile::{DeviceProfile, Fields};
use crate::resync::Resynchronizer;
use crate::sink::{Publisher, Record};
use crate::transport::{BleTransport, Notifications};

/// Pause between sections; some devices drop back-to-back GATT writes.
pub const SETTLE_DELAY: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTiming {
    pub read_timeout: Duration,
    pub settle_delay: Duration,
    /// Pause between cycles; `None` stops after a single cycle.
    pub poll_interval: Option<Duration>,
}

impl SessionTiming {
    pub fn for_profile(profile: &DeviceProfile) -> Self {
        Self {
            read_timeout: profile.read_timeout,
            settle_delay: SETTLE_DELAY,
            poll_interval: Some(DEFAULT_POLL_INTERVAL),
        }
    }
}

/// The request a session is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pending {
    Read { section: usize },
    Write { register: u16, value: u16 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingResponse(Pending),
}

/// Progress through one pass over the profile's sections.
#[derive(Debug, Clone)]
pub struct PollCycle {
    pub section_index: usize,
    pub accumulated: Fields,
    pub started_at: Instant,
}

impl PollCycle {
    fn new() -> Self {
        Self {
            section_index: 0,
            accumulated: Fields::new(),
            started_at: Instant::now(),
        }
    }
}

/// What a notification did to the session.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Nothing was outstanding.
    Ignored,
    /// More bytes are needed.
    Partial,
    /// The section was handled; the next one is due.
    Advance(usize),
    Complete(Record),
    WriteComplete { register: u16, value: u16 },
    WriteRejected { register: u16, code: u8 },
}

/// A register write queued to run between poll cycles.
#[derive(Debug)]
pub struct WriteCommand {
    pub register: u16,
    pub value: u16,
    pub reply: oneshot::Sender<Result<(), EngineError>>,
}

pub struct PollSession {
    device: String,
    profile: Arc<DeviceProfile>,
    timing: SessionTiming,
    state: SessionState,
    cycle: PollCycle,
    rx_buffer: Vec<u8>,
}

impl PollSession {
    pub fn new(
        device: impl Into<String>,
        profile: Arc<DeviceProfile>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            device: device.into(),
            profile,
            timing,
            state: SessionState::Idle,
            cycle: PollCycle::new(),
            rx_buffer: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cycle(&self) -> &PollCycle {
        &self.cycle
    }

    /// Start waiting for the current section and return the request to write,
    /// or `None` when the device pushes frames without being asked.
    pub fn begin_section(&mut self) -> Option<[u8; 8]> {
        if self.cycle.section_index == 0 {
            self.cycle = PollCycle::new();
        }
        let index = self.cycle.section_index;
        let section = &self.profile.sections[index];
        self.rx_buffer.clear();
        self.state = SessionState::AwaitingResponse(Pending::Read { section: index });

        if self.profile.is_notify_only() {
            None
        } else {
            Some(build_read_request(
                self.profile.slave_id,
                section.register,
                section.word_count,
            ))
        }
    }

    /// Start waiting for the acknowledgement of a single register write.
    pub fn begin_write(&mut self, register: u16, value: u16) -> [u8; 8] {
        self.rx_buffer.clear();
        self.state = SessionState::AwaitingResponse(Pending::Write { register, value });
        build_write_request(self.profile.slave_id, register, value)
    }

    /// Drop whatever is outstanding and start the next cycle from the top.
    pub fn abort(&mut self) {
        self.state = SessionState::Idle;
        self.rx_buffer.clear();
        self.cycle = PollCycle::new();
    }

    pub fn handle_notification(&mut self, data: &[u8]) -> Step {
        let SessionState::AwaitingResponse(pending) = self.state else {
            debug!(
                device = %self.device,
                rx = %hex::encode(data),
                "ignoring unsolicited notification"
            );
            return Step::Ignored;
        };
        self.rx_buffer.extend_from_slice(data);

        match pending {
            Pending::Read { section } => self.on_read_data(section),
            Pending::Write { register, value } => self.on_write_data(register, value),
        }
    }

    fn on_read_data(&mut self, index: usize) -> Step {
        let frame = match self.profile.resynchronizer() {
            Some(resync) => match take_resynced(resync, &mut self.rx_buffer) {
                Some(frame) => frame,
                None => return Step::Partial,
            },
            None => {
                let expected = read_response_len(self.profile.sections[index].word_count);
                match assemble(&self.rx_buffer, Some(expected)) {
                    Assembly::Incomplete => return Step::Partial,
                    Assembly::Unrecognized(function) => {
                        warn!(
                            device = %self.device,
                            function,
                            rx = %hex::encode(&self.rx_buffer),
                            "unknown operation, discarding"
                        );
                        self.rx_buffer.clear();
                        return Step::Partial;
                    }
                    Assembly::Complete(_) => std::mem::take(&mut self.rx_buffer),
                }
            }
        };

        self.apply_section(index, &frame);
        self.finish_section(index)
    }

    fn apply_section(&mut self, index: usize, raw: &[u8]) {
        let section = &self.profile.sections[index];
        let is_exception = raw.get(1).is_some_and(|f| f & EXCEPTION_FLAG != 0);
        let (expected_words, expected_function) = match self.profile.resynchronizer() {
            Some(resync) => (None, resync.header_byte),
            None if is_exception => (None, READ_HOLDING_REGISTERS),
            None => (Some(section.word_count), READ_HOLDING_REGISTERS),
        };

        match validate_and_extract(raw, expected_words) {
            Ok(frame) if frame.function == expected_function => {
                let fields = section.decoder.decode(frame.frame);
                debug!(device = %self.device, section = index, ?fields, "read operation success");
                self.cycle.accumulated.extend(fields);
            }
            Ok(frame) => {
                warn!(
                    device = %self.device,
                    section = index,
                    register = section.register,
                    function = frame.function,
                    exception = frame.exception_code(),
                    "read operation failed"
                );
            }
            Err(e) => {
                warn!(
                    device = %self.device,
                    section = index,
                    register = section.register,
                    error = %EngineError::from(e),
                    rx = %hex::encode(raw),
                    "read operation failed"
                );
            }
        }
    }

    fn finish_section(&mut self, index: usize) -> Step {
        self.state = SessionState::Idle;
        if index + 1 >= self.profile.sections.len() {
            Step::Complete(self.complete_cycle())
        } else {
            self.cycle.section_index = index + 1;
            Step::Advance(index + 1)
        }
    }

    fn complete_cycle(&mut self) -> Record {
        let cycle = std::mem::replace(&mut self.cycle, PollCycle::new());
        Record {
            device: self.device.clone(),
            profile: self.profile.name.clone(),
            fields: cycle.accumulated,
            duration_ms: cycle.started_at.elapsed().as_millis() as u64,
        }
    }

    fn on_write_data(&mut self, register: u16, value: u16) -> Step {
        match assemble(&self.rx_buffer, None) {
            Assembly::Incomplete => return Step::Partial,
            Assembly::Unrecognized(function) => {
                warn!(device = %self.device, function, "unknown operation, discarding");
                self.rx_buffer.clear();
                return Step::Partial;
            }
            Assembly::Complete(_) => {}
        }

        let raw = std::mem::take(&mut self.rx_buffer);
        let frame = match validate_and_extract(&raw, None) {
            Ok(frame) => frame,
            Err(e) => {
                warn!(device = %self.device, register, error = %e, "invalid write acknowledgement");
                return Step::Partial;
            }
        };

        if let Some(code) = frame.exception_code() {
            self.state = SessionState::Idle;
            return Step::WriteRejected { register, code };
        }
        if frame.write_echo() != Some((register, value)) {
            warn!(
                device = %self.device,
                register,
                rx = %hex::encode(&raw),
                "unexpected reply to write"
            );
            return Step::Partial;
        }

        self.state = SessionState::Idle;
        self.cycle.accumulated.clear();
        info!(device = %self.device, register, value, "write operation complete");
        Step::WriteComplete { register, value }
    }

    fn timeout_error(&self) -> SessionError {
        match self.state {
            SessionState::AwaitingResponse(Pending::Write { register, .. }) => {
                SessionError::WriteTimeout { register }
            }
            SessionState::AwaitingResponse(Pending::Read { section }) => SessionError::ReadTimeout {
                section,
                register: self.profile.sections[section].register,
            },
            SessionState::Idle => SessionError::NotificationsClosed,
        }
    }

    /// Feed notifications queued while nothing was outstanding through the
    /// idle state, which ignores them.
    fn discard_stale(&mut self, notifications: &mut Notifications) {
        while let Ok(data) = notifications.try_recv() {
            self.handle_notification(&data);
        }
    }

    async fn await_response(
        &mut self,
        notifications: &mut Notifications,
    ) -> Result<Step, SessionError> {
        let deadline = Instant::now() + self.timing.read_timeout;
        loop {
            let data = match timeout_at(deadline, notifications.recv()).await {
                Ok(Some(data)) => data,
                Ok(None) => {
                    self.abort();
                    return Err(SessionError::NotificationsClosed);
                }
                Err(_) => {
                    let err = self.timeout_error();
                    warn!(device = %self.device, error = %err, "on_read_timeout");
                    self.abort();
                    return Err(err);
                }
            };
            match self.handle_notification(&data) {
                Step::Ignored | Step::Partial => continue,
                step => return Ok(step),
            }
        }
    }

    /// Read every section once and return the merged record.
    pub async fn run_cycle<T: BleTransport>(
        &mut self,
        transport: &T,
        connection: &T::Connection,
        notifications: &mut Notifications,
    ) -> Result<Record, SessionError> {
        if self.profile.sections.is_empty() {
            return Ok(self.complete_cycle());
        }

        loop {
            self.discard_stale(notifications);
            let index = self.cycle.section_index;
            if let Some(request) = self.begin_section() {
                debug!(
                    device = %self.device,
                    section = index,
                    tx = %hex::encode(request),
                    "read request"
                );
                if let Err(e) = transport
                    .write(connection, self.profile.write_characteristic(), &request)
                    .await
                {
                    self.abort();
                    return Err(SessionError::Write(e));
                }
            }

            match self.await_response(notifications).await? {
                Step::Advance(_) => sleep(self.timing.settle_delay).await,
                Step::Complete(record) => return Ok(record),
                other => {
                    debug!(device = %self.device, step = ?other, "unexpected step during read")
                }
            }
        }
    }

    /// Poll until polling is disabled or the connection fails. Queued writes
    /// run in the pause between cycles.
    pub(crate) async fn run<T: BleTransport>(
        &mut self,
        transport: &T,
        connection: &T::Connection,
        notifications: &mut Notifications,
        publisher: &Publisher,
        commands: &mut mpsc::Receiver<WriteCommand>,
    ) -> Result<(), SessionError> {
        loop {
            let record = self.run_cycle(transport, connection, notifications).await?;
            info!(device = %self.device, fields = record.fields.len(), "read operation complete");
            publisher.record(record);

            let Some(interval) = self.timing.poll_interval else {
                return Ok(());
            };
            let wake = Instant::now() + interval;
            loop {
                tokio::select! {
                    _ = sleep_until(wake) => break,
                    command = commands.recv() => match command {
                        Some(command) => {
                            self.execute_write(
                                transport,
                                connection,
                                notifications,
                                publisher,
                                command,
                            )
                            .await?
                        }
                        None => {
                            sleep_until(wake).await;
                            break;
                        }
                    },
                }
            }
        }
    }

    async fn execute_write<T: BleTransport>(
        &mut self,
        transport: &T,
        connection: &T::Connection,
        notifications: &mut Notifications,
        publisher: &Publisher,
        command: WriteCommand,
    ) -> Result<(), SessionError> {
        let WriteCommand {
            register,
            value,
            reply,
        } = command;

        let Some(characteristic) = self.profile.write_characteristic() else {
            let _ = reply.send(Err(EngineError::WriteUnsupported(self.profile.name.clone())));
            return Ok(());
        };

        self.discard_stale(notifications);
        let request = self.begin_write(register, value);
        debug!(device = %self.device, tx = %hex::encode(request), "write request");
        if let Err(e) = transport.write(connection, Some(characteristic), &request).await {
            self.abort();
            let _ = reply.send(Err(EngineError::WriteFailed(e.to_string())));
            return Err(SessionError::Write(e));
        }

        let result = match self.await_response(notifications).await {
            Ok(Step::WriteComplete { register, value }) => {
                publisher.write_complete(register, value);
                Ok(())
            }
            Ok(Step::WriteRejected { register, code }) => {
                warn!(device = %self.device, register, code, "write rejected");
                Err(EngineError::WriteRejected { register, code })
            }
            Ok(other) => {
                debug!(device = %self.device, step = ?other, "unexpected step during write");
                Ok(())
            }
            Err(e) => {
                let _ = reply.send(Err(EngineError::from(e.clone())));
                return Err(e);
            }
        };
        let _ = reply.send(result);
        Ok(())
    }
}

/// Pull the first valid frame out of `buffer`, keeping whatever follows it.
/// Without a match, only the tail that could still begin a frame is kept.
fn take_resynced(resync: &Resynchronizer, buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    if let Some((offset, frame)) = resync.find(buffer) {
        let frame = frame.to_vec();
        if offset > 0 {
            debug!(skipped = offset, "resynchronized frame");
        }
        buffer.drain(..offset + frame.len());
        return Some(frame);
    }

    let keep = resync.retained_tail();
    if buffer.len() > keep {
        buffer.drain(..buffer.len() - keep);
    }
    None
}
