//! Where parsed records go.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::error::EngineError;
use crate::profile::Fields;

/// The merged result of one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Record {
    /// Alias, or MAC address when no alias is configured.
    pub device: String,
    pub profile: String,
    pub fields: Fields,
    /// Time from the first request of the cycle to the last response.
    pub duration_ms: u64,
}

/// Consumer of engine output. One sink may be shared by several device tasks,
/// so implementations must tolerate concurrent calls and return quickly.
///
/// Errors returned here are logged and otherwise ignored.
pub trait RecordSink: Send + Sync {
    fn on_record(&self, device: &str, record: &Record) -> anyhow::Result<()>;

    /// Called once when a device gives up for good.
    fn on_error(&self, device: &str, error: &EngineError) -> anyhow::Result<()>;

    fn on_write_complete(&self, _device: &str, _register: u16, _value: u16) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Engine output as messages.
#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Record(Record),
    Error { device: String, error: EngineError },
    WriteComplete { device: String, register: u16, value: u16 },
}

/// Forwards everything into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<SinkEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SinkEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    fn send(&self, event: SinkEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("sink receiver dropped"))
    }
}

impl RecordSink for ChannelSink {
    fn on_record(&self, _device: &str, record: &Record) -> anyhow::Result<()> {
        self.send(SinkEvent::Record(record.clone()))
    }

    fn on_error(&self, device: &str, error: &EngineError) -> anyhow::Result<()> {
        self.send(SinkEvent::Error {
            device: device.to_owned(),
            error: error.clone(),
        })
    }

    fn on_write_complete(&self, device: &str, register: u16, value: u16) -> anyhow::Result<()> {
        self.send(SinkEvent::WriteComplete {
            device: device.to_owned(),
            register,
            value,
        })
    }
}

/// Logs records at `info` and terminal failures at `error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl RecordSink for LogSink {
    fn on_record(&self, device: &str, record: &Record) -> anyhow::Result<()> {
        info!(device, fields = ?record.fields, "record");
        Ok(())
    }

    fn on_error(&self, device: &str, err: &EngineError) -> anyhow::Result<()> {
        error!(device, error = %err, "device stopped");
        Ok(())
    }
}

/// The engine's side of the sink: applies the field filter and keeps sink
/// failures from reaching the state machine.
#[derive(Clone)]
pub(crate) struct Publisher {
    device: String,
    sink: Arc<dyn RecordSink>,
    fields: Vec<String>,
}

impl Publisher {
    pub(crate) fn new(device: String, sink: Arc<dyn RecordSink>, fields: Vec<String>) -> Self {
        Self {
            device,
            sink,
            fields,
        }
    }

    pub(crate) fn device(&self) -> &str {
        &self.device
    }

    pub(crate) fn record(&self, mut record: Record) {
        if !self.fields.is_empty() {
            record.fields.retain(|name, _| self.fields.contains(name));
        }
        if let Err(e) = self.sink.on_record(&self.device, &record) {
            error!(device = %self.device, error = %e, "record sink failed");
        }
    }

    pub(crate) fn error(&self, err: &EngineError) {
        if let Err(e) = self.sink.on_error(&self.device, err) {
            error!(device = %self.device, error = %e, "error sink failed");
        }
    }

    pub(crate) fn write_complete(&self, register: u16, value: u16) {
        if let Err(e) = self.sink.on_write_complete(&self.device, register, value) {
            error!(device = %self.device, error = %e, "write sink failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSink;

    impl RecordSink for FailingSink {
        fn on_record(&self, _device: &str, _record: &Record) -> anyhow::Result<()> {
            anyhow::bail!("database offline")
        }

        fn on_error(&self, _device: &str, _error: &EngineError) -> anyhow::Result<()> {
            anyhow::bail!("database offline")
        }
    }

    fn record() -> Record {
        Record {
            device: "BT-TH-1".to_owned(),
            profile: "rover".to_owned(),
            fields: Fields::from([
                ("battery_voltage".to_owned(), 13.1),
                ("pv_power".to_owned(), 120.0),
            ]),
            duration_ms: 0,
        }
    }

    #[test]
    fn field_filter() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = Publisher::new(
            "BT-TH-1".to_owned(),
            Arc::new(sink),
            vec!["pv_power".to_owned()],
        );
        publisher.record(record());
        match rx.try_recv() {
            Ok(SinkEvent::Record(r)) => {
                assert_eq!(r.fields, Fields::from([("pv_power".to_owned(), 120.0)]))
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn empty_filter_keeps_everything() {
        let (sink, mut rx) = ChannelSink::new();
        let publisher = Publisher::new("BT-TH-1".to_owned(), Arc::new(sink), Vec::new());
        publisher.record(record());
        assert_eq!(rx.try_recv().ok(), Some(SinkEvent::Record(record())));
    }

    #[test]
    fn sink_failures_are_contained() {
        let publisher = Publisher::new("BT-TH-1".to_owned(), Arc::new(FailingSink), Vec::new());
        publisher.record(record());
        publisher.error(&EngineError::Stopped);
        publisher.write_complete(1, 2);
    }
}
