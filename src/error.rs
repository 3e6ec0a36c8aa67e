use bluest::Uuid;
use thiserror::Error;

/// Failures while validating or decoding a single response frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("frame too short: {len} bytes")]
    TooShort { len: usize },
    #[error("CRC check failed: expected {expected:#06x}, received {received:#06x}")]
    CrcMismatch { expected: u16, received: u16 },
    #[error("unexpected frame length: expected {expected} bytes, received {received}")]
    LengthMismatch { expected: usize, received: usize },
    #[error("{width} byte field at offset {offset} exceeds {len} byte frame")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },
    #[error("integer width must be 1-4 bytes, got {0}")]
    InvalidWidth(usize),
}

/// Failures reported by a [`crate::BleTransport`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("connect failed: {0}")]
    Connect(String),
    #[error("subscribe failed: {0}")]
    Subscribe(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("profile has no write characteristic")]
    NoWriteCharacteristic,
    #[error("characteristic {0} not found on device")]
    CharacteristicMissing(Uuid),
}

/// Conditions that end a poll session and hand control back to the supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error(transparent)]
    Write(TransportError),
    #[error("timed out waiting for section {section} (register {register:#06x})")]
    ReadTimeout { section: usize, register: u16 },
    #[error("timed out waiting for write acknowledgement of register {register:#06x}")]
    WriteTimeout { register: u16 },
    #[error("notification stream closed")]
    NotificationsClosed,
}

/// Errors visible to consumers of the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("device not found: {0}")]
    DiscoveryNotFound(String),
    #[error("connect failed: {0}")]
    ConnectFailed(String),
    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
    #[error("frame CRC mismatch: expected {expected:#06x}, received {received:#06x}")]
    FrameCrcMismatch { expected: u16, received: u16 },
    #[error("frame length mismatch: expected {expected} bytes, received {received}")]
    FrameLengthMismatch { expected: usize, received: usize },
    #[error("malformed frame: {0}")]
    FrameMalformed(CodecError),
    #[error("read timed out: {0}")]
    ReadTimeout(String),
    #[error("max reconnect attempts ({attempts}) exceeded, last error: {last_error}")]
    MaxReconnectAttemptsExceeded { attempts: u32, last_error: String },
    #[error("profile {0} cannot write registers")]
    WriteUnsupported(String),
    #[error("write to register {register:#06x} rejected with exception code {code:#04x}")]
    WriteRejected { register: u16, code: u8 },
    #[error("device session has stopped")]
    Stopped,
}

impl From<CodecError> for EngineError {
    fn from(err: CodecError) -> Self {
        match err {
            CodecError::CrcMismatch { expected, received } => {
                EngineError::FrameCrcMismatch { expected, received }
            }
            CodecError::LengthMismatch { expected, received } => {
                EngineError::FrameLengthMismatch { expected, received }
            }
            other => EngineError::FrameMalformed(other),
        }
    }
}

impl From<TransportError> for EngineError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::NotFound(msg) => EngineError::DiscoveryNotFound(msg),
            TransportError::Connect(msg) => EngineError::ConnectFailed(msg),
            TransportError::Subscribe(msg) => EngineError::SubscribeFailed(msg),
            other => EngineError::WriteFailed(other.to_string()),
        }
    }
}

impl From<SessionError> for EngineError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::Write(e) => EngineError::WriteFailed(e.to_string()),
            timeout @ (SessionError::ReadTimeout { .. } | SessionError::WriteTimeout { .. }) => {
                EngineError::ReadTimeout(timeout.to_string())
            }
            SessionError::NotificationsClosed => {
                EngineError::ReadTimeout(SessionError::NotificationsClosed.to_string())
            }
        }
    }
}

/// Invalid configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("device #{index}: either mac_addr or alias must be set")]
    MissingSelector { index: usize },
    #[error("device {device}: {field} must be greater than zero")]
    Zero { device: String, field: &'static str },
    #[error("device {device}: profile \"custom\" requires a [devices.custom] table")]
    MissingCustomProfile { device: String },
    #[error("device {device}: custom profile declares no sections")]
    EmptyProfile { device: String },
    #[error("device {device}: custom profile needs a write_characteristic or a resync table")]
    MissingDelivery { device: String },
    #[error("device {device}: field {field}: {reason}")]
    InvalidField {
        device: String,
        field: String,
        reason: &'static str,
    },
    #[error("device #{index}: mac_addr {mac:?} is not six colon separated hex octets")]
    InvalidMac { index: usize, mac: String },
    #[error("device {device}: no profile given and none can be inferred from the alias")]
    UnknownProfile { device: String },
    #[error("no devices configured")]
    NoDevices,
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
