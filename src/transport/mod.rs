//! The BLE primitives the engine needs, behind a trait so the protocol code can
//! run against real hardware or an in-memory fake.

mod bluest_backend;

use std::time::Duration;

use async_trait::async_trait;
use bluest::Uuid;
use tokio::sync::mpsc;

use crate::error::TransportError;

pub use self::bluest_backend::{BluestConnection, BluestTransport};

/// Raw payloads received on a notify characteristic, in arrival order.
pub type Notifications = mpsc::Receiver<Vec<u8>>;

/// Capacity of the channel carrying notifications to the poll session.
pub const NOTIFICATION_BUFFER: usize = 64;

/// Which peripheral to look for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceSelector {
    pub mac: Option<String>,
    pub alias: Option<String>,
    /// Host adapter name, e.g. `hci0`.
    pub adapter: String,
    /// How long a single scan may run.
    pub timeout: Duration,
}

/// `text` as an upper case `AA:BB:CC:DD:EE:FF` address, if it is one.
pub fn normalize_mac(text: &str) -> Option<String> {
    let octets: Vec<&str> = text.split(':').collect();
    let valid = octets.len() == 6
        && octets
            .iter()
            .all(|o| o.len() == 2 && o.bytes().all(|b| b.is_ascii_hexdigit()));
    valid.then(|| octets.join(":").to_ascii_uppercase())
}

/// The last MAC address inside a platform device identifier. Some platforms
/// prefix the peripheral's address with the adapter's.
fn embedded_mac(id: &str) -> Option<String> {
    (0..id.len().saturating_sub(16))
        .rev()
        .find_map(|start| normalize_mac(id.get(start..start + 17)?))
}

impl DeviceSelector {
    /// Whether an advertised device is the one we want. `address` may wrap the
    /// MAC in a platform specific representation; the MAC itself must match
    /// exactly.
    pub fn matches(&self, address: &str, name: Option<&str>) -> bool {
        let wanted = self.mac.as_deref().and_then(normalize_mac);
        let mac_matches = wanted.is_some_and(|mac| embedded_mac(address) == Some(mac));
        let alias_matches = matches!((self.alias.as_deref(), name), (Some(a), Some(n)) if a == n);
        mac_matches || alias_matches
    }

    /// Identifier used in logs and records: the alias if known, else the MAC.
    pub fn describe(&self) -> String {
        self.alias
            .clone()
            .or_else(|| self.mac.clone())
            .unwrap_or_else(|| "<unnamed>".to_owned())
    }
}

/// BLE operations consumed by the engine. Implementations never retry; the
/// supervisor owns all retry policy.
#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    type Device: Send + Sync;
    type Connection: Send + Sync;

    /// Scan until the selected device is seen or the selector's timeout expires.
    async fn discover(&self, selector: &DeviceSelector) -> Result<Self::Device, TransportError>;

    async fn connect(&self, device: &Self::Device) -> Result<Self::Connection, TransportError>;

    /// Start notifications on `characteristic` and return the stream of payloads.
    async fn subscribe(
        &self,
        connection: &Self::Connection,
        characteristic: Uuid,
    ) -> Result<Notifications, TransportError>;

    /// Write `data` to `characteristic`. Fails immediately with
    /// [`TransportError::NoWriteCharacteristic`] when there is none.
    async fn write(
        &self,
        connection: &Self::Connection,
        characteristic: Option<Uuid>,
        data: &[u8],
    ) -> Result<(), TransportError>;

    /// Tear the connection down. Safe to call more than once.
    async fn disconnect(&self, connection: &Self::Connection);
}
