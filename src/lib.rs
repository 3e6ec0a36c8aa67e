//! Poll battery monitors, charge controllers and BMSes that speak Modbus RTU over Bluetooth Low Energy.
//!
//! Tested with a Renogy 300A battery shunt, Renogy Rover charge controllers behind a BT-1/BT-2 module,
//! and a 400ah 24v LiFePO4 battery manufactured by <https://www.li-gen.net/>.
//!
//! These devices tunnel plain Modbus RTU frames through a pair of GATT characteristics: requests are
//! written to one, responses come back as notifications on another, often split over several
//! notifications. The shunt is different again: it has nothing to write to and simply pushes a frame
//! every second or so, with stray bytes mixed in.
//!
//! Each device is run by its own supervisor task which finds the device, connects, reads every
//! register section of the device's profile in turn and hands the merged values to a [`RecordSink`].
//! Lost connections are re-established automatically.
//!
//! Currently the following profiles are built in:
//!
//! - `rover`: battery, load and PV readings plus daily statistics
//! - `shunt`: battery voltage, current, power and state of charge
//! - `li_gen`: state of charge, residual capacity, cycles and cell voltages
//!
//! Others can be described in the configuration file.
//!
//! # Example
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use shuntread::{spawn_device, BluestTransport, DeviceProfile, DeviceSelector, DeviceSettings, LogSink};
//! #
//! # #[tokio::main]
//! # pub async fn main() -> anyhow::Result<()> {
//!     let transport = Arc::new(BluestTransport::new().await?);
//!     let selector = DeviceSelector {
//!         mac: None,
//!         alias: Some("RMTShunt300A1B2".to_owned()),
//!         adapter: "hci0".to_owned(),
//!         timeout: std::time::Duration::from_secs(5),
//!     };
//!     let settings = DeviceSettings::new(selector, DeviceProfile::shunt());
//!     let handle = spawn_device(transport, settings, Arc::new(LogSink));
//!     tokio::signal::ctrl_c().await?;
//!     handle.shutdown();
//!     handle.join().await;
//! #   Ok(())
//! # }
//! ```

pub mod config;
mod error;
mod frame;
pub mod mock;
mod profile;
mod resync;
mod session;
mod sink;
mod supervisor;
mod transport;

pub use config::{Config, CustomProfile, DeviceConfig};
pub use error::{CodecError, ConfigError, EngineError, SessionError, TransportError};
pub use frame::{
    build_read_request, build_write_request, crc, read_response_len, read_scaled_int,
    validate_and_extract, ResponseFrame,
};
pub use profile::{
    Delivery, DeviceProfile, FieldKind, FieldSpec, Fields, ProductSpec, ProfileKind,
    RecordDecoder, Section,
};
pub use resync::Resynchronizer;
pub use session::{Pending, PollCycle, PollSession, SessionState, SessionTiming, Step};
pub use sink::{ChannelSink, LogSink, Record, RecordSink, SinkEvent};
pub use supervisor::{
    spawn_device, ConnectionState, DeviceSettings, EngineHandle, SupervisorPolicy,
};
pub use transport::{
    normalize_mac, BleTransport, BluestConnection, BluestTransport, DeviceSelector, Notifications,
};
