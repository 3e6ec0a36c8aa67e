//! TOML configuration.
//!
//! ```toml
//! [[devices]]
//! alias = "RMTShunt300A1B2"
//! poll_interval_seconds = 30
//!
//! [[devices]]
//! mac_addr = "80:6F:B0:0F:12:34"
//! profile = "rover"
//! fields = ["battery_voltage", "pv_power"]
//! ```

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ConfigError;
use crate::profile::{DeviceProfile, ProfileKind, Section};
use crate::resync::Resynchronizer;
use crate::session::SessionTiming;
use crate::supervisor::{
    DeviceSettings, SupervisorPolicy, DEFAULT_DISCOVERY_RETRY_DELAY, DEFAULT_DISCOVERY_TIMEOUT,
    DEFAULT_MAX_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY,
};
use crate::transport::{normalize_mac, DeviceSelector};

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default)]
    pub mac_addr: Option<String>,
    #[serde(default)]
    pub alias: Option<String>,
    #[serde(default = "default_adapter")]
    pub adapter: String,
    /// Overrides the profile's Modbus device address.
    #[serde(default)]
    pub slave_id: Option<u8>,
    /// Inferred from the alias when left out.
    #[serde(default)]
    pub profile: Option<ProfileKind>,
    #[serde(default)]
    pub custom: Option<CustomProfile>,
    #[serde(default = "default_enable_polling")]
    pub enable_polling: bool,
    #[serde(default = "default_poll_interval_seconds")]
    pub poll_interval_seconds: u64,
    /// Defaults to the profile's own timeout.
    #[serde(default)]
    pub read_timeout_seconds: Option<u64>,
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay_seconds")]
    pub reconnect_delay_seconds: u64,
    #[serde(default = "default_discovery_timeout_seconds")]
    pub discovery_timeout_seconds: u64,
    #[serde(default = "default_discovery_retry_seconds")]
    pub discovery_retry_seconds: u64,
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Publish only these fields.
    #[serde(default)]
    pub fields: Vec<String>,
}

/// A profile declared entirely in configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CustomProfile {
    #[serde(default = "default_custom_name")]
    pub name: String,
    #[serde(default = "default_custom_slave_id")]
    pub slave_id: u8,
    pub notify_characteristic: Uuid,
    /// Requests are written here. Leave out for devices that push frames.
    #[serde(default)]
    pub write_characteristic: Option<Uuid>,
    /// Frame recovery for devices without a write characteristic.
    #[serde(default)]
    pub resync: Option<Resynchronizer>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

fn default_adapter() -> String {
    "hci0".to_owned()
}

fn default_enable_polling() -> bool {
    true
}

fn default_poll_interval_seconds() -> u64 {
    10
}

fn default_max_reconnect_attempts() -> u32 {
    DEFAULT_MAX_RECONNECT_ATTEMPTS
}

fn default_reconnect_delay_seconds() -> u64 {
    DEFAULT_RECONNECT_DELAY.as_secs()
}

fn default_discovery_timeout_seconds() -> u64 {
    DEFAULT_DISCOVERY_TIMEOUT.as_secs()
}

fn default_discovery_retry_seconds() -> u64 {
    DEFAULT_DISCOVERY_RETRY_DELAY.as_secs()
}

fn default_settle_delay_ms() -> u64 {
    500
}

fn default_custom_name() -> String {
    "custom".to_owned()
}

fn default_custom_slave_id() -> u8 {
    0xff
}

impl Config {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        content
            .parse()
            .with_context(|| format!("invalid configuration in {}", path.display()))
    }

    /// Resolve every device entry into runnable settings.
    pub fn device_settings(&self) -> Result<Vec<DeviceSettings>, ConfigError> {
        if self.devices.is_empty() {
            return Err(ConfigError::NoDevices);
        }
        self.devices
            .iter()
            .enumerate()
            .map(|(index, device)| device.resolve(index))
            .collect()
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Config = toml::from_str(s)?;
        config.device_settings()?;
        Ok(config)
    }
}

impl DeviceConfig {
    fn resolve(&self, index: usize) -> Result<DeviceSettings, ConfigError> {
        let mac = match self.mac_addr.as_deref().filter(|m| !m.is_empty()) {
            Some(mac) => Some(normalize_mac(mac).ok_or_else(|| ConfigError::InvalidMac {
                index,
                mac: mac.to_owned(),
            })?),
            None => None,
        };
        let alias = self.alias.clone().filter(|a| !a.is_empty());
        if mac.is_none() && alias.is_none() {
            return Err(ConfigError::MissingSelector { index });
        }
        let selector = DeviceSelector {
            mac,
            alias,
            adapter: self.adapter.clone(),
            timeout: Duration::from_secs(self.discovery_timeout_seconds),
        };
        let device = selector.describe();

        let nonzero = |value: u64, field: &'static str| {
            if value == 0 {
                Err(ConfigError::Zero {
                    device: device.clone(),
                    field,
                })
            } else {
                Ok(Duration::from_secs(value))
            }
        };
        nonzero(u64::from(self.max_reconnect_attempts), "max_reconnect_attempts")?;
        nonzero(self.poll_interval_seconds, "poll_interval_seconds")?;
        nonzero(self.discovery_timeout_seconds, "discovery_timeout_seconds")?;
        let read_timeout = self
            .read_timeout_seconds
            .map(|s| nonzero(s, "read_timeout_seconds"))
            .transpose()?;

        let mut profile = self.profile(&device)?;
        if let Some(slave_id) = self.slave_id {
            profile = profile.with_slave_id(slave_id);
        }
        if let Some(read_timeout) = read_timeout {
            profile = profile.with_read_timeout(read_timeout);
        }

        let timing = SessionTiming {
            read_timeout: profile.read_timeout,
            settle_delay: Duration::from_millis(self.settle_delay_ms),
            poll_interval: self
                .enable_polling
                .then(|| Duration::from_secs(self.poll_interval_seconds)),
        };
        let policy = SupervisorPolicy {
            max_reconnect_attempts: self.max_reconnect_attempts,
            reconnect_delay: Duration::from_secs(self.reconnect_delay_seconds),
            discovery_retry_delay: Duration::from_secs(self.discovery_retry_seconds),
        };

        let mut settings = DeviceSettings::new(selector, profile);
        settings.timing = timing;
        settings.policy = policy;
        settings.fields = self.fields.clone();
        Ok(settings)
    }

    fn profile(&self, device: &str) -> Result<DeviceProfile, ConfigError> {
        let kind = self
            .profile
            .or_else(|| self.alias.as_deref().and_then(ProfileKind::from_alias))
            .ok_or_else(|| ConfigError::UnknownProfile {
                device: device.to_owned(),
            })?;

        if let Some(profile) = kind.builtin() {
            return Ok(profile);
        }

        let custom = self
            .custom
            .as_ref()
            .ok_or_else(|| ConfigError::MissingCustomProfile {
                device: device.to_owned(),
            })?;
        if custom.sections.is_empty() {
            return Err(ConfigError::EmptyProfile {
                device: device.to_owned(),
            });
        }
        let defect = custom
            .sections
            .iter()
            .flat_map(|section| section.decoder.field_specs())
            .find_map(|field| field.defect().map(|reason| (field, reason)));
        if let Some((field, reason)) = defect {
            return Err(ConfigError::InvalidField {
                device: device.to_owned(),
                field: field.name.clone(),
                reason,
            });
        }
        let sections = custom.sections.clone();
        match (custom.write_characteristic, custom.resync) {
            (Some(write), _) => Ok(DeviceProfile::polled(
                &custom.name,
                custom.slave_id,
                custom.notify_characteristic,
                write,
                sections,
            )),
            (None, Some(resync)) => Ok(DeviceProfile::notify_only(
                &custom.name,
                custom.slave_id,
                custom.notify_characteristic,
                resync,
                sections,
            )),
            (None, None) => Err(ConfigError::MissingDelivery {
                device: device.to_owned(),
            }),
        }
    }
}
