//! Static descriptions of the devices the engine knows how to poll.
//!
//! A profile lists the register sections read in each poll cycle, how each
//! section's response is turned into named values, and which GATT
//! characteristics carry requests and responses.

use std::collections::BTreeMap;
use std::time::Duration;

use bluest::Uuid;
use serde::Deserialize;
use tracing::warn;

use crate::error::CodecError;
use crate::frame::read_scaled_int;
use crate::resync::Resynchronizer;

/// Named values decoded from one or more sections.
pub type Fields = BTreeMap<String, f64>;

pub const POLLED_READ_TIMEOUT: Duration = Duration::from_secs(20);
pub const NOTIFY_ONLY_READ_TIMEOUT: Duration = Duration::from_secs(30);

pub const RENOGY_NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x0000fff1_0000_1000_8000_00805f9b34fb);
pub const RENOGY_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x0000ffd1_0000_1000_8000_00805f9b34fb);
pub const SHUNT_NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x0000c411_0000_1000_8000_00805f9b34fb);
pub const NORDIC_UART_WRITE_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400002_b5a3_f393_e0a9_e50e24dcca9e);
pub const NORDIC_UART_NOTIFY_CHARACTERISTIC: Uuid =
    Uuid::from_u128(0x6e400003_b5a3_f393_e0a9_e50e24dcca9e);

/// Frames pushed by the shunt: 73 bytes with function byte 0x57.
pub const SHUNT_RESYNC: Resynchronizer = Resynchronizer::new(73, 0x57);

/// Broadcast-style address the Renogy BT modules answer on.
const RENOGY_SLAVE_ID: u8 = 0xff;
const LI_GEN_SLAVE_ID: u8 = 0x01;
/// Cell voltage reported for cells that are not fitted.
const CELL_VOLTAGE_NA_VALUE: u16 = 61001;

const CONTROLLER_ALIAS_PREFIXES: [&str; 3] = ["BT-TH", "RNGRBP", "BTRIC"];
const SHUNT_ALIAS_PREFIXES: [&str; 2] = ["RMTShunt300", "Shunt300"];
const LI_GEN_ALIAS: &str = "BT_HC6172";

fn unit_scale() -> f64 {
    1.0
}

/// How the raw integer of a field is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    #[default]
    Unsigned,
    /// Two's complement.
    Signed,
    /// Top bit is the sign, remaining bits the magnitude (Renogy temperatures).
    SignMagnitude,
    /// A single bit of the raw value; the scale is not applied.
    Bit(u8),
}

/// One value extracted from a response frame.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    /// Offset from the start of the frame (slave id at 0).
    pub offset: usize,
    pub width: usize,
    #[serde(default = "unit_scale")]
    pub scale: f64,
    #[serde(default)]
    pub kind: FieldKind,
    /// Inclusive bounds of plausible values; anything outside is dropped.
    #[serde(default)]
    pub range: Option<(f64, f64)>,
}

impl FieldSpec {
    pub fn new(name: &str, offset: usize, width: usize) -> Self {
        Self {
            name: name.to_owned(),
            offset,
            width,
            scale: 1.0,
            kind: FieldKind::Unsigned,
            range: None,
        }
    }

    pub fn scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn signed(mut self) -> Self {
        self.kind = FieldKind::Signed;
        self
    }

    pub fn sign_magnitude(mut self) -> Self {
        self.kind = FieldKind::SignMagnitude;
        self
    }

    pub fn bit(mut self, bit: u8) -> Self {
        self.kind = FieldKind::Bit(bit);
        self
    }

    pub fn range(mut self, min: f64, max: f64) -> Self {
        self.range = Some((min, max));
        self
    }

    pub fn extract(&self, frame: &[u8]) -> Result<f64, CodecError> {
        match self.kind {
            FieldKind::Unsigned => {
                read_scaled_int(frame, self.offset, self.width, self.scale, false)
            }
            FieldKind::Signed => {
                read_scaled_int(frame, self.offset, self.width, self.scale, true)
            }
            FieldKind::SignMagnitude => {
                let raw = read_scaled_int(frame, self.offset, self.width, 1.0, false)?;
                let sign_bit = (1u64 << (self.width * 8 - 1)) as f64;
                let value = if raw >= sign_bit {
                    -(raw - sign_bit)
                } else {
                    raw
                };
                Ok(value * self.scale)
            }
            FieldKind::Bit(bit) => {
                let raw = read_scaled_int(frame, self.offset, self.width, 1.0, false)? as u64;
                Ok((raw.checked_shr(u32::from(bit)).unwrap_or(0) & 1) as f64)
            }
        }
    }

    /// Why this field can never be read, if so.
    pub fn defect(&self) -> Option<&'static str> {
        if !(1..=4).contains(&self.width) {
            return Some("width must be 1 to 4 bytes");
        }
        match self.kind {
            FieldKind::Bit(bit) if usize::from(bit) >= self.width * 8 => {
                Some("bit lies outside the field")
            }
            _ => None,
        }
    }

    fn in_range(&self, value: f64) -> bool {
        self.range
            .map_or(true, |(min, max)| (min..=max).contains(&value))
    }
}

/// A value derived as the product of two decoded fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductSpec {
    pub name: String,
    pub left: String,
    pub right: String,
    /// Round to this many decimal places.
    #[serde(default)]
    pub decimals: Option<u32>,
}

impl ProductSpec {
    pub fn new(name: &str, left: &str, right: &str) -> Self {
        Self {
            name: name.to_owned(),
            left: left.to_owned(),
            right: right.to_owned(),
            decimals: None,
        }
    }

    pub fn decimals(mut self, decimals: u32) -> Self {
        self.decimals = Some(decimals);
        self
    }

    fn evaluate(&self, fields: &Fields) -> Option<f64> {
        let product = fields.get(&self.left)? * fields.get(&self.right)?;
        Some(match self.decimals {
            Some(decimals) => {
                let factor = 10f64.powi(decimals as i32);
                (product * factor).round() / factor
            }
            None => product,
        })
    }
}

/// How a section's response frame is turned into fields.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum RecordDecoder {
    /// Individually placed scaled integers, plus derived products.
    Scaled {
        fields: Vec<FieldSpec>,
        #[serde(default)]
        products: Vec<ProductSpec>,
    },
    /// `count` consecutive 16-bit words named `{prefix}_1`, `{prefix}_2`, ...
    WordArray {
        prefix: String,
        offset: usize,
        count: usize,
        #[serde(default = "unit_scale")]
        scale: f64,
        /// Raw value meaning "not available"; such words are left out.
        #[serde(default)]
        skip: Option<u16>,
    },
    /// Several decoders applied to the same frame in order.
    Composite { parts: Vec<RecordDecoder> },
}

impl RecordDecoder {
    pub fn scaled(fields: Vec<FieldSpec>) -> Self {
        RecordDecoder::Scaled {
            fields,
            products: Vec::new(),
        }
    }

    /// Every individually placed field, including those of nested parts.
    pub fn field_specs(&self) -> Vec<&FieldSpec> {
        match self {
            RecordDecoder::Scaled { fields, .. } => fields.iter().collect(),
            RecordDecoder::WordArray { .. } => Vec::new(),
            RecordDecoder::Composite { parts } => {
                parts.iter().flat_map(RecordDecoder::field_specs).collect()
            }
        }
    }

    /// Decode `frame`. Fields that cannot be read or fall outside their range
    /// are left out rather than defaulted.
    pub fn decode(&self, frame: &[u8]) -> Fields {
        let mut out = Fields::new();
        self.decode_into(frame, &mut out);
        out
    }

    fn decode_into(&self, frame: &[u8], out: &mut Fields) {
        match self {
            RecordDecoder::Scaled { fields, products } => {
                let mut decoded = Fields::new();
                for field in fields {
                    match field.extract(frame) {
                        Ok(value) if field.in_range(value) => {
                            decoded.insert(field.name.clone(), value);
                        }
                        Ok(value) => {
                            warn!(field = %field.name, value, "value out of range, dropped");
                        }
                        Err(e) => warn!(field = %field.name, error = %e, "failed to decode field"),
                    }
                }
                for product in products {
                    if let Some(value) = product.evaluate(&decoded) {
                        decoded.insert(product.name.clone(), value);
                    }
                }
                out.extend(decoded);
            }
            RecordDecoder::WordArray {
                prefix,
                offset,
                count,
                scale,
                skip,
            } => {
                for n in 0..*count {
                    let at = offset + n * 2;
                    let Some(bytes) = frame.get(at..at + 2) else {
                        warn!(prefix = %prefix, index = n, "word array exceeds frame");
                        break;
                    };
                    let word = u16::from_be_bytes([bytes[0], bytes[1]]);
                    if Some(word) == *skip {
                        continue;
                    }
                    out.insert(format!("{prefix}_{}", n + 1), f64::from(word) * scale);
                }
            }
            RecordDecoder::Composite { parts } => {
                for part in parts {
                    part.decode_into(frame, out);
                }
            }
        }
    }
}

/// One "read holding registers" request and the decoder for its response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Section {
    pub register: u16,
    pub word_count: u16,
    pub decoder: RecordDecoder,
}

impl Section {
    pub fn new(register: u16, word_count: u16, decoder: RecordDecoder) -> Self {
        Self {
            register,
            word_count,
            decoder,
        }
    }
}

/// How responses reach the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum Delivery {
    /// Each section is requested through the write characteristic.
    Polled { write_characteristic: Uuid },
    /// The device pushes frames unprompted; there is nothing to write to.
    NotifyOnly { resync: Resynchronizer },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceProfile {
    pub name: String,
    pub slave_id: u8,
    pub notify_characteristic: Uuid,
    pub delivery: Delivery,
    pub sections: Vec<Section>,
    pub read_timeout: Duration,
}

impl DeviceProfile {
    pub fn polled(
        name: &str,
        slave_id: u8,
        notify_characteristic: Uuid,
        write_characteristic: Uuid,
        sections: Vec<Section>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            slave_id,
            notify_characteristic,
            delivery: Delivery::Polled {
                write_characteristic,
            },
            sections,
            read_timeout: POLLED_READ_TIMEOUT,
        }
    }

    pub fn notify_only(
        name: &str,
        slave_id: u8,
        notify_characteristic: Uuid,
        resync: Resynchronizer,
        sections: Vec<Section>,
    ) -> Self {
        Self {
            name: name.to_owned(),
            slave_id,
            notify_characteristic,
            delivery: Delivery::NotifyOnly { resync },
            sections,
            read_timeout: NOTIFY_ONLY_READ_TIMEOUT,
        }
    }

    pub fn with_slave_id(mut self, slave_id: u8) -> Self {
        self.slave_id = slave_id;
        self
    }

    pub fn with_read_timeout(mut self, read_timeout: Duration) -> Self {
        self.read_timeout = read_timeout;
        self
    }

    pub fn write_characteristic(&self) -> Option<Uuid> {
        match self.delivery {
            Delivery::Polled {
                write_characteristic,
            } => Some(write_characteristic),
            Delivery::NotifyOnly { .. } => None,
        }
    }

    pub fn resynchronizer(&self) -> Option<&Resynchronizer> {
        match &self.delivery {
            Delivery::NotifyOnly { resync } => Some(resync),
            Delivery::Polled { .. } => None,
        }
    }

    pub fn is_notify_only(&self) -> bool {
        matches!(self.delivery, Delivery::NotifyOnly { .. })
    }

    /// Renogy Rover / Wanderer / Adventurer charge controllers behind a BT-1 or
    /// BT-2 module.
    pub fn rover() -> Self {
        let charging = RecordDecoder::scaled(vec![
            FieldSpec::new("battery_percentage", 3, 2).range(0.0, 100.0),
            FieldSpec::new("battery_voltage", 5, 2).scale(0.1),
            FieldSpec::new("battery_current", 7, 2).scale(0.01),
            FieldSpec::new("controller_temperature", 9, 1).sign_magnitude(),
            FieldSpec::new("battery_temperature", 10, 1).sign_magnitude(),
            FieldSpec::new("load_voltage", 11, 2).scale(0.1),
            FieldSpec::new("load_current", 13, 2).scale(0.01),
            FieldSpec::new("load_power", 15, 2),
            FieldSpec::new("pv_voltage", 17, 2).scale(0.1),
            FieldSpec::new("pv_current", 19, 2).scale(0.01),
            FieldSpec::new("pv_power", 21, 2),
            FieldSpec::new("max_charging_power_today", 33, 2),
            FieldSpec::new("max_discharging_power_today", 35, 2),
            FieldSpec::new("charging_amp_hours_today", 37, 2),
            FieldSpec::new("discharging_amp_hours_today", 39, 2),
            FieldSpec::new("power_generation_today", 41, 2),
            FieldSpec::new("power_consumption_today", 43, 2),
            FieldSpec::new("power_generation_total", 59, 4),
            FieldSpec::new("load_status", 67, 1).bit(7),
            FieldSpec::new("charging_status", 68, 1),
        ]);

        Self::polled(
            "rover",
            RENOGY_SLAVE_ID,
            RENOGY_NOTIFY_CHARACTERISTIC,
            RENOGY_WRITE_CHARACTERISTIC,
            vec![
                Section::new(
                    26,
                    1,
                    RecordDecoder::scaled(vec![FieldSpec::new("device_address", 4, 1)]),
                ),
                Section::new(256, 34, charging),
                Section::new(
                    57348,
                    1,
                    RecordDecoder::scaled(vec![FieldSpec::new("battery_type", 3, 2)]),
                ),
            ],
        )
    }

    /// Renogy 300A battery shunt, which only pushes notifications.
    pub fn shunt() -> Self {
        let info = RecordDecoder::Scaled {
            fields: vec![
                FieldSpec::new("charge_battery_voltage", 25, 3)
                    .scale(0.001)
                    .range(0.0, 120.0),
                FieldSpec::new("starter_battery_voltage", 30, 2)
                    .scale(0.001)
                    .range(0.0, 120.0),
                FieldSpec::new("discharge_amps", 21, 3)
                    .scale(0.001)
                    .signed()
                    .range(-1000.0, 1000.0),
                FieldSpec::new("state_of_charge", 34, 2)
                    .scale(0.1)
                    .range(0.0, 100.0),
            ],
            products: vec![
                ProductSpec::new("discharge_watts", "charge_battery_voltage", "discharge_amps")
                    .decimals(2),
            ],
        };

        Self::notify_only(
            "shunt",
            RENOGY_SLAVE_ID,
            SHUNT_NOTIFY_CHARACTERISTIC,
            SHUNT_RESYNC,
            vec![Section::new(256, 110, info)],
        )
    }

    /// LiFePO4 BMS sold by li-gen.net, reached over the Nordic UART service.
    pub fn li_gen() -> Self {
        let soc = RecordDecoder::scaled(vec![
            FieldSpec::new("state_of_charge", 31, 2).range(0.0, 100.0),
            FieldSpec::new("residual_capacity", 35, 2).scale(0.01),
            FieldSpec::new("cycles", 41, 2),
        ]);
        let voltages = RecordDecoder::Composite {
            parts: vec![
                RecordDecoder::WordArray {
                    prefix: "cell_voltage".to_owned(),
                    offset: 3,
                    count: 32,
                    scale: 0.001,
                    skip: Some(CELL_VOLTAGE_NA_VALUE),
                },
                RecordDecoder::scaled(vec![FieldSpec::new("battery_voltage", 77, 2).scale(0.01)]),
            ],
        };

        Self::polled(
            "li_gen",
            LI_GEN_SLAVE_ID,
            NORDIC_UART_NOTIFY_CHARACTERISTIC,
            NORDIC_UART_WRITE_CHARACTERISTIC,
            vec![
                Section::new(0xd026, 0x19, soc),
                Section::new(0xd000, 0x26, voltages),
            ],
        )
    }
}

/// The builtin profiles plus a configuration-defined one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileKind {
    Rover,
    Shunt,
    LiGen,
    Custom,
}

impl ProfileKind {
    /// Guess the profile from the advertised name.
    pub fn from_alias(alias: &str) -> Option<Self> {
        if SHUNT_ALIAS_PREFIXES.iter().any(|p| alias.starts_with(p)) {
            Some(ProfileKind::Shunt)
        } else if CONTROLLER_ALIAS_PREFIXES.iter().any(|p| alias.starts_with(p)) {
            Some(ProfileKind::Rover)
        } else if alias == LI_GEN_ALIAS {
            Some(ProfileKind::LiGen)
        } else {
            None
        }
    }

    /// The builtin profile, or `None` for [`ProfileKind::Custom`].
    pub fn builtin(self) -> Option<DeviceProfile> {
        match self {
            ProfileKind::Rover => Some(DeviceProfile::rover()),
            ProfileKind::Shunt => Some(DeviceProfile::shunt()),
            ProfileKind::LiGen => Some(DeviceProfile::li_gen()),
            ProfileKind::Custom => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{read_response_len, with_crc, validate_and_extract};

    fn read_response(slave_id: u8, word_count: u16, data: &[(usize, &[u8])]) -> Vec<u8> {
        let mut body = vec![0u8; read_response_len(word_count) - 2];
        body[0] = slave_id;
        body[1] = 0x03;
        body[2] = (word_count * 2) as u8;
        for (offset, bytes) in data {
            body[*offset..*offset + bytes.len()].copy_from_slice(bytes);
        }
        with_crc(body)
    }

    #[test]
    fn rover_charging_info() {
        let profile = DeviceProfile::rover();
        let section = &profile.sections[1];
        let frame = read_response(
            0xff,
            section.word_count,
            &[
                (3, &[0x00, 0x55]),
                (5, &[0x00, 0x83]),
                (7, &[0x01, 0xf4]),
                (9, &[0x19]),
                (10, &[0x85]),
                (59, &[0x00, 0x01, 0x00, 0x00]),
                (67, &[0x80]),
                (68, &[0x02]),
            ],
        );
        let frame = validate_and_extract(&frame, Some(section.word_count)).unwrap();
        let fields = section.decoder.decode(frame.frame);

        assert_eq!(fields["battery_percentage"], 85.0);
        assert!((fields["battery_voltage"] - 13.1).abs() < 1e-9);
        assert!((fields["battery_current"] - 5.0).abs() < 1e-9);
        assert_eq!(fields["controller_temperature"], 25.0);
        assert_eq!(fields["battery_temperature"], -5.0);
        assert_eq!(fields["power_generation_total"], 65536.0);
        assert_eq!(fields["load_status"], 1.0);
        assert_eq!(fields["charging_status"], 2.0);
        assert_eq!(fields.len(), 20);
    }

    #[test]
    fn shunt_derives_watts() {
        let profile = DeviceProfile::shunt();
        let mut body = vec![0u8; 71];
        body[0] = 0xff;
        body[1] = 0x57;
        // 12.8 V, -2.5 A, 75.5 %
        body[25..28].copy_from_slice(&[0x00, 0x32, 0x00]);
        body[21..24].copy_from_slice(&[0xff, 0xf6, 0x3c]);
        body[34..36].copy_from_slice(&[0x02, 0xf3]);
        let frame = with_crc(body);

        let fields = profile.sections[0].decoder.decode(&frame);
        assert!((fields["charge_battery_voltage"] - 12.8).abs() < 1e-9);
        assert!((fields["discharge_amps"] + 2.5).abs() < 1e-9);
        assert_eq!(fields["discharge_watts"], -32.0);
        assert!((fields["state_of_charge"] - 75.5).abs() < 1e-9);
        assert_eq!(fields["starter_battery_voltage"], 0.0);
    }

    #[test]
    fn out_of_range_values_are_dropped() {
        let decoder = RecordDecoder::Scaled {
            fields: vec![
                FieldSpec::new("soc", 0, 2).scale(0.1).range(0.0, 100.0),
                FieldSpec::new("volts", 2, 2).scale(0.1),
            ],
            products: vec![ProductSpec::new("watts", "soc", "volts")],
        };
        let fields = decoder.decode(&[0x27, 0x10, 0x00, 0x80]);
        assert_eq!(fields.get("soc"), None);
        assert_eq!(fields.get("watts"), None);
        assert!((fields["volts"] - 12.8).abs() < 1e-9);
    }

    #[test]
    fn fields_past_the_frame_are_absent() {
        let decoder = RecordDecoder::scaled(vec![
            FieldSpec::new("inside", 0, 2),
            FieldSpec::new("outside", 3, 2),
        ]);
        let fields = decoder.decode(&[0x00, 0x07, 0x00]);
        assert_eq!(fields.get("inside"), Some(&7.0));
        assert_eq!(fields.get("outside"), None);
    }

    #[test]
    fn bits_outside_the_value_read_as_zero() {
        let frame = [0x80, 0x01];
        assert_eq!(FieldSpec::new("low", 0, 2).bit(0).extract(&frame), Ok(1.0));
        assert_eq!(FieldSpec::new("high", 0, 2).bit(15).extract(&frame), Ok(1.0));
        assert_eq!(FieldSpec::new("far", 0, 2).bit(70).extract(&frame), Ok(0.0));
    }

    #[test]
    fn defective_fields() {
        assert_eq!(FieldSpec::new("ok", 0, 4).bit(31).defect(), None);
        assert!(FieldSpec::new("wide", 0, 5).defect().is_some());
        assert!(FieldSpec::new("empty", 0, 0).defect().is_some());
        assert!(FieldSpec::new("bit", 0, 1).bit(8).defect().is_some());

        let nested = RecordDecoder::Composite {
            parts: vec![
                RecordDecoder::scaled(vec![FieldSpec::new("a", 0, 2)]),
                RecordDecoder::scaled(vec![FieldSpec::new("b", 2, 1).bit(3)]),
            ],
        };
        let names: Vec<_> = nested.field_specs().iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn word_array_skips_unavailable_cells() {
        let profile = DeviceProfile::li_gen();
        let section = &profile.sections[1];
        let na = CELL_VOLTAGE_NA_VALUE.to_be_bytes();
        let frame = read_response(
            0x01,
            section.word_count,
            &[
                (3, &[0x0c, 0xe4]),
                (5, &[0x0c, 0xe5]),
                (7, &na),
                (9, &na),
                (77, &[0x0a, 0x50]),
            ],
        );
        let fields = section.decoder.decode(&frame);
        assert!((fields["cell_voltage_1"] - 3.300).abs() < 1e-9);
        assert!((fields["cell_voltage_2"] - 3.301).abs() < 1e-9);
        assert_eq!(fields.get("cell_voltage_3"), None);
        assert_eq!(fields.get("cell_voltage_4"), None);
        assert_eq!(fields["cell_voltage_5"], 0.0);
        assert!((fields["battery_voltage"] - 26.4).abs() < 1e-9);
    }

    #[test]
    fn li_gen_requests() {
        let profile = DeviceProfile::li_gen();
        assert_eq!(profile.slave_id, 1);
        assert_eq!(
            profile.write_characteristic(),
            Some(NORDIC_UART_WRITE_CHARACTERISTIC)
        );
        let registers: Vec<_> = profile
            .sections
            .iter()
            .map(|s| (s.register, s.word_count))
            .collect();
        assert_eq!(registers, vec![(0xd026, 0x19), (0xd000, 0x26)]);
    }

    #[test]
    fn alias_detection() {
        assert_eq!(ProfileKind::from_alias("RMTShunt300A1B2"), Some(ProfileKind::Shunt));
        assert_eq!(ProfileKind::from_alias("Shunt300-77"), Some(ProfileKind::Shunt));
        assert_eq!(ProfileKind::from_alias("BT-TH-66A3C7A1"), Some(ProfileKind::Rover));
        assert_eq!(ProfileKind::from_alias("BT_HC6172"), Some(ProfileKind::LiGen));
        assert_eq!(ProfileKind::from_alias("Aranet4"), None);
    }

    #[test]
    fn notify_only_profile() {
        let profile = DeviceProfile::shunt();
        assert!(profile.is_notify_only());
        assert_eq!(profile.write_characteristic(), None);
        assert_eq!(profile.resynchronizer(), Some(&SHUNT_RESYNC));
        assert_eq!(profile.read_timeout, NOTIFY_ONLY_READ_TIMEOUT);
        assert_eq!(DeviceProfile::rover().read_timeout, POLLED_READ_TIMEOUT);
    }
}
