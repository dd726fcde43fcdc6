//! Variant independent decoding: field schemas, list extractors, the
//! discharge state tracker and the [`BmsProtocol`] trait each BMS family
//! implements.

use crate::protocol::{self, Command, ValidFrame};
use crate::sample::{BmsValue, Sample, Value};
use crate::Error;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Scaling applied to a raw field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transform {
    Identity,
    /// Divide by 1000.
    Milli,
    /// Divide by 100.
    Centi,
}

impl Transform {
    pub fn apply(&self, raw: i64) -> Value {
        match self {
            Transform::Identity => Value::Int(raw),
            Transform::Milli => Value::Float(raw as f64 / 1000.0),
            Transform::Centi => Value::Float(raw as f64 / 100.0),
        }
    }
}

/// One fixed position field of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub key: BmsValue,
    pub offset: usize,
    pub width: usize,
    pub signed: bool,
    pub transform: Transform,
}

impl FieldDescriptor {
    pub const fn new(
        key: BmsValue,
        offset: usize,
        width: usize,
        signed: bool,
        transform: Transform,
    ) -> Self {
        Self {
            key,
            offset,
            width,
            signed,
            transform,
        }
    }
}

/// Applies every descriptor of `schema` to `frame`.
///
/// Fields that do not fit into the frame are left out of the sample.
pub fn decode_fields(frame: &[u8], schema: &[FieldDescriptor]) -> Sample {
    let mut result = Sample::new();
    for field in schema {
        match protocol::read_le(frame, field.offset, field.width, field.signed) {
            Some(raw) => {
                result.insert(field.key, field.transform.apply(raw));
            }
            None => log::warn!(
                "Field {} outside of frame - offset={} width={} frame length={}",
                field.key,
                field.offset,
                field.width,
                frame.len()
            ),
        }
    }
    result
}

/// Location of a run of two byte values, zero meaning "slot not populated".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrayLayout {
    pub base: usize,
    pub count: usize,
    pub signed: bool,
}

fn read_populated(frame: &[u8], layout: ArrayLayout) -> impl Iterator<Item = i64> + '_ {
    (0..layout.count)
        .map_while(move |idx| protocol::read_le(frame, layout.base + 2 * idx, 2, layout.signed))
        .filter(|value| *value != 0)
}

/// Cell voltages in V of the populated cells, ascending cell index.
pub fn cell_voltages(frame: &[u8], layout: ArrayLayout) -> Vec<f64> {
    read_populated(frame, layout)
        .map(|value| value as f64 / 1000.0)
        .collect()
}

/// Temperatures in °C of the populated sensors, ascending sensor index.
pub fn temp_sensors(frame: &[u8], layout: ArrayLayout) -> Vec<i64> {
    read_populated(frame, layout).collect()
}

/// Last known state of the discharge relay of one device session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DischargeTracker {
    state: bool,
}

impl DischargeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> bool {
        self.state
    }

    pub fn set(&mut self, state: bool) {
        if state != self.state {
            log::info!("discharge state {} -> {}", self.state, state);
        }
        self.state = state;
    }

    /// Reads the flag at `offset` and updates the tracker.
    ///
    /// A frame without that byte leaves the last known state in place. The
    /// relay is off only for the exact `off_values`.
    pub fn update(&mut self, frame: &[u8], offset: usize, off_values: &[u8]) -> bool {
        let Some(flag) = frame.get(offset) else {
            log::trace!(
                "frame length {} does not reach discharge flag, keep {}",
                frame.len(),
                self.state
            );
            return self.state;
        };
        log::debug!("discharge flag at offset {offset}: {flag}");
        self.set(!off_values.contains(flag));
        self.state
    }
}

/// Name patterns and ids a BMS advertises with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisementPattern {
    /// Local name, a trailing `*` matches any suffix.
    pub local_name: &'static str,
    pub service_uuid: &'static str,
    pub manufacturer_id: u16,
    pub connectable: bool,
}

impl AdvertisementPattern {
    pub fn matches(&self, local_name: &str, manufacturer_id: Option<u16>) -> bool {
        let name_matches = match self.local_name.strip_suffix('*') {
            Some(prefix) => local_name.starts_with(prefix),
            None => local_name == self.local_name,
        };
        name_matches && manufacturer_id == Some(self.manufacturer_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DeviceInfo {
    pub manufacturer: &'static str,
    pub model: &'static str,
}

/// Commands switching the discharge relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DischargeCommands {
    pub enable: Command,
    pub disable: Command,
}

/// A family of BMS speaking one frame format.
pub trait BmsProtocol {
    fn device_info(&self) -> DeviceInfo;

    fn advertisement_patterns(&self) -> Vec<AdvertisementPattern>;

    /// 128-bit UUIDs of the services required.
    fn uuid_services(&self) -> &'static [&'static str];

    /// Characteristic delivering notifications.
    fn uuid_rx(&self) -> &'static str;

    /// Characteristic accepting writes.
    fn uuid_tx(&self) -> &'static str;

    fn fields(&self) -> &'static [FieldDescriptor];

    /// Values the host should calculate from the decoded ones.
    fn calc_values(&self) -> &'static [BmsValue];

    fn poll_command(&self) -> Command;

    /// `None` if the relay cannot be switched remotely.
    fn discharge_commands(&self) -> Option<DischargeCommands> {
        None
    }

    fn validate(&self, buffer: &[u8]) -> Result<ValidFrame, Error> {
        protocol::validate(buffer)
    }

    fn decode(&self, frame: &ValidFrame, tracker: &mut DischargeTracker) -> Sample;

    fn supported(&self, local_name: &str, manufacturer_id: Option<u16>) -> bool {
        self.advertisement_patterns()
            .iter()
            .any(|pattern| pattern.matches(local_name, manufacturer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCHEMA: [FieldDescriptor; 3] = [
        FieldDescriptor::new(BmsValue::Voltage, 0, 2, false, Transform::Milli),
        FieldDescriptor::new(BmsValue::Current, 2, 2, true, Transform::Centi),
        FieldDescriptor::new(BmsValue::Cycles, 4, 4, false, Transform::Identity),
    ];

    #[test]
    fn decodes_schema_fields() {
        let frame = [0x10, 0x27, 0x9C, 0xFF, 0x2A, 0x00, 0x00, 0x00];
        let sample = decode_fields(&frame, &SCHEMA);
        assert_eq!(sample.get(BmsValue::Voltage), Some(&Value::Float(10.0)));
        assert_eq!(sample.get(BmsValue::Current), Some(&Value::Float(-1.0)));
        assert_eq!(sample.get(BmsValue::Cycles), Some(&Value::Int(42)));
    }

    #[test]
    fn truncated_frame_gives_partial_sample() {
        let frame = [0x10, 0x27, 0x9C, 0xFF, 0x2A];
        let sample = decode_fields(&frame, &SCHEMA);
        assert_eq!(sample.len(), 2);
        assert!(!sample.contains(BmsValue::Cycles));
    }

    #[test]
    fn omits_unpopulated_slots() {
        let layout = ArrayLayout {
            base: 1,
            count: 4,
            signed: false,
        };
        let frame = [0xEE, 0xE4, 0x0C, 0x00, 0x00, 0xE8, 0x0C, 0x01, 0x00];
        assert_eq!(cell_voltages(&frame, layout), vec![3.3, 3.304, 0.001]);
    }

    #[test]
    fn list_stops_at_end_of_frame() {
        let layout = ArrayLayout {
            base: 0,
            count: 5,
            signed: true,
        };
        let frame = [0xFB, 0xFF, 0x00, 0x00, 0x19, 0x00, 0x07];
        assert_eq!(temp_sensors(&frame, layout), vec![-5, 25]);
    }

    #[test]
    fn tracker_keeps_state_on_short_frame() {
        let mut tracker = DischargeTracker::new();
        assert!(!tracker.update(&[0x01; 4], 4, &[0x80]));
        tracker.set(true);
        assert!(tracker.update(&[0x80; 4], 4, &[0x80]));
        assert!(tracker.state());
    }

    #[test]
    fn tracker_follows_flag() {
        let mut tracker = DischargeTracker::new();
        assert!(tracker.update(&[0, 0, 0x01], 2, &[0x80, 12]));
        assert!(!tracker.update(&[0, 0, 12], 2, &[0x80, 12]));
        assert!(tracker.update(&[0, 0, 0x00], 2, &[0x80, 12]));
        assert!(!tracker.update(&[0, 0, 0x80], 2, &[0x80, 12]));
        assert!(!tracker.state());
    }

    #[test]
    fn pattern_matching() {
        let pattern = AdvertisementPattern {
            local_name: "R-12*",
            service_uuid: "0000ffe0-0000-1000-8000-00805f9b34fb",
            manufacturer_id: 0x585A,
            connectable: true,
        };
        assert!(pattern.matches("R-12100BNN170-A00643", Some(0x585A)));
        assert!(!pattern.matches("R-12100", Some(0x1234)));
        assert!(!pattern.matches("R-12100", None));
        assert!(!pattern.matches("RO-12100", Some(0x585A)));
    }
}
