use crate::bms::{
    self, AdvertisementPattern, ArrayLayout, BmsProtocol, DeviceInfo, DischargeCommands,
    DischargeTracker, FieldDescriptor, Transform,
};
use crate::protocol::{Command, ValidFrame};
use crate::sample::{BmsValue, Sample, Value};

pub const MAX_CELLS: usize = 16;
pub const MAX_TEMP: usize = 5;

const CELLS: ArrayLayout = ArrayLayout {
    base: 16,
    count: MAX_CELLS,
    signed: false,
};
const TEMPERATURES: ArrayLayout = ArrayLayout {
    base: 52,
    count: MAX_TEMP,
    signed: true,
};

/// Offset of the discharge relay flag.
pub const DISCHARGE_FLAG_POS: usize = 68;
// Observed flag values while the relay is off. Others may exist but are not
// confirmed, do not add any without captured traffic.
const DISCHARGE_OFF: [u8; 2] = [0x80, 12];

const FIELDS: [FieldDescriptor; 6] = [
    FieldDescriptor::new(BmsValue::Voltage, 12, 2, false, Transform::Milli),
    FieldDescriptor::new(BmsValue::Current, 48, 4, true, Transform::Milli),
    FieldDescriptor::new(BmsValue::BatteryLevel, 90, 2, false, Transform::Identity),
    FieldDescriptor::new(BmsValue::CycleCharge, 62, 2, false, Transform::Centi),
    FieldDescriptor::new(BmsValue::Cycles, 96, 4, false, Transform::Identity),
    FieldDescriptor::new(BmsValue::ProblemCode, 76, 4, false, Transform::Identity),
];

const CALC_VALUES: [BmsValue; 6] = [
    BmsValue::BatteryCharging,
    BmsValue::CycleCapacity,
    BmsValue::DeltaVoltage,
    BmsValue::Power,
    BmsValue::Runtime,
    BmsValue::Temperature,
];

const SERVICE_UUID: &str = "0000ffe0-0000-1000-8000-00805f9b34fb";
const MANUFACTURER_ID: u16 = 0x585A;
// "BT-ROCC2440" shares the service, so the names have to be matched as well
const NAME_PATTERNS: [&str; 10] = [
    "R-12*", "R-24*", "RO-12*", "RO-24*", "P-12*", "P-24*", "PQ-12*", "PQ-24*",
    "L-12*", // LiTime
    "L-24*", // LiTime
];

/// Redodo (and LiTime) Bluetooth batteries.
#[derive(Debug, Clone, Copy, Default)]
pub struct Redodo;

impl BmsProtocol for Redodo {
    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            manufacturer: "Redodo",
            model: "Bluetooth battery",
        }
    }

    fn advertisement_patterns(&self) -> Vec<AdvertisementPattern> {
        NAME_PATTERNS
            .iter()
            .map(|&local_name| AdvertisementPattern {
                local_name,
                service_uuid: SERVICE_UUID,
                manufacturer_id: MANUFACTURER_ID,
                connectable: true,
            })
            .collect()
    }

    fn uuid_services(&self) -> &'static [&'static str] {
        &[SERVICE_UUID]
    }

    fn uuid_rx(&self) -> &'static str {
        "ffe1"
    }

    fn uuid_tx(&self) -> &'static str {
        "ffe2"
    }

    fn fields(&self) -> &'static [FieldDescriptor] {
        &FIELDS
    }

    fn calc_values(&self) -> &'static [BmsValue] {
        &CALC_VALUES
    }

    fn poll_command(&self) -> Command {
        Command::Poll
    }

    fn discharge_commands(&self) -> Option<DischargeCommands> {
        Some(DischargeCommands {
            enable: Command::EnableDischarge,
            disable: Command::DisableDischarge,
        })
    }

    fn decode(&self, frame: &ValidFrame, tracker: &mut DischargeTracker) -> Sample {
        let mut result = bms::decode_fields(frame, &FIELDS);
        result.insert(
            BmsValue::CellVoltages,
            Value::FloatList(bms::cell_voltages(frame, CELLS)),
        );
        result.insert(
            BmsValue::TempValues,
            Value::IntList(bms::temp_sensors(frame, TEMPERATURES)),
        );
        result.insert(
            BmsValue::BatteryDischargingState,
            Value::Bool(tracker.update(frame, DISCHARGE_FLAG_POS, &DISCHARGE_OFF)),
        );
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{build_frame, validate};

    /// A valid frame of `total` bytes, `fill` writes at absolute offsets.
    fn frame(total: usize, fill: impl FnOnce(&mut [u8])) -> ValidFrame {
        let mut whole = vec![0u8; total];
        fill(&mut whole);
        validate(&build_frame(&whole[3..total - 1]).unwrap()).unwrap()
    }

    fn put(buffer: &mut [u8], offset: usize, bytes: &[u8]) {
        buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
    }

    #[test]
    fn decodes_voltage_only_frame() {
        let frame = frame(105, |b| put(b, 12, &[0x10, 0x27]));
        let mut tracker = DischargeTracker::new();
        let sample = Redodo.decode(&frame, &mut tracker);
        assert_eq!(sample.voltage(), Some(10.0));
        assert_eq!(sample.current(), Some(0.0));
        assert_eq!(sample.cell_voltages(), Some(Vec::new()));
        assert_eq!(
            sample.get(BmsValue::TempValues),
            Some(&Value::IntList(vec![]))
        );
        assert_eq!(sample.discharging_state(), Some(true));
    }

    #[test]
    fn decodes_full_status_frame() {
        let frame = frame(105, |b| {
            put(b, 12, &[0x1C, 0x34]); // 13.34 V
            put(b, 16, &[0x33, 0x0D, 0x34, 0x0D, 0x00, 0x00, 0x35, 0x0D]);
            put(b, 48, &[0x30, 0xF8, 0xFF, 0xFF]); // -2.0 A
            put(b, 52, &[0x15, 0x00, 0x00, 0x00, 0xFE, 0xFF]);
            put(b, 62, &[0x88, 0x13]); // 50.00 Ah
            put(b, 68, &[0x80]);
            put(b, 76, &[0x04, 0x00, 0x00, 0x00]);
            put(b, 90, &[0x4B, 0x00]);
            put(b, 96, &[0x2C, 0x01, 0x00, 0x00]);
        });
        let mut tracker = DischargeTracker::new();
        tracker.set(true);
        let sample = Redodo.decode(&frame, &mut tracker);

        assert_eq!(sample.voltage(), Some(13.34));
        assert_eq!(sample.current(), Some(-2.0));
        assert_eq!(sample.cell_voltages(), Some(vec![3.379, 3.38, 3.381]));
        assert_eq!(
            sample.get(BmsValue::TempValues),
            Some(&Value::IntList(vec![21, -2]))
        );
        assert_eq!(sample.f64(BmsValue::CycleCharge), Some(50.0));
        assert_eq!(sample.get(BmsValue::ProblemCode), Some(&Value::Int(4)));
        assert_eq!(sample.get(BmsValue::BatteryLevel), Some(&Value::Int(75)));
        assert_eq!(sample.get(BmsValue::Cycles), Some(&Value::Int(300)));
        assert_eq!(sample.discharging_state(), Some(false));
        assert!(!tracker.state());
    }

    #[test]
    fn short_frame_reports_last_state() {
        let mut tracker = DischargeTracker::new();
        let short = frame(68, |_| ());
        assert_eq!(
            Redodo.decode(&short, &mut tracker).discharging_state(),
            Some(false)
        );

        tracker.set(true);
        let sample = Redodo.decode(&short, &mut tracker);
        assert_eq!(sample.discharging_state(), Some(true));
        assert!(!sample.contains(BmsValue::BatteryLevel));
        assert!(!sample.contains(BmsValue::Cycles));
        assert!(!sample.contains(BmsValue::ProblemCode));
        assert!(sample.contains(BmsValue::CycleCharge));
    }

    #[test]
    fn discharge_sentinels() {
        for (flag, expected) in [
            (0x80, false),
            (12, false),
            (8, true),
            (0, true),
            (0x81, true),
        ] {
            let mut tracker = DischargeTracker::new();
            tracker.set(!expected);
            let frame = frame(70, |b| b[68] = flag);
            let sample = Redodo.decode(&frame, &mut tracker);
            assert_eq!(sample.discharging_state(), Some(expected), "flag {flag}");
            assert_eq!(tracker.state(), expected);
        }
    }

    #[test]
    fn decoding_twice_is_stable() {
        let frame = frame(105, |b| {
            put(b, 12, &[0x1C, 0x34]);
            put(b, 68, &[12]);
        });
        let mut tracker = DischargeTracker::new();
        tracker.set(true);
        let first = Redodo.decode(&frame, &mut tracker);
        let second = Redodo.decode(&frame, &mut tracker);
        assert_eq!(first, second);
    }

    #[test]
    fn advertisement_matching() {
        assert!(Redodo.supported("RO-24100-C0123", Some(0x585A)));
        assert!(Redodo.supported("L-12100BNNA70", Some(0x585A)));
        assert!(!Redodo.supported("BT-ROCC2440", Some(0x585A)));
        assert_eq!(Redodo.advertisement_patterns().len(), 10);
    }
}
