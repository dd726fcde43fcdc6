use std::collections::BTreeMap;
use std::fmt;

#[cfg(feature = "serde")]
use serde::Serialize;

/// Keys of a [`Sample`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(rename_all = "snake_case"))]
pub enum BmsValue {
    Voltage,
    Current, // negative=discharging, positive=charging
    BatteryLevel,
    CycleCharge,
    Cycles,
    ProblemCode,
    CellVoltages,
    TempValues,
    BatteryDischargingState,
    // calculated
    BatteryCharging,
    CycleCapacity,
    DeltaVoltage,
    Power,
    Runtime,
    Temperature,
}

impl fmt::Display for BmsValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            BmsValue::Voltage => "voltage",
            BmsValue::Current => "current",
            BmsValue::BatteryLevel => "battery_level",
            BmsValue::CycleCharge => "cycle_charge",
            BmsValue::Cycles => "cycles",
            BmsValue::ProblemCode => "problem_code",
            BmsValue::CellVoltages => "cell_voltages",
            BmsValue::TempValues => "temp_values",
            BmsValue::BatteryDischargingState => "battery_discharging_state",
            BmsValue::BatteryCharging => "battery_charging",
            BmsValue::CycleCapacity => "cycle_capacity",
            BmsValue::DeltaVoltage => "delta_voltage",
            BmsValue::Power => "power",
            BmsValue::Runtime => "runtime",
            BmsValue::Temperature => "temperature",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(untagged))]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    IntList(Vec<i64>),
    FloatList(Vec<f64>),
}

impl Value {
    /// Numeric view of scalar values.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view of list values.
    pub fn as_f64_list(&self) -> Option<Vec<f64>> {
        match self {
            Value::IntList(v) => Some(v.iter().map(|x| *x as f64).collect()),
            Value::FloatList(v) => Some(v.clone()),
            _ => None,
        }
    }
}

/// Decoded measurements of one frame.
///
/// Sparse: a key is only present if the frame carried it or it could be
/// calculated from keys that are present.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize), serde(transparent))]
pub struct Sample(BTreeMap<BmsValue, Value>);

impl Sample {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: BmsValue, value: Value) -> Option<Value> {
        self.0.insert(key, value)
    }

    pub fn get(&self, key: BmsValue) -> Option<&Value> {
        self.0.get(&key)
    }

    pub fn contains(&self, key: BmsValue) -> bool {
        self.0.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&BmsValue, &Value)> {
        self.0.iter()
    }

    pub fn f64(&self, key: BmsValue) -> Option<f64> {
        self.get(key).and_then(Value::as_f64)
    }

    pub fn voltage(&self) -> Option<f64> {
        self.f64(BmsValue::Voltage)
    }

    pub fn current(&self) -> Option<f64> {
        self.f64(BmsValue::Current)
    }

    pub fn cell_voltages(&self) -> Option<Vec<f64>> {
        self.get(BmsValue::CellVoltages)
            .and_then(Value::as_f64_list)
    }

    pub fn temp_values(&self) -> Option<Vec<f64>> {
        self.get(BmsValue::TempValues).and_then(Value::as_f64_list)
    }

    pub fn discharging_state(&self) -> Option<bool> {
        self.get(BmsValue::BatteryDischargingState)
            .and_then(Value::as_bool)
    }

    /// Adds the derived values listed in `wanted` that the sample can
    /// provide. Keys already present are left alone.
    pub fn add_calculated(&mut self, wanted: &[BmsValue]) {
        for key in wanted {
            if self.contains(*key) {
                continue;
            }
            if let Some(value) = self.calculate(*key) {
                log::trace!("calculated {key}={value:?}");
                self.insert(*key, value);
            }
        }
    }

    fn calculate(&self, key: BmsValue) -> Option<Value> {
        match key {
            BmsValue::BatteryCharging => self.current().map(|i| Value::Bool(i > 0.0)),
            BmsValue::CycleCapacity => {
                let charge = self.f64(BmsValue::CycleCharge)?;
                Some(Value::Float(round3(self.voltage()? * charge)))
            }
            BmsValue::DeltaVoltage => {
                let cells = self.cell_voltages()?;
                let max = cells.iter().copied().reduce(f64::max)?;
                let min = cells.iter().copied().reduce(f64::min)?;
                Some(Value::Float(round3(max - min)))
            }
            BmsValue::Power => {
                let current = self.current()?;
                Some(Value::Float(round3(self.voltage()? * current)))
            }
            BmsValue::Runtime => {
                let current = self.current()?;
                let charge = self.f64(BmsValue::CycleCharge)?;
                if current >= 0.0 || charge <= 0.0 {
                    return None;
                }
                Some(Value::Int((charge / current.abs() * 3600.0) as i64))
            }
            BmsValue::Temperature => {
                let temps = self.temp_values()?;
                if temps.is_empty() {
                    return None;
                }
                let mean = temps.iter().sum::<f64>() / temps.len() as f64;
                Some(Value::Float(round3(mean)))
            }
            _ => None,
        }
    }
}

fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

impl fmt::Display for Sample {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (key, value) in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            first = false;
            match value {
                Value::Int(v) => write!(f, "{key}={v}")?,
                Value::Float(v) => write!(f, "{key}={v}")?,
                Value::Bool(v) => write!(f, "{key}={v}")?,
                Value::IntList(v) => write!(f, "{key}={v:?}")?,
                Value::FloatList(v) => write!(f, "{key}={v:?}")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CALCULATED: [BmsValue; 6] = [
        BmsValue::BatteryCharging,
        BmsValue::CycleCapacity,
        BmsValue::DeltaVoltage,
        BmsValue::Power,
        BmsValue::Runtime,
        BmsValue::Temperature,
    ];

    fn discharging_sample() -> Sample {
        let mut sample = Sample::new();
        sample.insert(BmsValue::Voltage, Value::Float(13.2));
        sample.insert(BmsValue::Current, Value::Float(-2.0));
        sample.insert(BmsValue::CycleCharge, Value::Float(50.0));
        sample.insert(
            BmsValue::CellVoltages,
            Value::FloatList(vec![3.301, 3.305, 3.298, 3.3]),
        );
        sample.insert(BmsValue::TempValues, Value::IntList(vec![20, 22, 23]));
        sample
    }

    #[test]
    fn calculates_derived_values() {
        let mut sample = discharging_sample();
        sample.add_calculated(&ALL_CALCULATED);

        assert_eq!(
            sample.get(BmsValue::BatteryCharging),
            Some(&Value::Bool(false))
        );
        assert_eq!(sample.f64(BmsValue::CycleCapacity), Some(660.0));
        assert_eq!(sample.f64(BmsValue::DeltaVoltage), Some(0.007));
        assert_eq!(sample.f64(BmsValue::Power), Some(-26.4));
        assert_eq!(sample.get(BmsValue::Runtime), Some(&Value::Int(90000)));
        assert_eq!(sample.f64(BmsValue::Temperature), Some(21.667));
    }

    #[test]
    fn no_runtime_while_charging() {
        let mut sample = discharging_sample();
        sample.insert(BmsValue::Current, Value::Float(3.5));
        sample.add_calculated(&[BmsValue::Runtime, BmsValue::BatteryCharging]);
        assert!(!sample.contains(BmsValue::Runtime));
        assert_eq!(
            sample.get(BmsValue::BatteryCharging),
            Some(&Value::Bool(true))
        );
    }

    #[test]
    fn skips_values_without_inputs() {
        let mut sample = Sample::new();
        sample.insert(BmsValue::Voltage, Value::Float(12.0));
        sample.insert(BmsValue::CellVoltages, Value::FloatList(Vec::new()));
        sample.insert(BmsValue::TempValues, Value::IntList(Vec::new()));
        sample.add_calculated(&ALL_CALCULATED);
        assert_eq!(sample.len(), 3);
    }

    #[test]
    fn keeps_values_already_present() {
        let mut sample = discharging_sample();
        sample.insert(BmsValue::Power, Value::Float(1.0));
        sample.add_calculated(&[BmsValue::Power]);
        assert_eq!(sample.f64(BmsValue::Power), Some(1.0));
    }

    #[test]
    fn display_lists_keys_in_order() {
        let mut sample = Sample::new();
        sample.insert(BmsValue::BatteryDischargingState, Value::Bool(true));
        sample.insert(BmsValue::Voltage, Value::Float(10.0));
        sample.insert(BmsValue::BatteryLevel, Value::Int(80));
        assert_eq!(
            sample.to_string(),
            "voltage=10, battery_level=80, battery_discharging_state=true"
        );
    }
}
