//! Sensor catalog, readings and the capability wrapper around concrete drivers.
//!
//! Every physical sensor model has a fixed type code and a catalog entry that
//! declares its bus, power domain and number of sub-values. The catalog is the
//! single source of the reading shape: a sensor that never came up still
//! produces a reading with the declared number of sub-values, all NaN.

use core::fmt;

use heapless::{String, Vec};

use crate::bus::BusKind;
use crate::config::SensorConfig;
use crate::power::PowerDomain;

pub mod battery;
pub mod env4;
pub mod orchestrator;

pub use orchestrator::{BeginReport, SensorOrchestrator};

/// Longest sensor id accepted from configuration.
pub const SENSOR_ID_CAPACITY: usize = 19;

/// Largest sub-value arity in the catalog.
pub const MAX_SUB_VALUES: usize = 4;

/// Upper bound on registered sensors, battery monitor included.
pub const MAX_SENSORS: usize = 16;

pub type SensorId = String<SENSOR_ID_CAPACITY>;
pub type SubValues = Vec<f32, MAX_SUB_VALUES>;

/// Physical sensor models the node knows how to read.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorType {
    Ntc100k,
    Ntc10k,
    Hds10,
    Rtd,
    Ds18b20,
    Ph,
    Conductivity,
    SoilHumidity,
    Veml7700,
    Battery,
    Sht30,
    Bme680,
    Co2,
    Bme280,
    Sht40,
    Env4,
}

impl SensorType {
    /// Wire type code carried in the uplink payload.
    #[must_use]
    pub const fn code(self) -> u16 {
        match self {
            SensorType::Ntc100k => 0,
            SensorType::Ntc10k => 1,
            SensorType::Hds10 => 2,
            SensorType::Rtd => 3,
            SensorType::Ds18b20 => 4,
            SensorType::Ph => 5,
            SensorType::Conductivity => 6,
            SensorType::SoilHumidity => 7,
            SensorType::Veml7700 => 8,
            SensorType::Battery => 9,
            SensorType::Sht30 => 100,
            SensorType::Bme680 => 101,
            SensorType::Co2 => 102,
            SensorType::Bme280 => 103,
            SensorType::Sht40 => 104,
            SensorType::Env4 => 110,
        }
    }

    #[must_use]
    pub const fn from_code(code: u16) -> Option<Self> {
        match code {
            0 => Some(SensorType::Ntc100k),
            1 => Some(SensorType::Ntc10k),
            2 => Some(SensorType::Hds10),
            3 => Some(SensorType::Rtd),
            4 => Some(SensorType::Ds18b20),
            5 => Some(SensorType::Ph),
            6 => Some(SensorType::Conductivity),
            7 => Some(SensorType::SoilHumidity),
            8 => Some(SensorType::Veml7700),
            9 => Some(SensorType::Battery),
            100 => Some(SensorType::Sht30),
            101 => Some(SensorType::Bme680),
            102 => Some(SensorType::Co2),
            103 => Some(SensorType::Bme280),
            104 => Some(SensorType::Sht40),
            110 => Some(SensorType::Env4),
            _ => None,
        }
    }

    /// Catalog entry for this model.
    #[must_use]
    pub const fn spec(self) -> SensorSpec {
        SENSOR_CATALOG[self.catalog_index()]
    }

    #[must_use]
    pub const fn bus(self) -> BusKind {
        self.spec().bus
    }

    #[must_use]
    pub const fn power(self) -> PowerDomain {
        self.spec().power
    }

    /// Number of sub-values every reading of this model carries.
    #[must_use]
    pub const fn arity(self) -> usize {
        self.spec().arity
    }

    const fn catalog_index(self) -> usize {
        match self {
            SensorType::Ntc100k => 0,
            SensorType::Ntc10k => 1,
            SensorType::Hds10 => 2,
            SensorType::Rtd => 3,
            SensorType::Ds18b20 => 4,
            SensorType::Ph => 5,
            SensorType::Conductivity => 6,
            SensorType::SoilHumidity => 7,
            SensorType::Veml7700 => 8,
            SensorType::Battery => 9,
            SensorType::Sht30 => 10,
            SensorType::Bme680 => 11,
            SensorType::Co2 => 12,
            SensorType::Bme280 => 13,
            SensorType::Sht40 => 14,
            SensorType::Env4 => 15,
        }
    }
}

impl fmt::Display for SensorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.spec().label)
    }
}

/// Static metadata for one sensor model.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct SensorSpec {
    pub kind: SensorType,
    pub label: &'static str,
    pub bus: BusKind,
    pub power: PowerDomain,
    pub arity: usize,
}

impl SensorSpec {
    const fn new(
        kind: SensorType,
        label: &'static str,
        bus: BusKind,
        power: PowerDomain,
        arity: usize,
    ) -> Self {
        Self {
            kind,
            label,
            bus,
            power,
            arity,
        }
    }
}

/// Catalog of supported models, indexed by [`SensorType`].
pub const SENSOR_CATALOG: [SensorSpec; 16] = [
    SensorSpec::new(SensorType::Ntc100k, "N100K", BusKind::Analog, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Ntc10k, "N10K", BusKind::Analog, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Hds10, "HDS10", BusKind::Analog, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Rtd, "RTD", BusKind::Spi, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Ds18b20, "DS18B20", BusKind::OneWire, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Ph, "PH", BusKind::Analog, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Conductivity, "COND", BusKind::Analog, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::SoilHumidity, "SOILH", BusKind::Analog, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Veml7700, "VEML7700", BusKind::TwoWire, PowerDomain::SwitchedLow, 0),
    SensorSpec::new(SensorType::Battery, "BATTERY", BusKind::Analog, PowerDomain::AlwaysOnMain, 0),
    SensorSpec::new(SensorType::Sht30, "SHT30", BusKind::TwoWire, PowerDomain::AlwaysOnMain, 2),
    SensorSpec::new(SensorType::Bme680, "BME680", BusKind::TwoWire, PowerDomain::SwitchedLow, 3),
    SensorSpec::new(SensorType::Co2, "CO2", BusKind::TwoWire, PowerDomain::SwitchedLow, 3),
    SensorSpec::new(SensorType::Bme280, "BME280", BusKind::TwoWire, PowerDomain::SwitchedLow, 3),
    SensorSpec::new(SensorType::Sht40, "SHT40", BusKind::TwoWire, PowerDomain::SwitchedLow, 2),
    SensorSpec::new(SensorType::Env4, "ENV4", BusKind::FieldBus, PowerDomain::SwitchedHigh, 4),
];

/// Raw result of one driver read, before it is shaped to the catalog arity.
#[derive(Clone, Debug, PartialEq)]
pub struct Measurement {
    pub value: f32,
    pub sub_values: SubValues,
}

impl Measurement {
    #[must_use]
    pub fn scalar(value: f32) -> Self {
        Self {
            value,
            sub_values: SubValues::new(),
        }
    }

    /// Multi-value measurement; the primary value is the first entry.
    /// Entries past [`MAX_SUB_VALUES`] are dropped.
    #[must_use]
    pub fn multi(values: &[f32]) -> Self {
        let take = values.len().min(MAX_SUB_VALUES);
        let mut sub_values = SubValues::new();
        for value in &values[..take] {
            let _ = sub_values.push(*value);
        }
        Self {
            value: values.first().copied().unwrap_or(f32::NAN),
            sub_values,
        }
    }

    #[must_use]
    pub fn unavailable() -> Self {
        Self::scalar(f32::NAN)
    }
}

/// One sensor's contribution to the uplink.
#[derive(Clone, Debug, PartialEq)]
pub struct Reading {
    pub sensor_id: SensorId,
    pub sensor_type: SensorType,
    pub value: f32,
    pub sub_values: SubValues,
}

impl Reading {
    /// Shapes `measurement` to the catalog arity of `sensor_type`: missing
    /// sub-values become NaN, surplus ones are dropped.
    #[must_use]
    pub fn new(sensor_id: SensorId, sensor_type: SensorType, measurement: Measurement) -> Self {
        let arity = sensor_type.arity();
        let mut sub_values = SubValues::new();
        for index in 0..arity {
            let value = measurement
                .sub_values
                .get(index)
                .copied()
                .unwrap_or(f32::NAN);
            let _ = sub_values.push(value);
        }

        Self {
            sensor_id,
            sensor_type,
            value: measurement.value,
            sub_values,
        }
    }

    /// Reading for a sensor that could not be measured: every value NaN.
    #[must_use]
    pub fn failed(sensor_id: SensorId, sensor_type: SensorType) -> Self {
        Self::new(sensor_id, sensor_type, Measurement::unavailable())
    }

    /// Values as they appear on the wire: the sub-values, or the primary
    /// value alone for scalar sensors.
    pub fn wire_values(&self) -> impl Iterator<Item = f32> + '_ {
        let scalar = self.sub_values.is_empty().then_some(self.value);
        scalar.into_iter().chain(self.sub_values.iter().copied())
    }

    #[must_use]
    pub fn is_valid(&self) -> bool {
        !self.value.is_nan()
    }
}

/// Uniform contract for a concrete sensor driver.
pub trait SensorDriver {
    /// Brings the device up. Returns `false` when it does not respond.
    fn begin(&mut self) -> bool;

    /// Takes one measurement. Only called after a successful [`begin`](Self::begin).
    fn read(&mut self) -> Measurement;
}

/// Builds drivers from configuration entries.
pub trait SensorFactory {
    type Sensor: SensorDriver;

    /// Returns `None` when this board has no driver for the entry's model.
    fn build(&mut self, sensor_type: SensorType, config: &SensorConfig) -> Option<Self::Sensor>;
}

/// A registered sensor: its identity, declared requirements and driver.
pub struct SensorCapability<S> {
    id: SensorId,
    sensor_type: SensorType,
    driver: S,
    initialized: bool,
}

impl<S> SensorCapability<S>
where
    S: SensorDriver,
{
    pub fn new(id: SensorId, sensor_type: SensorType, driver: S) -> Self {
        Self {
            id,
            sensor_type,
            driver,
            initialized: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sensor_type(&self) -> SensorType {
        self.sensor_type
    }

    pub fn bus(&self) -> BusKind {
        self.sensor_type.bus()
    }

    pub fn power(&self) -> PowerDomain {
        self.sensor_type.power()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Runs the driver's `begin()` and records the outcome.
    pub fn begin(&mut self) -> bool {
        self.initialized = self.driver.begin();
        self.initialized
    }

    /// Reads the sensor, or produces an all-NaN reading if it never came up.
    pub fn read(&mut self) -> Reading {
        if !self.initialized {
            return Reading::failed(self.id.clone(), self.sensor_type);
        }
        let measurement = self.driver.read();
        Reading::new(self.id.clone(), self.sensor_type, measurement)
    }

    pub fn driver_mut(&mut self) -> &mut S {
        &mut self.driver
    }
}

/// Copies `id` into a [`SensorId`], truncating at the capacity.
#[must_use]
pub fn sensor_id(id: &str) -> SensorId {
    let mut out = SensorId::new();
    for ch in id.chars() {
        if out.push(ch).is_err() {
            break;
        }
    }
    out
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    #[test]
    fn catalog_is_indexed_by_type() {
        for spec in &SENSOR_CATALOG {
            assert_eq!(spec.kind.spec(), *spec);
            assert_eq!(SensorType::from_code(spec.kind.code()), Some(spec.kind));
            assert!(spec.arity <= MAX_SUB_VALUES);
        }
        assert_eq!(SensorType::from_code(55), None);
    }

    #[test]
    fn failed_reading_has_catalog_arity() {
        for spec in &SENSOR_CATALOG {
            let reading = Reading::failed(sensor_id("X"), spec.kind);
            assert!(reading.value.is_nan());
            assert_eq!(reading.sub_values.len(), spec.arity);
            assert!(reading.sub_values.iter().all(|value| value.is_nan()));
            assert_eq!(reading.wire_values().count(), spec.arity.max(1));
        }
    }

    #[test]
    fn short_measurement_is_padded_and_long_is_trimmed() {
        let padded = Reading::new(sensor_id("SH"), SensorType::Sht30, Measurement::multi(&[21.5]));
        assert_eq!(padded.sub_values.len(), 2);
        assert_eq!(padded.sub_values[0], 21.5);
        assert!(padded.sub_values[1].is_nan());

        let trimmed = Reading::new(
            sensor_id("SH"),
            SensorType::Sht30,
            Measurement::multi(&[21.5, 40.0, 1.0]),
        );
        assert_eq!(trimmed.sub_values.as_slice(), &[21.5, 40.0]);
    }

    #[test]
    fn scalar_wire_values_use_primary() {
        let reading = Reading::new(sensor_id("NTC1"), SensorType::Ntc100k, Measurement::scalar(3.25));
        assert_eq!(reading.wire_values().collect::<Vec<f32, 4>>().as_slice(), &[3.25]);
    }

    #[test]
    fn sensor_id_truncates() {
        let id = sensor_id("ABCDEFGHIJKLMNOPQRSTUVWXYZ");
        assert_eq!(id.len(), SENSOR_ID_CAPACITY);
        assert_eq!(id.as_str(), "ABCDEFGHIJKLMNOPQRS");
    }

    struct Flaky {
        responds: bool,
    }

    impl SensorDriver for Flaky {
        fn begin(&mut self) -> bool {
            self.responds
        }

        fn read(&mut self) -> Measurement {
            Measurement::multi(&[1.0, 2.0, 3.0])
        }
    }

    #[test]
    fn uninitialized_capability_never_touches_driver() {
        let mut capability =
            SensorCapability::new(sensor_id("B6"), SensorType::Bme680, Flaky { responds: false });
        assert!(!capability.begin());
        let reading = capability.read();
        assert!(!reading.is_valid());
        assert_eq!(reading.sub_values.len(), 3);

        let mut healthy =
            SensorCapability::new(sensor_id("B6"), SensorType::Bme680, Flaky { responds: true });
        assert!(healthy.begin());
        assert_eq!(healthy.read().sub_values.as_slice(), &[1.0, 2.0, 3.0]);
    }
}
