//! Registration, power-up, bring-up and reading of the configured sensors.

use embedded_hal::delay::DelayNs;
use heapless::Vec;

use super::battery::BATTERY_SENSOR_ID;
use super::{
    MAX_SENSORS, Reading, SensorCapability, SensorDriver, SensorFactory, SensorType, sensor_id,
};
use crate::bus::{BUS_KIND_COUNT, BusHardware, BusInitializer, BusKind};
use crate::config::{SensorCategory, SensorConfig, bounded};
use crate::power::{PowerSequencer, RailDriver, RailSet};
use crate::telemetry::{EventLog, NodeEvent};

pub type Readings = Vec<Reading, MAX_SENSORS>;

/// Outcome of [`SensorOrchestrator::prepare`].
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BeginReport {
    /// Rails switched on for this batch.
    pub rails: RailSet,
    pub initialized: u8,
    pub failed: u8,
}

impl BeginReport {
    #[must_use]
    pub const fn all_ok(&self) -> bool {
        self.failed == 0
    }
}

/// Owns the registered sensors for one cycle.
pub struct SensorOrchestrator<S> {
    sensors: Vec<SensorCapability<S>, MAX_SENSORS>,
    powered: RailSet,
    field_bus: bool,
}

impl<S> SensorOrchestrator<S>
where
    S: SensorDriver,
{
    #[must_use]
    pub const fn new() -> Self {
        Self {
            sensors: Vec::new(),
            powered: RailSet::EMPTY,
            field_bus: false,
        }
    }

    /// Builds the capability list: the battery monitor first, then every
    /// enabled entry in configuration order.
    ///
    /// Entries with an unknown type code or no driver on this board are
    /// skipped and logged.
    pub fn register<'a, F, I>(&mut self, factory: &mut F, entries: I, events: &mut EventLog)
    where
        F: SensorFactory<Sensor = S>,
        I: IntoIterator<Item = &'a SensorConfig>,
    {
        let battery = battery_entry();
        self.register_one(factory, &battery, events);
        for entry in entries {
            if entry.enabled {
                self.register_one(factory, entry, events);
            }
        }
    }

    fn register_one<F>(&mut self, factory: &mut F, entry: &SensorConfig, events: &mut EventLog)
    where
        F: SensorFactory<Sensor = S>,
    {
        let Some(sensor_type) = entry.sensor_type() else {
            events.record(NodeEvent::SensorUnknown(entry.type_code));
            return;
        };
        let Some(driver) = factory.build(sensor_type, entry) else {
            events.record(NodeEvent::SensorUnsupported(sensor_type));
            return;
        };
        let capability = SensorCapability::new(entry.id.clone(), sensor_type, driver);
        if self.sensors.push(capability).is_err() {
            events.record(NodeEvent::SensorRegistryFull);
        }
    }

    /// Rails the registered sensors declare, independent of any runtime outcome.
    pub fn required_rails(&self) -> RailSet {
        let mut rails = RailSet::EMPTY;
        for sensor in &self.sensors {
            rails.insert_domain(sensor.power());
        }
        rails
    }

    /// Distinct buses in first-use order.
    pub fn required_buses(&self) -> Vec<BusKind, BUS_KIND_COUNT> {
        let mut buses = Vec::new();
        for sensor in &self.sensors {
            let bus = sensor.bus();
            if !buses.contains(&bus) {
                let _ = buses.push(bus);
            }
        }
        buses
    }

    /// Powers the required rails, brings up each bus once and begins every sensor.
    ///
    /// Rails come up before any bus so the field bus starts on an energized
    /// high rail. A sensor that fails to begin is recorded and skipped; its
    /// siblings are still attempted.
    pub fn prepare<D, T, H>(
        &mut self,
        power: &mut PowerSequencer<D, T>,
        buses: &mut BusInitializer<H>,
        events: &mut EventLog,
    ) -> BeginReport
    where
        D: RailDriver,
        T: DelayNs,
        H: BusHardware,
    {
        self.powered = power.rails_on(self.required_rails());
        for rail in self.powered.iter() {
            events.record(NodeEvent::RailOn(rail));
        }

        for bus in self.required_buses() {
            if bus == BusKind::FieldBus {
                self.field_bus = true;
            }
            if buses.ensure(bus) {
                events.record(NodeEvent::BusStarted(bus));
            }
        }

        let mut report = BeginReport {
            rails: self.powered,
            ..BeginReport::default()
        };
        for (index, sensor) in self.sensors.iter_mut().enumerate() {
            let ok = sensor.begin();
            if ok {
                report.initialized += 1;
            } else {
                report.failed += 1;
            }
            events.record(NodeEvent::SensorBegin {
                index: u8::try_from(index).unwrap_or(u8::MAX),
                sensor: sensor.sensor_type(),
                ok,
            });
        }
        report
    }

    /// One reading per registered sensor, in registration order.
    pub fn read_all(&mut self) -> Readings {
        self.sensors.iter_mut().map(SensorCapability::read).collect()
    }

    /// Ends the field bus if this batch used it, then drops exactly the rails
    /// [`prepare`](Self::prepare) turned on, high rail first.
    pub fn power_down<D, T, H>(
        &mut self,
        power: &mut PowerSequencer<D, T>,
        buses: &mut BusInitializer<H>,
        events: &mut EventLog,
    ) -> RailSet
    where
        D: RailDriver,
        T: DelayNs,
        H: BusHardware,
    {
        if self.field_bus && buses.end(BusKind::FieldBus) {
            events.record(NodeEvent::BusStopped(BusKind::FieldBus));
        }

        let dropped = power.rails_off(self.powered);
        for rail in dropped.iter().rev() {
            events.record(NodeEvent::RailOff(rail));
        }
        self.powered = RailSet::EMPTY;
        dropped
    }

    pub fn sensors(&self) -> &[SensorCapability<S>] {
        &self.sensors
    }

    pub fn sensors_mut(&mut self) -> &mut [SensorCapability<S>] {
        &mut self.sensors
    }

    pub fn len(&self) -> usize {
        self.sensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sensors.is_empty()
    }
}

impl<S> Default for SensorOrchestrator<S>
where
    S: SensorDriver,
{
    fn default() -> Self {
        Self::new()
    }
}

fn battery_entry() -> SensorConfig {
    SensorConfig {
        key: bounded(""),
        id: sensor_id(BATTERY_SENSOR_ID),
        type_code: SensorType::Battery.code(),
        category: SensorCategory::Adc,
        address: None,
        enabled: true,
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;
    use crate::bus::NoopBusHardware;
    use crate::power::{NoopRailDriver, RailId};
    use crate::sensors::Measurement;

    struct NoDelay;

    impl DelayNs for NoDelay {
        fn delay_ns(&mut self, _ns: u32) {}
    }

    struct Scripted {
        responds: bool,
        value: f32,
    }

    impl SensorDriver for Scripted {
        fn begin(&mut self) -> bool {
            self.responds
        }

        fn read(&mut self) -> Measurement {
            Measurement::multi(&[self.value, self.value + 1.0, self.value + 2.0, self.value + 3.0])
        }
    }

    struct Factory {
        absent: &'static [&'static str],
    }

    impl SensorFactory for Factory {
        type Sensor = Scripted;

        fn build(&mut self, sensor_type: SensorType, config: &SensorConfig) -> Option<Scripted> {
            if sensor_type == SensorType::Co2 {
                return None;
            }
            Some(Scripted {
                responds: !self.absent.contains(&config.id.as_str()),
                value: f32::from(sensor_type.code()),
            })
        }
    }

    fn entry(id: &str, sensor_type: u16) -> SensorConfig {
        SensorConfig {
            key: bounded(""),
            id: sensor_id(id),
            type_code: sensor_type,
            category: SensorCategory::Normal,
            address: None,
            enabled: true,
        }
    }

    #[test]
    fn registers_battery_first_and_skips_unknowns() {
        let entries = [
            entry("SH3", SensorType::Sht30.code()),
            entry("X", 77),
            entry("CO2", SensorType::Co2.code()),
            SensorConfig {
                enabled: false,
                ..entry("OFF", SensorType::Sht40.code())
            },
            entry("ENV", SensorType::Env4.code()),
        ];
        let mut events = EventLog::new();
        let mut orchestrator = SensorOrchestrator::new();
        orchestrator.register(&mut Factory { absent: &[] }, &entries, &mut events);

        let ids: Vec<&str, 8> = orchestrator.sensors().iter().map(|s| s.id()).collect();
        assert_eq!(ids.as_slice(), &["BATT", "SH3", "ENV"]);
        assert!(events.contains(|event| *event == NodeEvent::SensorUnknown(77)));
        assert!(events.contains(|event| *event == NodeEvent::SensorUnsupported(SensorType::Co2)));
    }

    #[test]
    fn aggregates_rails_and_buses_once() {
        let entries = [
            entry("SH3", SensorType::Sht30.code()),
            entry("B6", SensorType::Bme680.code()),
            entry("B2", SensorType::Bme280.code()),
            entry("ENV", SensorType::Env4.code()),
        ];
        let mut events = EventLog::new();
        let mut orchestrator = SensorOrchestrator::new();
        orchestrator.register(&mut Factory { absent: &[] }, &entries, &mut events);

        let mut power = PowerSequencer::new(NoopRailDriver, NoDelay);
        let mut buses = BusInitializer::new(NoopBusHardware);
        let report = orchestrator.prepare(&mut power, &mut buses, &mut events);

        assert!(report.all_ok());
        assert_eq!(report.initialized, 5);
        assert!(report.rails.contains(RailId::Low));
        assert!(report.rails.contains(RailId::High));
        assert_eq!(power.switch_on_count(RailId::Low), 1);
        assert_eq!(power.switch_on_count(RailId::High), 1);
        assert_eq!(
            orchestrator.required_buses().as_slice(),
            &[BusKind::Analog, BusKind::TwoWire, BusKind::FieldBus]
        );
        assert!(buses.is_running(BusKind::FieldBus));
    }

    #[test]
    fn failed_sensor_does_not_block_siblings() {
        let entries = [
            entry("SH3", SensorType::Sht30.code()),
            entry("ENV", SensorType::Env4.code()),
            entry("SH4", SensorType::Sht40.code()),
        ];
        let mut events = EventLog::new();
        let mut orchestrator = SensorOrchestrator::new();
        orchestrator.register(&mut Factory { absent: &["ENV"] }, &entries, &mut events);

        let mut power = PowerSequencer::new(NoopRailDriver, NoDelay);
        let mut buses = BusInitializer::new(NoopBusHardware);
        let report = orchestrator.prepare(&mut power, &mut buses, &mut events);
        assert_eq!(report.failed, 1);
        // The high rail is still energized for the absent field-bus sensor.
        assert!(power.is_on(RailId::High));

        let readings = orchestrator.read_all();
        assert_eq!(readings.len(), 4);
        assert_eq!(readings[1].sub_values.as_slice(), &[100.0, 101.0]);
        assert_eq!(readings[2].sub_values.len(), 4);
        assert!(readings[2].sub_values.iter().all(|value| value.is_nan()));
        assert_eq!(readings[3].sub_values.as_slice(), &[104.0, 105.0]);
    }

    #[test]
    fn power_down_reverses_only_own_rails() {
        let entries = [entry("ENV", SensorType::Env4.code())];
        let mut events = EventLog::new();
        let mut orchestrator = SensorOrchestrator::new();
        orchestrator.register(&mut Factory { absent: &[] }, &entries, &mut events);

        let mut power = PowerSequencer::new(NoopRailDriver, NoDelay);
        power.rail_on(RailId::Low);
        let mut buses = BusInitializer::new(NoopBusHardware);
        let report = orchestrator.prepare(&mut power, &mut buses, &mut events);
        assert_eq!(report.rails.iter().collect::<Vec<RailId, 2>>().as_slice(), &[RailId::High]);

        let dropped = orchestrator.power_down(&mut power, &mut buses, &mut events);
        assert_eq!(dropped.len(), 1);
        assert!(power.is_on(RailId::Low));
        assert!(!power.is_on(RailId::High));
        assert!(!buses.is_running(BusKind::FieldBus));

        let order: Vec<NodeEvent, 4> = events
            .oldest_first()
            .map(|record| record.event)
            .filter(|event| {
                matches!(event, NodeEvent::BusStopped(_) | NodeEvent::RailOff(_))
            })
            .collect();
        assert_eq!(
            order.as_slice(),
            &[
                NodeEvent::BusStopped(BusKind::FieldBus),
                NodeEvent::RailOff(RailId::High)
            ]
        );
    }
}
