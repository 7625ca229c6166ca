//! One-shot bring-up of the shared communication buses.
//!
//! Each bus kind is initialized at most once per wake cycle. The guard is only
//! cleared by a reboot, which on this node means the next wake. A bus that
//! fails to come up is not reported here; the sensors that depend on it fail
//! their own `begin()` instead.

use core::fmt;

pub mod field;

pub use field::{
    FIELD_BUS_BAUD, FIELD_BUS_FORMAT, FieldBusError, FieldBusTransport, FrameFormat, Parity,
    RegisterReader,
};

/// Number of distinct bus kinds.
pub const BUS_KIND_COUNT: usize = 5;

/// Communication bus a sensor is attached to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusKind {
    /// I²C-style two-wire bus.
    TwoWire,
    Spi,
    OneWire,
    /// Serial field bus (Modbus RTU over RS-485).
    FieldBus,
    /// ADC front-end.
    Analog,
}

impl BusKind {
    /// Deterministic index for lookups into [`ALL_BUS_KINDS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            BusKind::TwoWire => 0,
            BusKind::Spi => 1,
            BusKind::OneWire => 2,
            BusKind::FieldBus => 3,
            BusKind::Analog => 4,
        }
    }

    /// Attempts to construct a [`BusKind`] from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(BusKind::TwoWire),
            1 => Some(BusKind::Spi),
            2 => Some(BusKind::OneWire),
            3 => Some(BusKind::FieldBus),
            4 => Some(BusKind::Analog),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            BusKind::TwoWire => "i2c",
            BusKind::Spi => "spi",
            BusKind::OneWire => "onewire",
            BusKind::FieldBus => "modbus",
            BusKind::Analog => "adc",
        }
    }
}

impl fmt::Display for BusKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Every bus kind in bring-up order.
pub const ALL_BUS_KINDS: [BusKind; BUS_KIND_COUNT] = [
    BusKind::TwoWire,
    BusKind::Spi,
    BusKind::OneWire,
    BusKind::FieldBus,
    BusKind::Analog,
];

/// Board-specific bus peripherals.
pub trait BusHardware {
    /// Starts the peripheral behind `kind`. The field bus is opened at
    /// [`FIELD_BUS_BAUD`] with [`FIELD_BUS_FORMAT`].
    fn start(&mut self, kind: BusKind);

    /// Stops the peripheral behind `kind` and releases its pins.
    fn stop(&mut self, kind: BusKind);
}

/// Bus hardware that ignores every request.
#[derive(Default)]
pub struct NoopBusHardware;

impl BusHardware for NoopBusHardware {
    fn start(&mut self, _kind: BusKind) {}

    fn stop(&mut self, _kind: BusKind) {}
}

/// Tracks which buses have been brought up during this wake cycle.
pub struct BusInitializer<H> {
    hardware: H,
    started: [bool; BUS_KIND_COUNT],
    running: [bool; BUS_KIND_COUNT],
}

impl<H> BusInitializer<H>
where
    H: BusHardware,
{
    pub fn new(hardware: H) -> Self {
        Self {
            hardware,
            started: [false; BUS_KIND_COUNT],
            running: [false; BUS_KIND_COUNT],
        }
    }

    /// Brings up `kind` unless it already ran this cycle.
    ///
    /// Returns `true` when this call performed the initialization.
    pub fn ensure(&mut self, kind: BusKind) -> bool {
        let slot = &mut self.started[kind.as_index()];
        if *slot {
            return false;
        }
        *slot = true;
        self.running[kind.as_index()] = true;
        self.hardware.start(kind);
        true
    }

    /// Stops `kind` if it is running. The guard stays set, so a later
    /// [`ensure`](Self::ensure) in the same cycle does not restart it.
    pub fn end(&mut self, kind: BusKind) -> bool {
        let slot = &mut self.running[kind.as_index()];
        if !*slot {
            return false;
        }
        *slot = false;
        self.hardware.stop(kind);
        true
    }

    /// Returns `true` while `kind` is up.
    #[must_use]
    pub fn is_running(&self, kind: BusKind) -> bool {
        self.running[kind.as_index()]
    }

    /// Returns `true` once `kind` was brought up this cycle, even if ended since.
    #[must_use]
    pub fn is_started(&self, kind: BusKind) -> bool {
        self.started[kind.as_index()]
    }

    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    pub fn hardware_mut(&mut self) -> &mut H {
        &mut self.hardware
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct CountingHardware {
        starts: [u8; BUS_KIND_COUNT],
        stops: [u8; BUS_KIND_COUNT],
    }

    impl BusHardware for CountingHardware {
        fn start(&mut self, kind: BusKind) {
            self.starts[kind.as_index()] += 1;
        }

        fn stop(&mut self, kind: BusKind) {
            self.stops[kind.as_index()] += 1;
        }
    }

    #[test]
    fn kinds_round_trip_through_index() {
        for (index, kind) in ALL_BUS_KINDS.iter().enumerate() {
            assert_eq!(kind.as_index(), index);
            assert_eq!(BusKind::from_index(index), Some(*kind));
        }
    }

    #[test]
    fn ensure_initializes_each_kind_once() {
        let mut buses = BusInitializer::new(CountingHardware::default());
        assert!(buses.ensure(BusKind::TwoWire));
        assert!(!buses.ensure(BusKind::TwoWire));
        assert!(!buses.ensure(BusKind::TwoWire));
        assert!(buses.ensure(BusKind::FieldBus));

        let hw = buses.hardware();
        assert_eq!(hw.starts[BusKind::TwoWire.as_index()], 1);
        assert_eq!(hw.starts[BusKind::FieldBus.as_index()], 1);
        assert_eq!(hw.starts[BusKind::Spi.as_index()], 0);
    }

    #[test]
    fn end_only_stops_started_buses_and_keeps_guard() {
        let mut buses = BusInitializer::new(CountingHardware::default());
        assert!(!buses.end(BusKind::Spi));
        buses.ensure(BusKind::Spi);
        assert!(buses.end(BusKind::Spi));
        assert!(!buses.end(BusKind::Spi));
        assert!(!buses.is_running(BusKind::Spi));
        assert!(buses.is_started(BusKind::Spi));
        assert!(!buses.ensure(BusKind::Spi));
        assert_eq!(buses.hardware().stops[BusKind::Spi.as_index()], 1);
        assert_eq!(buses.hardware().starts[BusKind::Spi.as_index()], 1);
    }
}
