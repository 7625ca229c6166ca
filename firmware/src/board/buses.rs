use embassy_stm32::gpio::Output;
use node_core::bus::{BusHardware, BusKind};

use super::sensors::SharedFieldBus;

/// Bus bring-up for the peripherals that need more than their pins.
pub struct BoardBuses {
    /// Chip select of the RTD converter, the only SPI device.
    rtd_cs: Output<'static>,
    field_bus: SharedFieldBus,
}

impl BoardBuses {
    pub fn new(rtd_cs: Output<'static>, field_bus: SharedFieldBus) -> Self {
        Self { rtd_cs, field_bus }
    }
}

impl BusHardware for BoardBuses {
    fn start(&mut self, kind: BusKind) {
        defmt::debug!("bus: start {}", kind);
        match kind {
            BusKind::Spi => self.rtd_cs.set_high(),
            BusKind::FieldBus => self.field_bus.open(),
            BusKind::TwoWire | BusKind::OneWire | BusKind::Analog => {}
        }
    }

    fn stop(&mut self, kind: BusKind) {
        defmt::debug!("bus: stop {}", kind);
        match kind {
            // An idle-high select would back-power the converter through its
            // input protection once the rail drops.
            BusKind::Spi => self.rtd_cs.set_low(),
            BusKind::FieldBus => self.field_bus.close(),
            BusKind::TwoWire | BusKind::OneWire | BusKind::Analog => {}
        }
    }
}
