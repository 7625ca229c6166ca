//! Board pin catalog as seen by the sleep path.

use core::fmt;

/// What happens to a pin across deep sleep.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinRole {
    /// Switched to high impedance to stop leakage.
    Quiesce,
    /// Driven high and latched so the attached SPI device stays deselected.
    ChipSelect,
    /// Stays a live input with pull-up; the only pin allowed to wake the node.
    Wake,
}

/// Board pins touched by the sleep path.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PinId {
    OneWire,
    I2cScl,
    I2cSda,
    Serial1Rx,
    Serial1Tx,
    BatteryControl,
    RadioReset,
    RadioBusy,
    RadioDio1,
    RadioSck,
    RadioMiso,
    RadioMosi,
    RadioNss,
    RtdSck,
    RtdMiso,
    RtdMosi,
    RtdCs,
    Ntc100k0,
    Ntc100k1,
    Ntc10k,
    Ph,
    Conductivity,
    Hds10,
    BatterySense,
    SoilHumidity,
    ConfigLed,
    Led1,
    Led2,
    FieldBusRx,
    FieldBusTx,
    RailLow,
    RailHigh,
    Flow,
    ConfigButton,
}

impl PinId {
    #[must_use]
    pub const fn as_index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        if index < BOARD_PINS.len() {
            Some(BOARD_PINS[index].id)
        } else {
            None
        }
    }

    #[must_use]
    pub const fn role(self) -> PinRole {
        pin_by_id(self).role
    }
}

impl fmt::Display for PinId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(pin_by_id(*self).name)
    }
}

/// Static metadata for one board pin.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct BoardPin {
    pub id: PinId,
    pub name: &'static str,
    pub role: PinRole,
}

impl BoardPin {
    const fn new(id: PinId, name: &'static str, role: PinRole) -> Self {
        Self { id, name, role }
    }
}

pub const BOARD_PIN_COUNT: usize = 34;

/// Every pin the sleep path touches, indexed by [`PinId::as_index`].
pub const BOARD_PINS: [BoardPin; BOARD_PIN_COUNT] = [
    BoardPin::new(PinId::OneWire, "ONE_WIRE", PinRole::Quiesce),
    BoardPin::new(PinId::I2cScl, "I2C_SCL", PinRole::Quiesce),
    BoardPin::new(PinId::I2cSda, "I2C_SDA", PinRole::Quiesce),
    BoardPin::new(PinId::Serial1Rx, "SERIAL1_RX", PinRole::Quiesce),
    BoardPin::new(PinId::Serial1Tx, "SERIAL1_TX", PinRole::Quiesce),
    BoardPin::new(PinId::BatteryControl, "BATT_CTRL", PinRole::Quiesce),
    BoardPin::new(PinId::RadioReset, "LORA_RST", PinRole::Quiesce),
    BoardPin::new(PinId::RadioBusy, "LORA_BUSY", PinRole::Quiesce),
    BoardPin::new(PinId::RadioDio1, "LORA_DIO1", PinRole::Quiesce),
    BoardPin::new(PinId::RadioSck, "LORA_SCK", PinRole::Quiesce),
    BoardPin::new(PinId::RadioMiso, "LORA_MISO", PinRole::Quiesce),
    BoardPin::new(PinId::RadioMosi, "LORA_MOSI", PinRole::Quiesce),
    BoardPin::new(PinId::RadioNss, "LORA_NSS", PinRole::ChipSelect),
    BoardPin::new(PinId::RtdSck, "RTD_SCK", PinRole::Quiesce),
    BoardPin::new(PinId::RtdMiso, "RTD_MISO", PinRole::Quiesce),
    BoardPin::new(PinId::RtdMosi, "RTD_MOSI", PinRole::Quiesce),
    BoardPin::new(PinId::RtdCs, "RTD_CS", PinRole::ChipSelect),
    BoardPin::new(PinId::Ntc100k0, "NTC100K_0", PinRole::Quiesce),
    BoardPin::new(PinId::Ntc100k1, "NTC100K_1", PinRole::Quiesce),
    BoardPin::new(PinId::Ntc10k, "NTC10K", PinRole::Quiesce),
    BoardPin::new(PinId::Ph, "PH", PinRole::Quiesce),
    BoardPin::new(PinId::Conductivity, "COND", PinRole::Quiesce),
    BoardPin::new(PinId::Hds10, "HDS10", PinRole::Quiesce),
    BoardPin::new(PinId::BatterySense, "BATT_SENSE", PinRole::Quiesce),
    BoardPin::new(PinId::SoilHumidity, "SOILH", PinRole::Quiesce),
    BoardPin::new(PinId::ConfigLed, "CONFIG_LED", PinRole::Quiesce),
    BoardPin::new(PinId::Led1, "LED1", PinRole::Quiesce),
    BoardPin::new(PinId::Led2, "LED2", PinRole::Quiesce),
    BoardPin::new(PinId::FieldBusRx, "MODBUS_RX", PinRole::Quiesce),
    BoardPin::new(PinId::FieldBusTx, "MODBUS_TX", PinRole::Quiesce),
    BoardPin::new(PinId::RailLow, "POWER_3V3", PinRole::Quiesce),
    BoardPin::new(PinId::RailHigh, "POWER_12V", PinRole::Quiesce),
    BoardPin::new(PinId::Flow, "FLOW", PinRole::Quiesce),
    BoardPin::new(PinId::ConfigButton, "CONFIG", PinRole::Wake),
];

/// The pin that wakes the node on a low level.
pub const WAKE_PIN: PinId = PinId::ConfigButton;

#[must_use]
pub const fn pin_by_id(id: PinId) -> BoardPin {
    BOARD_PINS[id.as_index()]
}

/// Pins with `role`, in catalog order.
pub fn pins_with_role(role: PinRole) -> impl Iterator<Item = PinId> {
    BOARD_PINS
        .into_iter()
        .filter(move |pin| pin.role == role)
        .map(|pin| pin.id)
}
