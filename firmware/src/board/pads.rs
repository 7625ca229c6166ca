//! Where each catalog pin lands on the STM32G0B1RE.

use embassy_stm32::pac;
use embassy_stm32::pac::gpio::Gpio;
use node_core::sleep::pins::PinId;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Port {
    A,
    B,
    C,
    D,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Pad {
    pub port: Port,
    pub number: u8,
}

impl Pad {
    const fn new(port: Port, number: u8) -> Self {
        Self { port, number }
    }

    pub fn registers(self) -> Gpio {
        match self.port {
            Port::A => pac::GPIOA,
            Port::B => pac::GPIOB,
            Port::C => pac::GPIOC,
            Port::D => pac::GPIOD,
        }
    }

    pub fn index(self) -> usize {
        usize::from(self.number)
    }

    /// Index of the port in the PWR pull-up and pull-down registers.
    pub fn port_index(self) -> usize {
        match self.port {
            Port::A => 0,
            Port::B => 1,
            Port::C => 2,
            Port::D => 3,
        }
    }
}

/// Wake-up line of the configuration button (PC13 is WKUP2).
pub const BUTTON_WAKE_LINE: usize = 1;

#[must_use]
pub const fn pad(pin: PinId) -> Pad {
    use Port::{A, B, C};
    match pin {
        PinId::OneWire => Pad::new(B, 5),
        PinId::I2cScl => Pad::new(B, 8),
        PinId::I2cSda => Pad::new(B, 9),
        PinId::Serial1Rx => Pad::new(A, 10),
        PinId::Serial1Tx => Pad::new(A, 9),
        PinId::BatteryControl => Pad::new(C, 4),
        PinId::RadioReset => Pad::new(B, 0),
        PinId::RadioBusy => Pad::new(B, 1),
        PinId::RadioDio1 => Pad::new(B, 2),
        PinId::RadioSck => Pad::new(A, 5),
        PinId::RadioMiso => Pad::new(A, 6),
        PinId::RadioMosi => Pad::new(A, 7),
        PinId::RadioNss => Pad::new(A, 4),
        PinId::RtdSck => Pad::new(B, 13),
        PinId::RtdMiso => Pad::new(B, 14),
        PinId::RtdMosi => Pad::new(B, 15),
        PinId::RtdCs => Pad::new(B, 12),
        PinId::Ntc100k0 => Pad::new(A, 0),
        PinId::Ntc100k1 => Pad::new(A, 1),
        PinId::Ntc10k => Pad::new(C, 0),
        PinId::Ph => Pad::new(C, 1),
        PinId::Conductivity => Pad::new(C, 2),
        PinId::Hds10 => Pad::new(C, 3),
        PinId::BatterySense => Pad::new(C, 5),
        PinId::SoilHumidity => Pad::new(B, 10),
        PinId::ConfigLed => Pad::new(C, 6),
        PinId::Led1 => Pad::new(C, 7),
        PinId::Led2 => Pad::new(C, 8),
        PinId::FieldBusRx => Pad::new(A, 3),
        PinId::FieldBusTx => Pad::new(A, 2),
        PinId::RailLow => Pad::new(C, 9),
        PinId::RailHigh => Pad::new(C, 10),
        PinId::Flow => Pad::new(C, 11),
        PinId::ConfigButton => Pad::new(C, 13),
    }
}
