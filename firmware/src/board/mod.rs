//! The field node's STM32G0B1RE board: pin assignment and the concrete
//! collaborators behind each core trait.

mod buses;
mod clock;
mod config_mode;
mod flash;
mod modem;
mod pads;
mod sensors;
mod standby;

use core::cell::RefCell;

use embassy_stm32 as hal;
use embassy_stm32::adc::Adc;
use embassy_stm32::flash::Flash;
use embassy_stm32::gpio::{Input, Level, Output, Pull, Speed};
use embassy_stm32::rtc::{Rtc, RtcConfig};
use embassy_stm32::usart::{Config as UartConfig, DataBits, Parity, StopBits, Uart};
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::Delay;
use node_core::bus::{FIELD_BUS_BAUD, FIELD_BUS_FORMAT};
use node_core::power::{GpioRailDriver, RailId, rail_by_id};
use node_core::session::AtModem;
use node_core::sensors::battery::BatteryMonitor;
use node_core::{Board, BoardParts};
use static_cell::StaticCell;

use self::buses::BoardBuses;
use self::clock::RtcClock;
use self::config_mode::ButtonConfigMode;
use self::flash::{FlashCell, FlashConfigStore, FlashNonces};
use self::modem::{MODEM_BAUD, ModemUart};
use self::sensors::{BatteryAdc, BoardSensors, FieldBusCell, FieldBusPort, SharedFieldBus};
use self::standby::{RetainedSram, StandbyPlatform};
use crate::telemetry::ConsoleSink;

static FIELD_BUS: StaticCell<FieldBusCell> = StaticCell::new();
static FLASH: StaticCell<FlashCell> = StaticCell::new();

/// Marker type naming this board's collaborators.
pub struct FieldNodeBoard;

impl Board for FieldNodeBoard {
    type Rails = GpioRailDriver<Output<'static>, Output<'static>>;
    type Buses = BoardBuses;
    type Sensors = BoardSensors;
    type Radio = AtModem<ModemUart>;
    type Nonces = FlashNonces;
    type Clock = RtcClock;
    type Store = FlashConfigStore;
    type ConfigMode = ButtonConfigMode;
    type Sleep = StandbyPlatform;
    type Memory = RetainedSram;
    type Log = ConsoleSink;
    type Delay = Delay;
}

/// Board bring-up failures.
#[derive(Copy, Clone, Debug, defmt::Format)]
pub enum BoardError {
    FieldBusUart,
    ModemUart,
}

/// Clock tree with the LSE feeding the RTC, which keeps time through standby.
pub fn hal_config() -> hal::Config {
    let mut config = hal::Config::default();
    config.rcc.ls = hal::rcc::LsConfig::default_lse();
    config
}

fn rail_pin(pin: hal::Peri<'static, impl hal::gpio::Pin>, rail: RailId) -> Output<'static> {
    // Start with the rail off.
    Output::new(pin, Level::from(!rail_by_id(rail).on_level()), Speed::Low)
}

fn field_bus_config() -> UartConfig {
    let mut config = UartConfig::default();
    config.baudrate = FIELD_BUS_BAUD;
    config.data_bits = match FIELD_BUS_FORMAT.data_bits {
        9 => DataBits::DataBits9,
        _ => DataBits::DataBits8,
    };
    config.parity = match FIELD_BUS_FORMAT.parity {
        node_core::bus::Parity::None => Parity::ParityNone,
        node_core::bus::Parity::Even => Parity::ParityEven,
        node_core::bus::Parity::Odd => Parity::ParityOdd,
    };
    config.stop_bits = if FIELD_BUS_FORMAT.stop_bits == 2 {
        StopBits::STOP2
    } else {
        StopBits::STOP1
    };
    config
}

fn modem_config() -> UartConfig {
    let mut config = UartConfig::default();
    config.baudrate = MODEM_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;
    config
}

/// Claims the peripherals and builds one cycle's worth of parts.
pub fn assemble(p: hal::Peripherals) -> Result<BoardParts<FieldNodeBoard>, BoardError> {
    let delay = Delay;

    let rails = GpioRailDriver::new(
        rail_pin(p.PC9, RailId::Low),
        rail_pin(p.PC10, RailId::High),
    );

    let (field_tx, field_rx) = Uart::new_blocking(p.USART2, p.PA3, p.PA2, field_bus_config())
        .map_err(|_| BoardError::FieldBusUart)?
        .split();
    let field_bus = FIELD_BUS.init(Mutex::new(RefCell::new(FieldBusPort::new(
        field_tx,
        field_rx,
        Output::new(p.PC12, Level::Low, Speed::Low),
    ))));
    let field_bus = SharedFieldBus::new(field_bus);

    let buses = BoardBuses::new(Output::new(p.PB12, Level::Low, Speed::Low), field_bus);

    let battery = BatteryMonitor::new(
        BatteryAdc::new(Adc::new(p.ADC1), p.PC5),
        // Active low; the divider stays open until a reading.
        Output::new(p.PC4, Level::High, Speed::Low),
        delay,
    );
    let sensors = BoardSensors::new(battery, field_bus);

    let (modem_tx, modem_rx) = Uart::new_blocking(p.USART1, p.PA10, p.PA9, modem_config())
        .map_err(|_| BoardError::ModemUart)?
        .split();
    let radio = AtModem::new(ModemUart::new(modem_tx, modem_rx));

    let flash: &'static FlashCell =
        FLASH.init(Mutex::new(RefCell::new(Flash::new_blocking(p.FLASH))));

    let config_mode = ButtonConfigMode::new(
        Input::new(p.PC13, Pull::Up),
        Output::new(p.PC6, Level::Low, Speed::Low),
        delay,
    );

    Ok(BoardParts {
        rails,
        buses,
        sensors,
        radio,
        nonces: FlashNonces::new(flash),
        clock: RtcClock::new(Rtc::new(p.RTC, RtcConfig::default())),
        store: FlashConfigStore::new(flash),
        config_mode,
        sleep: StandbyPlatform::new(),
        memory: RetainedSram::new(),
        log: ConsoleSink::new(),
        delay,
        join_attempt_limit: None,
    })
}
