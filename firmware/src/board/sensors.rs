//! Sensor drivers this board can build, and the hardware under them.

use core::cell::RefCell;
use core::ptr;
use core::time::Duration;

use embassy_stm32::Peri;
use embassy_stm32::adc::{Adc, SampleTime, VrefInt};
use embassy_stm32::gpio::Output;
use embassy_stm32::mode::Blocking;
use embassy_stm32::peripherals::{ADC1, PC5};
use embassy_stm32::usart::{UartRx, UartTx};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_time::{Delay, Instant};
use node_core::bus::{FieldBusError, FieldBusTransport};
use node_core::config::SensorConfig;
use node_core::sensors::battery::BatteryMonitor;
use node_core::sensors::env4::Env4;
use node_core::sensors::{Measurement, SensorDriver, SensorFactory, SensorType};

/// Factory-programmed VREFINT reading taken at 3.0 V.
const VREFINT_CAL_ADDR: *const u16 = 0x1FFF_75AA as *const u16;
const VREFINT_CAL_MILLIVOLTS: u32 = 3_000;
const ADC_MAX: u32 = 4_095;

/// Silence that ends a response frame: 3.5 characters at 9600 baud, rounded up.
const INTER_FRAME_GAP: embassy_time::Duration = embassy_time::Duration::from_millis(4);

/// Slave address used when a field-bus entry does not carry one.
const DEFAULT_SLAVE_ADDRESS: u8 = 1;

pub type FieldBusCell = Mutex<NoopRawMutex, RefCell<FieldBusPort>>;

pub type BoardBatteryMonitor = BatteryMonitor<BatteryAdc, Output<'static>, Delay>;

/// Calibrated millivolt samples of the battery divider.
pub struct BatteryAdc {
    adc: Adc<'static, ADC1>,
    vrefint: VrefInt,
    pin: Peri<'static, PC5>,
    calibration: u16,
}

impl BatteryAdc {
    pub fn new(mut adc: Adc<'static, ADC1>, pin: Peri<'static, PC5>) -> Self {
        adc.set_sample_time(SampleTime::CYCLES160_5);
        let vrefint = adc.enable_vrefint();
        // SAFETY: fixed system-memory address, always readable.
        let calibration = unsafe { ptr::read_volatile(VREFINT_CAL_ADDR) };
        Self {
            adc,
            vrefint,
            pin,
            calibration,
        }
    }
}

impl node_core::sensors::battery::BatteryAdc for BatteryAdc {
    fn read_millivolts(&mut self) -> Option<u16> {
        // The first conversion after enabling VREFINT is not settled.
        let _ = self.adc.blocking_read(&mut self.vrefint);
        let reference = u32::from(self.adc.blocking_read(&mut self.vrefint));
        if reference == 0 {
            return None;
        }
        let raw = u32::from(self.adc.blocking_read(&mut self.pin));
        let millivolts =
            VREFINT_CAL_MILLIVOLTS * u32::from(self.calibration) * raw / (reference * ADC_MAX);
        u16::try_from(millivolts).ok()
    }
}

/// RS-485 side of the field bus: a UART plus the transceiver's driver enable.
pub struct FieldBusPort {
    tx: UartTx<'static, Blocking>,
    rx: UartRx<'static, Blocking>,
    driver_enable: Output<'static>,
    open: bool,
}

impl FieldBusPort {
    pub fn new(
        tx: UartTx<'static, Blocking>,
        rx: UartRx<'static, Blocking>,
        driver_enable: Output<'static>,
    ) -> Self {
        Self {
            tx,
            rx,
            driver_enable,
            open: false,
        }
    }

    fn transact(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, FieldBusError> {
        if !self.open {
            return Err(FieldBusError::Timeout);
        }

        // Stale bytes from an earlier exchange would corrupt the frame.
        while self.rx.nb_read().is_ok() {}

        self.driver_enable.set_high();
        let sent = self
            .tx
            .blocking_write(request)
            .and_then(|()| self.tx.blocking_flush());
        self.driver_enable.set_low();
        sent.map_err(|_| FieldBusError::Framing)?;

        let deadline = Instant::now() + to_embassy(timeout);
        let mut len = 0;
        let mut last_byte = Instant::now();
        loop {
            // Line errors drop the byte; the CRC check then rejects the frame.
            if let Ok(byte) = self.rx.nb_read() {
                let slot = response.get_mut(len).ok_or(FieldBusError::Framing)?;
                *slot = byte;
                len += 1;
                last_byte = Instant::now();
                continue;
            }
            let now = Instant::now();
            if len > 0 && now - last_byte >= INTER_FRAME_GAP {
                return Ok(len);
            }
            if now >= deadline {
                return Err(FieldBusError::Timeout);
            }
        }
    }
}

/// Handle to the one field-bus port, shared by every slave on it.
#[derive(Copy, Clone)]
pub struct SharedFieldBus(&'static FieldBusCell);

impl SharedFieldBus {
    pub fn new(cell: &'static FieldBusCell) -> Self {
        Self(cell)
    }

    pub fn open(self) {
        self.0.lock(|port| {
            let mut port = port.borrow_mut();
            port.driver_enable.set_low();
            port.open = true;
        });
    }

    pub fn close(self) {
        self.0.lock(|port| {
            let mut port = port.borrow_mut();
            port.driver_enable.set_low();
            port.open = false;
        });
    }
}

impl FieldBusTransport for SharedFieldBus {
    fn transact(
        &mut self,
        request: &[u8],
        response: &mut [u8],
        timeout: Duration,
    ) -> Result<usize, FieldBusError> {
        self.0
            .lock(|port| port.borrow_mut().transact(request, response, timeout))
    }
}

pub fn to_embassy(duration: Duration) -> embassy_time::Duration {
    embassy_time::Duration::from_millis(u64::try_from(duration.as_millis()).unwrap_or(u64::MAX))
}

/// Drivers present on this board.
pub enum BoardSensor {
    Battery(BoardBatteryMonitor),
    Env4(Env4<SharedFieldBus>),
}

impl SensorDriver for BoardSensor {
    fn begin(&mut self) -> bool {
        match self {
            BoardSensor::Battery(sensor) => sensor.begin(),
            BoardSensor::Env4(sensor) => sensor.begin(),
        }
    }

    fn read(&mut self) -> Measurement {
        match self {
            BoardSensor::Battery(sensor) => sensor.read(),
            BoardSensor::Env4(sensor) => sensor.read(),
        }
    }
}

/// Builds the battery monitor and field-bus probes. Other models have no
/// driver on this board and are reported unsupported.
pub struct BoardSensors {
    battery: Option<BoardBatteryMonitor>,
    field_bus: SharedFieldBus,
}

impl BoardSensors {
    pub fn new(battery: BoardBatteryMonitor, field_bus: SharedFieldBus) -> Self {
        Self {
            battery: Some(battery),
            field_bus,
        }
    }
}

impl SensorFactory for BoardSensors {
    type Sensor = BoardSensor;

    fn build(&mut self, sensor_type: SensorType, config: &SensorConfig) -> Option<Self::Sensor> {
        match sensor_type {
            SensorType::Battery => self.battery.take().map(BoardSensor::Battery),
            SensorType::Env4 => Some(BoardSensor::Env4(Env4::new(
                self.field_bus,
                config.address.unwrap_or(DEFAULT_SLAVE_ADDRESS),
            ))),
            _ => None,
        }
    }
}
