//! Host bench: simulated rails, sensors, radio, network and retained memory
//! shared between successive boots of the node.

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use node_core::bus::{BusHardware, BusKind};
use node_core::config::{
    ConfigMode, ConfigStore, LoraConfig, NodeId, SensorCategory, SensorConfig, SensorTable,
    bounded, defaults,
};
use node_core::power::{RAIL_COUNT, RailDriver, RailId};
use node_core::sensors::{Measurement, SensorDriver, SensorFactory, SensorType};
use node_core::session::{
    Activation, Clock, JoinCredentials, LorawanNode, NONCES_LEN, NonceBlock, NonceStore,
    RadioStatus, SESSION_LEN, SessionBuffer,
};
use node_core::sleep::{
    PinId, RETAINED_IMAGE_LEN, RetainedImage, RetainedMemory, SleepPlatform, WakeFlags,
};
use node_core::telemetry::{EventRecord, EventSink};
use node_core::{Board, BoardParts, CycleReport, DutyCycle};

/// Network time at the start of every bench run.
pub const NETWORK_EPOCH: u32 = 1_750_000_000;

const SESSION_MISMATCH: RadioStatus = RadioStatus(-1120);

/// State that outlives a single boot.
pub struct BenchState {
    /// Virtual milliseconds since the bench started.
    pub now_ms: u64,
    pub rails: [bool; RAIL_COUNT],
    pub absent_sensors: Vec<String>,
    pub cycle: u32,

    pub network_session: Option<u8>,
    pub next_session_id: u8,
    pub answers_time: bool,
    pub uplinks: Vec<String>,

    pub nvs_nonces: Option<NonceBlock>,
    pub store_initialized: bool,
    pub store_tables: [SensorTable; 3],
    pub store_lora: LoraConfig,
    pub store_interval_s: u32,
    pub retained: Option<RetainedImage>,
    /// Seconds on the real-time clock; runs through deep sleep.
    pub rtc: Option<u32>,

    pub wake_flags: WakeFlags,
    pub armed_timer_s: Option<u32>,
    pub lines: Vec<(u64, String)>,
}

pub type Shared = Rc<RefCell<BenchState>>;

/// A node on the bench together with its simulated surroundings.
pub struct Bench {
    state: Shared,
}

impl Bench {
    /// Fresh from the factory: empty store, cold retained memory, unset clock.
    pub fn factory_new() -> Self {
        let state = BenchState {
            now_ms: 0,
            rails: [false; RAIL_COUNT],
            absent_sensors: Vec::new(),
            cycle: 0,
            network_session: None,
            next_session_id: 1,
            answers_time: true,
            uplinks: Vec::new(),
            nvs_nonces: None,
            store_initialized: false,
            store_tables: [SensorTable::new(), SensorTable::new(), SensorTable::new()],
            store_lora: defaults::lora_config(),
            store_interval_s: 0,
            retained: None,
            rtc: None,
            wake_flags: WakeFlags::default(),
            armed_timer_s: None,
            lines: Vec::new(),
        };
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn state(&self) -> std::cell::RefMut<'_, BenchState> {
        self.state.borrow_mut()
    }

    /// Boots the node once. If it went to sleep in the previous cycle the
    /// armed timer is treated as having fired.
    pub fn boot(&mut self) -> CycleReport {
        {
            let mut state = self.state.borrow_mut();
            state.cycle += 1;
            if let Some(seconds) = state.armed_timer_s.take() {
                state.now_ms += u64::from(seconds) * 1_000;
                state.rtc = state.rtc.map(|rtc| rtc.wrapping_add(seconds));
                state.wake_flags = WakeFlags {
                    from_standby: true,
                    timer: true,
                    wake_pin: false,
                };
            }
        }
        DutyCycle::new(self.parts()).run()
    }

    /// Drains log lines emitted since the last call.
    pub fn take_lines(&mut self) -> Vec<(u64, String)> {
        std::mem::take(&mut self.state.borrow_mut().lines)
    }

    fn parts(&self) -> BoardParts<BenchBoard> {
        let state = &self.state;
        BoardParts {
            rails: BenchRails(state.clone()),
            buses: BenchBuses(state.clone()),
            sensors: BenchSensors(state.clone()),
            radio: BenchRadio::new(state.clone()),
            nonces: BenchNonces(state.clone()),
            clock: BenchClock(state.clone()),
            store: BenchStore(state.clone()),
            config_mode: BenchConfigMode,
            sleep: BenchSleep(state.clone()),
            memory: BenchMemory(state.clone()),
            log: BenchLog(state.clone()),
            delay: BenchDelay(state.clone()),
            join_attempt_limit: None,
        }
    }
}

pub struct BenchBoard;

impl Board for BenchBoard {
    type Rails = BenchRails;
    type Buses = BenchBuses;
    type Sensors = BenchSensors;
    type Radio = BenchRadio;
    type Nonces = BenchNonces;
    type Clock = BenchClock;
    type Store = BenchStore;
    type ConfigMode = BenchConfigMode;
    type Sleep = BenchSleep;
    type Memory = BenchMemory;
    type Log = BenchLog;
    type Delay = BenchDelay;
}

fn note(state: &Shared, line: String) {
    let mut state = state.borrow_mut();
    let at = state.now_ms;
    state.lines.push((at, line));
}

pub struct BenchRails(Shared);

impl RailDriver for BenchRails {
    fn set_rail(&mut self, rail: RailId, on: bool) {
        self.0.borrow_mut().rails[rail.as_index()] = on;
    }
}

pub struct BenchBuses(Shared);

impl BusHardware for BenchBuses {
    fn start(&mut self, kind: BusKind) {
        note(&self.0, format!("hw: {} up", kind));
    }

    fn stop(&mut self, kind: BusKind) {
        note(&self.0, format!("hw: {} down", kind));
    }
}

pub struct BenchSensor {
    state: Shared,
    id: String,
    sensor_type: SensorType,
}

impl SensorDriver for BenchSensor {
    fn begin(&mut self) -> bool {
        let state = self.state.borrow();
        let powered = self
            .sensor_type
            .power()
            .rail()
            .is_none_or(|rail| state.rails[rail.as_index()]);
        powered && !state.absent_sensors.contains(&self.id)
    }

    #[allow(clippy::cast_precision_loss)]
    fn read(&mut self) -> Measurement {
        // Slow drift so successive uplinks differ.
        let drift = (self.state.borrow().cycle % 10) as f32 * 0.125;
        match self.sensor_type {
            SensorType::Battery => Measurement::scalar(3.95 - drift * 0.01),
            SensorType::Sht30 | SensorType::Sht40 => Measurement::multi(&[20.5 + drift, 55.0]),
            SensorType::Bme680 | SensorType::Bme280 => {
                Measurement::multi(&[21.0 + drift, 52.5, 1012.75])
            }
            SensorType::Co2 => Measurement::multi(&[415.0, 21.0 + drift, 50.0]),
            SensorType::Env4 => Measurement::multi(&[58.0, 19.5 + drift, 1010.0, 900.0]),
            SensorType::Veml7700 => Measurement::scalar(320.0),
            SensorType::Ph => Measurement::scalar(6.8),
            _ => Measurement::scalar(18.25 + drift),
        }
    }
}

pub struct BenchSensors(Shared);

impl SensorFactory for BenchSensors {
    type Sensor = BenchSensor;

    fn build(&mut self, sensor_type: SensorType, config: &SensorConfig) -> Option<BenchSensor> {
        Some(BenchSensor {
            state: self.0.clone(),
            id: String::from(config.id.as_str()),
            sensor_type,
        })
    }
}

/// Transceiver whose MAC state is lost at every boot, like the real one.
pub struct BenchRadio {
    state: Shared,
    session: Option<u8>,
    restored: bool,
    nonces: NonceBlock,
    time_pending: bool,
    time_answer: Option<u32>,
}

impl BenchRadio {
    fn new(state: Shared) -> Self {
        Self {
            state,
            session: None,
            restored: false,
            nonces: [0; NONCES_LEN],
            time_pending: false,
            time_answer: None,
        }
    }

    fn network_time(&self) -> u32 {
        let elapsed_s = self.state.borrow().now_ms / 1_000;
        NETWORK_EPOCH.wrapping_add(u32::try_from(elapsed_s).unwrap_or(u32::MAX))
    }
}

impl LorawanNode for BenchRadio {
    fn begin(&mut self) -> Result<(), RadioStatus> {
        Ok(())
    }

    fn begin_otaa(&mut self, _credentials: &JoinCredentials) -> Result<(), RadioStatus> {
        Ok(())
    }

    fn restore_nonces(&mut self, nonces: &NonceBlock) -> Result<(), RadioStatus> {
        self.nonces = *nonces;
        Ok(())
    }

    fn restore_session(&mut self, session: &SessionBuffer) -> Result<(), RadioStatus> {
        let id = session[0];
        if self.state.borrow().network_session == Some(id) {
            self.session = Some(id);
            self.restored = true;
            Ok(())
        } else {
            Err(SESSION_MISMATCH)
        }
    }

    fn activate(&mut self) -> Activation {
        if self.restored {
            return Activation::SessionRestored;
        }
        let mut state = self.state.borrow_mut();
        state.now_ms += 6_000;
        let id = state.next_session_id;
        state.next_session_id = state.next_session_id.wrapping_add(1).max(1);
        state.network_session = Some(id);
        self.session = Some(id);
        self.nonces = [id; NONCES_LEN];
        Activation::NewSession
    }

    fn nonces(&self) -> NonceBlock {
        self.nonces
    }

    fn session(&self) -> SessionBuffer {
        [self.session.unwrap_or(0); SESSION_LEN]
    }

    fn set_datarate(&mut self, _datarate: u8) -> Result<(), RadioStatus> {
        Ok(())
    }

    fn set_adr(&mut self, _enabled: bool) {}

    fn request_device_time(&mut self) -> bool {
        self.time_pending = true;
        true
    }

    fn send_receive(&mut self, _payload: &[u8], _port: u8) -> Result<(), RadioStatus> {
        self.state.borrow_mut().now_ms += 2_000;
        let answers = self.state.borrow().answers_time;
        let time = self.network_time();
        self.time_answer = (self.time_pending && answers).then_some(time);
        self.time_pending = false;
        Ok(())
    }

    fn send(&mut self, payload: &[u8], _port: u8) -> Result<(), RadioStatus> {
        let text = String::from_utf8_lossy(payload).into_owned();
        let mut state = self.state.borrow_mut();
        state.now_ms += 400;
        state.uplinks.push(text);
        Ok(())
    }

    fn device_time(&mut self) -> Option<u32> {
        self.time_answer.take()
    }

    fn sleep(&mut self) {}
}

pub struct BenchNonces(Shared);

impl NonceStore for BenchNonces {
    fn load_nonces(&mut self) -> Option<NonceBlock> {
        self.0.borrow().nvs_nonces
    }

    fn store_nonces(&mut self, nonces: &NonceBlock) {
        self.0.borrow_mut().nvs_nonces = Some(*nonces);
    }
}

pub struct BenchClock(Shared);

impl Clock for BenchClock {
    fn now(&mut self) -> Option<u32> {
        self.0.borrow().rtc
    }

    fn set(&mut self, epoch: u32) {
        self.0.borrow_mut().rtc = Some(epoch);
    }
}

pub struct BenchStore(Shared);

impl ConfigStore for BenchStore {
    fn is_initialized(&mut self) -> bool {
        self.0.borrow().store_initialized
    }

    fn initialize_defaults(&mut self) {
        let mut state = self.0.borrow_mut();
        state.store_initialized = true;
        state.store_interval_s = defaults::SLEEP_INTERVAL_S;
        state.store_lora = defaults::lora_config();
        for category in SensorCategory::ALL {
            state.store_tables[usize::from(category.to_raw())] = defaults::sensor_table(category);
        }
    }

    fn device_id(&mut self) -> NodeId {
        bounded(defaults::DEVICE_ID)
    }

    fn station_id(&mut self) -> NodeId {
        bounded(defaults::STATION_ID)
    }

    fn sleep_interval_s(&mut self) -> u32 {
        self.0.borrow().store_interval_s
    }

    fn sensors(&mut self, category: SensorCategory) -> SensorTable {
        self.0.borrow().store_tables[usize::from(category.to_raw())].clone()
    }

    fn lora_config(&mut self) -> LoraConfig {
        self.0.borrow().store_lora.clone()
    }
}

/// Nobody holds the button on the bench.
pub struct BenchConfigMode;

impl ConfigMode for BenchConfigMode {
    fn check_config_mode(&mut self) -> bool {
        false
    }

    fn run_config_mode(&mut self) {}
}

pub struct BenchSleep(Shared);

impl SleepPlatform for BenchSleep {
    fn take_wake_flags(&mut self) -> WakeFlags {
        std::mem::take(&mut self.0.borrow_mut().wake_flags)
    }

    fn set_high_impedance(&mut self, _pin: PinId) {}

    fn drive_high(&mut self, _pin: PinId) {}

    fn set_hold(&mut self, _pin: PinId, _hold: bool) {}

    fn configure_wake_input(&mut self, _pin: PinId) {}

    fn flush_log(&mut self) {}

    fn stop_short_range_radio(&mut self) {}

    fn arm_timer_wake(&mut self, seconds: u32) {
        self.0.borrow_mut().armed_timer_s = Some(seconds);
    }

    fn arm_pin_wake(&mut self, _pin: PinId) {}

    fn enter_deep_sleep(&mut self) {
        note(&self.0, String::from("hw: standby"));
    }
}

pub struct BenchMemory(Shared);

impl RetainedMemory for BenchMemory {
    fn read(&mut self, image: &mut RetainedImage) {
        *image = self
            .0
            .borrow()
            .retained
            .unwrap_or([0; RETAINED_IMAGE_LEN]);
    }

    fn write(&mut self, image: &RetainedImage) {
        self.0.borrow_mut().retained = Some(*image);
    }
}

pub struct BenchLog(Shared);

impl EventSink for BenchLog {
    fn emit(&mut self, record: &EventRecord) {
        note(&self.0, format!("#{} {}", record.id, record.event));
    }
}

#[derive(Clone)]
pub struct BenchDelay(Shared);

impl DelayNs for BenchDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().now_ms += u64::from(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().now_ms += u64::from(ms);
    }
}
