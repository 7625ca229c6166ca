#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use node_core::bus::{BUS_KIND_COUNT, BusHardware, BusKind};
use node_core::config::{
    ConfigMode, ConfigStore, LoraConfig, NodeId, SensorCategory, SensorConfig, SensorTable,
    bounded, defaults,
};
use node_core::power::{RAIL_COUNT, RailDriver, RailId};
use node_core::sensors::{Measurement, SensorDriver, SensorFactory, SensorType};
use node_core::session::{
    Activation, Clock, JoinCredentials, LorawanNode, NONCES_LEN, NonceBlock, NonceStore,
    RadioStatus, SESSION_LEN, SessionBuffer, SessionManager,
};
use node_core::sleep::{
    PinId, RETAINED_IMAGE_LEN, RetainedImage, RetainedMemory, SleepPlatform, WakeFlags,
};
use node_core::telemetry::{EventRecord, EventSink};
use node_core::{Board, BoardParts, CycleReport, DutyCycle};

pub const JOIN_REJECTED: RadioStatus = RadioStatus(-1116);
pub const SESSION_REJECTED: RadioStatus = RadioStatus(-1120);
pub const TX_FAILED: RadioStatus = RadioStatus(-1109);
pub const NETWORK_EPOCH: u32 = 1_750_000_000;

/// Radio-side events in the order the simulated network saw them.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum RadioOp {
    Begin,
    RestoreNonces,
    RestoreSession(bool),
    Join(bool),
    NoncesStored,
    DataRate(u8),
    Adr(bool),
    TimeRequest,
    Exchange,
    Uplink(String),
    Sleep,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum SleepOp {
    Float(PinId),
    High(PinId),
    Hold(PinId, bool),
    WakeInput(PinId),
    FlushLog,
    ShortRangeOff,
    ArmTimer(u32),
    ArmPin(PinId),
    DeepSleep,
    RetainedWritten,
}

/// Everything that outlives a single simulated boot.
pub struct World {
    // Board
    pub rails: [bool; RAIL_COUNT],
    pub rail_switch_ons: [u32; RAIL_COUNT],
    pub bus_starts: [u32; BUS_KIND_COUNT],
    pub bus_stops: [u32; BUS_KIND_COUNT],
    pub absent_sensors: Vec<&'static str>,
    pub begun: Vec<String>,
    pub elapsed_ms: u64,

    // Radio and network
    pub radio_broken: bool,
    pub joins_to_reject: u32,
    pub join_attempts: u32,
    pub network_session: Option<u8>,
    pub next_session_id: u8,
    pub answers_time: bool,
    pub send_fails: bool,
    pub radio_ops: Vec<RadioOp>,

    // Persistence
    pub nvs_nonces: Option<NonceBlock>,
    pub store_initialized: bool,
    pub store_reads: u32,
    pub store_tables: [Vec<SensorConfig>; 3],
    pub store_lora: LoraConfig,
    pub store_interval_s: u32,
    pub retained: Option<RetainedImage>,
    pub clock: Option<u32>,
    pub clock_frozen: bool,

    // Wake and sleep
    pub wake_flags: WakeFlags,
    pub config_button_held: bool,
    pub config_sessions: u32,
    pub sleep_ops: Vec<SleepOp>,
    pub log_lines: Vec<String>,
}

pub type Shared = Rc<RefCell<World>>;

impl World {
    /// A board fresh from the factory: empty store, no retained memory.
    pub fn factory_new() -> Shared {
        Rc::new(RefCell::new(World {
            rails: [false; RAIL_COUNT],
            rail_switch_ons: [0; RAIL_COUNT],
            bus_starts: [0; BUS_KIND_COUNT],
            bus_stops: [0; BUS_KIND_COUNT],
            absent_sensors: Vec::new(),
            begun: Vec::new(),
            elapsed_ms: 0,
            radio_broken: false,
            joins_to_reject: 0,
            join_attempts: 0,
            network_session: None,
            next_session_id: 1,
            answers_time: true,
            send_fails: false,
            radio_ops: Vec::new(),
            nvs_nonces: None,
            store_initialized: false,
            store_reads: 0,
            store_tables: [Vec::new(), Vec::new(), Vec::new()],
            store_lora: defaults::lora_config(),
            store_interval_s: 0,
            retained: None,
            clock: None,
            clock_frozen: false,
            wake_flags: WakeFlags::default(),
            config_button_held: false,
            config_sessions: 0,
            sleep_ops: Vec::new(),
            log_lines: Vec::new(),
        }))
    }

    /// Clears per-boot observations so the next cycle can be checked alone.
    pub fn reset_observations(&mut self) {
        self.rail_switch_ons = [0; RAIL_COUNT];
        self.bus_starts = [0; BUS_KIND_COUNT];
        self.bus_stops = [0; BUS_KIND_COUNT];
        self.begun.clear();
        self.radio_ops.clear();
        self.sleep_ops.clear();
        self.log_lines.clear();
        self.store_reads = 0;
        self.join_attempts = 0;
    }

    /// The armed timer fired.
    pub fn wake_by_timer(&mut self) {
        self.reset_observations();
        self.wake_flags = WakeFlags {
            from_standby: true,
            timer: true,
            wake_pin: false,
        };
    }

    /// The configuration button pulled the wake pin low.
    pub fn wake_by_button(&mut self) {
        self.reset_observations();
        self.wake_flags = WakeFlags {
            from_standby: true,
            timer: false,
            wake_pin: true,
        };
    }

    /// Battery swap: retained memory and the clock are lost.
    pub fn power_cycle(&mut self) {
        self.reset_observations();
        self.retained = None;
        self.clock = None;
        self.wake_flags = WakeFlags::default();
    }

    /// Enables the stored sensor `id` in `category`.
    pub fn enable_sensor(&mut self, category: SensorCategory, id: &str) {
        let table = &mut self.store_tables[usize::from(category.to_raw())];
        for entry in table.iter_mut() {
            if entry.id.as_str() == id {
                entry.enabled = true;
            }
        }
    }

    pub fn uplinks(&self) -> Vec<String> {
        self.radio_ops
            .iter()
            .filter_map(|op| match op {
                RadioOp::Uplink(text) => Some(text.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn position(&self, op: &RadioOp) -> Option<usize> {
        self.radio_ops.iter().position(|seen| seen == op)
    }

    pub fn count(&self, predicate: impl Fn(&RadioOp) -> bool) -> usize {
        self.radio_ops.iter().filter(|op| predicate(op)).count()
    }

    pub fn sleep_position(&self, op: &SleepOp) -> Option<usize> {
        self.sleep_ops.iter().position(|seen| seen == op)
    }
}

pub struct SimBoard;

impl Board for SimBoard {
    type Rails = SimRails;
    type Buses = SimBuses;
    type Sensors = SimSensors;
    type Radio = SimRadio;
    type Nonces = SimNonces;
    type Clock = SimClock;
    type Store = SimStore;
    type ConfigMode = SimConfigMode;
    type Sleep = SimSleep;
    type Memory = SimMemory;
    type Log = SimLog;
    type Delay = SimDelay;
}

pub fn parts(world: &Shared) -> BoardParts<SimBoard> {
    BoardParts {
        rails: SimRails(world.clone()),
        buses: SimBuses(world.clone()),
        sensors: SimSensors(world.clone()),
        radio: SimRadio::new(world.clone()),
        nonces: SimNonces(world.clone()),
        clock: SimClock(world.clone()),
        store: SimStore(world.clone()),
        config_mode: SimConfigMode(world.clone()),
        sleep: SimSleep(world.clone()),
        memory: SimMemory(world.clone()),
        log: SimLog(world.clone()),
        delay: SimDelay(world.clone()),
        join_attempt_limit: None,
    }
}

/// Boots the board once and runs a full cycle.
pub fn run_cycle(world: &Shared) -> CycleReport {
    DutyCycle::new(parts(world)).run()
}

pub type SimSession = SessionManager<SimRadio, SimNonces, SimClock, SimDelay>;

/// A session manager over fresh radio state, outside of a full cycle.
pub fn session_manager(world: &Shared) -> SimSession {
    SessionManager::new(
        SimRadio::new(world.clone()),
        SimNonces(world.clone()),
        SimClock(world.clone()),
        SimDelay(world.clone()),
    )
}

pub struct SimRails(Shared);

impl RailDriver for SimRails {
    fn set_rail(&mut self, rail: RailId, on: bool) {
        let mut world = self.0.borrow_mut();
        let index = rail.as_index();
        if on && !world.rails[index] {
            world.rail_switch_ons[index] += 1;
        }
        world.rails[index] = on;
    }
}

pub struct SimBuses(Shared);

impl BusHardware for SimBuses {
    fn start(&mut self, kind: BusKind) {
        self.0.borrow_mut().bus_starts[kind.as_index()] += 1;
    }

    fn stop(&mut self, kind: BusKind) {
        self.0.borrow_mut().bus_stops[kind.as_index()] += 1;
    }
}

pub struct SimSensor {
    world: Shared,
    id: String,
    sensor_type: SensorType,
}

impl SensorDriver for SimSensor {
    fn begin(&mut self) -> bool {
        let mut world = self.world.borrow_mut();
        world.begun.push(self.id.clone());
        let bus_up = world.bus_starts[self.sensor_type.bus().as_index()] > 0;
        let rail_up = match self.sensor_type.power().rail() {
            Some(rail) => world.rails[rail.as_index()],
            None => true,
        };
        bus_up && rail_up && !world.absent_sensors.contains(&self.id.as_str())
    }

    fn read(&mut self) -> Measurement {
        match self.sensor_type {
            SensorType::Battery => Measurement::scalar(3.912),
            SensorType::Sht30 | SensorType::Sht40 => Measurement::multi(&[21.5, 48.25]),
            SensorType::Bme680 | SensorType::Bme280 => {
                Measurement::multi(&[22.125, 51.0, 1013.25])
            }
            SensorType::Env4 => Measurement::multi(&[60.5, 19.75, 1009.5, 1200.0]),
            _ => Measurement::scalar(12.0),
        }
    }
}

pub struct SimSensors(Shared);

impl SensorFactory for SimSensors {
    type Sensor = SimSensor;

    fn build(&mut self, sensor_type: SensorType, config: &SensorConfig) -> Option<SimSensor> {
        Some(SimSensor {
            world: self.0.clone(),
            id: String::from(config.id.as_str()),
            sensor_type,
        })
    }
}

/// Volatile transceiver state; lost at every deep sleep.
pub struct SimRadio {
    world: Shared,
    session: Option<u8>,
    restored: bool,
    nonces: NonceBlock,
    time_pending: bool,
    time_answer: Option<u32>,
}

impl SimRadio {
    fn new(world: Shared) -> Self {
        Self {
            world,
            session: None,
            restored: false,
            nonces: [0; NONCES_LEN],
            time_pending: false,
            time_answer: None,
        }
    }

    fn op(&self, op: RadioOp) {
        self.world.borrow_mut().radio_ops.push(op);
    }
}

impl LorawanNode for SimRadio {
    fn begin(&mut self) -> Result<(), RadioStatus> {
        self.op(RadioOp::Begin);
        if self.world.borrow().radio_broken {
            Err(RadioStatus(-2))
        } else {
            Ok(())
        }
    }

    fn begin_otaa(&mut self, _credentials: &JoinCredentials) -> Result<(), RadioStatus> {
        Ok(())
    }

    fn restore_nonces(&mut self, nonces: &NonceBlock) -> Result<(), RadioStatus> {
        self.op(RadioOp::RestoreNonces);
        self.nonces = *nonces;
        Ok(())
    }

    fn restore_session(&mut self, session: &SessionBuffer) -> Result<(), RadioStatus> {
        let id = session[0];
        let consistent = session.iter().all(|byte| *byte == id);
        let accepted = consistent && self.world.borrow().network_session == Some(id);
        self.op(RadioOp::RestoreSession(accepted));
        if accepted {
            self.session = Some(id);
            self.restored = true;
            Ok(())
        } else {
            Err(SESSION_REJECTED)
        }
    }

    fn activate(&mut self) -> Activation {
        if self.restored {
            return Activation::SessionRestored;
        }
        let mut world = self.world.borrow_mut();
        world.join_attempts += 1;
        if world.joins_to_reject > 0 {
            world.joins_to_reject -= 1;
            world.radio_ops.push(RadioOp::Join(false));
            return Activation::Failed(JOIN_REJECTED);
        }
        let id = world.next_session_id;
        world.next_session_id = world.next_session_id.wrapping_add(1).max(1);
        world.network_session = Some(id);
        world.radio_ops.push(RadioOp::Join(true));
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

    fn set_datarate(&mut self, datarate: u8) -> Result<(), RadioStatus> {
        self.op(RadioOp::DataRate(datarate));
        Ok(())
    }

    fn set_adr(&mut self, enabled: bool) {
        self.op(RadioOp::Adr(enabled));
    }

    fn request_device_time(&mut self) -> bool {
        self.op(RadioOp::TimeRequest);
        self.time_pending = true;
        true
    }

    fn send_receive(&mut self, _payload: &[u8], _port: u8) -> Result<(), RadioStatus> {
        self.op(RadioOp::Exchange);
        let answers = self.world.borrow().answers_time;
        self.time_answer = (self.time_pending && answers).then_some(NETWORK_EPOCH);
        self.time_pending = false;
        Ok(())
    }

    fn send(&mut self, payload: &[u8], _port: u8) -> Result<(), RadioStatus> {
        let text = String::from_utf8_lossy(payload).into_owned();
        self.op(RadioOp::Uplink(text));
        if self.world.borrow().send_fails {
            Err(TX_FAILED)
        } else {
            Ok(())
        }
    }

    fn device_time(&mut self) -> Option<u32> {
        self.time_answer.take()
    }

    fn sleep(&mut self) {
        self.op(RadioOp::Sleep);
    }
}

pub struct SimNonces(Shared);

impl NonceStore for SimNonces {
    fn load_nonces(&mut self) -> Option<NonceBlock> {
        self.0.borrow().nvs_nonces
    }

    fn store_nonces(&mut self, nonces: &NonceBlock) {
        let mut world = self.0.borrow_mut();
        world.nvs_nonces = Some(*nonces);
        world.radio_ops.push(RadioOp::NoncesStored);
    }
}

pub struct SimClock(Shared);

impl Clock for SimClock {
    fn now(&mut self) -> Option<u32> {
        self.0.borrow().clock
    }

    fn set(&mut self, epoch: u32) {
        let mut world = self.0.borrow_mut();
        if !world.clock_frozen || world.clock.is_none() {
            world.clock = Some(epoch);
        }
    }
}

pub struct SimStore(Shared);

impl ConfigStore for SimStore {
    fn is_initialized(&mut self) -> bool {
        self.0.borrow().store_initialized
    }

    fn initialize_defaults(&mut self) {
        let mut world = self.0.borrow_mut();
        world.store_initialized = true;
        world.store_interval_s = defaults::SLEEP_INTERVAL_S;
        world.store_lora = defaults::lora_config();
        for category in SensorCategory::ALL {
            world.store_tables[usize::from(category.to_raw())] =
                defaults::sensor_table(category).into_iter().collect();
        }
    }

    fn device_id(&mut self) -> NodeId {
        self.0.borrow_mut().store_reads += 1;
        bounded(defaults::DEVICE_ID)
    }

    fn station_id(&mut self) -> NodeId {
        self.0.borrow_mut().store_reads += 1;
        bounded(defaults::STATION_ID)
    }

    fn sleep_interval_s(&mut self) -> u32 {
        let mut world = self.0.borrow_mut();
        world.store_reads += 1;
        world.store_interval_s
    }

    fn sensors(&mut self, category: SensorCategory) -> SensorTable {
        let mut world = self.0.borrow_mut();
        world.store_reads += 1;
        world.store_tables[usize::from(category.to_raw())]
            .iter()
            .cloned()
            .collect()
    }

    fn lora_config(&mut self) -> LoraConfig {
        let mut world = self.0.borrow_mut();
        world.store_reads += 1;
        world.store_lora.clone()
    }
}

pub struct SimConfigMode(Shared);

impl ConfigMode for SimConfigMode {
    fn check_config_mode(&mut self) -> bool {
        self.0.borrow().config_button_held
    }

    fn run_config_mode(&mut self) {
        self.0.borrow_mut().config_sessions += 1;
    }
}

pub struct SimSleep(Shared);

impl SimSleep {
    fn op(&self, op: SleepOp) {
        self.0.borrow_mut().sleep_ops.push(op);
    }
}

impl SleepPlatform for SimSleep {
    fn take_wake_flags(&mut self) -> WakeFlags {
        core::mem::take(&mut self.0.borrow_mut().wake_flags)
    }

    fn set_high_impedance(&mut self, pin: PinId) {
        self.op(SleepOp::Float(pin));
    }

    fn drive_high(&mut self, pin: PinId) {
        self.op(SleepOp::High(pin));
    }

    fn set_hold(&mut self, pin: PinId, hold: bool) {
        self.op(SleepOp::Hold(pin, hold));
    }

    fn configure_wake_input(&mut self, pin: PinId) {
        self.op(SleepOp::WakeInput(pin));
    }

    fn flush_log(&mut self) {
        self.op(SleepOp::FlushLog);
    }

    fn stop_short_range_radio(&mut self) {
        self.op(SleepOp::ShortRangeOff);
    }

    fn arm_timer_wake(&mut self, seconds: u32) {
        self.op(SleepOp::ArmTimer(seconds));
    }

    fn arm_pin_wake(&mut self, pin: PinId) {
        self.op(SleepOp::ArmPin(pin));
    }

    fn enter_deep_sleep(&mut self) {
        self.op(SleepOp::DeepSleep);
    }
}

pub struct SimMemory(Shared);

impl RetainedMemory for SimMemory {
    fn read(&mut self, image: &mut RetainedImage) {
        *image = self
            .0
            .borrow()
            .retained
            .unwrap_or([0xFF; RETAINED_IMAGE_LEN]);
    }

    fn write(&mut self, image: &RetainedImage) {
        let mut world = self.0.borrow_mut();
        world.retained = Some(*image);
        world.sleep_ops.push(SleepOp::RetainedWritten);
    }
}

pub struct SimLog(Shared);

impl EventSink for SimLog {
    fn emit(&mut self, record: &EventRecord) {
        let line = format!("{}", record.event);
        self.0.borrow_mut().log_lines.push(line);
    }
}

#[derive(Clone)]
pub struct SimDelay(Shared);

impl DelayNs for SimDelay {
    fn delay_ns(&mut self, ns: u32) {
        self.0.borrow_mut().elapsed_ms += u64::from(ns / 1_000_000);
    }

    fn delay_ms(&mut self, ms: u32) {
        self.0.borrow_mut().elapsed_ms += u64::from(ms);
    }
}
