//! One wake-to-sleep duty cycle.
//!
//! The cycle runs exactly once per boot: classify the wake, bring the board
//! to a known state, optionally divert into configuration mode, acquire,
//! transmit and sleep. Every fatal error ends in the same place, deep sleep,
//! and the next scheduled wake is the retry.

use core::fmt;
use core::num::NonZeroU16;

use embedded_hal::delay::DelayNs;

use crate::bus::{BusHardware, BusInitializer, BusKind};
use crate::config::{ConfigMode, ConfigSource, ConfigStore, defaults, load_config, read_config};
use crate::power::{PowerSequencer, RailDriver};
use crate::sensors::orchestrator::Readings;
use crate::sensors::{BeginReport, SensorFactory, SensorOrchestrator};
use crate::session::{
    Clock, EncodedPayload, LorawanNode, NonceStore, RadioStatus, SendError, SessionManager,
    SessionOutcome, encode_payload,
};
use crate::sleep::{RetainedMemory, RetainedState, SleepController, SleepPlatform, WakeCause};
use crate::telemetry::{EventLog, EventSink, NodeEvent};

/// Epoch the clock is seeded with when it has never been set (2023-01-01T00:00:00Z).
pub const CLOCK_SEED_EPOCH: u32 = 1_672_531_200;

/// Phases of a duty cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CyclePhase {
    Boot,
    HardwareReady,
    ConfigMode,
    SensorsReady,
    Joined,
    Transmitted,
    Sleeping,
}

impl CyclePhase {
    /// Returns `true` when no further transition is possible in this boot.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, CyclePhase::ConfigMode | CyclePhase::Sleeping)
    }

    /// Forward edges of the cycle, plus the fatal-error edge from any live
    /// phase straight to sleep.
    #[must_use]
    pub const fn can_transition_to(self, next: CyclePhase) -> bool {
        match (self, next) {
            (CyclePhase::Boot, CyclePhase::HardwareReady)
            | (CyclePhase::HardwareReady, CyclePhase::ConfigMode | CyclePhase::SensorsReady)
            | (CyclePhase::SensorsReady, CyclePhase::Joined)
            | (CyclePhase::Joined, CyclePhase::Transmitted) => true,
            (from, CyclePhase::Sleeping) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for CyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Failure reported when attempting an invalid phase transition.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TransitionError {
    pub from: CyclePhase,
    pub to: CyclePhase,
}

impl TransitionError {
    #[must_use]
    pub const fn new(from: CyclePhase, to: CyclePhase) -> Self {
        Self { from, to }
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid transition {} -> {}", self.from, self.to)
    }
}

/// Errors that end the cycle early.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FatalError {
    RadioInit(RadioStatus),
    /// Activation did not produce a session that may transmit.
    Session(SessionOutcome),
    Transition(TransitionError),
}

impl fmt::Display for FatalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatalError::RadioInit(status) => write!(f, "radio init failed: {}", status),
            FatalError::Session(outcome) => write!(f, "no session: {:?}", outcome),
            FatalError::Transition(error) => write!(f, "{}", error),
        }
    }
}

impl From<TransitionError> for FatalError {
    fn from(error: TransitionError) -> Self {
        FatalError::Transition(error)
    }
}

/// How the cycle ended.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum CycleOutcome {
    /// The uplink went out.
    Transmitted,
    /// The uplink was attempted and the radio rejected it.
    TransmitFailed(SendError),
    /// A fatal error skipped the rest of the cycle.
    Aborted(FatalError),
    /// The operator took the configuration path; no acquisition ran.
    ConfigMode,
}

/// Everything observable about one finished cycle.
pub struct CycleReport {
    pub phase: CyclePhase,
    pub outcome: CycleOutcome,
    pub wake: WakeCause,
    pub boot_count: u32,
    pub config_source: ConfigSource,
    pub begin: BeginReport,
    pub session: Option<SessionOutcome>,
    pub readings: Readings,
    pub payload: Option<EncodedPayload>,
    /// `None` on the configuration path.
    pub sleep_s: Option<u32>,
    pub events: EventLog,
}

/// Concrete collaborators a board supplies to the cycle.
pub trait Board {
    type Rails: RailDriver;
    type Buses: BusHardware;
    type Sensors: SensorFactory;
    type Radio: LorawanNode;
    type Nonces: NonceStore;
    type Clock: Clock;
    type Store: ConfigStore;
    type ConfigMode: ConfigMode;
    type Sleep: SleepPlatform;
    type Memory: RetainedMemory;
    type Log: EventSink;
    type Delay: DelayNs + Clone;
}

/// Owned instances of a board's collaborators.
pub struct BoardParts<B: Board> {
    pub rails: B::Rails,
    pub buses: B::Buses,
    pub sensors: B::Sensors,
    pub radio: B::Radio,
    pub nonces: B::Nonces,
    pub clock: B::Clock,
    pub store: B::Store,
    pub config_mode: B::ConfigMode,
    pub sleep: B::Sleep,
    pub memory: B::Memory,
    pub log: B::Log,
    pub delay: B::Delay,
    /// Caps join attempts for this cycle; `None` retries until the join succeeds.
    pub join_attempt_limit: Option<NonZeroU16>,
}

/// Drives a single duty cycle over a board's parts.
pub struct DutyCycle<B: Board> {
    parts: BoardParts<B>,
}

struct Live<B: Board> {
    power: PowerSequencer<B::Rails, B::Delay>,
    buses: BusInitializer<B::Buses>,
    sleep: SleepController<B::Sleep, B::Delay>,
    session: SessionManager<B::Radio, B::Nonces, B::Clock, B::Delay>,
    sensors: B::Sensors,
    store: B::Store,
    config_mode: B::ConfigMode,
    memory: B::Memory,
    log: B::Log,
    phase: CyclePhase,
    events: EventLog,
    retained: RetainedState,
}

impl<B: Board> Live<B> {
    fn advance(&mut self, next: CyclePhase) -> Result<(), TransitionError> {
        if !self.phase.can_transition_to(next) {
            return Err(TransitionError::new(self.phase, next));
        }
        self.phase = next;
        Ok(())
    }
}

impl<B: Board> DutyCycle<B> {
    pub fn new(parts: BoardParts<B>) -> Self {
        Self { parts }
    }

    /// Runs the cycle to its terminal phase.
    ///
    /// On hardware the sleep path does not return; on the host the report
    /// describes what happened up to that point.
    pub fn run(self) -> CycleReport {
        let BoardParts {
            rails,
            buses,
            sensors,
            radio,
            nonces,
            clock,
            store,
            config_mode,
            sleep,
            memory,
            log,
            delay,
            join_attempt_limit,
        } = self.parts;

        let mut session = SessionManager::new(radio, nonces, clock, delay.clone());
        if let Some(limit) = join_attempt_limit {
            session = session.with_join_attempt_limit(limit);
        }

        let mut live = Live::<B> {
            power: PowerSequencer::new(rails, delay.clone()),
            buses: BusInitializer::new(buses),
            sleep: SleepController::new(sleep, delay),
            session,
            sensors,
            store,
            config_mode,
            memory,
            log,
            phase: CyclePhase::Boot,
            events: EventLog::new(),
            retained: RetainedState::default(),
        };

        let mut report = CycleReport {
            phase: CyclePhase::Boot,
            outcome: CycleOutcome::ConfigMode,
            wake: WakeCause::Other,
            boot_count: 0,
            config_source: ConfigSource::Defaults,
            begin: BeginReport::default(),
            session: None,
            readings: Readings::new(),
            payload: None,
            sleep_s: None,
            events: EventLog::new(),
        };

        report.outcome = match acquire_and_send(&mut live, &mut report) {
            Ok(outcome) => outcome,
            Err(error) => CycleOutcome::Aborted(error),
        };

        if live.phase == CyclePhase::ConfigMode {
            // The store is re-read after the operator is done.
            live.retained.config = None;
            if let Err(error) = live.retained.persist(&mut live.memory) {
                live.events.record(NodeEvent::RetainedDiscarded(error));
            }
            live.events.emit_pending(&mut live.log);
        } else {
            report.sleep_s = Some(go_to_sleep(&mut live));
        }

        report.phase = live.phase;
        report.events = live.events;
        report
    }
}

/// Boot, configuration and acquisition up to the uplink. Any error returned
/// here sends the cycle straight to sleep.
fn acquire_and_send<B: Board>(
    live: &mut Live<B>,
    report: &mut CycleReport,
) -> Result<CycleOutcome, FatalError> {
    live.sleep.release_held_pins();
    live.power.all_off();
    let wake = live.sleep.handle_wakeup_cause();
    report.wake = wake;

    let (retained, restored) = RetainedState::restore(&mut live.memory);
    live.retained = retained;
    live.retained.boot_count = live.retained.boot_count.wrapping_add(1);
    live.retained.boots_since_join = live.retained.boots_since_join.saturating_add(1);
    report.boot_count = live.retained.boot_count;
    live.events.record(NodeEvent::Boot {
        boot_count: live.retained.boot_count,
        wake,
    });
    match restored {
        Ok(()) => live.events.record(NodeEvent::RetainedRestored),
        Err(error) => live.events.record(NodeEvent::RetainedDiscarded(error)),
    };

    let (source, warning) = load_config(&mut live.store, &mut live.retained, wake);
    report.config_source = source;
    live.events.record(NodeEvent::ConfigLoaded(source));
    if let Some(warning) = warning {
        live.events.record(NodeEvent::ConfigWarning(warning));
    }
    live.advance(CyclePhase::HardwareReady)?;

    let wants_config = match wake {
        WakeCause::ExternalPin => true,
        WakeCause::Timer => false,
        WakeCause::Other => live.config_mode.check_config_mode(),
    };
    if wants_config {
        live.events.record(NodeEvent::ConfigModeRequested(wake));
        live.advance(CyclePhase::ConfigMode)?;
        live.events.emit_pending(&mut live.log);
        live.config_mode.run_config_mode();
        return Ok(CycleOutcome::ConfigMode);
    }

    let clock = live.session.clock_mut();
    if clock.now().is_none() {
        clock.set(CLOCK_SEED_EPOCH);
        live.events.record(NodeEvent::ClockSeeded(CLOCK_SEED_EPOCH));
    }

    let config = match live.retained.config.clone() {
        Some(config) => config,
        None => read_config(&mut live.store).0,
    };

    let mut orchestrator = SensorOrchestrator::new();
    orchestrator.register(&mut live.sensors, config.enabled_sensors(), &mut live.events);
    report.begin = orchestrator.prepare(&mut live.power, &mut live.buses, &mut live.events);
    live.advance(CyclePhase::SensorsReady)?;

    if live.buses.ensure(BusKind::Spi) {
        live.events.record(NodeEvent::BusStarted(BusKind::Spi));
    }
    if let Err(status) = live.session.begin_radio() {
        live.events.record(NodeEvent::RadioInitFailed(status));
        orchestrator.power_down(&mut live.power, &mut live.buses, &mut live.events);
        return Err(FatalError::RadioInit(status));
    }

    live.session.set_credentials(config.credentials);
    let outcome = live
        .session
        .activate(live.retained.session.as_ref(), &mut live.events);
    report.session = Some(outcome);
    if outcome == SessionOutcome::NewSession || outcome == SessionOutcome::ClockSyncFailed {
        live.retained.boots_since_join = 0;
    }
    if !outcome.permits_uplink() {
        orchestrator.power_down(&mut live.power, &mut live.buses, &mut live.events);
        return Err(FatalError::Session(outcome));
    }
    live.advance(CyclePhase::Joined)?;

    report.readings = orchestrator.read_all();
    orchestrator.power_down(&mut live.power, &mut live.buses, &mut live.events);

    let timestamp = live.session.clock_mut().now().unwrap_or(CLOCK_SEED_EPOCH);
    let payload = encode_payload(
        &config.station_id,
        &config.device_id,
        timestamp,
        &report.readings,
    );
    if payload.truncated {
        live.events.record(NodeEvent::PayloadTruncated);
    }

    let sent = live.session.send(payload.as_bytes());
    report.payload = Some(payload);
    live.advance(CyclePhase::Transmitted)?;

    Ok(match sent {
        Ok(()) => {
            let bytes = report
                .payload
                .as_ref()
                .map_or(0, |payload| u16::try_from(payload.len()).unwrap_or(u16::MAX));
            live.events.record(NodeEvent::UplinkSent { bytes });
            CycleOutcome::Transmitted
        }
        Err(error) => {
            if let SendError::Radio(status) = error {
                live.events.record(NodeEvent::UplinkFailed(status));
            }
            CycleOutcome::TransmitFailed(error)
        }
    })
}

/// Final hand-off to the sleep controller. Returns the armed duration.
fn go_to_sleep<B: Board>(live: &mut Live<B>) -> u32 {
    let seconds = live
        .retained
        .config
        .as_ref()
        .map_or(defaults::SLEEP_INTERVAL_S, |config| config.sleep_interval_s);

    debug_assert!(live.phase.can_transition_to(CyclePhase::Sleeping));
    live.phase = CyclePhase::Sleeping;
    live.events.record(NodeEvent::Sleeping { seconds });
    live.events.emit_pending(&mut live.log);

    let dormant = live.sleep.go_to_sleep(
        seconds,
        &mut live.session,
        &mut live.retained,
        &mut live.memory,
        &mut live.buses,
    );
    if let Err(error) = dormant.retained {
        live.events.record(NodeEvent::RetainedDiscarded(error));
    }
    dormant.duration_s
}

#[cfg(test)]
mod tests {
    use super::*;

    const PHASES: [CyclePhase; 7] = [
        CyclePhase::Boot,
        CyclePhase::HardwareReady,
        CyclePhase::ConfigMode,
        CyclePhase::SensorsReady,
        CyclePhase::Joined,
        CyclePhase::Transmitted,
        CyclePhase::Sleeping,
    ];

    #[test]
    fn happy_path_is_a_chain() {
        let chain = [
            CyclePhase::Boot,
            CyclePhase::HardwareReady,
            CyclePhase::SensorsReady,
            CyclePhase::Joined,
            CyclePhase::Transmitted,
            CyclePhase::Sleeping,
        ];
        for pair in chain.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn terminal_phases_have_no_exit() {
        for from in [CyclePhase::ConfigMode, CyclePhase::Sleeping] {
            assert!(from.is_terminal());
            for to in PHASES {
                assert!(!from.can_transition_to(to));
            }
        }
    }

    #[test]
    fn any_live_phase_may_abort_to_sleep() {
        for from in PHASES.into_iter().filter(|phase| !phase.is_terminal()) {
            assert!(from.can_transition_to(CyclePhase::Sleeping));
        }
    }

    #[test]
    fn config_mode_only_from_hardware_ready() {
        for from in PHASES {
            assert_eq!(
                from.can_transition_to(CyclePhase::ConfigMode),
                from == CyclePhase::HardwareReady
            );
        }
        assert!(!CyclePhase::Boot.can_transition_to(CyclePhase::Joined));
    }
}
