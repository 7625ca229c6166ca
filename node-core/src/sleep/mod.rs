//! Deep-sleep entry and wake-cause classification.
//!
//! Deep sleep is a restart, not a suspension: only retained memory and the
//! armed wake sources survive it. The controller therefore saves everything
//! the next cycle needs before touching any pin, and on the next boot the
//! pins latched for sleep are released before anything reconfigures them.

use core::fmt;

use embedded_hal::delay::DelayNs;

use crate::bus::{BusHardware, BusInitializer, BusKind};
use crate::session::{Clock, LorawanNode, NonceStore, SessionManager, SessionRetention};

pub mod pins;
pub mod retained;

pub use pins::{BOARD_PINS, BoardPin, PinId, PinRole, WAKE_PIN, pins_with_role};
pub use retained::{RETAINED_IMAGE_LEN, RetainedError, RetainedImage, RetainedMemory, RetainedState};

/// Settling pause after a wake from the configuration button.
pub const WAKE_DEBOUNCE_MS: u32 = 50;

/// Why the node is running.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeCause {
    /// Scheduled duty-cycle wake.
    Timer,
    /// Configuration button pulled the wake pin low.
    ExternalPin,
    /// Power-on, reset, or anything else.
    Other,
}

impl fmt::Display for WakeCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Raw wake flags as latched by the power controller.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct WakeFlags {
    /// The core is coming out of deep sleep.
    pub from_standby: bool,
    pub timer: bool,
    pub wake_pin: bool,
}

impl WakeFlags {
    /// A pin wake wins over a timer wake that fired in the same window.
    #[must_use]
    pub const fn classify(self) -> WakeCause {
        if !self.from_standby {
            WakeCause::Other
        } else if self.wake_pin {
            WakeCause::ExternalPin
        } else if self.timer {
            WakeCause::Timer
        } else {
            WakeCause::Other
        }
    }
}

/// Pin and power-controller access needed around deep sleep.
pub trait SleepPlatform {
    /// Reads and clears the latched wake flags.
    fn take_wake_flags(&mut self) -> WakeFlags;

    fn set_high_impedance(&mut self, pin: PinId);

    fn drive_high(&mut self, pin: PinId);

    /// Latches (`true`) or releases the pin's level across deep sleep.
    fn set_hold(&mut self, pin: PinId, hold: bool);

    /// Input with pull-up enabled and pull-down disabled.
    fn configure_wake_input(&mut self, pin: PinId);

    /// Drains the diagnostic channel and shuts it down.
    fn flush_log(&mut self);

    /// Stops the short-range radio used for configuration.
    fn stop_short_range_radio(&mut self);

    fn arm_timer_wake(&mut self, seconds: u32);

    /// Wakes on a low level on `pin`.
    fn arm_pin_wake(&mut self, pin: PinId);

    /// Enters deep sleep. On hardware this does not return.
    fn enter_deep_sleep(&mut self);
}

/// The radio side of the sleep sequence.
pub trait SuspendSession {
    /// How the retained session buffer should change.
    fn retention(&self) -> SessionRetention;

    /// Puts the transceiver into its lowest-power state.
    fn suspend_radio(&mut self);
}

impl<R, N, C, D> SuspendSession for SessionManager<R, N, C, D>
where
    R: LorawanNode,
    N: NonceStore,
    C: Clock,
    D: DelayNs,
{
    fn retention(&self) -> SessionRetention {
        SessionManager::retention(self)
    }

    fn suspend_radio(&mut self) {
        SessionManager::suspend_radio(self);
    }
}

/// Marks the point past which the cycle must not continue.
///
/// On hardware the deep-sleep call never returns; on the host it does, and
/// the caller gets this token back to end the cycle.
#[must_use]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Dormant {
    pub duration_s: u32,
    /// `Err` when retained memory could not hold the state; the next wake is
    /// then treated as a cold boot.
    pub retained: Result<(), RetainedError>,
}

/// Owns the sleep platform and orders the shutdown sequence.
pub struct SleepController<P, D> {
    platform: P,
    delay: D,
}

impl<P, D> SleepController<P, D>
where
    P: SleepPlatform,
    D: DelayNs,
{
    pub fn new(platform: P, delay: D) -> Self {
        Self { platform, delay }
    }

    /// Classifies this boot. A configuration-button wake is debounced.
    pub fn handle_wakeup_cause(&mut self) -> WakeCause {
        let cause = self.platform.take_wake_flags().classify();
        if cause == WakeCause::ExternalPin {
            self.delay.delay_ms(WAKE_DEBOUNCE_MS);
        }
        cause
    }

    /// Releases the latches applied by [`configure_pins_for_sleep`](Self::configure_pins_for_sleep).
    pub fn release_held_pins(&mut self) {
        for pin in pins_with_role(PinRole::ChipSelect) {
            self.platform.set_hold(pin, false);
        }
    }

    /// Floats every quiesced pin, then drives chip-selects high and latches them.
    pub fn configure_pins_for_sleep(&mut self) {
        for pin in pins_with_role(PinRole::Quiesce) {
            self.platform.set_high_impedance(pin);
        }
        for pin in pins_with_role(PinRole::ChipSelect) {
            self.platform.drive_high(pin);
            self.platform.set_hold(pin, true);
        }
    }

    /// Saves state, quiesces the board and enters deep sleep for `duration_s`.
    pub fn go_to_sleep<S, M, H>(
        &mut self,
        duration_s: u32,
        session: &mut S,
        retained: &mut RetainedState,
        memory: &mut M,
        buses: &mut BusInitializer<H>,
    ) -> Dormant
    where
        S: SuspendSession,
        M: RetainedMemory,
        H: BusHardware,
    {
        match session.retention() {
            SessionRetention::Keep => {}
            SessionRetention::Replace(buffer) => retained.session = Some(buffer),
            SessionRetention::Discard => retained.session = None,
        }
        let saved = retained.persist(memory);

        self.platform.flush_log();
        session.suspend_radio();
        self.platform.stop_short_range_radio();
        buses.end(BusKind::TwoWire);
        buses.end(BusKind::Spi);

        self.configure_pins_for_sleep();

        self.platform.configure_wake_input(WAKE_PIN);
        self.platform.set_hold(WAKE_PIN, false);

        self.platform.arm_timer_wake(duration_s);
        self.platform.arm_pin_wake(WAKE_PIN);
        self.platform.enter_deep_sleep();

        Dormant {
            duration_s,
            retained: saved,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }
}
