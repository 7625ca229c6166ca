//! Wide-area radio session: resume or join, persist, and synchronize the clock.
//!
//! The MAC layer itself is an external collaborator reached through
//! [`LorawanNode`]. This module decides *which* activation path to take and
//! enforces the ordering the network requires: the nonce block reaches
//! non-volatile storage before any clock-sync traffic, and the data rate is
//! pinned before every uplink.

use core::fmt;
use core::num::NonZeroU16;

use embedded_hal::delay::DelayNs;

use crate::telemetry::{EventLog, NodeEvent};

pub mod credentials;
pub mod modem;
pub mod payload;

pub use credentials::JoinCredentials;
pub use modem::{AtModem, LinkError, ModemLink};
pub use payload::{EncodedPayload, MAX_PAYLOAD_LEN, encode_payload};

/// Size of the anti-replay nonce block kept by the MAC.
pub const NONCES_LEN: usize = 32;
/// Size of the opaque post-join session context.
pub const SESSION_LEN: usize = 256;

/// Non-volatile namespace and key holding the nonce block.
pub const NONCE_NAMESPACE: &str = "radiolib";
pub const NONCE_KEY: &str = "nonces";

/// Data rate pinned for every uplink; ADR stays off.
pub const FIXED_DATA_RATE: u8 = 3;
/// Application port used for uplinks.
pub const UPLINK_PORT: u8 = 1;
/// Pause between a completed join and the first clock-sync exchange.
pub const POST_JOIN_DELAY_MS: u32 = 1_000;
/// Clock-sync exchanges attempted after a join.
pub const CLOCK_SYNC_ATTEMPTS: u8 = 3;
/// Pause between failed clock-sync attempts.
pub const CLOCK_SYNC_RETRY_DELAY_MS: u32 = 1_000;
/// Largest accepted gap between the local clock and the network time.
pub const CLOCK_TOLERANCE_S: u32 = 10;

pub type NonceBlock = [u8; NONCES_LEN];
pub type SessionBuffer = [u8; SESSION_LEN];

/// Signed status code reported by the radio stack. Negative values are errors.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RadioStatus(pub i16);

impl RadioStatus {
    /// Credentials missing or unparseable; no handshake was attempted.
    pub const INVALID_CREDENTIALS: Self = Self(-1101);
    /// Reported when the caller capped join attempts and the cap was reached
    /// without the radio ever returning a code.
    pub const UNKNOWN: Self = Self(-1);
}

impl fmt::Display for RadioStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Result of one activation request to the MAC.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Activation {
    /// A join handshake completed and a fresh session is active.
    NewSession,
    /// The restored session context was accepted without a join.
    SessionRestored,
    Failed(RadioStatus),
}

/// The LoRaWAN MAC as seen by the session manager.
pub trait LorawanNode {
    /// Brings up the transceiver.
    fn begin(&mut self) -> Result<(), RadioStatus>;

    /// Configures over-the-air activation.
    fn begin_otaa(&mut self, credentials: &JoinCredentials) -> Result<(), RadioStatus>;

    fn restore_nonces(&mut self, nonces: &NonceBlock) -> Result<(), RadioStatus>;

    fn restore_session(&mut self, session: &SessionBuffer) -> Result<(), RadioStatus>;

    /// Resumes a restored session when one is loaded, otherwise performs the
    /// join handshake.
    fn activate(&mut self) -> Activation;

    fn nonces(&self) -> NonceBlock;

    fn session(&self) -> SessionBuffer;

    fn set_datarate(&mut self, datarate: u8) -> Result<(), RadioStatus>;

    fn set_adr(&mut self, enabled: bool);

    /// Queues a DeviceTimeReq MAC command for the next uplink.
    fn request_device_time(&mut self) -> bool;

    /// Sends an uplink and listens through the receive windows.
    fn send_receive(&mut self, payload: &[u8], port: u8) -> Result<(), RadioStatus>;

    /// Sends an uplink without opening receive windows.
    fn send(&mut self, payload: &[u8], port: u8) -> Result<(), RadioStatus>;

    /// Network time (Unix seconds) from the last DeviceTimeAns, if one arrived.
    fn device_time(&mut self) -> Option<u32>;

    /// Puts the transceiver into its lowest-power state.
    fn sleep(&mut self);
}

/// Non-volatile home of the nonce block.
pub trait NonceStore {
    /// `None` means no join has ever completed on this device.
    fn load_nonces(&mut self) -> Option<NonceBlock>;

    fn store_nonces(&mut self, nonces: &NonceBlock);
}

/// Real-time clock holding Unix seconds.
pub trait Clock {
    /// `None` while the clock has never been set.
    fn now(&mut self) -> Option<u32>;

    fn set(&mut self, epoch: u32);
}

/// Why the session manager stopped.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionFailure {
    Credentials,
    Setup(RadioStatus),
    Join(RadioStatus),
    ClockSync,
}

/// Session manager state machine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    NoCredentials,
    Joining,
    JoinedNoClock,
    Synced,
    Failed(SessionFailure),
}

impl SessionState {
    /// Returns `true` when uplinks may be sent.
    #[must_use]
    pub const fn permits_uplink(self) -> bool {
        matches!(self, SessionState::Synced)
    }

    /// Returns `true` when the state represents a terminal outcome.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, SessionState::Synced | SessionState::Failed(_))
    }
}

/// Activation result reported to the duty cycle.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionOutcome {
    SessionRestored,
    NewSession,
    JoinFailed(RadioStatus),
    ClockSyncFailed,
}

impl SessionOutcome {
    /// Only an established session lets the cycle transmit.
    #[must_use]
    pub const fn permits_uplink(self) -> bool {
        matches!(
            self,
            SessionOutcome::SessionRestored | SessionOutcome::NewSession
        )
    }
}

/// Uplink rejected before or by the radio.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SendError {
    /// No established session this cycle.
    NoSession,
    Radio(RadioStatus),
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::NoSession => f.write_str("no session"),
            SendError::Radio(status) => write!(f, "radio status {}", status),
        }
    }
}

/// What the sleep path should do with the retained session buffer.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum SessionRetention {
    /// No activation ran this cycle; the previous buffer is still good.
    Keep,
    /// A session is live; carry its context across sleep.
    Replace(SessionBuffer),
    /// Activation ran and failed; the previous buffer is stale.
    Discard,
}

/// Proof that the nonce block reached non-volatile storage.
pub struct NoncesPersisted(());

/// Drives activation, clock sync and uplinks over a [`LorawanNode`].
pub struct SessionManager<R, N, C, D> {
    radio: R,
    nonces: N,
    clock: C,
    delay: D,
    state: SessionState,
    credentials: Option<JoinCredentials>,
    join_attempt_limit: Option<NonZeroU16>,
    join_attempts: u16,
    clock_sync_attempts: u8,
    activated: bool,
    joined: bool,
}

impl<R, N, C, D> SessionManager<R, N, C, D>
where
    R: LorawanNode,
    N: NonceStore,
    C: Clock,
    D: DelayNs,
{
    pub fn new(radio: R, nonces: N, clock: C, delay: D) -> Self {
        Self {
            radio,
            nonces,
            clock,
            delay,
            state: SessionState::NoCredentials,
            credentials: None,
            join_attempt_limit: None,
            join_attempts: 0,
            clock_sync_attempts: 0,
            activated: false,
            joined: false,
        }
    }

    /// Caps join attempts. Without a cap the join retries until it succeeds.
    #[must_use]
    pub fn with_join_attempt_limit(mut self, limit: NonZeroU16) -> Self {
        self.join_attempt_limit = Some(limit);
        self
    }

    /// Installs join credentials; `None` leaves the manager unable to join.
    pub fn set_credentials(&mut self, credentials: Option<JoinCredentials>) {
        self.credentials = credentials;
    }

    /// Brings up the transceiver.
    pub fn begin_radio(&mut self) -> Result<(), RadioStatus> {
        self.radio.begin()
    }

    /// Restores the previous session if possible, otherwise joins.
    ///
    /// `retained_session` is the buffer carried across the last deep sleep.
    /// A restored session skips clock sync; a new join persists its nonces and
    /// then synchronizes the clock.
    pub fn activate(
        &mut self,
        retained_session: Option<&SessionBuffer>,
        events: &mut EventLog,
    ) -> SessionOutcome {
        self.activated = true;
        let outcome = self.run_activation(retained_session, events);
        events.record(NodeEvent::Session(outcome));
        outcome
    }

    fn run_activation(
        &mut self,
        retained_session: Option<&SessionBuffer>,
        events: &mut EventLog,
    ) -> SessionOutcome {
        let Some(credentials) = self.credentials else {
            self.state = SessionState::Failed(SessionFailure::Credentials);
            return SessionOutcome::JoinFailed(RadioStatus::INVALID_CREDENTIALS);
        };

        if let Err(status) = self.radio.begin_otaa(&credentials) {
            self.state = SessionState::Failed(SessionFailure::Setup(status));
            return SessionOutcome::JoinFailed(status);
        }
        self.state = SessionState::Joining;

        if self.try_restore(retained_session) {
            match self.radio.activate() {
                Activation::SessionRestored => {
                    self.joined = true;
                    self.pin_datarate();
                    self.state = SessionState::Synced;
                    return SessionOutcome::SessionRestored;
                }
                Activation::NewSession => {
                    self.join_attempts = 1;
                    return self.complete_join(events);
                }
                Activation::Failed(status) => {
                    events.record(NodeEvent::JoinAttemptFailed { attempt: 0, status });
                }
            }
        }

        match self.join(events) {
            Ok(()) => self.complete_join(events),
            Err(status) => {
                self.state = SessionState::Failed(SessionFailure::Join(status));
                SessionOutcome::JoinFailed(status)
            }
        }
    }

    /// Loads stored nonces and the retained session into the MAC. Returns
    /// `true` only when both are present and accepted.
    ///
    /// Nonces are restored even without a session so that a fresh join keeps
    /// counting from where the last one stopped.
    fn try_restore(&mut self, retained_session: Option<&SessionBuffer>) -> bool {
        let Some(nonces) = self.nonces.load_nonces() else {
            return false;
        };
        if self.radio.restore_nonces(&nonces).is_err() {
            return false;
        }
        match retained_session {
            Some(session) => self.radio.restore_session(session).is_ok(),
            None => false,
        }
    }

    fn join(&mut self, events: &mut EventLog) -> Result<(), RadioStatus> {
        loop {
            self.join_attempts = self.join_attempts.saturating_add(1);
            match self.radio.activate() {
                Activation::NewSession | Activation::SessionRestored => return Ok(()),
                Activation::Failed(status) => {
                    events.record(NodeEvent::JoinAttemptFailed {
                        attempt: self.join_attempts,
                        status,
                    });
                    if let Some(limit) = self.join_attempt_limit
                        && self.join_attempts >= limit.get()
                    {
                        return Err(status);
                    }
                }
            }
        }
    }

    fn complete_join(&mut self, events: &mut EventLog) -> SessionOutcome {
        self.joined = true;
        let persisted = self.persist_nonces();
        self.state = SessionState::JoinedNoClock;
        self.delay.delay_ms(POST_JOIN_DELAY_MS);
        self.pin_datarate();
        self.sync_clock(persisted, events)
    }

    fn persist_nonces(&mut self) -> NoncesPersisted {
        let nonces = self.radio.nonces();
        self.nonces.store_nonces(&nonces);
        NoncesPersisted(())
    }

    /// Exchanges DeviceTimeReq/Ans until the local clock agrees with the network.
    fn sync_clock(&mut self, _persisted: NoncesPersisted, events: &mut EventLog) -> SessionOutcome {
        for attempt in 1..=CLOCK_SYNC_ATTEMPTS {
            self.clock_sync_attempts = attempt;
            let accepted = self.try_clock_sync();
            events.record(NodeEvent::ClockSyncAttempt { attempt, accepted });
            if accepted {
                self.state = SessionState::Synced;
                return SessionOutcome::NewSession;
            }
            if attempt < CLOCK_SYNC_ATTEMPTS {
                self.delay.delay_ms(CLOCK_SYNC_RETRY_DELAY_MS);
            }
        }
        self.state = SessionState::Failed(SessionFailure::ClockSync);
        SessionOutcome::ClockSyncFailed
    }

    fn try_clock_sync(&mut self) -> bool {
        if !self.radio.request_device_time() {
            return false;
        }
        if self.radio.send_receive(&[], UPLINK_PORT).is_err() {
            return false;
        }
        let Some(network) = self.radio.device_time() else {
            return false;
        };
        self.clock.set(network);
        match self.clock.now() {
            Some(local) => local.abs_diff(network) < CLOCK_TOLERANCE_S,
            None => false,
        }
    }

    fn pin_datarate(&mut self) {
        self.radio.set_adr(false);
        // A rejected data rate leaves the MAC on its previous one; the uplink
        // still goes out.
        let _ = self.radio.set_datarate(FIXED_DATA_RATE);
    }

    /// Sends `payload` as an unconfirmed uplink on [`UPLINK_PORT`].
    ///
    /// The data rate is pinned again first. Failures are reported, never retried.
    pub fn send(&mut self, payload: &[u8]) -> Result<(), SendError> {
        if !self.state.permits_uplink() {
            return Err(SendError::NoSession);
        }
        self.pin_datarate();
        self.radio
            .send(payload, UPLINK_PORT)
            .map_err(SendError::Radio)
    }

    /// How the retained session buffer should change before deep sleep.
    pub fn retention(&self) -> SessionRetention {
        if self.joined {
            SessionRetention::Replace(self.radio.session())
        } else if self.activated {
            SessionRetention::Discard
        } else {
            SessionRetention::Keep
        }
    }

    /// Puts the transceiver to sleep.
    pub fn suspend_radio(&mut self) {
        self.radio.sleep();
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn join_attempts(&self) -> u16 {
        self.join_attempts
    }

    pub fn clock_sync_attempts(&self) -> u8 {
        self.clock_sync_attempts
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    pub fn nonce_store(&self) -> &N {
        &self.nonces
    }
}
