//! Switched power rails feeding the sensor front-ends.
//!
//! The [`PowerSequencer`] is the only writer of rail state. Turning a rail on
//! drives its enable line and then waits out the rail's settle time; turning
//! it off never waits. Rail control is fire-and-forget: the hardware gives no
//! feedback, so none of these operations can fail.

use core::fmt;
use core::time::Duration;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

/// Number of switched rails on the board.
pub const RAIL_COUNT: usize = 2;

/// Logical power domain a sensor declares it needs.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PowerDomain {
    /// Permanently powered main 3.3 V supply.
    AlwaysOnMain,
    /// Switched 3.3 V rail for low-voltage front-ends.
    SwitchedLow,
    /// Switched 12 V rail feeding the field-bus transceiver and probes.
    SwitchedHigh,
    /// Sensor draws no rail power of its own.
    None,
}

impl PowerDomain {
    /// Switched rail backing this domain, if any.
    #[must_use]
    pub const fn rail(self) -> Option<RailId> {
        match self {
            PowerDomain::SwitchedLow => Some(RailId::Low),
            PowerDomain::SwitchedHigh => Some(RailId::High),
            PowerDomain::AlwaysOnMain | PowerDomain::None => None,
        }
    }
}

/// Identifier for the switched rails.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RailId {
    Low,
    High,
}

impl RailId {
    /// Deterministic index for lookups into [`ALL_RAILS`].
    #[must_use]
    pub const fn as_index(self) -> usize {
        match self {
            RailId::Low => 0,
            RailId::High => 1,
        }
    }

    /// Attempts to construct a [`RailId`] from a raw index.
    #[must_use]
    pub const fn from_index(index: usize) -> Option<Self> {
        match index {
            0 => Some(RailId::Low),
            1 => Some(RailId::High),
            _ => None,
        }
    }
}

impl fmt::Display for RailId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(rail_by_id(*self).name)
    }
}

/// Level that energizes a rail's load switch.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum RailPolarity {
    ActiveLow,
    ActiveHigh,
}

/// Metadata describing one switched rail.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Rail {
    pub id: RailId,
    pub name: &'static str,
    pub polarity: RailPolarity,
    pub settle: Duration,
}

impl Rail {
    const fn new(id: RailId, name: &'static str, polarity: RailPolarity, settle_ms: u64) -> Self {
        Self {
            id,
            name,
            polarity,
            settle: Duration::from_millis(settle_ms),
        }
    }

    /// Pin level that turns the rail on (`true` == high).
    #[must_use]
    pub const fn on_level(&self) -> bool {
        matches!(self.polarity, RailPolarity::ActiveHigh)
    }

    /// Settle time in whole milliseconds.
    #[must_use]
    pub fn settle_ms(&self) -> u32 {
        u32::try_from(self.settle.as_millis()).unwrap_or(u32::MAX)
    }
}

/// Rail catalog in power-up order: the low-voltage rail comes up first.
pub const ALL_RAILS: [Rail; RAIL_COUNT] = [
    Rail::new(RailId::Low, "3V3_SW", RailPolarity::ActiveLow, 100),
    Rail::new(RailId::High, "12V", RailPolarity::ActiveHigh, 500),
];

/// Returns the catalog entry for `id`.
#[must_use]
pub const fn rail_by_id(id: RailId) -> Rail {
    ALL_RAILS[id.as_index()]
}

/// Compact set of rails.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct RailSet(u8);

impl RailSet {
    pub const EMPTY: Self = Self(0);

    #[must_use]
    pub const fn contains(self, rail: RailId) -> bool {
        self.0 & (1 << rail.as_index()) != 0
    }

    pub fn insert(&mut self, rail: RailId) {
        self.0 |= 1 << rail.as_index();
    }

    pub fn remove(&mut self, rail: RailId) {
        self.0 &= !(1 << rail.as_index());
    }

    /// Adds the rail backing `domain`, if it has one.
    pub fn insert_domain(&mut self, domain: PowerDomain) {
        if let Some(rail) = domain.rail() {
            self.insert(rail);
        }
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    pub const fn len(self) -> usize {
        self.0.count_ones() as usize
    }

    /// Iterates members in power-up order.
    pub fn iter(self) -> impl DoubleEndedIterator<Item = RailId> {
        ALL_RAILS
            .into_iter()
            .map(|rail| rail.id)
            .filter(move |id| self.contains(*id))
    }
}

impl FromIterator<RailId> for RailSet {
    fn from_iter<T: IntoIterator<Item = RailId>>(iter: T) -> Self {
        let mut set = RailSet::EMPTY;
        for rail in iter {
            set.insert(rail);
        }
        set
    }
}

/// Abstraction over the enable lines of the switched rails.
pub trait RailDriver {
    /// Drives `rail` to its on (`true`) or off (`false`) level.
    fn set_rail(&mut self, rail: RailId, on: bool);
}

/// Rail driver that ignores every request. Useful for host builds and tests.
#[derive(Default)]
pub struct NoopRailDriver;

impl RailDriver for NoopRailDriver {
    fn set_rail(&mut self, _rail: RailId, _on: bool) {}
}

/// Drives the rail enables through two `embedded-hal` output pins, applying the
/// catalog polarity.
pub struct GpioRailDriver<L, H> {
    low: L,
    high: H,
}

impl<L, H> GpioRailDriver<L, H>
where
    L: OutputPin,
    H: OutputPin,
{
    pub fn new(low: L, high: H) -> Self {
        Self { low, high }
    }

    pub fn into_inner(self) -> (L, H) {
        (self.low, self.high)
    }
}

impl<L, H> RailDriver for GpioRailDriver<L, H>
where
    L: OutputPin,
    H: OutputPin,
{
    fn set_rail(&mut self, rail: RailId, on: bool) {
        let high = on == rail_by_id(rail).on_level();
        // Load-switch enables have no readback; a pin error leaves nothing to recover.
        let _ = match rail {
            RailId::Low => drive(&mut self.low, high).ok(),
            RailId::High => drive(&mut self.high, high).ok(),
        };
    }
}

fn drive<P: OutputPin>(pin: &mut P, high: bool) -> Result<(), P::Error> {
    if high { pin.set_high() } else { pin.set_low() }
}

/// Whether turning on an already-energized rail waits out its settle time again.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Settle {
    /// Wait only when the rail actually transitions from off to on.
    OnTransition,
    /// Always wait, even when the rail was already on.
    Always,
}

/// Owns the rail enables and the per-rail on/off state for one wake cycle.
pub struct PowerSequencer<D, T> {
    driver: D,
    delay: T,
    energized: RailSet,
    switch_ons: [u8; RAIL_COUNT],
}

impl<D, T> PowerSequencer<D, T>
where
    D: RailDriver,
    T: DelayNs,
{
    pub fn new(driver: D, delay: T) -> Self {
        Self {
            driver,
            delay,
            energized: RailSet::EMPTY,
            switch_ons: [0; RAIL_COUNT],
        }
    }

    /// Drives every rail off regardless of the recorded state.
    ///
    /// Runs at boot before any rail is asserted since pin state left over from
    /// the previous cycle is unknown.
    pub fn all_off(&mut self) {
        for rail in &ALL_RAILS {
            self.driver.set_rail(rail.id, false);
        }
        self.energized = RailSet::EMPTY;
    }

    /// Turns `rail` on, settling only if it was off. Returns `true` on a transition.
    pub fn rail_on(&mut self, rail: RailId) -> bool {
        self.rail_on_with(rail, Settle::OnTransition)
    }

    /// Turns `rail` on with an explicit settle policy.
    pub fn rail_on_with(&mut self, rail: RailId, settle: Settle) -> bool {
        let transitioned = !self.energized.contains(rail);
        if transitioned {
            self.driver.set_rail(rail, true);
            self.energized.insert(rail);
            let count = &mut self.switch_ons[rail.as_index()];
            *count = count.saturating_add(1);
        }

        if transitioned || settle == Settle::Always {
            self.delay.delay_ms(rail_by_id(rail).settle_ms());
        }

        transitioned
    }

    /// Turns `rail` off without waiting. Returns `true` on a transition.
    pub fn rail_off(&mut self, rail: RailId) -> bool {
        let transitioned = self.energized.contains(rail);
        if transitioned {
            self.driver.set_rail(rail, false);
            self.energized.remove(rail);
        }
        transitioned
    }

    /// Turns on every rail in `rails` in power-up order, each settling once.
    ///
    /// Returns the rails that actually transitioned.
    pub fn rails_on(&mut self, rails: RailSet) -> RailSet {
        rails.iter().filter(|rail| self.rail_on(*rail)).collect()
    }

    /// Turns off every rail in `rails` in reverse power-up order.
    pub fn rails_off(&mut self, rails: RailSet) -> RailSet {
        rails
            .iter()
            .rev()
            .filter(|rail| self.rail_off(*rail))
            .collect()
    }

    #[must_use]
    pub fn is_on(&self, rail: RailId) -> bool {
        self.energized.contains(rail)
    }

    #[must_use]
    pub fn energized(&self) -> RailSet {
        self.energized
    }

    /// Number of off-to-on transitions of `rail` since construction.
    #[must_use]
    pub fn switch_on_count(&self, rail: RailId) -> u8 {
        self.switch_ons[rail.as_index()]
    }

    pub fn driver_mut(&mut self) -> &mut D {
        &mut self.driver
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }
}
