//! Structured events recorded during a duty cycle.
//!
//! The core never logs directly. Components report what happened as
//! [`NodeEvent`]s into a fixed-capacity [`EventLog`]; the firmware drains it
//! through defmt and the emulator prints it to stdout.

use core::fmt;

use heapless::{HistoryBuf, OldestOrdered};

use crate::bus::BusKind;
use crate::config::{ConfigError, ConfigSource};
use crate::power::RailId;
use crate::sensors::SensorType;
use crate::session::{RadioStatus, SessionOutcome};
use crate::sleep::{RetainedError, WakeCause};

/// Identifier assigned to each recorded event.
pub type EventId = u32;

/// Events retained per cycle. Older entries are overwritten.
pub const EVENT_LOG_CAPACITY: usize = 64;

/// Catalog of events the duty cycle reports.
#[derive(Copy, Clone, Debug, PartialEq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NodeEvent {
    Boot { boot_count: u32, wake: WakeCause },
    RetainedRestored,
    RetainedDiscarded(RetainedError),
    ConfigLoaded(ConfigSource),
    ConfigWarning(ConfigError),
    ConfigModeRequested(WakeCause),
    ClockSeeded(u32),
    RailOn(RailId),
    RailOff(RailId),
    BusStarted(BusKind),
    BusStopped(BusKind),
    /// Configured type code this build has no model for.
    SensorUnknown(u16),
    /// Known model this board has no driver for.
    SensorUnsupported(SensorType),
    SensorRegistryFull,
    SensorBegin { index: u8, sensor: SensorType, ok: bool },
    RadioInitFailed(RadioStatus),
    JoinAttemptFailed { attempt: u16, status: RadioStatus },
    ClockSyncAttempt { attempt: u8, accepted: bool },
    Session(SessionOutcome),
    PayloadTruncated,
    UplinkSent { bytes: u16 },
    UplinkFailed(RadioStatus),
    Sleeping { seconds: u32 },
}

impl fmt::Display for NodeEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeEvent::Boot { boot_count, wake } => {
                write!(f, "boot #{} wake={:?}", boot_count, wake)
            }
            NodeEvent::RetainedRestored => f.write_str("retained state restored"),
            NodeEvent::RetainedDiscarded(reason) => {
                write!(f, "retained state discarded: {}", reason)
            }
            NodeEvent::ConfigLoaded(source) => write!(f, "config loaded from {:?}", source),
            NodeEvent::ConfigWarning(error) => write!(f, "config warning: {}", error),
            NodeEvent::ConfigModeRequested(wake) => write!(f, "config mode ({:?})", wake),
            NodeEvent::ClockSeeded(epoch) => write!(f, "clock seeded to {}", epoch),
            NodeEvent::RailOn(rail) => write!(f, "rail {} on", rail),
            NodeEvent::RailOff(rail) => write!(f, "rail {} off", rail),
            NodeEvent::BusStarted(bus) => write!(f, "bus {} started", bus),
            NodeEvent::BusStopped(bus) => write!(f, "bus {} stopped", bus),
            NodeEvent::SensorUnknown(code) => write!(f, "unknown sensor type {}", code),
            NodeEvent::SensorUnsupported(sensor) => write!(f, "no driver for {}", sensor),
            NodeEvent::SensorRegistryFull => f.write_str("sensor registry full"),
            NodeEvent::SensorBegin { index, sensor, ok } => write!(
                f,
                "sensor[{}] {} {}",
                index,
                sensor,
                if *ok { "OK" } else { "FAIL" }
            ),
            NodeEvent::RadioInitFailed(status) => write!(f, "radio init failed: {}", status),
            NodeEvent::JoinAttemptFailed { attempt, status } => {
                write!(f, "join attempt {} failed: {}", attempt, status)
            }
            NodeEvent::ClockSyncAttempt { attempt, accepted } => write!(
                f,
                "clock sync attempt {} {}",
                attempt,
                if *accepted { "accepted" } else { "rejected" }
            ),
            NodeEvent::Session(outcome) => write!(f, "session: {:?}", outcome),
            NodeEvent::PayloadTruncated => f.write_str("payload truncated"),
            NodeEvent::UplinkSent { bytes } => write!(f, "uplink sent ({} bytes)", bytes),
            NodeEvent::UplinkFailed(status) => write!(f, "uplink failed: {}", status),
            NodeEvent::Sleeping { seconds } => write!(f, "sleeping {}s", seconds),
        }
    }
}

/// Event stored in the ring buffer.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct EventRecord {
    pub id: EventId,
    pub event: NodeEvent,
}

/// Event ring buffer type alias.
pub type EventRing<const CAPACITY: usize = EVENT_LOG_CAPACITY> = HistoryBuf<EventRecord, CAPACITY>;

/// Destination for recorded events: defmt on the target, stdout on the host.
pub trait EventSink {
    fn emit(&mut self, record: &EventRecord);
}

/// Records events into a fixed-size ring buffer.
pub struct EventLog<const CAPACITY: usize = EVENT_LOG_CAPACITY> {
    ring: EventRing<CAPACITY>,
    next_event_id: EventId,
    next_to_emit: EventId,
}

impl<const CAPACITY: usize> EventLog<CAPACITY> {
    /// Creates an empty log.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: HistoryBuf::new(),
            next_event_id: 0,
            next_to_emit: 0,
        }
    }

    /// Appends `event`, overwriting the oldest entry when full.
    pub fn record(&mut self, event: NodeEvent) -> EventId {
        let id = self.next_event_id;
        self.next_event_id = self.next_event_id.wrapping_add(1);
        self.ring.write(EventRecord { id, event });
        id
    }

    /// Returns an iterator over the recorded events in chronological order.
    pub fn oldest_first(&self) -> OldestOrdered<'_, EventRecord> {
        self.ring.oldest_ordered()
    }

    /// Returns the most recent event, if available.
    pub fn latest(&self) -> Option<&EventRecord> {
        self.ring.recent()
    }

    /// Returns `true` if any retained event matches `predicate`.
    pub fn contains(&self, predicate: impl Fn(&NodeEvent) -> bool) -> bool {
        self.oldest_first().any(|record| predicate(&record.event))
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Passes every event not yet emitted to `sink`, oldest first.
    ///
    /// Events overwritten before they were emitted are lost. Returns the
    /// number emitted.
    pub fn emit_pending(&mut self, sink: &mut impl EventSink) -> usize {
        let mut emitted = 0;
        for record in self.ring.oldest_ordered() {
            if record.id >= self.next_to_emit {
                sink.emit(record);
                emitted += 1;
            }
        }
        self.next_to_emit = self.next_event_id;
        emitted
    }

    /// Total events recorded, including overwritten ones.
    pub fn recorded(&self) -> u32 {
        self.next_event_id
    }
}

impl<const CAPACITY: usize> Default for EventLog<CAPACITY> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_in_order_with_ids() {
        let mut log: EventLog<4> = EventLog::new();
        assert_eq!(log.record(NodeEvent::RetainedRestored), 0);
        assert_eq!(log.record(NodeEvent::RailOn(RailId::Low)), 1);

        let events: heapless::Vec<NodeEvent, 4> =
            log.oldest_first().map(|record| record.event).collect();
        assert_eq!(
            events.as_slice(),
            &[NodeEvent::RetainedRestored, NodeEvent::RailOn(RailId::Low)]
        );
        assert_eq!(log.latest().map(|record| record.id), Some(1));
    }

    #[test]
    fn ring_overwrites_oldest() {
        let mut log: EventLog<2> = EventLog::new();
        log.record(NodeEvent::RetainedRestored);
        log.record(NodeEvent::PayloadTruncated);
        log.record(NodeEvent::Sleeping { seconds: 30 });

        assert_eq!(log.len(), 2);
        assert_eq!(log.recorded(), 3);
        assert!(!log.contains(|event| *event == NodeEvent::RetainedRestored));
        assert!(log.contains(|event| matches!(event, NodeEvent::Sleeping { seconds: 30 })));
    }

    #[derive(Default)]
    struct Collect {
        ids: heapless::Vec<EventId, 8>,
    }

    impl EventSink for Collect {
        fn emit(&mut self, record: &EventRecord) {
            let _ = self.ids.push(record.id);
        }
    }

    #[test]
    fn emit_pending_skips_already_emitted() {
        let mut log: EventLog<4> = EventLog::new();
        let mut sink = Collect::default();
        log.record(NodeEvent::RetainedRestored);
        log.record(NodeEvent::PayloadTruncated);
        assert_eq!(log.emit_pending(&mut sink), 2);

        log.record(NodeEvent::Sleeping { seconds: 30 });
        assert_eq!(log.emit_pending(&mut sink), 1);
        assert_eq!(log.emit_pending(&mut sink), 0);
        assert_eq!(sink.ids.as_slice(), &[0, 1, 2]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn display_is_human_readable() {
        let mut text: heapless::String<32> = heapless::String::new();
        core::fmt::write(
            &mut text,
            format_args!(
                "{}",
                NodeEvent::SensorBegin {
                    index: 2,
                    sensor: SensorType::Sht30,
                    ok: false
                }
            ),
        )
        .expect("fits");
        assert_eq!(text.as_str(), "sensor[2] SHT30 FAIL");
    }
}
