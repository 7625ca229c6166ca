//! Console sink for the core's event log.
//!
//! Events reach RTT through defmt on the target and stdout on the host.

use node_core::telemetry::{EventRecord, EventSink};

/// Writes every drained event to the console.
#[derive(Default)]
pub struct ConsoleSink {
    emitted: u32,
}

impl ConsoleSink {
    pub const fn new() -> Self {
        Self { emitted: 0 }
    }

    pub fn emitted(&self) -> u32 {
        self.emitted
    }
}

impl EventSink for ConsoleSink {
    fn emit(&mut self, record: &EventRecord) {
        self.emitted = self.emitted.wrapping_add(1);
        emit_event(record);
    }
}

/// Logs the firmware banner once per boot.
pub fn log_boot_banner() {
    emit_banner(env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
}

#[cfg(target_os = "none")]
fn emit_event(record: &EventRecord) {
    defmt::info!(
        "event #{} {}",
        record.id,
        defmt::Display2Format(&record.event)
    );
}

#[cfg(not(target_os = "none"))]
fn emit_event(record: &EventRecord) {
    println!("event #{} {}", record.id, record.event);
}

#[cfg(target_os = "none")]
fn emit_banner(name: &'static str, version: &'static str) {
    defmt::info!("{} {} booting", name, version);
}

#[cfg(not(target_os = "none"))]
fn emit_banner(name: &'static str, version: &'static str) {
    println!("{} {} booting", name, version);
}

#[cfg(test)]
mod tests {
    use super::*;
    use node_core::telemetry::{EventLog, NodeEvent};

    #[test]
    fn drains_each_record_once() {
        let mut log: EventLog = EventLog::new();
        log.record(NodeEvent::ClockSeeded(1_672_531_200));
        log.record(NodeEvent::Sleeping { seconds: 30 });

        let mut sink = ConsoleSink::new();
        assert_eq!(log.emit_pending(&mut sink), 2);
        assert_eq!(log.emit_pending(&mut sink), 0);
        assert_eq!(sink.emitted(), 2);
    }
}
