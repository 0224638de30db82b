//! Diagnostic trace channel for bus-level hardware faults.
//!
//! Real cartridges fail silently: selecting a bank past the end of ROM
//! reads back zeroes, touching absent RAM does nothing. None of that is an
//! error to the host, but each decision point emits a [`TraceEvent`] so a
//! debugging session (or a test) can see which branch fired.

/// One bus-level decision point.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceEvent {
    RomRead { bank: u16 },
    RomBankFault { bank: u16 },
    RamRead { bank: u8 },
    RamWrite { bank: u8 },
    RamBankFault { bank: u8 },
    RamMissing,
    RamDisabled,
    RtcRead { register: u8, latched: bool },
    RtcWrite { register: u8, value: u8 },
    RtcLatch { active: bool },
    RegisterWrite { register: &'static str, value: u8 },
    InvalidAddress { address: u16 },
}

pub trait TraceSink {
    fn event(&mut self, event: TraceEvent);
}

/// Default sink; forwards every event to `log::trace!`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn event(&mut self, event: TraceEvent) {
        log::trace!("bus: {event:?}");
    }
}

/// Collects events in memory. Used by tests to assert which banking branch
/// handled an access without inspecting engine internals.
#[derive(Debug, Clone, Default)]
pub struct RecordingTraceSink {
    pub events: Vec<TraceEvent>,
}

impl RecordingTraceSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TraceSink for RecordingTraceSink {
    fn event(&mut self, event: TraceEvent) {
        self.events.push(event);
    }
}
