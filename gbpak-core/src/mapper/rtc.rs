use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime};

/// Wall clock injected into the cartridge so tests can drive the RTC with
/// a mock clock.
pub trait TimeSource {
    fn now(&self) -> SystemTime;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

pub(crate) const RTC_REGISTER_FIRST: u8 = 0x08;
pub(crate) const RTC_REGISTER_LAST: u8 = 0x0C;

/// The five MBC3 clock registers, kept as raw bytes.
///
/// The control byte (day-high) packs bit 8 of the day counter into bit 0,
/// the halt flag into bit 6 and the sticky day-carry flag into bit 7.
/// Software writes store the raw byte, so unknown bits survive a
/// save/reload round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub(crate) struct RtcRegisters {
    pub(crate) seconds: u8,
    pub(crate) minutes: u8,
    pub(crate) hours: u8,
    pub(crate) day_low: u8,
    pub(crate) day_high: u8,
}

impl RtcRegisters {
    pub(crate) fn days(self) -> u16 {
        u16::from(self.day_low) | (u16::from(self.day_high & 0x01) << 8)
    }

    fn set_days(&mut self, days: u16) {
        self.day_low = (days & 0xFF) as u8;
        self.day_high = (self.day_high & 0xFE) | ((days >> 8) & 0x01) as u8;
    }

    pub(crate) fn day_carry(self) -> bool {
        self.day_high & 0x80 != 0
    }

    fn set_day_carry(&mut self) {
        self.day_high |= 0x80;
    }

    pub(crate) fn read(self, register: u8) -> Option<u8> {
        match register {
            0x08 => Some(self.seconds),
            0x09 => Some(self.minutes),
            0x0A => Some(self.hours),
            0x0B => Some(self.day_low),
            0x0C => Some(self.day_high),
            _ => None,
        }
    }

    pub(crate) fn write(&mut self, register: u8, value: u8) {
        match register {
            0x08 => self.seconds = value,
            0x09 => self.minutes = value,
            0x0A => self.hours = value,
            0x0B => self.day_low = value,
            0x0C => self.day_high = value,
            _ => {}
        }
    }

    pub(crate) fn to_bytes(self) -> [u8; 5] {
        [self.seconds, self.minutes, self.hours, self.day_low, self.day_high]
    }

    pub(crate) fn from_bytes(bytes: [u8; 5]) -> Self {
        Self {
            seconds: bytes[0],
            minutes: bytes[1],
            hours: bytes[2],
            day_low: bytes[3],
            day_high: bytes[4],
        }
    }
}

/// MBC3 real-time clock: live registers that accumulate elapsed wall-clock
/// time on demand, plus a latched snapshot frozen by the latch register.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct RealTimeClock {
    last_update: SystemTime,
    current: RtcRegisters,
    latched: RtcRegisters,
    latch_active: bool,
}

impl RealTimeClock {
    pub(crate) fn new(now: SystemTime) -> Self {
        Self {
            last_update: now,
            current: RtcRegisters::default(),
            latched: RtcRegisters::default(),
            latch_active: false,
        }
    }

    pub(crate) fn from_saved(
        current: RtcRegisters,
        latched: RtcRegisters,
        last_update: SystemTime,
    ) -> Self {
        Self {
            last_update,
            current,
            latched,
            latch_active: false,
        }
    }

    /// Integrates whole seconds of elapsed wall-clock time into the live
    /// registers, carrying seconds -> minutes -> hours -> 9-bit day
    /// counter. A day-counter wrap past 511 sets the sticky carry flag,
    /// which only a register write can clear.
    ///
    /// `last_update` advances by exactly the integrated seconds, so the
    /// sub-second remainder is never lost and calling this again with the
    /// same `now` is a no-op.
    pub(crate) fn update(&mut self, now: SystemTime) {
        let elapsed = match now.duration_since(self.last_update) {
            Ok(duration) => duration.as_secs(),
            Err(err) => {
                log::error!(
                    "Time has gone backwards: last_update={:?}, now={now:?}: {err}",
                    self.last_update
                );
                0
            }
        };
        if elapsed == 0 {
            return;
        }

        self.last_update += Duration::from_secs(elapsed);

        let total = u64::from(self.current.seconds) + elapsed;
        self.current.seconds = (total % 60) as u8;

        let total = u64::from(self.current.minutes) + total / 60;
        self.current.minutes = (total % 60) as u8;

        let total = u64::from(self.current.hours) + total / 60;
        self.current.hours = (total % 24) as u8;

        let days = u64::from(self.current.days()) + total / 24;
        self.current.set_days((days % 512) as u16);
        if days > 511 {
            self.current.set_day_carry();
        }
    }

    /// Handles a write to the MBC3 latch-control window. Latching
    /// integrates pending time first, so the snapshot reflects the moment
    /// of the latch write rather than the next read.
    pub(crate) fn latch_write(&mut self, value: u8, now: SystemTime) {
        if value & 0x01 != 0 {
            self.update(now);
            self.latched = self.current;
            self.latch_active = true;
        } else {
            self.latch_active = false;
        }
    }

    pub(crate) fn latch_active(&self) -> bool {
        self.latch_active
    }

    /// Reads one clock register through the RAM window. Unlatched reads
    /// see the live clock and force a time integration first.
    pub(crate) fn read_register(&mut self, register: u8, now: SystemTime) -> Option<u8> {
        if self.latch_active {
            self.latched.read(register)
        } else {
            self.update(now);
            self.current.read(register)
        }
    }

    pub(crate) fn write_register(&mut self, register: u8, value: u8) {
        self.current.write(register, value);
    }

    pub(crate) fn registers(&self) -> RtcRegisters {
        self.current
    }

    pub(crate) fn latched_registers(&self) -> RtcRegisters {
        self.latched
    }

    pub(crate) fn last_update(&self) -> SystemTime {
        self.last_update
    }
}
