pub(crate) mod rtc;

use crate::header::{CartridgeHeader, MapperType, QUARTER_BLOCK_LEN};
use crate::mapper::rtc::{RealTimeClock, RTC_REGISTER_FIRST, RTC_REGISTER_LAST};
use crate::ram::RamBacking;
use crate::trace::{TraceEvent, TraceSink};
use crate::BLOCK_LEN;
use std::time::SystemTime;

const ROM_BANKED_START: u16 = 0x4000;
const RAM_WINDOW_START: u16 = 0xA000;

/// Per-mapper banking state. One variant per supported cartridge family,
/// selected once at load; every banking quirk lives in the match arms
/// below where it can be audited against hardware references.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Mapper {
    None,
    Mbc1 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enabled: bool,
        /// Selects whether the shared 2-bit latch feeds the RAM bank
        /// number or ROM bank bits 5-6.
        ram_banking_mode: bool,
    },
    Mbc2 {
        rom_bank: u8,
        ram_bank: u8,
        ram_enabled: bool,
    },
    Mbc3 {
        rom_bank: u8,
        /// 0x00-0x03 select a RAM bank; 0x08-0x0C alias the RTC registers
        /// into the RAM window.
        ram_bank: u8,
        ram_enabled: bool,
        rtc: Option<RealTimeClock>,
    },
    Mbc5 {
        rom_bank: u16,
        ram_bank: u8,
        ram_enabled: bool,
    },
}

impl Mapper {
    pub(crate) fn new(header: &CartridgeHeader, rtc: Option<RealTimeClock>) -> Self {
        match header.mapper_type {
            // MMM01 is detected but refused at load; it never reaches here
            MapperType::None | MapperType::Mmm01 => Self::None,
            MapperType::Mbc1 => Self::Mbc1 {
                rom_bank: 0x01,
                ram_bank: 0x00,
                ram_enabled: false,
                ram_banking_mode: false,
            },
            MapperType::Mbc2 => Self::Mbc2 {
                rom_bank: 0x01,
                ram_bank: 0x00,
                ram_enabled: false,
            },
            MapperType::Mbc3 => Self::Mbc3 {
                rom_bank: 0x01,
                ram_bank: 0x00,
                ram_enabled: false,
                rtc,
            },
            MapperType::Mbc5 => Self::Mbc5 {
                rom_bank: 0x0001,
                ram_bank: 0x00,
                ram_enabled: false,
            },
        }
    }

    pub(crate) fn rtc(&self) -> Option<&RealTimeClock> {
        match self {
            Self::Mbc3 { rtc, .. } => rtc.as_ref(),
            _ => None,
        }
    }

    /// Reads one 32-byte block. `address` must be block-aligned; the bus
    /// protocol only ever transfers aligned blocks and alignment is not
    /// re-validated here.
    pub(crate) fn read(
        &mut self,
        header: &CartridgeHeader,
        rom: &[u8],
        ram: &RamBacking,
        address: u16,
        data: &mut [u8; BLOCK_LEN],
        trace: &mut dyn TraceSink,
        now: SystemTime,
    ) {
        match self {
            Self::None => match address >> 13 {
                0..=3 => {
                    data.copy_from_slice(&rom[usize::from(address)..][..BLOCK_LEN]);
                    trace.event(TraceEvent::RomRead { bank: 0 });
                }
                5 => {
                    if !ram.is_present() {
                        data.fill(0x00);
                        trace.event(TraceEvent::RamMissing);
                    } else if header.quarter_sized_ram()
                        && usize::from(address - RAM_WINDOW_START) >= QUARTER_BLOCK_LEN
                    {
                        // only the first quarter of the RAM window exists
                        data.fill(0x00);
                        trace.event(TraceEvent::RamBankFault { bank: 0 });
                    } else {
                        read_ram(ram, 0, address, data, trace);
                    }
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            &mut Self::Mbc1 { rom_bank, ram_bank, .. } => match address >> 13 {
                0 | 1 => {
                    data.copy_from_slice(&rom[usize::from(address)..][..BLOCK_LEN]);
                    trace.event(TraceEvent::RomRead { bank: 0 });
                }
                2 | 3 => {
                    read_banked_rom(rom, header, u16::from(rom_bank), address, data, trace);
                }
                5 => {
                    // MBC1 quirk: reads are not gated on ram_enabled
                    read_banked_ram(ram, header, ram_bank, address, data, trace);
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            &mut Self::Mbc2 { rom_bank, ram_enabled, .. } => match address >> 13 {
                0 | 1 => {
                    data.copy_from_slice(&rom[usize::from(address)..][..BLOCK_LEN]);
                    trace.event(TraceEvent::RomRead { bank: 0 });
                }
                2 | 3 => {
                    read_banked_rom(rom, header, u16::from(rom_bank), address, data, trace);
                }
                5 => {
                    // unlike MBC1, MBC2 reads check the enable register
                    if !ram_enabled {
                        data.fill(0x00);
                        trace.event(TraceEvent::RamDisabled);
                    } else if !ram.is_present() {
                        data.fill(0x00);
                        trace.event(TraceEvent::RamMissing);
                    } else {
                        read_ram(ram, 0, address, data, trace);
                    }
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            Self::Mbc3 { rom_bank, ram_bank, rtc, .. } => match address >> 13 {
                0 | 1 => {
                    data.copy_from_slice(&rom[usize::from(address)..][..BLOCK_LEN]);
                    trace.event(TraceEvent::RomRead { bank: 0 });
                }
                2 | 3 => {
                    read_banked_rom(rom, header, u16::from(*rom_bank), address, data, trace);
                }
                5 => {
                    let register = *ram_bank;
                    if let (Some(rtc), RTC_REGISTER_FIRST..=RTC_REGISTER_LAST) =
                        (rtc.as_mut(), register)
                    {
                        // clock register broadcast across the whole block
                        let value = rtc.read_register(register, now).unwrap_or(0x00);
                        data.fill(value);
                        trace.event(TraceEvent::RtcRead {
                            register,
                            latched: rtc.latch_active(),
                        });
                    } else {
                        read_banked_ram(ram, header, register, address, data, trace);
                    }
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            &mut Self::Mbc5 { rom_bank, ram_bank, .. } => match address >> 13 {
                0 | 1 => {
                    data.copy_from_slice(&rom[usize::from(address)..][..BLOCK_LEN]);
                    trace.event(TraceEvent::RomRead { bank: 0 });
                }
                2 | 3 => {
                    read_banked_rom(rom, header, rom_bank, address, data, trace);
                }
                5 => {
                    read_banked_ram(ram, header, ram_bank, address, data, trace);
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
        }
    }

    /// Writes one 32-byte block. ROM-window writes never modify ROM; they
    /// feed the banking registers, one per 0x2000 window (0x1000 for the
    /// MBC5, which needs a third distinguishable write window).
    pub(crate) fn write(
        &mut self,
        header: &CartridgeHeader,
        ram: &mut RamBacking,
        address: u16,
        data: &[u8; BLOCK_LEN],
        trace: &mut dyn TraceSink,
        now: SystemTime,
    ) {
        match self {
            Self::None => match address >> 13 {
                // no banking registers; ROM-window writes are no-ops
                0..=3 => {}
                5 => {
                    if !ram.is_present() {
                        trace.event(TraceEvent::RamMissing);
                    } else if header.quarter_sized_ram()
                        && usize::from(address - RAM_WINDOW_START) >= QUARTER_BLOCK_LEN
                    {
                        trace.event(TraceEvent::RamBankFault { bank: 0 });
                    } else {
                        write_ram(ram, 0, address, data, trace);
                    }
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            Self::Mbc1 { rom_bank, ram_bank, ram_enabled, ram_banking_mode } => {
                match address >> 13 {
                    0 => {
                        *ram_enabled = data[0] == 0x0A;
                        trace.event(TraceEvent::RegisterWrite {
                            register: "ram_enable",
                            value: data[0],
                        });
                    }
                    1 => {
                        // low 5 bits, keeping the "magic bits" 5-6; a zero
                        // low field is forced to 1, so 0x00/0x20/0x40/0x60
                        // become 0x01/0x21/0x41/0x61
                        *rom_bank = (*rom_bank & 0x60) | (data[0] & 0x1F);
                        if *rom_bank & 0x1F == 0 {
                            *rom_bank |= 0x01;
                        }
                        trace.event(TraceEvent::RegisterWrite {
                            register: "rom_bank",
                            value: data[0],
                        });
                    }
                    2 => {
                        if *ram_banking_mode {
                            *ram_bank = data[0] & 0x03;
                            trace.event(TraceEvent::RegisterWrite {
                                register: "ram_bank",
                                value: data[0],
                            });
                        } else {
                            *rom_bank = (*rom_bank & 0x1F) | ((data[0] & 0x03) << 5);
                            trace.event(TraceEvent::RegisterWrite {
                                register: "rom_bank_high",
                                value: data[0],
                            });
                        }
                    }
                    3 => {
                        // the two magic bits are a single physical latch;
                        // on a mode change they move between ROM bank bits
                        // 5-6 and the RAM bank register
                        let mode = data[0] & 0x01 != 0;
                        if *ram_banking_mode != mode {
                            *ram_banking_mode = mode;
                            if mode {
                                *ram_bank = *rom_bank >> 5;
                                *rom_bank &= 0x1F;
                            } else {
                                *rom_bank = (*rom_bank & 0x1F) | (*ram_bank << 5);
                                *ram_bank = 0x00;
                            }
                        }
                        trace.event(TraceEvent::RegisterWrite {
                            register: "banking_mode",
                            value: data[0],
                        });
                    }
                    5 => {
                        // writes, like reads, ignore ram_enabled
                        write_banked_ram(ram, header, *ram_bank, address, data, trace);
                    }
                    _ => trace.event(TraceEvent::InvalidAddress { address }),
                }
            }
            Self::Mbc2 { rom_bank, ram_bank, ram_enabled } => match address >> 13 {
                0 => {
                    *ram_enabled = data[0] == 0x0A;
                    trace.event(TraceEvent::RegisterWrite {
                        register: "ram_enable",
                        value: data[0],
                    });
                }
                1 => {
                    *rom_bank = data[0] & 0x0F;
                    if *rom_bank == 0 {
                        *rom_bank = 0x01;
                    }
                    trace.event(TraceEvent::RegisterWrite {
                        register: "rom_bank",
                        value: data[0],
                    });
                }
                2 => {
                    if header.features.has_ram {
                        *ram_bank = data[0] & 0x07;
                        trace.event(TraceEvent::RegisterWrite {
                            register: "ram_bank",
                            value: data[0],
                        });
                    }
                }
                3 => {}
                5 => {
                    // writes go through the bank register even though reads
                    // are unbanked; carried over from observed behavior
                    write_banked_ram(ram, header, *ram_bank, address, data, trace);
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            Self::Mbc3 { rom_bank, ram_bank, ram_enabled, rtc } => match address >> 13 {
                0 => {
                    *ram_enabled = data[0] == 0x0A;
                    trace.event(TraceEvent::RegisterWrite {
                        register: "ram_enable",
                        value: data[0],
                    });
                }
                1 => {
                    *rom_bank = data[0] & 0x7F;
                    if *rom_bank == 0 {
                        *rom_bank = 0x01;
                    }
                    trace.event(TraceEvent::RegisterWrite {
                        register: "rom_bank",
                        value: data[0],
                    });
                }
                2 => match data[0] {
                    value @ 0x00..=0x03 if header.features.has_ram => {
                        *ram_bank = value;
                        trace.event(TraceEvent::RegisterWrite {
                            register: "ram_bank",
                            value,
                        });
                    }
                    value @ RTC_REGISTER_FIRST..=RTC_REGISTER_LAST
                        if header.features.has_timer =>
                    {
                        *ram_bank = value;
                        trace.event(TraceEvent::RegisterWrite {
                            register: "rtc_select",
                            value,
                        });
                    }
                    _ => {}
                },
                3 => {
                    if let Some(rtc) = rtc {
                        rtc.latch_write(data[0], now);
                        trace.event(TraceEvent::RtcLatch { active: rtc.latch_active() });
                    }
                }
                5 => {
                    let register = *ram_bank;
                    if let (Some(rtc), RTC_REGISTER_FIRST..=RTC_REGISTER_LAST) =
                        (rtc.as_mut(), register)
                    {
                        // one register at a time, regardless of block size
                        rtc.write_register(register, data[0]);
                        trace.event(TraceEvent::RtcWrite { register, value: data[0] });
                    } else {
                        write_banked_ram(ram, header, register, address, data, trace);
                    }
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
            Self::Mbc5 { rom_bank, ram_bank, ram_enabled } => match address >> 12 {
                0 | 1 => {
                    *ram_enabled = data[0] == 0x0A;
                    trace.event(TraceEvent::RegisterWrite {
                        register: "ram_enable",
                        value: data[0],
                    });
                }
                2 => {
                    *rom_bank = (*rom_bank & 0xFF00) | u16::from(data[0]);
                    trace.event(TraceEvent::RegisterWrite {
                        register: "rom_bank_low",
                        value: data[0],
                    });
                }
                3 => {
                    *rom_bank = (*rom_bank & 0x00FF) | (u16::from(data[0] & 0x01) << 8);
                    trace.event(TraceEvent::RegisterWrite {
                        register: "rom_bank_high",
                        value: data[0],
                    });
                }
                4 | 5 => {
                    if header.features.has_ram {
                        *ram_bank = data[0] & 0x0F;
                        trace.event(TraceEvent::RegisterWrite {
                            register: "ram_bank",
                            value: data[0],
                        });
                    }
                }
                6 | 7 => {}
                10 | 11 => {
                    write_banked_ram(ram, header, *ram_bank, address, data, trace);
                }
                _ => trace.event(TraceEvent::InvalidAddress { address }),
            },
        }
    }
}

fn read_banked_rom(
    rom: &[u8],
    header: &CartridgeHeader,
    bank: u16,
    address: u16,
    data: &mut [u8; BLOCK_LEN],
    trace: &mut dyn TraceSink,
) {
    if bank >= header.rom_bank_count {
        data.fill(0x00);
        trace.event(TraceEvent::RomBankFault { bank });
        return;
    }

    let offset = usize::from(address - ROM_BANKED_START) + (usize::from(bank) << 14);
    data.copy_from_slice(&rom[offset..offset + BLOCK_LEN]);
    trace.event(TraceEvent::RomRead { bank });
}

fn read_banked_ram(
    ram: &RamBacking,
    header: &CartridgeHeader,
    bank: u8,
    address: u16,
    data: &mut [u8; BLOCK_LEN],
    trace: &mut dyn TraceSink,
) {
    if !ram.is_present() {
        data.fill(0x00);
        trace.event(TraceEvent::RamMissing);
        return;
    }
    if bank >= header.ram_bank_count {
        data.fill(0x00);
        trace.event(TraceEvent::RamBankFault { bank });
        return;
    }

    read_ram(ram, bank, address, data, trace);
}

fn read_ram(
    ram: &RamBacking,
    bank: u8,
    address: u16,
    data: &mut [u8; BLOCK_LEN],
    trace: &mut dyn TraceSink,
) {
    let offset = usize::from(address - RAM_WINDOW_START) + (usize::from(bank) << 13);
    match ram.bytes().get(offset..offset + BLOCK_LEN) {
        Some(source) => {
            data.copy_from_slice(source);
            trace.event(TraceEvent::RamRead { bank });
        }
        // RAM image smaller than the addressed window (2KB carts)
        None => {
            data.fill(0x00);
            trace.event(TraceEvent::RamBankFault { bank });
        }
    }
}

fn write_banked_ram(
    ram: &mut RamBacking,
    header: &CartridgeHeader,
    bank: u8,
    address: u16,
    data: &[u8; BLOCK_LEN],
    trace: &mut dyn TraceSink,
) {
    if !ram.is_present() {
        trace.event(TraceEvent::RamMissing);
        return;
    }
    if bank >= header.ram_bank_count {
        trace.event(TraceEvent::RamBankFault { bank });
        return;
    }

    write_ram(ram, bank, address, data, trace);
}

fn write_ram(
    ram: &mut RamBacking,
    bank: u8,
    address: u16,
    data: &[u8; BLOCK_LEN],
    trace: &mut dyn TraceSink,
) {
    let offset = usize::from(address - RAM_WINDOW_START) + (usize::from(bank) << 13);
    match ram.bytes_mut().get_mut(offset..offset + BLOCK_LEN) {
        Some(dest) => {
            dest.copy_from_slice(data);
            trace.event(TraceEvent::RamWrite { bank });
        }
        None => trace.event(TraceEvent::RamBankFault { bank }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{MapperFeatures, RAM_BANK_LEN, ROM_BANK_LEN, TITLE_LEN};
    use crate::ram;
    use crate::trace::RecordingTraceSink;
    use std::time::{Duration, UNIX_EPOCH};

    fn header(mapper_type: MapperType, rom_banks: u16, ram_banks: u8) -> CartridgeHeader {
        CartridgeHeader {
            mapper_type,
            features: MapperFeatures {
                has_ram: ram_banks > 0,
                has_battery: false,
                has_timer: false,
                has_rumble: false,
            },
            rom_bank_count: rom_banks,
            ram_bank_count: ram_banks,
            ram_quarter_blocks: u16::from(ram_banks) * 4,
            title: [0; TITLE_LEN],
        }
    }

    /// ROM where every byte of bank N is N, so a read identifies its bank.
    fn stamped_rom(banks: u16) -> Vec<u8> {
        let mut rom = vec![0; usize::from(banks) * ROM_BANK_LEN];
        for (bank, chunk) in rom.chunks_mut(ROM_BANK_LEN).enumerate() {
            chunk.fill(bank as u8);
        }
        rom
    }

    fn stamped_ram(banks: u8) -> RamBacking {
        let mut data = vec![0; usize::from(banks) * RAM_BANK_LEN];
        for (bank, chunk) in data.chunks_mut(RAM_BANK_LEN).enumerate() {
            chunk.fill(0xA0 | bank as u8);
        }
        RamBacking::Heap { data, read_only: false }
    }

    fn now() -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(1_000_000)
    }

    fn read_first(
        mapper: &mut Mapper,
        header: &CartridgeHeader,
        rom: &[u8],
        ram: &RamBacking,
        address: u16,
    ) -> [u8; BLOCK_LEN] {
        let mut data = [0xEE; BLOCK_LEN];
        let mut sink = RecordingTraceSink::new();
        mapper.read(header, rom, ram, address, &mut data, &mut sink, now());
        data
    }

    fn write_byte(
        mapper: &mut Mapper,
        header: &CartridgeHeader,
        ram: &mut RamBacking,
        address: u16,
        value: u8,
    ) {
        let mut sink = RecordingTraceSink::new();
        mapper.write(header, ram, address, &[value; BLOCK_LEN], &mut sink, now());
    }

    #[test]
    fn bank0_window_is_fixed_and_immutable() {
        for mapper_type in [
            MapperType::None,
            MapperType::Mbc1,
            MapperType::Mbc2,
            MapperType::Mbc3,
            MapperType::Mbc5,
        ] {
            let header = header(mapper_type, 16, 0);
            let rom = stamped_rom(16);
            let mut ram = RamBacking::None;
            let mut mapper = Mapper::new(&header, None);

            // scribble over every ROM window
            for address in [0x0000, 0x2000, 0x4000, 0x6000] {
                write_byte(&mut mapper, &header, &mut ram, address, 0x0A);
            }

            let data = read_first(&mut mapper, &header, &rom, &ram, 0x0000);
            assert_eq!([0; BLOCK_LEN], data, "{mapper_type:?}");
            let data = read_first(&mut mapper, &header, &rom, &ram, 0x3FE0);
            assert_eq!([0; BLOCK_LEN], data, "{mapper_type:?}");
        }
    }

    #[test]
    fn mbc1_zero_bank_writes_are_forced_to_one() {
        let header = header(MapperType::Mbc1, 128, 0);
        let rom = stamped_rom(128);
        let mut ram = RamBacking::None;
        let mut mapper = Mapper::new(&header, None);

        for (written, effective) in [(0x00, 0x01), (0x05, 0x05), (0x1F, 0x1F)] {
            write_byte(&mut mapper, &header, &mut ram, 0x2000, written);
            let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
            assert_eq!([effective; BLOCK_LEN], data, "wrote {written:02X}");
        }

        // with the magic bits set, 0x20/0x40/0x60 become 0x21/0x41/0x61
        for (high_bits, written, effective) in
            [(0x01, 0x00, 0x21), (0x02, 0x00, 0x41), (0x03, 0x00, 0x61)]
        {
            write_byte(&mut mapper, &header, &mut ram, 0x4000, high_bits);
            write_byte(&mut mapper, &header, &mut ram, 0x2000, written);
            let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
            assert_eq!([effective; BLOCK_LEN], data, "high bits {high_bits:02X}");
        }
    }

    #[test]
    fn mbc1_mode_toggle_round_trips_the_magic_bits() {
        let header = header(MapperType::Mbc1, 128, 4);
        let rom = stamped_rom(128);
        let mut ram = stamped_ram(4);
        let mut mapper = Mapper::new(&header, None);

        write_byte(&mut mapper, &header, &mut ram, 0x2000, 0x05);
        write_byte(&mut mapper, &header, &mut ram, 0x4000, 0x02);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x45; BLOCK_LEN], data);

        // entering RAM-banking mode moves bits 5-6 into the RAM bank
        write_byte(&mut mapper, &header, &mut ram, 0x6000, 0x01);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x05; BLOCK_LEN], data);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0xA2; BLOCK_LEN], data);

        // leaving reverses the move exactly and resets the RAM bank
        write_byte(&mut mapper, &header, &mut ram, 0x6000, 0x00);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x45; BLOCK_LEN], data);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0xA0; BLOCK_LEN], data);
    }

    #[test]
    fn mbc1_redundant_mode_write_does_not_shuffle() {
        let header = header(MapperType::Mbc1, 128, 4);
        let rom = stamped_rom(128);
        let mut ram = stamped_ram(4);
        let mut mapper = Mapper::new(&header, None);

        write_byte(&mut mapper, &header, &mut ram, 0x2000, 0x05);
        write_byte(&mut mapper, &header, &mut ram, 0x4000, 0x02);

        // already in ROM-banking mode; writing 0 again must not touch banks
        write_byte(&mut mapper, &header, &mut ram, 0x6000, 0x00);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x45; BLOCK_LEN], data);
    }

    #[test]
    fn mbc1_ram_reads_ignore_enable_state() {
        let header = header(MapperType::Mbc1, 4, 1);
        let rom = stamped_rom(4);
        let ram = stamped_ram(1);
        let mut mapper = Mapper::new(&header, None);

        // RAM never enabled
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0xA0; BLOCK_LEN], data);
    }

    #[test]
    fn mbc2_ram_reads_gate_on_enable_state() {
        let header = header(MapperType::Mbc2, 4, 1);
        let rom = stamped_rom(4);
        let mut ram = stamped_ram(1);
        let mut mapper = Mapper::new(&header, None);

        let mut data = [0; BLOCK_LEN];
        let mut sink = RecordingTraceSink::new();
        mapper.read(&header, &rom, &ram, 0xA000, &mut data, &mut sink, now());
        assert_eq!([0x00; BLOCK_LEN], data);
        assert_eq!(vec![TraceEvent::RamDisabled], sink.events);

        write_byte(&mut mapper, &header, &mut ram, 0x0000, 0x0A);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0xA0; BLOCK_LEN], data);
    }

    #[test]
    fn out_of_range_rom_bank_reads_zero_without_state_change() {
        let header = header(MapperType::Mbc3, 16, 0);
        let rom = stamped_rom(16);
        let mut ram = RamBacking::None;
        let mut mapper = Mapper::new(&header, None);

        write_byte(&mut mapper, &header, &mut ram, 0x2000, 0x42);

        let mut data = [0xEE; BLOCK_LEN];
        let mut sink = RecordingTraceSink::new();
        mapper.read(&header, &rom, &ram, 0x4000, &mut data, &mut sink, now());
        assert_eq!([0x00; BLOCK_LEN], data);
        assert_eq!(vec![TraceEvent::RomBankFault { bank: 0x42 }], sink.events);

        // selecting a valid bank afterwards works normally
        write_byte(&mut mapper, &header, &mut ram, 0x2000, 0x0F);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x0F; BLOCK_LEN], data);
    }

    #[test]
    fn mbc5_nine_bit_bank_select() {
        let header = header(MapperType::Mbc5, 16, 0);
        let rom = stamped_rom(16);
        let mut ram = RamBacking::None;
        let mut mapper = Mapper::new(&header, None);

        write_byte(&mut mapper, &header, &mut ram, 0x2000, 0x05);
        write_byte(&mut mapper, &header, &mut ram, 0x3000, 0x00);

        let mut data = [0; BLOCK_LEN];
        let mut sink = RecordingTraceSink::new();
        mapper.read(&header, &rom, &ram, 0x4000, &mut data, &mut sink, now());
        assert_eq!(rom[0x14000..0x14020], data);
        assert_eq!(vec![TraceEvent::RomRead { bank: 5 }], sink.events);

        // bit 8 pushes the bank out of range for this 16-bank ROM
        write_byte(&mut mapper, &header, &mut ram, 0x3000, 0x01);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x00; BLOCK_LEN], data);
    }

    #[test]
    fn mbc5_bank_zero_is_selectable() {
        let header = header(MapperType::Mbc5, 16, 0);
        let rom = stamped_rom(16);
        let mut ram = RamBacking::None;
        let mut mapper = Mapper::new(&header, None);

        write_byte(&mut mapper, &header, &mut ram, 0x2000, 0x00);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0x4000);
        assert_eq!([0x00; BLOCK_LEN], data);
    }

    #[test]
    fn mbc3_rtc_latch_reads_through_ram_window() {
        let mut header = header(MapperType::Mbc3, 4, 4);
        header.features.has_timer = true;
        let rom = stamped_rom(4);
        let mut ram = stamped_ram(4);

        let start = UNIX_EPOCH + Duration::from_secs(500_000);
        let mut mapper = Mapper::new(&header, Some(RealTimeClock::new(start)));
        let later = start + Duration::from_secs(3661);

        let mut sink = RecordingTraceSink::new();
        // latch 1h 1m 1s after power-on
        mapper.write(&header, &mut ram, 0x6000, &[0x01; BLOCK_LEN], &mut sink, later);

        for (select, expected) in [(0x08, 1), (0x09, 1), (0x0A, 1), (0x0B, 0), (0x0C, 0)] {
            mapper.write(&header, &mut ram, 0x4000, &[select; BLOCK_LEN], &mut sink, later);
            let mut data = [0xEE; BLOCK_LEN];
            mapper.read(&header, &rom, &ram, 0xA000, &mut data, &mut sink, later);
            assert_eq!([expected; BLOCK_LEN], data, "register {select:02X}");
        }

        // RAM banks 0-3 still map normally alongside the clock
        mapper.write(&header, &mut ram, 0x4000, &[0x02; BLOCK_LEN], &mut sink, later);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0xA2; BLOCK_LEN], data);
    }

    #[test]
    fn mbc3_rtc_write_takes_only_the_low_byte() {
        let mut header = header(MapperType::Mbc3, 4, 4);
        header.features.has_timer = true;
        let rom = stamped_rom(4);
        let mut ram = stamped_ram(4);

        let start = UNIX_EPOCH + Duration::from_secs(500_000);
        let mut mapper = Mapper::new(&header, Some(RealTimeClock::new(start)));
        let mut sink = RecordingTraceSink::new();

        mapper.write(&header, &mut ram, 0x4000, &[0x0A; BLOCK_LEN], &mut sink, start);
        let mut block = [0x00; BLOCK_LEN];
        block[0] = 0x17;
        mapper.write(&header, &mut ram, 0xA000, &block, &mut sink, start);

        let mut data = [0x00; BLOCK_LEN];
        mapper.read(&header, &rom, &ram, 0xA000, &mut data, &mut sink, start);
        assert_eq!([0x17; BLOCK_LEN], data);

        // RAM bank 2 contents untouched by the clock write
        mapper.write(&header, &mut ram, 0x4000, &[0x02; BLOCK_LEN], &mut sink, start);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0xA2; BLOCK_LEN], data);
    }

    #[test]
    fn flat_cart_quarter_sized_ram_window() {
        let mut header = header(MapperType::None, 2, 1);
        header.ram_quarter_blocks = 1;
        let rom = stamped_rom(2);
        let mut ram = RamBacking::Heap {
            data: ram::power_on_buffer(QUARTER_BLOCK_LEN),
            read_only: false,
        };
        let mut mapper = Mapper::new(&header, None);

        write_byte(&mut mapper, &header, &mut ram, 0xA000, 0x5A);
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA000);
        assert_eq!([0x5A; BLOCK_LEN], data);

        // past the first quarter: reads are zero, writes dropped
        let data = read_first(&mut mapper, &header, &rom, &ram, 0xA800);
        assert_eq!([0x00; BLOCK_LEN], data);
        write_byte(&mut mapper, &header, &mut ram, 0xA800, 0x77);
        assert!(!ram.bytes().contains(&0x77));
    }

    #[test]
    fn ram_access_without_ram_degrades_silently() {
        let header = header(MapperType::Mbc5, 4, 0);
        let rom = stamped_rom(4);
        let mut ram = RamBacking::None;
        let mut mapper = Mapper::new(&header, None);

        let mut data = [0xEE; BLOCK_LEN];
        let mut sink = RecordingTraceSink::new();
        mapper.read(&header, &rom, &ram, 0xA000, &mut data, &mut sink, now());
        assert_eq!([0x00; BLOCK_LEN], data);
        assert_eq!(vec![TraceEvent::RamMissing], sink.events);

        write_byte(&mut mapper, &header, &mut ram, 0xA000, 0x11);
    }

    #[test]
    fn invalid_windows_are_no_ops() {
        let header = header(MapperType::Mbc1, 4, 0);
        let rom = stamped_rom(4);
        let ram = RamBacking::None;
        let mut mapper = Mapper::new(&header, None);

        let mut data = [0xEE; BLOCK_LEN];
        let mut sink = RecordingTraceSink::new();
        mapper.read(&header, &rom, &ram, 0x8000, &mut data, &mut sink, now());
        mapper.read(&header, &rom, &ram, 0xC000, &mut data, &mut sink, now());
        mapper.read(&header, &rom, &ram, 0xE000, &mut data, &mut sink, now());

        // buffer untouched, only diagnostics emitted
        assert_eq!([0xEE; BLOCK_LEN], data);
        assert_eq!(
            vec![
                TraceEvent::InvalidAddress { address: 0x8000 },
                TraceEvent::InvalidAddress { address: 0xC000 },
                TraceEvent::InvalidAddress { address: 0xE000 },
            ],
            sink.events
        );
    }
}
