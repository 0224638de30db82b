use std::fmt::Formatter;

/// ROM banks are 16KB, RAM banks are 8KB. Cartridges whose RAM is smaller
/// than a full bank are measured in 2KB quarter-blocks.
pub const ROM_BANK_LEN: usize = 0x4000;
pub const RAM_BANK_LEN: usize = 0x2000;
pub const QUARTER_BLOCK_LEN: usize = 0x0800;

pub const TITLE_LEN: usize = 15;

const MAPPER_TYPE_ADDRESS: usize = 0x147;
const ROM_SIZE_ADDRESS: usize = 0x148;
const RAM_SIZE_ADDRESS: usize = 0x149;
const TITLE_ADDRESS: usize = 0x134;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapperType {
    None,
    Mbc1,
    Mbc2,
    Mbc3,
    Mbc5,
    Mmm01,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapperFeatures {
    pub has_ram: bool,
    pub has_battery: bool,
    pub has_timer: bool,
    pub has_rumble: bool,
}

impl std::fmt::Display for MapperFeatures {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "has_ram={}, has_battery={}, has_timer={}, has_rumble={}",
            self.has_ram, self.has_battery, self.has_timer, self.has_rumble
        )
    }
}

fn parse_mapper_byte(mapper_byte: u8) -> Option<(MapperType, MapperFeatures)> {
    let (mapper_type, has_ram, has_battery, has_timer, has_rumble) = match mapper_byte {
        0x00 => (MapperType::None, false, false, false, false),
        0x01 => (MapperType::Mbc1, false, false, false, false),
        0x02 => (MapperType::Mbc1, true, false, false, false),
        0x03 => (MapperType::Mbc1, true, true, false, false),
        // MBC2 has on-chip RAM that is not declared through the header RAM size byte
        0x05 => (MapperType::Mbc2, false, false, false, false),
        0x06 => (MapperType::Mbc2, false, true, false, false),
        0x08 => (MapperType::None, true, false, false, false),
        0x09 => (MapperType::None, true, true, false, false),
        0x0B => (MapperType::Mmm01, false, false, false, false),
        0x0C => (MapperType::Mmm01, true, false, false, false),
        0x0D => (MapperType::Mmm01, true, true, false, false),
        0x0F => (MapperType::Mbc3, false, true, true, false),
        0x10 => (MapperType::Mbc3, true, true, true, false),
        0x11 => (MapperType::Mbc3, false, false, false, false),
        0x12 | 0x13 => (MapperType::Mbc3, true, true, false, false),
        0x19 => (MapperType::Mbc5, false, false, false, false),
        0x1A => (MapperType::Mbc5, true, false, false, false),
        0x1B => (MapperType::Mbc5, true, true, false, false),
        0x1C => (MapperType::Mbc5, false, false, false, true),
        0x1D => (MapperType::Mbc5, true, false, false, true),
        0x1E => (MapperType::Mbc5, true, true, false, true),
        _ => return None,
    };

    let features = MapperFeatures {
        has_ram,
        has_battery,
        has_timer,
        has_rumble,
    };
    Some((mapper_type, features))
}

fn rom_bank_count(rom_size_byte: u8) -> u16 {
    match rom_size_byte {
        0x01 => 4,
        0x02 => 8,
        0x03 => 16,
        0x04 => 32,
        0x05 => 64,
        0x06 => 128,
        0x52 => 72,
        0x53 => 80,
        0x54 => 96,
        _ => 2,
    }
}

fn ram_bank_counts(ram_size_byte: u8) -> (u8, u16) {
    match ram_size_byte {
        0x01 => (1, 1),
        0x02 => (1, 4),
        0x03 => (4, 16),
        0x04 => (16, 64),
        0x05 => (8, 32),
        _ => (0, 0),
    }
}

/// Cartridge identity, decoded once from the ROM header at load time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CartridgeHeader {
    pub mapper_type: MapperType,
    pub features: MapperFeatures,
    pub rom_bank_count: u16,
    pub ram_bank_count: u8,
    pub ram_quarter_blocks: u16,
    /// Internal title, NUL-padded; used as the lookup key in compressed
    /// save containers.
    pub title: [u8; TITLE_LEN],
}

impl CartridgeHeader {
    /// Decodes the header fields this crate consumes. Returns None if the
    /// cartridge type byte is not a known value.
    ///
    /// The caller must have already verified that `rom` is at least 32KB.
    pub(crate) fn parse(rom: &[u8]) -> Option<Self> {
        let (mapper_type, features) = parse_mapper_byte(rom[MAPPER_TYPE_ADDRESS])?;
        let rom_bank_count = rom_bank_count(rom[ROM_SIZE_ADDRESS]);
        let (ram_bank_count, ram_quarter_blocks) = ram_bank_counts(rom[RAM_SIZE_ADDRESS]);

        let mut title = [0; TITLE_LEN];
        title.copy_from_slice(&rom[TITLE_ADDRESS..TITLE_ADDRESS + TITLE_LEN]);

        Some(Self {
            mapper_type,
            features,
            rom_bank_count,
            ram_bank_count,
            ram_quarter_blocks,
            title,
        })
    }

    pub fn rom_size(&self) -> usize {
        usize::from(self.rom_bank_count) * ROM_BANK_LEN
    }

    /// Size of the battery-backed portion of a plain save file, not
    /// counting any RTC trailer.
    pub fn save_ram_len(&self) -> usize {
        usize::from(self.ram_quarter_blocks) * QUARTER_BLOCK_LEN
    }

    /// Carts with RAM size code 0x01 expose only 0xA000-0xA7FF; the rest
    /// of the RAM window is open bus.
    pub fn quarter_sized_ram(&self) -> bool {
        self.ram_quarter_blocks == 1
    }

    pub fn title_str(&self) -> String {
        let end = self.title.iter().position(|&b| b == 0).unwrap_or(TITLE_LEN);
        String::from_utf8_lossy(&self.title[..end]).into_owned()
    }
}
