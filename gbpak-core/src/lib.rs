//! Game Boy cartridge core: header decoding, MBC banking, the MBC3
//! real-time clock, and battery save persistence, exposed through a
//! block-oriented bus.
//!
//! The host talks to a [`Cartridge`] in aligned 32-byte blocks. Reads and
//! writes inside the cartridge address space (0x0000-0x7FFF ROM,
//! 0xA000-0xBFFF RAM) are routed through the mapper chip the header
//! declares; everything else degrades the way real hardware does, with a
//! diagnostic trace instead of an error.

mod container;
mod header;
mod mapper;
mod ram;
mod save;
mod trace;

pub use container::{
    detect as is_container, CodecError, ContainerCodec, ContainerEntry, NullContainerCodec,
    CONTAINER_LEN, CONTAINER_MAGIC,
};
pub use header::{
    CartridgeHeader, MapperFeatures, MapperType, QUARTER_BLOCK_LEN, RAM_BANK_LEN, ROM_BANK_LEN,
    TITLE_LEN,
};
pub use mapper::rtc::{SystemTimeSource, TimeSource};
pub use save::{RamWarning, SaveError};
pub use trace::{LogTraceSink, RecordingTraceSink, TraceEvent, TraceSink};

use mapper::Mapper;
use ram::RamBacking;
use save::SaveBinding;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Bus transfers are always this many bytes, aligned to this boundary.
pub const BLOCK_LEN: usize = 32;

const MIN_ROM_LEN: usize = 2 * ROM_BANK_LEN;

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("unable to read ROM file: {source}")]
    RomNotFound {
        #[from]
        source: io::Error,
    },
    #[error("ROM is too small to contain a cartridge header ({size} bytes)")]
    RomTooSmall { size: usize },
    #[error("unsupported cartridge type byte {type_byte:#04X}")]
    UnsupportedMapperType { type_byte: u8 },
    #[error("ROM is {actual} bytes but the header declares {expected}")]
    RomSizeMismatch { expected: usize, actual: usize },
}

/// Everything injectable about a cartridge load. [`Default`] wires in the
/// real wall clock, log-based tracing, no save paths, and no container
/// codec.
pub struct LoadOptions {
    /// Battery save path. Plain RAM image or a compressed container,
    /// detected by magic.
    pub ram_path: Option<PathBuf>,
    /// Companion file for MBC3 clock state when the save itself cannot
    /// carry a trailer.
    pub rtc_path: Option<PathBuf>,
    /// Take an exclusive advisory lock while rewriting a container.
    pub lock_container: bool,
    pub codec: Box<dyn ContainerCodec>,
    pub clock: Box<dyn TimeSource>,
    pub trace: Box<dyn TraceSink>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            ram_path: None,
            rtc_path: None,
            lock_container: false,
            codec: Box::new(NullContainerCodec),
            clock: Box::new(SystemTimeSource),
            trace: Box::new(LogTraceSink),
        }
    }
}

pub struct LoadOutcome {
    pub cartridge: Cartridge,
    /// Degraded-load conditions worth surfacing to the user.
    pub warnings: Vec<RamWarning>,
}

impl fmt::Debug for LoadOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadOutcome")
            .field("cartridge", &self.cartridge)
            .field("warnings", &self.warnings)
            .finish()
    }
}

/// A loaded cartridge: ROM image, mapper state, RAM backing, and the
/// persistence wiring established at load time.
pub struct Cartridge {
    header: CartridgeHeader,
    rom: Vec<u8>,
    ram: RamBacking,
    mapper: Mapper,
    binding: SaveBinding,
    rtc_companion: Option<PathBuf>,
    lock_container: bool,
    codec: Box<dyn ContainerCodec>,
    clock: Box<dyn TimeSource>,
    trace: Box<dyn TraceSink>,
}

// manual impl: the injected codec/clock/trace boxes are not Debug
impl fmt::Debug for Cartridge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cartridge")
            .field("header", &self.header)
            .field("binding", &self.binding)
            .field("mapper", &self.mapper)
            .finish_non_exhaustive()
    }
}

impl Cartridge {
    /// Reads a ROM file from disk and loads it. See [`Cartridge::from_rom`].
    pub fn load(path: &Path, options: LoadOptions) -> Result<LoadOutcome, LoadError> {
        let rom = std::fs::read(path)?;
        Self::from_rom(rom, options)
    }

    /// Loads a cartridge from an in-memory ROM image, attaching battery
    /// RAM and clock state according to `options`.
    pub fn from_rom(rom: Vec<u8>, options: LoadOptions) -> Result<LoadOutcome, LoadError> {
        if rom.len() < MIN_ROM_LEN {
            return Err(LoadError::RomTooSmall { size: rom.len() });
        }

        let type_byte = rom[0x147];
        let header = CartridgeHeader::parse(&rom)
            .ok_or(LoadError::UnsupportedMapperType { type_byte })?;
        if header.mapper_type == MapperType::Mmm01 {
            // multi-game carts remap the header area itself; refuse rather
            // than misbank
            return Err(LoadError::UnsupportedMapperType { type_byte });
        }

        let expected = header.rom_size();
        if rom.len() != expected {
            return Err(LoadError::RomSizeMismatch { expected, actual: rom.len() });
        }

        log::info!(
            "Loaded \"{}\": {:?}, {} ROM banks, {} RAM quarter-blocks, {}",
            header.title_str(),
            header.mapper_type,
            header.rom_bank_count,
            header.ram_quarter_blocks,
            header.features,
        );

        let loaded = save::load_ram(
            &header,
            options.ram_path.as_deref(),
            options.rtc_path.as_deref(),
            options.codec.as_ref(),
            options.clock.now(),
        );
        for warning in &loaded.warnings {
            log::warn!("{warning}");
        }

        let mapper = Mapper::new(&header, loaded.rtc);
        let cartridge = Self {
            header,
            rom,
            ram: loaded.ram,
            mapper,
            binding: loaded.binding,
            rtc_companion: loaded.use_companion.then(|| options.rtc_path).flatten(),
            lock_container: options.lock_container,
            codec: options.codec,
            clock: options.clock,
            trace: options.trace,
        };

        Ok(LoadOutcome { cartridge, warnings: loaded.warnings })
    }

    pub fn header(&self) -> &CartridgeHeader {
        &self.header
    }

    /// The live RAM image. Battery saves persist exactly the first
    /// [`CartridgeHeader::save_ram_len`] bytes of this.
    pub fn ram(&self) -> &[u8] {
        self.ram.bytes()
    }

    /// Reads the 32-byte block at `address` into `data`. Addresses outside
    /// the cartridge windows leave `data` untouched.
    pub fn read(&mut self, address: u16, data: &mut [u8; BLOCK_LEN]) {
        self.mapper.read(
            &self.header,
            &self.rom,
            &self.ram,
            address,
            data,
            self.trace.as_mut(),
            self.clock.now(),
        );
    }

    /// Writes the 32-byte block `data` at `address`. ROM-window writes
    /// drive the banking registers; RAM-window writes store data.
    pub fn write(&mut self, address: u16, data: &[u8; BLOCK_LEN]) {
        self.mapper.write(
            &self.header,
            &mut self.ram,
            address,
            data,
            self.trace.as_mut(),
            self.clock.now(),
        );
    }

    /// Persists battery RAM and clock state through the binding chosen at
    /// load time. Safe to call repeatedly; a cartridge with nothing to
    /// persist is a no-op.
    pub fn save(&mut self) -> Result<(), SaveError> {
        save::save_ram(
            &self.header,
            &mut self.ram,
            &self.binding,
            self.mapper.rtc(),
            self.rtc_companion.as_deref(),
            self.codec.as_ref(),
            self.lock_container,
        )
    }

    /// Final save before the cartridge is dropped.
    pub fn unload(mut self) -> Result<(), SaveError> {
        self.save()
    }
}
