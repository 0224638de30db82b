use std::fs::File;
use std::io::{self, Seek, SeekFrom, Write};

/// How the cartridge RAM image is held in memory and persisted.
///
/// The banking engine only ever sees the byte buffer; whether those bytes
/// came from a writable save file, a read-only fallback copy, or a
/// compressed container entry is the save lifecycle's business.
#[derive(Debug)]
pub(crate) enum RamBacking {
    /// Cartridge has no RAM (or none was requested).
    None,
    /// Heap buffer. Either ephemeral (no battery), a read-only fallback
    /// copy of an unwritable save file, or container-derived bytes that
    /// are synced through the container codec on save.
    Heap { data: Vec<u8>, read_only: bool },
    /// Buffer loaded from a writable save file; the prefix is written back
    /// through the retained handle on save.
    File { data: Vec<u8>, file: File },
}

impl RamBacking {
    pub(crate) fn is_present(&self) -> bool {
        !matches!(self, Self::None)
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        match self {
            Self::None => &[],
            Self::Heap { data, .. } | Self::File { data, .. } => data,
        }
    }

    pub(crate) fn bytes_mut(&mut self) -> &mut [u8] {
        match self {
            Self::None => &mut [],
            // Read-only backings still accept bus writes; the changes are
            // simply never persisted.
            Self::Heap { data, .. } | Self::File { data, .. } => data,
        }
    }

    pub(crate) fn file_mut(&mut self) -> Option<&mut File> {
        match self {
            Self::File { file, .. } => Some(file),
            _ => None,
        }
    }

    /// Writes the first `len` bytes back to the save file, leaving any
    /// trailing file contents untouched. No-op for heap backings.
    pub(crate) fn flush_prefix(&mut self, len: usize) -> io::Result<()> {
        let Self::File { data, file } = self else {
            return Ok(());
        };

        let len = len.min(data.len());
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&data[..len])?;
        file.flush()
    }
}

/// Fills a buffer with the SRAM power-on pattern: alternating 128-byte
/// blocks of 0x00 and 0xFF.
pub(crate) fn power_on_fill(data: &mut [u8]) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte = if i & 0x80 == 0x80 { 0xFF } else { 0x00 };
    }
}

pub(crate) fn power_on_buffer(len: usize) -> Vec<u8> {
    let mut data = vec![0; len];
    power_on_fill(&mut data);
    data
}
