//! Compressed save container interop.
//!
//! Some save files are 64KB flash-image containers holding multiple
//! compressed SRAM payloads keyed by cartridge title. Compression and
//! container layout live behind [`ContainerCodec`] so the core never has
//! to know the wire format; it only detects the magic and delegates.

use thiserror::Error;

/// First four bytes of a container image, little-endian.
pub const CONTAINER_MAGIC: u32 = 0x57A7_31D8;

/// Containers are full 64KB flash images.
pub const CONTAINER_LEN: usize = 0x10000;

/// Where a cartridge's payload sits inside the container image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerEntry {
    pub offset: usize,
}

#[derive(Debug, Clone, Error)]
#[error("container codec: {0}")]
pub struct CodecError(pub String);

/// Decodes and re-encodes one cartridge's payload inside a container
/// image. Implementations own the compression format entirely.
pub trait ContainerCodec {
    /// Locates the entry whose stored title matches `title` (NUL-padded
    /// internal title bytes). None when the container holds no save for
    /// this cartridge.
    fn find_entry(&self, blob: &[u8], title: &[u8]) -> Option<ContainerEntry>;

    /// Decompresses the payload at `entry` into raw SRAM bytes.
    fn extract(&self, blob: &[u8], entry: ContainerEntry) -> Result<Vec<u8>, CodecError>;

    /// Re-encodes `payload` into `blob` at `entry`, returning the full
    /// updated container image.
    fn repack(
        &self,
        blob: &[u8],
        entry: ContainerEntry,
        payload: &[u8],
    ) -> Result<Vec<u8>, CodecError>;
}

/// Returns true if `bytes` starts with the container magic.
pub fn detect(bytes: &[u8]) -> bool {
    bytes.len() >= 4
        && u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) == CONTAINER_MAGIC
}

/// Codec used when no container support is wired in: detection still
/// works, but every lookup misses and every transcode fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullContainerCodec;

impl ContainerCodec for NullContainerCodec {
    fn find_entry(&self, _blob: &[u8], _title: &[u8]) -> Option<ContainerEntry> {
        None
    }

    fn extract(&self, _blob: &[u8], _entry: ContainerEntry) -> Result<Vec<u8>, CodecError> {
        Err(CodecError("no codec configured".into()))
    }

    fn repack(
        &self,
        _blob: &[u8],
        _entry: ContainerEntry,
        _payload: &[u8],
    ) -> Result<Vec<u8>, CodecError> {
        Err(CodecError("no codec configured".into()))
    }
}
