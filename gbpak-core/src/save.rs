//! Battery RAM persistence: loading save images (plain files, compressed
//! containers, read-only fallbacks), the MBC3 clock trailer, and the
//! write-back paths used on save/unload.

use crate::container::{self, ContainerCodec};
use crate::header::CartridgeHeader;
use crate::mapper::rtc::{RealTimeClock, RtcRegisters};
use crate::ram::{self, RamBacking};
use fs2::FileExt;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Plain save files for timer cartridges carry the clock state after the
/// RAM image: 5 live register bytes, 5 latched register bytes, and the
/// last-update Unix timestamp as a little-endian u64.
pub(crate) const RTC_TRAILER_LEN: usize = 18;

/// Where save-RAM changes go when the cartridge is saved or unloaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SaveBinding {
    /// Nothing to persist: no battery, no usable save path, or a
    /// read-only fallback.
    None,
    /// Write the RAM image (plus clock trailer) back to the file the
    /// backing holds open.
    PlainFile,
    /// Repack the RAM image into its entry in a compressed container.
    Container { path: PathBuf, payload_len: usize },
}

/// Degraded-load conditions. None of these abort the load; the cartridge
/// comes up with power-on RAM or an unpersisted copy instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RamWarning {
    #[error("save RAM file could not be opened for writing; changes will not persist")]
    RamFileUnavailable,
    #[error("save RAM file is smaller than the cartridge expects; missing bytes use the power-on pattern")]
    RamSizeMismatch,
    #[error("compressed save container has no usable payload for this cartridge")]
    ContainerPayloadCorrupt,
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("unable to reopen save container: {source}")]
    ContainerFileUnavailable {
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    ContainerRepackFailed(#[from] container::CodecError),
    #[error("unable to write save data: {source}")]
    WriteFailed {
        #[source]
        source: io::Error,
    },
    #[error("unable to serialize clock state: {source}")]
    RtcSerialize {
        #[source]
        source: bincode::Error,
    },
}

#[derive(Debug)]
pub(crate) struct LoadedRam {
    pub(crate) ram: RamBacking,
    pub(crate) binding: SaveBinding,
    pub(crate) rtc: Option<RealTimeClock>,
    /// Persist the clock through the bincode companion file on save.
    pub(crate) use_companion: bool,
    pub(crate) warnings: Vec<RamWarning>,
}

/// Builds the RAM backing and clock for a freshly loaded cartridge.
///
/// Battery cartridges try, in order: a writable save file (plain image or
/// compressed container), a read-only copy, and finally an ephemeral
/// power-on buffer. Every degraded step is reported through `warnings`.
pub(crate) fn load_ram(
    header: &CartridgeHeader,
    ram_path: Option<&Path>,
    rtc_path: Option<&Path>,
    codec: &dyn ContainerCodec,
    now: SystemTime,
) -> LoadedRam {
    let mut warnings = Vec::new();
    let mut trailer_rtc = None;

    let (ram, binding) = if !header.features.has_ram {
        (RamBacking::None, SaveBinding::None)
    } else if !header.features.has_battery {
        // volatile RAM, full banks, never persisted
        let len = usize::from(header.ram_bank_count) * crate::header::RAM_BANK_LEN;
        (
            RamBacking::Heap { data: ram::power_on_buffer(len), read_only: false },
            SaveBinding::None,
        )
    } else if let Some(path) = ram_path {
        load_battery_ram(header, path, codec, &mut warnings, &mut trailer_rtc)
    } else {
        (
            RamBacking::Heap {
                data: ram::power_on_buffer(header.save_ram_len()),
                read_only: false,
            },
            SaveBinding::None,
        )
    };

    let mut rtc = None;
    if header.features.has_timer {
        let mut clock = trailer_rtc
            .or_else(|| rtc_path.and_then(load_companion))
            .unwrap_or_else(|| RealTimeClock::new(now));
        clock.update(now);
        rtc = Some(clock);
    }
    let use_companion =
        header.features.has_timer && header.features.has_battery && rtc_path.is_some();

    LoadedRam { ram, binding, rtc, use_companion, warnings }
}

fn load_battery_ram(
    header: &CartridgeHeader,
    path: &Path,
    codec: &dyn ContainerCodec,
    warnings: &mut Vec<RamWarning>,
    trailer_rtc: &mut Option<RealTimeClock>,
) -> (RamBacking, SaveBinding) {
    let expected = header.save_ram_len();

    match OpenOptions::new().read(true).write(true).create(true).open(path) {
        Ok(mut file) => {
            let mut bytes = Vec::new();
            if let Err(err) = file.read_to_end(&mut bytes) {
                log::error!("Failed to read save file {}: {err}", path.display());
                warnings.push(RamWarning::RamFileUnavailable);
                return (
                    RamBacking::Heap {
                        data: ram::power_on_buffer(expected),
                        read_only: false,
                    },
                    SaveBinding::None,
                );
            }

            if container::detect(&bytes) {
                match extract_container_payload(header, &bytes, codec, expected, warnings) {
                    Some(data) => (
                        RamBacking::Heap { data, read_only: false },
                        SaveBinding::Container {
                            path: path.to_path_buf(),
                            payload_len: expected,
                        },
                    ),
                    None => {
                        warnings.push(RamWarning::ContainerPayloadCorrupt);
                        (
                            RamBacking::Heap {
                                data: ram::power_on_buffer(expected),
                                read_only: false,
                            },
                            SaveBinding::None,
                        )
                    }
                }
            } else {
                let data = plain_image(header, &bytes, expected, warnings, trailer_rtc);
                (RamBacking::File { data, file }, SaveBinding::PlainFile)
            }
        }
        Err(open_err) => {
            log::warn!(
                "Failed to open save file {} for writing: {open_err}",
                path.display()
            );
            warnings.push(RamWarning::RamFileUnavailable);

            // fall back to a read-only copy so the game still sees its data
            match std::fs::read(path) {
                Ok(bytes) => {
                    let data = if container::detect(&bytes) {
                        match extract_container_payload(header, &bytes, codec, expected, warnings)
                        {
                            Some(data) => data,
                            None => {
                                warnings.push(RamWarning::ContainerPayloadCorrupt);
                                ram::power_on_buffer(expected)
                            }
                        }
                    } else {
                        plain_image(header, &bytes, expected, warnings, trailer_rtc)
                    };
                    (RamBacking::Heap { data, read_only: true }, SaveBinding::None)
                }
                Err(_) => (
                    RamBacking::Heap {
                        data: ram::power_on_buffer(expected),
                        read_only: false,
                    },
                    SaveBinding::None,
                ),
            }
        }
    }
}

/// Normalizes a plain save image to the expected length and pulls the
/// clock trailer out of it when present.
fn plain_image(
    header: &CartridgeHeader,
    bytes: &[u8],
    expected: usize,
    warnings: &mut Vec<RamWarning>,
    trailer_rtc: &mut Option<RealTimeClock>,
) -> Vec<u8> {
    if !bytes.is_empty() && bytes.len() < expected {
        warnings.push(RamWarning::RamSizeMismatch);
    }

    if header.features.has_timer && bytes.len() >= expected + RTC_TRAILER_LEN {
        let mut trailer = [0; RTC_TRAILER_LEN];
        trailer.copy_from_slice(&bytes[expected..expected + RTC_TRAILER_LEN]);
        *trailer_rtc = Some(decode_trailer(&trailer));
    }

    let mut data = ram::power_on_buffer(expected);
    let prefix = bytes.len().min(expected);
    data[..prefix].copy_from_slice(&bytes[..prefix]);
    data
}

/// Pulls this cartridge's payload out of a container image, normalized to
/// the expected RAM size. A short payload keeps its bytes with the
/// power-on pattern filling the deficit; only an oversized payload is
/// treated as corrupt.
fn extract_container_payload(
    header: &CartridgeHeader,
    blob: &[u8],
    codec: &dyn ContainerCodec,
    expected: usize,
    warnings: &mut Vec<RamWarning>,
) -> Option<Vec<u8>> {
    let entry = codec.find_entry(blob, &header.title)?;
    let payload = match codec.extract(blob, entry) {
        Ok(payload) => payload,
        Err(err) => {
            log::error!("Failed to extract container payload: {err}");
            return None;
        }
    };
    if payload.len() > expected {
        log::error!(
            "Container payload is {} bytes, cartridge expects at most {expected}",
            payload.len()
        );
        return None;
    }
    if payload.len() < expected {
        warnings.push(RamWarning::RamSizeMismatch);
    }

    let mut data = ram::power_on_buffer(expected);
    data[..payload.len()].copy_from_slice(&payload);
    Some(data)
}

/// Persists the RAM image and clock according to the binding established
/// at load time.
pub(crate) fn save_ram(
    header: &CartridgeHeader,
    ram: &mut RamBacking,
    binding: &SaveBinding,
    rtc: Option<&RealTimeClock>,
    rtc_companion: Option<&Path>,
    codec: &dyn ContainerCodec,
    lock_container: bool,
) -> Result<(), SaveError> {
    match binding {
        SaveBinding::None => {}
        SaveBinding::PlainFile => {
            let expected = header.save_ram_len();
            ram.flush_prefix(expected)
                .map_err(|source| SaveError::WriteFailed { source })?;
            if let (Some(rtc), Some(file)) = (rtc, ram.file_mut()) {
                // flush_prefix leaves the cursor right after the RAM image
                file.write_all(&encode_trailer(rtc))
                    .and_then(|()| file.flush())
                    .map_err(|source| SaveError::WriteFailed { source })?;
            }
        }
        SaveBinding::Container { path, payload_len } => {
            repack_container(header, ram, path, *payload_len, codec, lock_container)?;
        }
    }

    if let (Some(rtc), Some(path)) = (rtc, rtc_companion) {
        let encoded =
            bincode::serialize(rtc).map_err(|source| SaveError::RtcSerialize { source })?;
        std::fs::write(path, encoded).map_err(|source| SaveError::WriteFailed { source })?;
    }

    Ok(())
}

fn repack_container(
    header: &CartridgeHeader,
    ram: &RamBacking,
    path: &Path,
    payload_len: usize,
    codec: &dyn ContainerCodec,
    lock_container: bool,
) -> Result<(), SaveError> {
    // re-read the container fresh; another process may have updated
    // sibling entries since load
    let mut file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|source| SaveError::ContainerFileUnavailable { source })?;
    if lock_container {
        file.lock_exclusive()
            .map_err(|source| SaveError::ContainerFileUnavailable { source })?;
    }

    let result = repack_locked(header, ram, &mut file, payload_len, codec);

    if lock_container {
        if let Err(err) = file.unlock() {
            log::warn!("Failed to unlock save container {}: {err}", path.display());
        }
    }
    result
}

fn repack_locked(
    header: &CartridgeHeader,
    ram: &RamBacking,
    file: &mut File,
    payload_len: usize,
    codec: &dyn ContainerCodec,
) -> Result<(), SaveError> {
    let mut blob = Vec::new();
    file.read_to_end(&mut blob)
        .map_err(|source| SaveError::WriteFailed { source })?;

    let entry = codec.find_entry(&blob, &header.title).ok_or_else(|| {
        container::CodecError("container entry for this cartridge has disappeared".into())
    })?;
    let payload_len = payload_len.min(ram.bytes().len());
    let updated = codec.repack(&blob, entry, &ram.bytes()[..payload_len])?;

    file.seek(SeekFrom::Start(0))
        .and_then(|_| file.write_all(&updated))
        .and_then(|()| file.flush())
        .map_err(|source| SaveError::WriteFailed { source })
}

fn load_companion(path: &Path) -> Option<RealTimeClock> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) => {
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("Failed to read clock file {}: {err}", path.display());
            }
            return None;
        }
    };
    match bincode::deserialize(&bytes) {
        Ok(clock) => Some(clock),
        Err(err) => {
            log::error!("Failed to decode clock file {}: {err}", path.display());
            None
        }
    }
}

fn encode_trailer(rtc: &RealTimeClock) -> [u8; RTC_TRAILER_LEN] {
    let mut out = [0; RTC_TRAILER_LEN];
    out[..5].copy_from_slice(&rtc.registers().to_bytes());
    out[5..10].copy_from_slice(&rtc.latched_registers().to_bytes());

    let secs = rtc
        .last_update()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |duration| duration.as_secs());
    out[10..].copy_from_slice(&secs.to_le_bytes());
    out
}

fn decode_trailer(trailer: &[u8; RTC_TRAILER_LEN]) -> RealTimeClock {
    let mut current = [0; 5];
    current.copy_from_slice(&trailer[..5]);
    let mut latched = [0; 5];
    latched.copy_from_slice(&trailer[5..10]);
    let mut secs = [0; 8];
    secs.copy_from_slice(&trailer[10..]);

    RealTimeClock::from_saved(
        RtcRegisters::from_bytes(current),
        RtcRegisters::from_bytes(latched),
        UNIX_EPOCH + Duration::from_secs(u64::from_le_bytes(secs)),
    )
}
