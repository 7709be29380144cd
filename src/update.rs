//! Deciding on, installing and booting firmware updates
//!
//! An update is a gzip artifact holding the raw image to be written at the boot offset. It is
//! installed in two passes over the artifact: a dry run that decodes everything and checks the
//! trailer without touching flash, and only then the pass that actually erases and programs.

use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{LittleEndian, ReadBytesExt};
use log::{debug, info, warn};

use crate::artifact::ArtifactStore;
use crate::config::BootConfig;
use crate::crc32::Crc32;
use crate::flash::{BlockStorage, FlashWriter, StorageError, WORD_SIZE};
use crate::gzip::{self, TRAILER_SIZE};
use crate::image::{self, ImageError};
use crate::inflate::{Digest, Discard};
use crate::Error;

/// Reads the crc32 and uncompressed length from the end of a gzip artifact.
pub fn read_trailer<H: Read + Seek>(handle: &mut H) -> Result<(u32, u32), Error> {
    handle.seek(SeekFrom::End(-(TRAILER_SIZE as i64)))?;

    let crc32 = handle.read_u32::<LittleEndian>()?;
    let length = handle.read_u32::<LittleEndian>()?;

    Ok((crc32, length))
}

/// Computes the crc32 of the first `length` bytes stored at `addr`.
///
/// The range is read in sector-sized chunks and rounded up to a whole number of words, like
/// the image was written, but only `length` bytes contribute to the checksum.
pub fn installed_crc<S: BlockStorage + ?Sized>(
    storage: &mut S,
    addr: u32,
    length: u32,
) -> Result<u32, StorageError> {
    let word = WORD_SIZE as u64;
    let mut remaining = (length as u64 + word - 1) / word * word;
    let mut unfolded = length as u64;
    let mut buffer = vec![0u8; storage.sector_size() as usize];
    let mut addr = addr;
    let mut crc = Crc32::new();

    while remaining > 0 {
        let len = remaining.min(buffer.len() as u64) as usize;
        let chunk = &mut buffer[..len];

        storage.read(addr, chunk)?;

        let fold = (len as u64).min(unfolded) as usize;
        crc.update(&chunk[..fold]);
        unfolded -= fold as u64;

        addr = addr
            .checked_add(len as u32)
            .ok_or(StorageError::OutOfBounds { addr, len })?;
        remaining -= len as u64;
    }

    Ok(crc.value())
}

/// Returns true when the update artifact exists and differs from the installed image.
///
/// Only the artifact trailer is read; the installed image is compared by checksum without
/// decompressing anything.
pub fn need_update<S, A>(
    storage: &mut S,
    artifacts: &mut A,
    config: &BootConfig,
) -> Result<bool, Error>
where
    S: BlockStorage + ?Sized,
    A: ArtifactStore + ?Sized,
{
    let mut handle = match artifacts.open(&config.update_file) {
        Ok(handle) => handle,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            info!("Update file {} not found", config.update_file);
            return Ok(false);
        }
        Err(err) => return Err(err.into()),
    };

    info!("Found update file {}", config.update_file);

    let (update_crc, length) = read_trailer(&mut handle)?;
    let installed = installed_crc(storage, config.boot_offset, length)?;

    debug!(
        "Update is {} bytes with crc32 {:#010x}, installed image has crc32 {:#010x}",
        length, update_crc, installed
    );

    let needed = installed != update_crc;

    if needed {
        info!("Update needed");
    } else {
        info!("Update not needed");
    }

    Ok(needed)
}

/// Installs the update artifact at the boot offset.
///
/// Flash is only erased and programmed after a complete dry run has shown that the artifact
/// decompresses cleanly and matches its trailer. A failed dry run leaves flash untouched.
pub fn perform_update<S, A>(
    storage: &mut S,
    artifacts: &mut A,
    config: &BootConfig,
) -> Result<Digest, Error>
where
    S: BlockStorage + ?Sized,
    A: ArtifactStore + ?Sized,
{
    let mut handle = artifacts.open(&config.update_file)?;
    let mut chunk = vec![0u8; storage.sector_size() as usize];

    info!("Testing new rom");

    let digest = gzip::decompress(&mut handle, Discard, &mut chunk)?;

    info!(
        "Dry run passed ({} bytes, crc32 {:#010x}); installing at {:#010x}",
        digest.length, digest.crc32, config.boot_offset
    );

    handle.seek(SeekFrom::Start(0))?;

    let mut writer = FlashWriter::new(storage, config.boot_offset);
    let digest = gzip::decompress(&mut handle, &mut writer, &mut chunk)?;
    let end = writer.finish()?;

    info!(
        "Installed new rom at {:#010x}..{:#010x}",
        config.boot_offset, end
    );

    Ok(digest)
}

/// Installs the update artifact if it differs from the installed image, returning the digest of
/// what was installed.
pub fn update_if_needed<S, A>(
    storage: &mut S,
    artifacts: &mut A,
    config: &BootConfig,
) -> Result<Option<Digest>, Error>
where
    S: BlockStorage + ?Sized,
    A: ArtifactStore + ?Sized,
{
    if need_update(storage, artifacts, config)? {
        perform_update(storage, artifacts, config).map(Some)
    } else {
        Ok(None)
    }
}

/// Runs the boot sequence: installs a pending update, then validates the image at the boot
/// offset and returns the address of its standard header.
///
/// A failed update is logged and otherwise ignored, so whatever image is installed still gets
/// validated and booted.
pub fn boot<S, A>(
    storage: &mut S,
    artifacts: &mut A,
    config: &BootConfig,
) -> Result<u32, ImageError>
where
    S: BlockStorage + ?Sized,
    A: ArtifactStore + ?Sized,
{
    if let Err(err) = update_if_needed(storage, artifacts, config) {
        warn!("Update failed: {}", err);
    }

    match image::check_image(storage, config.boot_offset) {
        Ok(rom_addr) => {
            info!("Booting rom at {:#010x}", rom_addr);
            Ok(rom_addr)
        }
        Err(err) => {
            info!(
                "No bootable rom found at {:#010x}: {}",
                config.boot_offset, err
            );
            Err(err)
        }
    }
}
