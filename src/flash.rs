//! Sector-erasable flash storage and the word-aligned writer that fills it

mod ram;

use std::io;

use log::trace;
use thiserror::Error;

pub use ram::RamFlash;

use crate::inflate::Sink;

/// Erase granularity of the flash
pub const SECTOR_SIZE: u32 = 0x1000;

/// Program granularity of the flash
pub const WORD_SIZE: usize = 4;

/// The value of an erased flash byte, also used to pad a trailing partial word
pub const FILL_BYTE: u8 = 0xFF;

/// Block device failures
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Access of {} bytes at {:#010x} is outside of the flash", len, addr)]
    OutOfBounds { addr: u32, len: usize },

    #[error("Write of {} bytes at {:#010x} is not a whole number of words", len, addr)]
    UnalignedLength { addr: u32, len: usize },

    #[error("Sector {} does not exist", _0)]
    SectorOutOfRange(u32),

    #[error("I/O error: {}", _0)]
    Io(#[from] io::Error),
}

/// A flash address space partitioned into fixed-size erase sectors.
///
/// Every operation blocks until the hardware has finished with it.
pub trait BlockStorage {
    fn sector_size(&self) -> u32 {
        SECTOR_SIZE
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError>;

    /// Resets every byte of sector number `sector` to `FILL_BYTE`.
    fn erase_sector(&mut self, sector: u32) -> Result<(), StorageError>;

    /// Programs `data`, which must be a whole number of words, at `addr`.
    ///
    /// The target range must have been erased beforehand.
    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError>;
}

impl<S: BlockStorage + ?Sized> BlockStorage for &mut S {
    fn sector_size(&self) -> u32 {
        (**self).sector_size()
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        (**self).read(addr, buf)
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), StorageError> {
        (**self).erase_sector(sector)
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        (**self).write(addr, data)
    }
}

/// Streams bytes of any length into flash, erasing sectors just before the first write lands in
/// them and programming whole words only.
///
/// The writer never needs to know the total length up front: erases are driven by how many
/// bytes have been handed to it so far, and each sector is erased at most once.
pub struct FlashWriter<'a, S: ?Sized> {
    storage: &'a mut S,
    /// Where the next whole word is programmed
    addr: u32,
    /// The first sector that has not been erased yet
    next_erase: u32,
    pending: [u8; WORD_SIZE],
    pending_len: usize,
}

impl<'a, S: BlockStorage + ?Sized> FlashWriter<'a, S> {
    /// Creates a writer starting at `start`.
    ///
    /// The sector containing `start` counts as not yet erased, so the first write erases it.
    pub fn new(storage: &'a mut S, start: u32) -> FlashWriter<'a, S> {
        let next_erase = start / storage.sector_size();

        FlashWriter {
            storage,
            addr: start,
            next_erase,
            pending: [FILL_BYTE; WORD_SIZE],
            pending_len: 0,
        }
    }

    /// The address the next byte handed to `write` will end up at.
    pub fn position(&self) -> u32 {
        self.addr + self.pending_len as u32
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        if data.is_empty() {
            return Ok(());
        }

        let sector_size = self.storage.sector_size() as u64;
        let end = self.addr as u64 + self.pending_len as u64 + data.len() as u64;
        let last_sector = ((end - 1) / sector_size) as u32;

        while self.next_erase <= last_sector {
            trace!("Erasing sector {}", self.next_erase);

            self.storage.erase_sector(self.next_erase)?;
            self.next_erase += 1;
        }

        let mut data = data;

        // Complete the word left over from the previous call
        if self.pending_len > 0 {
            let take = (WORD_SIZE - self.pending_len).min(data.len());

            self.pending[self.pending_len..self.pending_len + take].copy_from_slice(&data[..take]);
            self.pending_len += take;
            data = &data[take..];

            if self.pending_len == WORD_SIZE {
                self.storage.write(self.addr, &self.pending)?;
                self.addr += WORD_SIZE as u32;
                self.pending_len = 0;
            }
        }

        let extra = data.len() % WORD_SIZE;
        let (bulk, tail) = data.split_at(data.len() - extra);

        if !bulk.is_empty() {
            self.storage.write(self.addr, bulk)?;
            self.addr += bulk.len() as u32;
        }

        if !tail.is_empty() {
            self.pending[..extra].copy_from_slice(tail);
            self.pending_len = extra;
        }

        Ok(())
    }

    /// Pads any leftover bytes with `FILL_BYTE` to a whole word and programs it, returning the
    /// address following the last programmed word.
    pub fn finish(mut self) -> Result<u32, StorageError> {
        if self.pending_len > 0 {
            let padding = [FILL_BYTE; WORD_SIZE];
            let missing = WORD_SIZE - self.pending_len;

            self.write(&padding[..missing])?;
        }

        Ok(self.addr)
    }
}

impl<S: BlockStorage + ?Sized> Sink for FlashWriter<'_, S> {
    fn consume(&mut self, data: &[u8]) -> Result<(), crate::Error> {
        Ok(self.write(data)?)
    }
}
