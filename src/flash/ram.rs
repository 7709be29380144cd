use std::fs;
use std::path::Path;

use log::debug;

use super::{BlockStorage, StorageError, FILL_BYTE, SECTOR_SIZE, WORD_SIZE};

/// A NOR flash held in memory.
///
/// Erasing sets a sector to `FILL_BYTE`. Programming can only clear bits, so writing over
/// programmed data without erasing first yields the AND of old and new contents, as it
/// would on the real part. Erase and program activity is counted for inspection.
#[derive(Debug, Clone)]
pub struct RamFlash {
    data: Vec<u8>,
    sector_size: u32,
    erase_counts: Vec<u32>,
    programmed: usize,
}

impl RamFlash {
    /// Creates an erased flash of at least `size` bytes, rounded up to whole sectors.
    pub fn new(size: usize) -> RamFlash {
        RamFlash::with_sector_size(size, SECTOR_SIZE)
    }

    pub fn with_sector_size(size: usize, sector_size: u32) -> RamFlash {
        RamFlash::from_bytes_with_sector_size(vec![FILL_BYTE; size], sector_size)
    }

    /// Wraps an existing flash dump, padding it with erased bytes to whole sectors.
    pub fn from_bytes(data: Vec<u8>) -> RamFlash {
        RamFlash::from_bytes_with_sector_size(data, SECTOR_SIZE)
    }

    fn from_bytes_with_sector_size(mut data: Vec<u8>, sector_size: u32) -> RamFlash {
        let sector = sector_size as usize;
        let sectors = (data.len() + sector - 1) / sector;

        data.resize(sectors * sector, FILL_BYTE);

        RamFlash {
            data,
            sector_size,
            erase_counts: vec![0; sectors],
            programmed: 0,
        }
    }

    /// Reads a flash dump from `path`.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<RamFlash, StorageError> {
        let data = fs::read(path.as_ref())?;

        debug!(
            "Loaded {} byte flash dump from {}",
            data.len(),
            path.as_ref().display()
        );

        Ok(RamFlash::from_bytes(data))
    }

    /// Writes the whole flash contents to `path`.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), StorageError> {
        fs::write(path.as_ref(), &self.data)?;

        debug!(
            "Saved {} byte flash dump to {}",
            self.data.len(),
            path.as_ref().display()
        );

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Direct access to the cells, bypassing the erase and program rules.
    pub fn contents_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// How many times `sector` has been erased.
    pub fn erase_count(&self, sector: u32) -> u32 {
        self.erase_counts
            .get(sector as usize)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_erases(&self) -> u32 {
        self.erase_counts.iter().sum()
    }

    /// Total number of bytes programmed so far.
    pub fn programmed(&self) -> usize {
        self.programmed
    }

    fn range(&self, addr: u32, len: usize) -> Result<std::ops::Range<usize>, StorageError> {
        let start = addr as usize;

        match start.checked_add(len) {
            Some(end) if end <= self.data.len() => Ok(start..end),
            _ => Err(StorageError::OutOfBounds { addr, len }),
        }
    }
}

impl BlockStorage for RamFlash {
    fn sector_size(&self) -> u32 {
        self.sector_size
    }

    fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), StorageError> {
        let range = self.range(addr, buf.len())?;
        buf.copy_from_slice(&self.data[range]);

        Ok(())
    }

    fn erase_sector(&mut self, sector: u32) -> Result<(), StorageError> {
        let count = self
            .erase_counts
            .get_mut(sector as usize)
            .ok_or(StorageError::SectorOutOfRange(sector))?;
        *count += 1;

        let start = sector as usize * self.sector_size as usize;
        let end = start + self.sector_size as usize;

        self.data[start..end]
            .iter_mut()
            .for_each(|byte| *byte = FILL_BYTE);

        Ok(())
    }

    fn write(&mut self, addr: u32, data: &[u8]) -> Result<(), StorageError> {
        if data.len() % WORD_SIZE != 0 {
            return Err(StorageError::UnalignedLength {
                addr,
                len: data.len(),
            });
        }

        let range = self.range(addr, data.len())?;

        self.data[range]
            .iter_mut()
            .zip(data)
            .for_each(|(cell, byte)| *cell &= byte);
        self.programmed += data.len();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use hex_literal::hex;

    use super::*;

    #[test]
    fn it_should_start_erased_and_round_up_to_sectors() {
        let flash = RamFlash::new(SECTOR_SIZE as usize + 1);

        assert_eq!(flash.len(), 2 * SECTOR_SIZE as usize);
        assert!(flash.as_bytes().iter().all(|&byte| byte == FILL_BYTE));
        assert_eq!(flash.total_erases(), 0);
    }

    #[test]
    fn it_should_only_clear_bits_when_programming() {
        let mut flash = RamFlash::new(SECTOR_SIZE as usize);

        flash.write(0, &hex!("F0 0F AA 55")).unwrap();
        flash.write(0, &hex!("3C 3C FF 00")).unwrap();

        let mut buf = [0u8; 4];
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, hex!("30 0C AA 00"));

        flash.erase_sector(0).unwrap();
        flash.read(0, &mut buf).unwrap();
        assert_eq!(buf, hex!("FF FF FF FF"));
        assert_eq!(flash.erase_count(0), 1);
    }

    #[test]
    fn it_should_reject_partial_words() {
        let mut flash = RamFlash::new(SECTOR_SIZE as usize);

        assert!(matches!(
            flash.write(0, &[0; 3]),
            Err(StorageError::UnalignedLength { addr: 0, len: 3 })
        ));
        assert_eq!(flash.programmed(), 0);
    }

    #[test]
    fn it_should_reject_accesses_past_the_end() {
        let mut flash = RamFlash::new(SECTOR_SIZE as usize);
        let mut buf = [0u8; 8];

        assert!(matches!(
            flash.read(SECTOR_SIZE - 4, &mut buf),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(matches!(
            flash.read(u32::MAX, &mut buf),
            Err(StorageError::OutOfBounds { .. })
        ));
        assert!(matches!(
            flash.erase_sector(1),
            Err(StorageError::SectorOutOfRange(1))
        ));
    }

    #[test]
    fn it_should_save_and_load_dumps() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flash.bin");

        let mut flash = RamFlash::new(SECTOR_SIZE as usize);
        flash.write(0x10, &hex!("DE AD BE EF")).unwrap();
        flash.save(&path).unwrap();

        let loaded = RamFlash::load(&path).unwrap();
        assert_eq!(loaded.as_bytes(), flash.as_bytes());
        assert_eq!(loaded.programmed(), 0);
    }
}
