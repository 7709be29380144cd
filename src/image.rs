//! ROM image headers, integrity checks and section loading

use std::convert::TryFrom;

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use num_enum::TryFromPrimitive;
use thiserror::Error;

use crate::flash::{BlockStorage, StorageError};
use crate::Error;

/// Magic byte of the standard ROM header
pub const ROM_MAGIC: u8 = 0xE9;

/// Magic byte of the extended header that precedes an embedded section
pub const ROM_MAGIC_EXTENDED: u8 = 0xEA;

/// Second byte of an extended header
pub const EXTENDED_MARKER: u8 = 0x04;

/// Seed of the XOR fold over all section payload bytes
pub const CHECKSUM_SEED: u8 = 0xEF;

/// Payload bytes are checked through a buffer of this size regardless of section size
pub const CHECK_BUFFER_SIZE: usize = 0x100;

pub const HEADER_SIZE: u32 = 8;
pub const EXTENDED_HEADER_SIZE: u32 = 16;
pub const SECTION_HEADER_SIZE: u32 = 8;

/// Reasons an installed image is rejected
#[derive(Debug, Error)]
pub enum ImageError {
    #[error("Address {:#010x} does not map to an image", _0)]
    UnmappedAddress(u32),

    #[error("Unrecognized image header magic {:#04x}", _0)]
    BadMagic(u8),

    #[error(
        "Image checksum mismatch (stored {:#04x}, computed {:#04x})",
        stored,
        computed
    )]
    ChecksumMismatch { stored: u8, computed: u8 },

    #[error("Image extends past the end of the address space")]
    AddressOverflow,

    #[error("Storage error: {}", _0)]
    Storage(#[from] StorageError),
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
#[repr(u8)]
enum Magic {
    Standard = 0xE9,
    Extended = 0xEA,
}

/// The header that directly precedes the section table.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct StandardHeader {
    pub section_count: u8,
    pub flags: u16,
    pub entry: u32,
}

impl StandardHeader {
    /// Parses the first `HEADER_SIZE` bytes of `bytes`, which must start with `ROM_MAGIC`.
    pub fn parse(bytes: &[u8]) -> Result<StandardHeader, ImageError> {
        match Magic::try_from(bytes[0]) {
            Ok(Magic::Standard) => Ok(StandardHeader {
                section_count: bytes[1],
                flags: LittleEndian::read_u16(&bytes[2..4]),
                entry: LittleEndian::read_u32(&bytes[4..8]),
            }),
            _ => Err(ImageError::BadMagic(bytes[0])),
        }
    }
}

/// The header of an image that starts with a section which is used in place rather than
/// loaded, such as code executed straight from flash.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExtendedHeader {
    pub flags: u16,
    pub entry: u32,
    pub reserved: u32,
    /// Length of the embedded section that follows this header
    pub embedded_len: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RomHeader {
    Legacy(StandardHeader),
    Extended(ExtendedHeader),
}

impl RomHeader {
    /// Parses whichever header shape the first byte announces.
    pub fn parse(bytes: &[u8; EXTENDED_HEADER_SIZE as usize]) -> Result<RomHeader, ImageError> {
        match Magic::try_from(bytes[0]) {
            Ok(Magic::Standard) => Ok(RomHeader::Legacy(StandardHeader::parse(bytes)?)),
            Ok(Magic::Extended) if bytes[1] == EXTENDED_MARKER => {
                Ok(RomHeader::Extended(ExtendedHeader {
                    flags: LittleEndian::read_u16(&bytes[2..4]),
                    entry: LittleEndian::read_u32(&bytes[4..8]),
                    reserved: LittleEndian::read_u32(&bytes[8..12]),
                    embedded_len: LittleEndian::read_u32(&bytes[12..16]),
                }))
            }
            _ => Err(ImageError::BadMagic(bytes[0])),
        }
    }
}

/// The target address and payload length of one loadable section.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SectionDescriptor {
    pub target: u32,
    pub length: u32,
}

impl SectionDescriptor {
    pub fn parse(bytes: &[u8; SECTION_HEADER_SIZE as usize]) -> SectionDescriptor {
        SectionDescriptor {
            target: LittleEndian::read_u32(&bytes[0..4]),
            length: LittleEndian::read_u32(&bytes[4..8]),
        }
    }
}

/// The standard header of an image and the address it was found at.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct RomLocation {
    pub rom_addr: u32,
    pub header: StandardHeader,
}

fn offset(addr: u32, len: u32) -> Result<u32, ImageError> {
    addr.checked_add(len).ok_or(ImageError::AddressOverflow)
}

fn read_standard_header<S: BlockStorage + ?Sized>(
    storage: &mut S,
    addr: u32,
) -> Result<StandardHeader, ImageError> {
    let mut bytes = [0u8; HEADER_SIZE as usize];
    storage.read(addr, &mut bytes)?;

    StandardHeader::parse(&bytes)
}

fn read_section<S: BlockStorage + ?Sized>(
    storage: &mut S,
    addr: u32,
) -> Result<SectionDescriptor, StorageError> {
    let mut bytes = [0u8; SECTION_HEADER_SIZE as usize];
    storage.read(addr, &mut bytes)?;

    Ok(SectionDescriptor::parse(&bytes))
}

/// Finds the standard header of the image whose first header is at `addr`, skipping over the
/// embedded section of an extended image.
pub fn locate_rom<S: BlockStorage + ?Sized>(
    storage: &mut S,
    addr: u32,
) -> Result<RomLocation, ImageError> {
    if addr == 0 || addr == u32::MAX {
        return Err(ImageError::UnmappedAddress(addr));
    }

    let mut bytes = [0u8; EXTENDED_HEADER_SIZE as usize];
    storage.read(addr, &mut bytes)?;

    match RomHeader::parse(&bytes)? {
        RomHeader::Legacy(header) => Ok(RomLocation {
            rom_addr: addr,
            header,
        }),
        RomHeader::Extended(extended) => {
            let rom_addr = offset(offset(addr, extended.embedded_len)?, EXTENDED_HEADER_SIZE)?;

            debug!(
                "Extended header at {:#010x}; skipping {} embedded bytes to {:#010x}",
                addr, extended.embedded_len, rom_addr
            );

            Ok(RomLocation {
                rom_addr,
                header: read_standard_header(storage, rom_addr)?,
            })
        }
    }
}

/// Validates the image at `addr` and returns the address of its standard header.
///
/// Every section payload is folded into an XOR checksum seeded with `CHECKSUM_SEED`. The stored
/// checksum byte sits in the last byte of the 16-byte row containing the end of the sections.
pub fn check_image<S: BlockStorage + ?Sized>(
    storage: &mut S,
    addr: u32,
) -> Result<u32, ImageError> {
    let location = locate_rom(storage, addr)?;

    let mut pos = offset(location.rom_addr, HEADER_SIZE)?;
    let mut buffer = [0u8; CHECK_BUFFER_SIZE];
    let mut checksum = CHECKSUM_SEED;

    for index in 0..location.header.section_count {
        let section = read_section(storage, pos)?;
        pos = offset(pos, SECTION_HEADER_SIZE)?;

        debug!(
            "Section {}: {} bytes at {:#010x} for {:#010x}",
            index, section.length, pos, section.target
        );

        let mut remaining = section.length;

        while remaining > 0 {
            let len = remaining.min(CHECK_BUFFER_SIZE as u32);
            let chunk = &mut buffer[..len as usize];

            storage.read(pos, chunk)?;
            checksum = chunk.iter().fold(checksum, |acc, byte| acc ^ byte);

            pos = offset(pos, len)?;
            remaining -= len;
        }
    }

    let mut stored = [0u8; 1];
    storage.read(pos | 0x0F, &mut stored)?;

    if stored[0] != checksum {
        return Err(ImageError::ChecksumMismatch {
            stored: stored[0],
            computed: checksum,
        });
    }

    debug!(
        "Image at {:#010x} has a valid checksum ({:#04x})",
        location.rom_addr, checksum
    );

    Ok(location.rom_addr)
}

/// Receives section payloads as they are copied out of flash.
pub trait SectionSink {
    fn load(&mut self, target: u32, data: &[u8]) -> Result<(), Error>;
}

impl<F> SectionSink for F
where
    F: FnMut(u32, &[u8]) -> Result<(), Error>,
{
    fn load(&mut self, target: u32, data: &[u8]) -> Result<(), Error> {
        self(target, data)
    }
}

/// Copies every section of the image whose standard header is at `rom_addr` into `sink`, at most
/// one sector at a time, and returns the entry address.
///
/// `rom_addr` is expected to come from a successful `check_image`.
pub fn load_rom<S, L>(storage: &mut S, rom_addr: u32, mut sink: L) -> Result<u32, Error>
where
    S: BlockStorage + ?Sized,
    L: SectionSink,
{
    let header = read_standard_header(storage, rom_addr)?;
    let mut buffer = vec![0u8; storage.sector_size() as usize];
    let mut pos = offset(rom_addr, HEADER_SIZE)?;

    for _ in 0..header.section_count {
        let section = read_section(storage, pos)?;
        pos = offset(pos, SECTION_HEADER_SIZE)?;

        let mut target = section.target;
        let mut remaining = section.length;

        while remaining > 0 {
            let len = remaining.min(buffer.len() as u32);
            let chunk = &mut buffer[..len as usize];

            storage.read(pos, chunk)?;
            sink.load(target, chunk)?;

            pos = offset(pos, len)?;
            target = target.wrapping_add(len);
            remaining -= len;
        }
    }

    Ok(header.entry)
}

#[cfg(test)]
pub(crate) mod tests {
    use assert_hex::assert_eq_hex;
    use hex_literal::hex;

    use super::*;
    use crate::flash::{RamFlash, SECTOR_SIZE};

    /// Builds a standard image, with its trailing checksum, as it would sit at `base`.
    pub(crate) fn build_rom(base: u32, entry: u32, sections: &[(u32, &[u8])]) -> Vec<u8> {
        let mut image = vec![ROM_MAGIC, sections.len() as u8, 0x02, 0x20];
        image.extend_from_slice(&entry.to_le_bytes());

        let mut checksum = CHECKSUM_SEED;

        for (target, payload) in sections {
            image.extend_from_slice(&target.to_le_bytes());
            image.extend_from_slice(&(payload.len() as u32).to_le_bytes());
            image.extend_from_slice(payload);

            checksum = payload.iter().fold(checksum, |acc, byte| acc ^ byte);
        }

        let end = base + image.len() as u32;
        image.resize(((end | 0x0F) - base) as usize, 0x00);
        image.push(checksum);

        image
    }

    fn build_extended_rom(base: u32, embedded: &[u8], sections: &[(u32, &[u8])]) -> Vec<u8> {
        let mut image = vec![ROM_MAGIC_EXTENDED, EXTENDED_MARKER, 0x02, 0x20];
        image.extend_from_slice(&0x4010_0004u32.to_le_bytes());
        image.extend_from_slice(&0u32.to_le_bytes());
        image.extend_from_slice(&(embedded.len() as u32).to_le_bytes());
        image.extend_from_slice(embedded);

        let rom_addr = base + image.len() as u32;
        image.extend_from_slice(&build_rom(rom_addr, 0x4010_0004, sections));

        image
    }

    fn flash_with(addr: u32, image: &[u8]) -> RamFlash {
        let mut flash = RamFlash::new(16 * SECTOR_SIZE as usize);
        flash.contents_mut()[addr as usize..][..image.len()].copy_from_slice(image);

        flash
    }

    #[test]
    fn it_should_parse_the_standard_header() {
        let header = StandardHeader::parse(&hex!("E9 03 02 20 04 00 10 40")).unwrap();

        assert_eq!(header.section_count, 3);
        assert_eq_hex!(header.flags, 0x2002);
        assert_eq_hex!(header.entry, 0x4010_0004);
    }

    #[test]
    fn it_should_parse_the_extended_header() {
        let bytes = hex!("EA 04 02 20 04 00 10 40 00 00 00 00 00 80 01 00");

        assert_eq!(
            RomHeader::parse(&bytes).unwrap(),
            RomHeader::Extended(ExtendedHeader {
                flags: 0x2002,
                entry: 0x4010_0004,
                reserved: 0,
                embedded_len: 0x1_8000,
            })
        );
    }

    #[test]
    fn it_should_accept_a_valid_legacy_image() {
        let image = build_rom(0x2000, 0x4010_0004, &[(0x4010_0000, b"boot code")]);
        let mut flash = flash_with(0x2000, &image);

        assert_eq_hex!(check_image(&mut flash, 0x2000).unwrap(), 0x2000);
    }

    #[test]
    fn it_should_reject_any_flipped_payload_byte() {
        let payload = b"\x01\x02\x03\x04\x05\x06\x07";
        let image = build_rom(0x2000, 0x4010_0004, &[(0x4010_0000, payload)]);
        let payload_start = (HEADER_SIZE + SECTION_HEADER_SIZE) as usize;

        for index in 0..payload.len() {
            let mut corrupted = image.clone();
            corrupted[payload_start + index] ^= 0x40;
            let mut flash = flash_with(0x2000, &corrupted);

            assert!(matches!(
                check_image(&mut flash, 0x2000),
                Err(ImageError::ChecksumMismatch { .. })
            ));
        }
    }

    #[test]
    fn it_should_read_the_checksum_from_the_end_of_an_aligned_row() {
        // 8 byte header, 8 byte section header and 16 payload bytes end on a row boundary
        let payload = [0x11u8; 16];
        let image = build_rom(0x3000, 0, &[(0x3FFE_8000, &payload)]);

        assert_eq!(image.len(), 0x30);
        assert_eq!(image[0x2F], CHECKSUM_SEED);

        let mut flash = flash_with(0x3000, &image);
        assert_eq_hex!(check_image(&mut flash, 0x3000).unwrap(), 0x3000);
    }

    #[test]
    fn it_should_checksum_sections_larger_than_the_buffer() {
        let first: Vec<u8> = (0..1000u32).map(|i| (i * 7) as u8).collect();
        let second: Vec<u8> = (0..300u32).map(|i| (i * 13) as u8).collect();
        let image = build_rom(
            0x1000,
            0x4010_0004,
            &[(0x4010_0000, &first), (0x3FFE_8000, &second)],
        );
        let mut flash = flash_with(0x1000, &image);

        assert_eq_hex!(check_image(&mut flash, 0x1000).unwrap(), 0x1000);
    }

    #[test]
    fn it_should_skip_the_embedded_section_of_an_extended_image() {
        let embedded = vec![0xA5; 0x123];
        let image = build_extended_rom(0x4000, &embedded, &[(0x4010_0000, b"iram")]);
        let mut flash = flash_with(0x4000, &image);

        let rom_addr = 0x4000 + EXTENDED_HEADER_SIZE + embedded.len() as u32;
        assert_eq_hex!(check_image(&mut flash, 0x4000).unwrap(), rom_addr);
    }

    #[test]
    fn it_should_reject_unmapped_addresses() {
        let mut flash = RamFlash::new(SECTOR_SIZE as usize);

        assert!(matches!(
            check_image(&mut flash, 0),
            Err(ImageError::UnmappedAddress(0))
        ));
        assert!(matches!(
            check_image(&mut flash, 0xFFFF_FFFF),
            Err(ImageError::UnmappedAddress(0xFFFF_FFFF))
        ));
    }

    #[test]
    fn it_should_reject_unknown_magic() {
        let mut flash = RamFlash::new(4 * SECTOR_SIZE as usize);
        assert!(matches!(
            check_image(&mut flash, 0x1000),
            Err(ImageError::BadMagic(0xFF))
        ));

        let mut image = build_extended_rom(0x1000, b"xx", &[(0, b"data")]);
        image[1] = 0x05;
        let mut flash = flash_with(0x1000, &image);

        assert!(matches!(
            check_image(&mut flash, 0x1000),
            Err(ImageError::BadMagic(ROM_MAGIC_EXTENDED))
        ));
    }

    #[test]
    fn it_should_reject_sections_that_run_off_the_flash() {
        let mut header = hex!("E9 01 00 00 00 00 00 00").to_vec();
        header.extend_from_slice(&hex!("00 00 10 40 00 00 01 00"));
        let mut flash = flash_with(0x1000, &header);

        assert!(matches!(
            check_image(&mut flash, 0x1000),
            Err(ImageError::Storage(StorageError::OutOfBounds { .. }))
        ));
    }

    #[test]
    fn it_should_load_sections_in_sector_sized_chunks() {
        let big: Vec<u8> = (0..5000u32).map(|i| i as u8).collect();
        let image = build_rom(
            0x2000,
            0x4010_1234,
            &[(0x4010_0000, &big), (0x3FFE_8000, b"data")],
        );
        let mut flash = flash_with(0x2000, &image);

        let rom_addr = check_image(&mut flash, 0x2000).unwrap();
        let mut chunks: Vec<(u32, Vec<u8>)> = Vec::new();
        let record = |target: u32, data: &[u8]| -> Result<(), Error> {
            chunks.push((target, data.to_vec()));
            Ok(())
        };
        let entry = load_rom(&mut flash, rom_addr, record).unwrap();

        assert_eq_hex!(entry, 0x4010_1234);
        assert_eq!(chunks.len(), 3);
        assert_eq_hex!(chunks[0].0, 0x4010_0000);
        assert_eq!(chunks[0].1.len(), SECTOR_SIZE as usize);
        assert_eq_hex!(chunks[1].0, 0x4010_0000 + SECTOR_SIZE);
        assert_eq!(chunks[1].1.len(), 5000 - SECTOR_SIZE as usize);
        assert_eq_hex!(chunks[2].0, 0x3FFE_8000);
        assert_eq!(chunks[2].1, b"data");

        let loaded: Vec<u8> = chunks[0].1.iter().chain(&chunks[1].1).copied().collect();
        assert!(loaded == big);
    }
}
