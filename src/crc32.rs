//! Incremental CRC-32 as used by gzip trailers.

/// Nibble lookup table for the reflected polynomial 0xEDB88320.
const CRC32_NIBBLE_TABLE: [u32; 16] = [
    0x0000_0000,
    0x1DB7_1064,
    0x3B6E_20C8,
    0x26D9_30AC,
    0x76DC_4190,
    0x6B6B_51F4,
    0x4DB2_6158,
    0x5005_713C,
    0xEDB8_8320,
    0xF00F_9344,
    0xD6D6_A3E8,
    0xCB61_B38C,
    0x9B64_C2B0,
    0x86D3_D2D4,
    0xA00A_E278,
    0xBDBD_F21C,
];

/// The register value a fresh checksum starts from.
pub const CRC32_INIT: u32 = 0xFFFF_FFFF;

/// Folds `bytes` into the raw, non-inverted register `crc` and returns the new register.
///
/// Start from `CRC32_INIT` and invert the final register to get the checksum.
pub fn crc32_update(mut crc: u32, bytes: &[u8]) -> u32 {
    for byte in bytes {
        crc ^= *byte as u32;
        crc = CRC32_NIBBLE_TABLE[(crc & 0x0f) as usize] ^ (crc >> 4);
        crc = CRC32_NIBBLE_TABLE[(crc & 0x0f) as usize] ^ (crc >> 4);
    }

    crc
}

/// Calculates the crc32 checksum for the given slice of `bytes`
///
/// The crc32 is implemented with the polynomial 0xEDB88320 and the initial value of 0xFFFFFFFF
pub fn crc32(bytes: &[u8]) -> u32 {
    !crc32_update(CRC32_INIT, bytes)
}

/// A running crc32 checksum that can be fed in pieces.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Crc32 {
    register: u32,
}

impl Crc32 {
    pub fn new() -> Crc32 {
        Crc32 {
            register: CRC32_INIT,
        }
    }

    /// Folds `bytes` into the checksum.
    pub fn update(&mut self, bytes: &[u8]) {
        self.register = crc32_update(self.register, bytes);
    }

    /// Returns the checksum of every byte seen so far.
    pub fn value(&self) -> u32 {
        !self.register
    }
}

impl Default for Crc32 {
    fn default() -> Crc32 {
        Crc32::new()
    }
}
