//! gzip (RFC 1952) framing around the DEFLATE decoder

use log::debug;

use crate::inflate::{ByteSource, Digest, Inflater, Refill, Sink};
use crate::Error;

/// The two identification bytes every gzip member starts with
pub const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// The only compression method gzip defines
pub const METHOD_DEFLATE: u8 = 8;

/// Size of the trailer holding the crc32 and the uncompressed length
pub const TRAILER_SIZE: usize = 8;

pub const FLAG_TEXT: u8 = 0x01;
pub const FLAG_HCRC: u8 = 0x02;
pub const FLAG_EXTRA: u8 = 0x04;
pub const FLAG_NAME: u8 = 0x08;
pub const FLAG_COMMENT: u8 = 0x10;
const FLAG_RESERVED: u8 = 0xe0;

/// The fixed fields of a gzip member header.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Header {
    pub flags: u8,
    pub mtime: u32,
    pub os: u8,
}

/// Reads and checks a gzip member header, skipping the optional extra field, file name, comment
/// and header checksum.
pub fn parse_header<R: Refill>(source: &mut ByteSource<'_, R>) -> Result<Header, Error> {
    let mut magic = [0u8; 2];
    source.read_exact(&mut magic)?;

    if magic != GZIP_MAGIC {
        return Err(Error::DataCorrupt("not a gzip stream"));
    }

    if source.next_byte()? != METHOD_DEFLATE {
        return Err(Error::DataCorrupt("unsupported gzip compression method"));
    }

    let flags = source.next_byte()?;

    if flags & FLAG_RESERVED != 0 {
        return Err(Error::DataCorrupt("reserved gzip header flags are set"));
    }

    let mtime = source.read_u32_le()?;

    // Skip the extra flags
    source.skip(1)?;

    let os = source.next_byte()?;

    if flags & FLAG_EXTRA != 0 {
        let length = source.read_u16_le()?;
        source.skip(length as usize)?;
    }

    if flags & FLAG_NAME != 0 {
        source.skip_cstr()?;
    }

    if flags & FLAG_COMMENT != 0 {
        source.skip_cstr()?;
    }

    if flags & FLAG_HCRC != 0 {
        source.skip(2)?;
    }

    debug!("gzip header: flags {:#04x} mtime {} os {}", flags, mtime, os);

    Ok(Header { flags, mtime, os })
}

/// Reads the trailer that follows the last DEFLATE block and compares it to `digest`.
pub fn verify_trailer<R: Refill>(
    source: &mut ByteSource<'_, R>,
    digest: Digest,
) -> Result<Digest, Error> {
    let crc32 = source.read_u32_le()?;
    let length = source.read_u32_le()?;

    if crc32 != digest.crc32 {
        return Err(Error::ChecksumError {
            expected: crc32,
            computed: digest.crc32,
        });
    }

    if length != digest.length {
        return Err(Error::LengthError {
            expected: length,
            computed: digest.length,
        });
    }

    Ok(digest)
}

/// Decompresses a complete gzip member read from `input` through `chunk` into `sink`, and
/// verifies its trailer.
pub fn decompress<R: Refill, W: Sink>(
    input: R,
    sink: W,
    chunk: &mut [u8],
) -> Result<Digest, Error> {
    let mut source = ByteSource::new(input, chunk);

    parse_header(&mut source)?;

    let mut inflater = Inflater::new(source, sink);
    let digest = inflater.run()?;
    let (mut source, _) = inflater.into_parts();

    verify_trailer(&mut source, digest)
}
