use std::io::{self, Read};

use byteorder::{ByteOrder, LittleEndian};
use log::{trace, warn};

use crate::Error;

/// Supplies the next chunk of compressed input.
pub trait Refill {
    /// Fills `chunk` with the next piece of input and returns how many bytes were written.
    ///
    /// Returning 0 signals that the input is exhausted, or that it could not be read.
    fn refill(&mut self, chunk: &mut [u8]) -> usize;
}

impl<R: Read> Refill for R {
    fn refill(&mut self, chunk: &mut [u8]) -> usize {
        loop {
            match self.read(chunk) {
                Ok(len) => return len,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("Compressed source read error: {}", err);
                    return 0;
                }
            }
        }
    }
}

/// Pull-based bit and byte reader over a caller-supplied chunk buffer.
///
/// Bits are delivered LSB-first, as DEFLATE packs them. Whole bytes (header fields, stored block
/// contents, the trailer) bypass the bit register entirely.
pub struct ByteSource<'a, R> {
    input: R,
    chunk: &'a mut [u8],
    len: usize,
    pos: usize,
    /// Bit register; bits above `bitcount` are always zero
    tag: u32,
    bitcount: u32,
}

impl<'a, R: Refill> ByteSource<'a, R> {
    /// Creates a reader that refills `chunk` from `input` whenever it runs dry.
    ///
    /// `chunk` does not need to hold any data yet, the first read triggers a refill.
    pub fn new(input: R, chunk: &'a mut [u8]) -> ByteSource<'a, R> {
        ByteSource {
            input,
            chunk,
            len: 0,
            pos: 0,
            tag: 0,
            bitcount: 0,
        }
    }

    /// Returns the next whole byte of input.
    pub fn next_byte(&mut self) -> Result<u8, Error> {
        if self.pos >= self.len {
            self.len = self.input.refill(self.chunk).min(self.chunk.len());
            self.pos = 0;

            trace!("Refilled {} bytes of compressed input", self.len);

            if self.len == 0 {
                return Err(Error::SourceExhausted);
            }
        }

        let byte = self.chunk[self.pos];
        self.pos += 1;

        Ok(byte)
    }

    /// Fills `buf` with the next `buf.len()` input bytes.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), Error> {
        for byte in buf.iter_mut() {
            *byte = self.next_byte()?;
        }

        Ok(())
    }

    pub fn read_u16_le(&mut self) -> Result<u16, Error> {
        let mut buf = [0u8; 2];
        self.read_exact(&mut buf)?;

        Ok(LittleEndian::read_u16(&buf))
    }

    pub fn read_u32_le(&mut self) -> Result<u32, Error> {
        let mut buf = [0u8; 4];
        self.read_exact(&mut buf)?;

        Ok(LittleEndian::read_u32(&buf))
    }

    /// Discards the next `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<(), Error> {
        for _ in 0..count {
            self.next_byte()?;
        }

        Ok(())
    }

    /// Discards bytes up to and including the next null byte.
    pub fn skip_cstr(&mut self) -> Result<(), Error> {
        while self.next_byte()? != 0 {}

        Ok(())
    }

    /// Returns the next bit of the stream.
    pub fn read_bit(&mut self) -> Result<u32, Error> {
        if self.bitcount == 0 {
            self.tag = self.next_byte()? as u32;
            self.bitcount = 8;
        }

        let bit = self.tag & 1;
        self.tag >>= 1;
        self.bitcount -= 1;

        Ok(bit)
    }

    /// Reads a `count`-bit value (at most 24 bits) and returns it added to `base`.
    pub fn read_bits(&mut self, count: u32, base: u32) -> Result<u32, Error> {
        debug_assert!(count <= 24);

        if count == 0 {
            return Ok(base);
        }

        while self.bitcount < count {
            self.tag |= (self.next_byte()? as u32) << self.bitcount;
            self.bitcount += 8;
        }

        let value = self.tag & ((1 << count) - 1);
        self.tag >>= count;
        self.bitcount -= count;

        Ok(base + value)
    }

    /// Drops any partially consumed byte so the next read starts on a byte boundary.
    pub fn align_to_byte(&mut self) {
        self.tag = 0;
        self.bitcount = 0;
    }

    /// Consumes `self` and returns the underlying input.
    pub fn into_inner(self) -> R {
        self.input
    }
}
