//! Streaming DEFLATE (RFC 1951) decompression
//!
//! The decoder pulls compressed input through a [`Refill`] implementation and pushes output to
//! a [`Sink`] each time the 32 KiB sliding window fills up, and once more at the end of the
//! stream. Every buffer has a fixed size; nothing is allocated while decoding.

mod huffman;
mod source;
#[cfg(test)]
pub(crate) mod test_util;
mod window;

use std::convert::TryFrom;

use log::{debug, trace};
use num_enum::TryFromPrimitive;

pub use huffman::{build_fixed_trees, HuffmanTree, MAX_CODE_LENGTH, MAX_SYMBOLS};
pub use source::{ByteSource, Refill};
pub use window::{Window, WINDOW_SIZE};

use crate::crc32::Crc32;
use crate::Error;

/// Order in which the code length alphabet's own code lengths are stored
const CODE_LENGTH_ORDER: [usize; 19] = [
    16, 17, 18, 0, 8, 7, 9, 6, 10, 5, 11, 4, 12, 3, 13, 2, 14, 1, 15,
];

/// Receives decompressed output in stream order.
pub trait Sink {
    fn consume(&mut self, data: &[u8]) -> Result<(), Error>;
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn consume(&mut self, data: &[u8]) -> Result<(), Error> {
        (**self).consume(data)
    }
}

impl Sink for Vec<u8> {
    fn consume(&mut self, data: &[u8]) -> Result<(), Error> {
        self.extend_from_slice(data);

        Ok(())
    }
}

/// A sink that drops everything it is given.
#[derive(Debug, Default, Copy, Clone)]
pub struct Discard;

impl Sink for Discard {
    fn consume(&mut self, _data: &[u8]) -> Result<(), Error> {
        Ok(())
    }
}

/// The BTYPE field of a block header
#[repr(u8)]
#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive)]
enum BlockType {
    Stored = 0,
    Fixed = 1,
    Dynamic = 2,
}

/// Where the decoder is within the stream.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum State {
    /// The next bits are a block header
    AwaitBlock,
    /// Inside a stored block with `remaining` raw bytes left
    Stored { remaining: u32 },
    /// Inside a fixed or dynamic huffman block, with `length` bytes of a back-reference to
    /// `distance` still to be copied
    Huffman { length: u32, distance: u32 },
    /// The final block has ended and all output has been flushed
    Done,
}

/// Checksum and size of everything written to the sink.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Digest {
    pub crc32: u32,
    /// Output length modulo 2^32
    pub length: u32,
}

/// Extra bits and base values for the length and distance symbols
struct CodeTables {
    length_bits: [u8; 30],
    length_base: [u16; 30],
    distance_bits: [u8; 30],
    distance_base: [u16; 30],
}

impl CodeTables {
    fn new() -> CodeTables {
        let mut tables = CodeTables {
            length_bits: [0; 30],
            length_base: [0; 30],
            distance_bits: [0; 30],
            distance_base: [0; 30],
        };

        build_bits_base(&mut tables.length_bits, &mut tables.length_base, 4, 3);
        build_bits_base(&mut tables.distance_bits, &mut tables.distance_base, 2, 1);

        // Symbol 285 is 258 with no extra bits, not the 227 + 5 bits the pattern gives
        tables.length_bits[28] = 0;
        tables.length_base[28] = 258;

        tables
    }
}

/// Fills in one extra-bits table, where every `delta` symbols the extra bits grow by one, and
/// the base table that follows from it starting at `first`.
fn build_bits_base(bits: &mut [u8; 30], base: &mut [u16; 30], delta: usize, first: u16) {
    for (i, extra) in bits.iter_mut().enumerate() {
        *extra = if i < delta { 0 } else { ((i - delta) / delta) as u8 };
    }

    let mut sum = first;

    for (value, &extra) in base.iter_mut().zip(bits.iter()) {
        *value = sum;
        sum = sum.wrapping_add(1 << extra);
    }
}

/// The DEFLATE block state machine.
pub struct Inflater<'a, R, W> {
    source: ByteSource<'a, R>,
    sink: W,
    window: Window,
    literal: HuffmanTree,
    distance: HuffmanTree,
    tables: CodeTables,
    state: State,
    last_block: bool,
    checksum: Crc32,
    length: u32,
}

impl<'a, R: Refill, W: Sink> Inflater<'a, R, W> {
    /// Creates a decoder reading a raw DEFLATE stream from the current position of `source`.
    pub fn new(source: ByteSource<'a, R>, sink: W) -> Inflater<'a, R, W> {
        Inflater {
            source,
            sink,
            window: Window::new(),
            literal: HuffmanTree::new(),
            distance: HuffmanTree::new(),
            tables: CodeTables::new(),
            state: State::AwaitBlock,
            last_block: false,
            checksum: Crc32::new(),
            length: 0,
        }
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// Checksum and length of the output flushed so far.
    pub fn digest(&self) -> Digest {
        Digest {
            crc32: self.checksum.value(),
            length: self.length,
        }
    }

    /// Decodes until the final block has ended and returns the digest of the whole output.
    pub fn run(&mut self) -> Result<Digest, Error> {
        while self.step()? != State::Done {}

        Ok(self.digest())
    }

    /// Advances the decoder by one header, symbol or output byte.
    pub fn step(&mut self) -> Result<State, Error> {
        self.state = match self.state {
            State::AwaitBlock => self.begin_block()?,
            State::Stored { remaining: 0 } => self.end_block()?,
            State::Stored { remaining } => {
                let byte = self.source.next_byte()?;
                self.put(byte)?;

                State::Stored {
                    remaining: remaining - 1,
                }
            }
            State::Huffman { length: 0, .. } => self.decode_symbol()?,
            State::Huffman { length, distance } => {
                let byte = self.window.recall(distance as usize)?;
                self.put(byte)?;

                State::Huffman {
                    length: length - 1,
                    distance,
                }
            }
            State::Done => State::Done,
        };

        Ok(self.state)
    }

    /// Consumes the decoder and returns the input positioned after the last block, along with
    /// the sink.
    pub fn into_parts(self) -> (ByteSource<'a, R>, W) {
        (self.source, self.sink)
    }

    fn begin_block(&mut self) -> Result<State, Error> {
        self.last_block = self.source.read_bit()? == 1;

        let block_type = BlockType::try_from(self.source.read_bits(2, 0)? as u8)
            .map_err(|_| Error::DataCorrupt("reserved block type"))?;

        debug!(
            "Starting {:?} block (last: {})",
            block_type, self.last_block
        );

        match block_type {
            BlockType::Stored => {
                self.source.align_to_byte();

                let length = self.source.read_u16_le()?;
                let complement = self.source.read_u16_le()?;

                if length != !complement {
                    return Err(Error::DataCorrupt(
                        "stored block length does not match its complement",
                    ));
                }

                Ok(State::Stored {
                    remaining: length as u32,
                })
            }
            BlockType::Fixed => {
                build_fixed_trees(&mut self.literal, &mut self.distance);

                Ok(State::Huffman {
                    length: 0,
                    distance: 0,
                })
            }
            BlockType::Dynamic => {
                self.decode_trees()?;

                Ok(State::Huffman {
                    length: 0,
                    distance: 0,
                })
            }
        }
    }

    fn end_block(&mut self) -> Result<State, Error> {
        if self.last_block {
            self.flush()?;

            debug!("Inflated {} bytes", self.length);

            Ok(State::Done)
        } else {
            Ok(State::AwaitBlock)
        }
    }

    /// Reads the code length tables of a dynamic block and builds its literal/length and
    /// distance trees.
    fn decode_trees(&mut self) -> Result<(), Error> {
        let hlit = self.source.read_bits(5, 257)? as usize;
        let hdist = self.source.read_bits(5, 1)? as usize;
        let hclen = self.source.read_bits(4, 4)? as usize;
        let limit = hlit + hdist;

        trace!("Dynamic tables: hlit {} hdist {} hclen {}", hlit, hdist, hclen);

        let mut lengths = [0u8; MAX_SYMBOLS + 32];

        for &index in CODE_LENGTH_ORDER.iter().take(hclen) {
            lengths[index] = self.source.read_bits(3, 0)? as u8;
        }

        // The literal tree temporarily holds the code length tree
        self.literal.build(&lengths[..19])?;

        let mut num = 0;

        while num < limit {
            let symbol = self.literal.decode(&mut self.source)?;

            let (fill, repeat) = match symbol {
                0..=15 => {
                    lengths[num] = symbol as u8;
                    num += 1;

                    continue;
                }
                16 => {
                    if num == 0 {
                        return Err(Error::DataCorrupt("repeat of a code length that was never set"));
                    }

                    (lengths[num - 1], self.source.read_bits(2, 3)?)
                }
                17 => (0, self.source.read_bits(3, 3)?),
                18 => (0, self.source.read_bits(7, 11)?),
                _ => return Err(Error::DataCorrupt("invalid code length symbol")),
            };

            let repeat = repeat as usize;

            if num + repeat > limit {
                return Err(Error::DataCorrupt("code length repeat overruns the table"));
            }

            for length in &mut lengths[num..num + repeat] {
                *length = fill;
            }

            num += repeat;
        }

        self.literal.build(&lengths[..hlit])?;
        self.distance.build(&lengths[hlit..limit])?;

        Ok(())
    }

    fn decode_symbol(&mut self) -> Result<State, Error> {
        let symbol = self.literal.decode(&mut self.source)? as usize;

        match symbol {
            0..=255 => {
                self.put(symbol as u8)?;

                Ok(State::Huffman {
                    length: 0,
                    distance: 0,
                })
            }
            256 => self.end_block(),
            257..=285 => {
                let index = symbol - 257;
                let length = self.source.read_bits(
                    self.tables.length_bits[index] as u32,
                    self.tables.length_base[index] as u32,
                )?;

                let index = self.distance.decode(&mut self.source)? as usize;

                if index >= 30 {
                    return Err(Error::DataCorrupt("invalid distance symbol"));
                }

                let distance = self.source.read_bits(
                    self.tables.distance_bits[index] as u32,
                    self.tables.distance_base[index] as u32,
                )?;

                Ok(State::Huffman { length, distance })
            }
            _ => Err(Error::DataCorrupt("invalid literal/length symbol")),
        }
    }

    fn put(&mut self, byte: u8) -> Result<(), Error> {
        if self.window.is_full() {
            self.flush()?;
        }

        self.window.push(byte);

        Ok(())
    }

    /// Hands the buffered window contents to the sink and folds them into the digest.
    fn flush(&mut self) -> Result<(), Error> {
        let pending = self.window.pending();

        if !pending.is_empty() {
            self.sink.consume(pending)?;
            self.checksum.update(pending);
            self.length = self.length.wrapping_add(pending.len() as u32);
        }

        self.window.rewind();

        Ok(())
    }
}

/// Decompresses a raw DEFLATE stream read from `input` through the `chunk` buffer into `sink`.
pub fn inflate<R: Refill, W: Sink>(input: R, sink: W, chunk: &mut [u8]) -> Result<Digest, Error> {
    let mut inflater = Inflater::new(ByteSource::new(input, chunk), sink);

    inflater.run()
}
