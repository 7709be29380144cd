//! Canonical Huffman tables.

use crate::inflate::source::{ByteSource, Refill};
use crate::Error;

/// Longest code DEFLATE allows
pub const MAX_CODE_LENGTH: usize = 15;

/// Largest alphabet DEFLATE uses (literal/length)
pub const MAX_SYMBOLS: usize = 288;

/// A canonical Huffman decoding table.
///
/// `counts[n]` is the number of codes of bit length `n`, and `symbols` lists every symbol with a
/// non-zero length ordered by length, then by symbol value. Both are always rebuilt together.
#[derive(Clone)]
pub struct HuffmanTree {
    counts: [u16; MAX_CODE_LENGTH + 1],
    symbols: [u16; MAX_SYMBOLS],
    assigned: usize,
}

impl HuffmanTree {
    /// Returns a tree with no codes.
    pub fn new() -> HuffmanTree {
        HuffmanTree {
            counts: [0; MAX_CODE_LENGTH + 1],
            symbols: [0; MAX_SYMBOLS],
            assigned: 0,
        }
    }

    /// Rebuilds the tree from one code length per symbol, where 0 means the symbol is unused.
    pub fn build(&mut self, lengths: &[u8]) -> Result<(), Error> {
        if lengths.len() > MAX_SYMBOLS {
            return Err(Error::DataCorrupt("too many symbols for a huffman tree"));
        }

        self.counts = [0; MAX_CODE_LENGTH + 1];

        for &length in lengths {
            if length as usize > MAX_CODE_LENGTH {
                return Err(Error::DataCorrupt("huffman code length above 15"));
            }

            self.counts[length as usize] += 1;
        }

        self.counts[0] = 0;

        // Offset of the first symbol of each length in the translation table
        let mut offsets = [0u16; MAX_CODE_LENGTH + 1];
        let mut sum = 0;

        for (offset, &count) in offsets.iter_mut().zip(self.counts.iter()) {
            *offset = sum;
            sum += count;
        }

        for (symbol, &length) in lengths.iter().enumerate() {
            if length != 0 {
                let slot = &mut offsets[length as usize];

                self.symbols[*slot as usize] = symbol as u16;
                *slot += 1;
            }
        }

        self.assigned = sum as usize;

        Ok(())
    }

    /// Decodes the next symbol from `source`, one bit at a time.
    pub fn decode<R: Refill>(&self, source: &mut ByteSource<'_, R>) -> Result<u16, Error> {
        let mut sum: i32 = 0;
        let mut code: i32 = 0;
        let mut length = 0;

        loop {
            code = 2 * code + source.read_bit()? as i32;
            length += 1;

            if length > MAX_CODE_LENGTH {
                return Err(Error::DataCorrupt("huffman code longer than 15 bits"));
            }

            let count = self.counts[length] as i32;

            sum += count;
            code -= count;

            if code < 0 {
                break;
            }
        }

        let index = sum + code;

        if index < 0 || index as usize >= self.assigned {
            return Err(Error::DataCorrupt("huffman code outside of the symbol table"));
        }

        Ok(self.symbols[index as usize])
    }
}

impl Default for HuffmanTree {
    fn default() -> HuffmanTree {
        HuffmanTree::new()
    }
}

/// Loads the fixed literal/length and distance trees of RFC 1951 section 3.2.6.
pub fn build_fixed_trees(literal: &mut HuffmanTree, distance: &mut HuffmanTree) {
    literal.counts = [0; MAX_CODE_LENGTH + 1];
    literal.counts[7] = 24;
    literal.counts[8] = 152;
    literal.counts[9] = 112;

    let order = (256..280).chain(0..144).chain(280..288).chain(144..256);

    for (slot, symbol) in literal.symbols.iter_mut().zip(order) {
        *slot = symbol;
    }

    literal.assigned = 288;

    distance.counts = [0; MAX_CODE_LENGTH + 1];
    distance.counts[5] = 32;

    for (slot, symbol) in distance.symbols.iter_mut().zip(0..32) {
        *slot = symbol;
    }

    distance.assigned = 32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inflate::test_util::BitWriter;

    fn decode_all(tree: &HuffmanTree, input: &[u8], count: usize) -> Result<Vec<u16>, Error> {
        let mut chunk = [0u8; 64];
        let mut source = ByteSource::new(input, &mut chunk);

        (0..count).map(|_| tree.decode(&mut source)).collect()
    }

    #[test]
    fn it_should_decode_the_only_symbol_of_a_single_code_tree() {
        let mut tree = HuffmanTree::new();
        tree.build(&[0, 0, 0, 1]).unwrap();

        let input = BitWriter::new().code(0, 1).code(0, 1).code(0, 1).finish();
        assert_eq!(decode_all(&tree, &input, 3).unwrap(), vec![3, 3, 3]);

        // The other single-bit code is unassigned and never terminates
        let input = BitWriter::new().code(1, 1).bits(0xFFFF, 16).finish();
        assert!(matches!(
            decode_all(&tree, &input, 1),
            Err(Error::DataCorrupt(_))
        ));
    }

    #[test]
    fn it_should_assign_codes_in_canonical_order() {
        // RFC 1951 section 3.2.2 example: A..H with lengths (3, 3, 3, 3, 3, 2, 4, 4)
        let mut tree = HuffmanTree::new();
        tree.build(&[3, 3, 3, 3, 3, 2, 4, 4]).unwrap();

        let input = BitWriter::new()
            .code(0b00, 2) // F
            .code(0b010, 3) // A
            .code(0b110, 3) // E
            .code(0b1110, 4) // G
            .code(0b1111, 4) // H
            .finish();

        assert_eq!(decode_all(&tree, &input, 5).unwrap(), vec![5, 0, 4, 6, 7]);
    }

    #[test]
    fn it_should_decode_fixed_literal_and_distance_codes() {
        let mut literal = HuffmanTree::new();
        let mut distance = HuffmanTree::new();
        build_fixed_trees(&mut literal, &mut distance);

        let input = BitWriter::new()
            .code(0x30 + b'A' as u32, 8) // literal 'A'
            .code(0x190 + (200 - 144), 9) // literal 200
            .code(0, 7) // end of block
            .code(0xC0 + 4, 8) // length symbol 284
            .finish();
        assert_eq!(
            decode_all(&literal, &input, 4).unwrap(),
            vec![b'A' as u16, 200, 256, 284]
        );

        let input = BitWriter::new().code(7, 5).code(29, 5).finish();
        assert_eq!(decode_all(&distance, &input, 2).unwrap(), vec![7, 29]);
    }

    #[test]
    fn it_should_reject_code_lengths_above_fifteen() {
        let mut tree = HuffmanTree::new();

        assert!(matches!(tree.build(&[16]), Err(Error::DataCorrupt(_))));
    }
}
