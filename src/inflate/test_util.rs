/// Packs hand-built DEFLATE streams for tests.
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    acc: u32,
    count: u32,
}

impl BitWriter {
    pub fn new() -> BitWriter {
        BitWriter {
            bytes: Vec::new(),
            acc: 0,
            count: 0,
        }
    }

    /// Appends the low `count` bits of `value`, least significant bit first.
    pub fn bits(mut self, value: u32, count: u32) -> BitWriter {
        for i in 0..count {
            self.push_bit((value >> i) & 1);
        }

        self
    }

    /// Appends a `length`-bit huffman code, most significant bit first.
    pub fn code(mut self, code: u32, length: u32) -> BitWriter {
        for i in (0..length).rev() {
            self.push_bit((code >> i) & 1);
        }

        self
    }

    /// Pads the current byte with zero bits.
    pub fn align(mut self) -> BitWriter {
        if self.count > 0 {
            self.bytes.push(self.acc as u8);
            self.acc = 0;
            self.count = 0;
        }

        self
    }

    /// Appends whole bytes on the next byte boundary.
    pub fn bytes(self, data: &[u8]) -> BitWriter {
        let mut writer = self.align();
        writer.bytes.extend_from_slice(data);

        writer
    }

    pub fn finish(self) -> Vec<u8> {
        self.align().bytes
    }

    fn push_bit(&mut self, bit: u32) {
        self.acc |= bit << self.count;
        self.count += 1;

        if self.count == 8 {
            self.bytes.push(self.acc as u8);
            self.acc = 0;
            self.count = 0;
        }
    }
}
