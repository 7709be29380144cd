//! Sliding window of recently produced output.

use crate::Error;

/// Size of the DEFLATE history, and the furthest a back-reference can reach
pub const WINDOW_SIZE: usize = 32 * 1024;

/// Fixed-capacity ring of output bytes.
///
/// Bytes accumulate from the start of the buffer until it is full. The owner then drains
/// `pending()` and calls `rewind()`, after which new bytes overwrite the oldest ones while the
/// previous contents remain reachable for back-references.
pub struct Window {
    buf: [u8; WINDOW_SIZE],
    pos: usize,
    wrapped: bool,
}

impl Window {
    pub fn new() -> Window {
        Window {
            buf: [0; WINDOW_SIZE],
            pos: 0,
            wrapped: false,
        }
    }

    /// Returns true when no further byte fits before the next `rewind()`.
    pub fn is_full(&self) -> bool {
        self.pos == WINDOW_SIZE
    }

    /// Appends `byte` at the write cursor. The window must not be full.
    pub fn push(&mut self, byte: u8) {
        self.buf[self.pos] = byte;
        self.pos += 1;
    }

    /// Returns the bytes written since the last rewind.
    pub fn pending(&self) -> &[u8] {
        &self.buf[..self.pos]
    }

    /// Moves the write cursor back to the start of the buffer.
    pub fn rewind(&mut self) {
        if self.pos > 0 {
            self.wrapped = true;
        }

        self.pos = 0;
    }

    /// Number of history bytes a back-reference may currently reach.
    pub fn available(&self) -> usize {
        if self.wrapped {
            WINDOW_SIZE
        } else {
            self.pos
        }
    }

    /// Returns the byte `distance` positions behind the write cursor.
    pub fn recall(&self, distance: usize) -> Result<u8, Error> {
        if distance == 0 || distance > self.available() {
            return Err(Error::DataCorrupt("back-reference before the start of output"));
        }

        if distance <= self.pos {
            Ok(self.buf[self.pos - distance])
        } else {
            Ok(self.buf[WINDOW_SIZE - (distance - self.pos)])
        }
    }
}

impl Default for Window {
    fn default() -> Window {
        Window::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled_window() -> Box<Window> {
        let mut window = Box::new(Window::new());

        for i in 0..WINDOW_SIZE {
            window.push((i % 251) as u8);
        }

        window
    }

    #[test]
    fn it_should_refuse_references_before_the_first_byte() {
        let mut window = Window::new();
        assert!(window.recall(1).is_err());

        window.push(0xAA);
        window.push(0xBB);

        assert_eq!(window.recall(1).unwrap(), 0xBB);
        assert_eq!(window.recall(2).unwrap(), 0xAA);
        assert!(window.recall(3).is_err());
        assert!(window.recall(0).is_err());
    }

    #[test]
    fn it_should_recall_the_last_byte_before_wrapping() {
        let window = filled_window();

        assert!(window.is_full());
        assert_eq!(window.recall(1).unwrap(), ((WINDOW_SIZE - 1) % 251) as u8);
        assert_eq!(window.recall(WINDOW_SIZE).unwrap(), 0);
    }

    #[test]
    fn it_should_recall_across_the_wrap_boundary() {
        let mut window = filled_window();
        window.rewind();

        assert_eq!(window.pending().len(), 0);
        assert_eq!(window.available(), WINDOW_SIZE);
        // Directly after wrapping, distance 1 is the last byte of the buffer
        assert_eq!(window.recall(1).unwrap(), ((WINDOW_SIZE - 1) % 251) as u8);

        window.push(0xEE);

        // The first byte after the wrap
        assert_eq!(window.recall(1).unwrap(), 0xEE);
        // Distance equal to the cursor lands on the first slot
        assert_eq!(window.recall(1).unwrap(), window.pending()[0]);
        // One further back reaches the end of the previous pass
        assert_eq!(window.recall(2).unwrap(), ((WINDOW_SIZE - 1) % 251) as u8);
        // The full window reaches the oldest surviving byte
        assert_eq!(window.recall(WINDOW_SIZE).unwrap(), 1);
        assert!(window.recall(WINDOW_SIZE + 1).is_err());
    }
}
