use std::io::{self, ErrorKind, Read};

const ESCAPE: u8 = 0x1b;

/// Mimics what the terminal does with the Ctrl key: clears the upper 3 bits.
pub const fn ctrl(key: u8) -> u8 {
    key & 0x1f
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Key {
    Char(u8),
    Escape,
    ArrowUp,
    ArrowDown,
    ArrowLeft,
    ArrowRight,
}

/// Byte-at-a-time key decoder over a raw-mode input stream.
///
/// The stream is expected to return no data (rather than block forever)
/// when the terminal read timeout expires, which is how a lone Escape press
/// is told apart from the start of an arrow key sequence.
pub struct KeyReader<R> {
    inner: R,
}

impl<R: Read> KeyReader<R> {
    pub fn new(inner: R) -> Self {
        KeyReader { inner }
    }

    /// Blocks until a key arrives. Timeouts are retried; any other I/O
    /// failure is returned.
    pub fn read_key(&mut self) -> io::Result<Key> {
        let first = loop {
            if let Some(byte) = self.read_byte()? {
                break byte;
            }
        };

        if first != ESCAPE {
            return Ok(Key::Char(first));
        }

        let mut seq = [0u8; 2];
        for slot in seq.iter_mut() {
            match self.read_byte() {
                Ok(Some(byte)) => *slot = byte,
                _ => return Ok(Key::Escape),
            }
        }

        Ok(match seq {
            [b'[', b'A'] => Key::ArrowUp,
            [b'[', b'B'] => Key::ArrowDown,
            [b'[', b'C'] => Key::ArrowRight,
            [b'[', b'D'] => Key::ArrowLeft,
            _ => Key::Escape,
        })
    }

    /// Reads a single byte, mapping a timed out read to `None`.
    pub fn read_byte(&mut self) -> io::Result<Option<u8>> {
        let mut buf = [0u8; 1];
        match self.inner.read(&mut buf) {
            Ok(1) => Ok(Some(buf[0])),
            Ok(_) => Ok(None),
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::Interrupted) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
