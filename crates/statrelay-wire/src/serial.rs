use std::io::{Read, Write};

use crate::error::WireError;

/// Binary reader over an underlying byte source.
///
/// All multi-byte integers are little-endian. Slices returned by
/// [`SerialReader::read_bytes`] borrow the reader's scratch buffer and are
/// only valid until the next read.
#[derive(Debug)]
pub struct SerialReader<R> {
    source: R,
    /// Scratch storage for reads; a peeked byte lives at index 0.
    buf: Vec<u8>,
    peeked: bool,
}

impl<R: Read> SerialReader<R> {
    pub fn new(source: R) -> Self {
        Self {
            source,
            buf: vec![0; 1024],
            peeked: false,
        }
    }

    /// Swaps the underlying byte source, discarding any pending peeked byte.
    /// The scratch buffer is retained.
    pub fn set_source(&mut self, source: R) {
        self.source = source;
        self.peeked = false;
    }

    /// Reads exactly `count` bytes, looping until the source fills them.
    ///
    /// A source that ends early yields an unexpected-EOF error rather than a
    /// truncated slice.
    pub fn read_bytes(&mut self, count: usize) -> Result<&[u8], WireError> {
        if count == 0 {
            return Ok(&[]);
        }
        if self.buf.len() < count {
            self.buf.resize(count, 0);
        }

        let start = if self.peeked {
            self.peeked = false;
            if count == 1 {
                return Ok(&self.buf[..1]);
            }
            1
        } else {
            0
        };

        self.source.read_exact(&mut self.buf[start..count])?;
        Ok(&self.buf[..count])
    }

    /// Returns the next byte without consuming it. Idempotent; the following
    /// `read_u8` yields the same byte.
    pub fn peek_u8(&mut self) -> Result<u8, WireError> {
        if self.peeked {
            return Ok(self.buf[0]);
        }
        let byte = self.read_bytes(1)?[0];
        self.peeked = true;
        Ok(byte)
    }

    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        let bytes = self.read_bytes(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        let bytes = self.read_bytes(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_i64(&mut self) -> Result<i64, WireError> {
        let bytes = self.read_bytes(8)?;
        Ok(i64::from_le_bytes([
            bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
        ]))
    }
}

/// Binary writer over an underlying sink. Writes are not buffered beyond the
/// sink itself.
#[derive(Debug)]
pub struct SerialWriter<W> {
    sink: W,
}

impl<W: Write> SerialWriter<W> {
    pub fn new(sink: W) -> Self {
        Self { sink }
    }

    /// Swaps the underlying sink, returning the previous one.
    pub fn set_sink(&mut self, sink: W) -> W {
        std::mem::replace(&mut self.sink, sink)
    }

    pub fn into_inner(self) -> W {
        self.sink
    }

    pub fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.sink.write_all(&[value])?;
        Ok(())
    }

    pub fn write_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.sink.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.sink.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<(), WireError> {
        self.sink.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        self.sink.write_all(bytes)?;
        Ok(())
    }
}
