//! Growable write buffer used to build outbound packets.
//!
//! Big-endian by default, matching the client's packet headers. Binary
//! sub-messages (chat, Raviente notices) switch to little-endian with
//! [`ByteFrame::set_le`].

use bytes::{BufMut, Bytes, BytesMut};

#[derive(Debug, thiserror::Error)]
pub enum ByteFrameError {
    #[error("string too long for u16 length prefix: {0} bytes")]
    StringTooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Endian {
    Big,
    Little,
}

#[derive(Debug, Clone)]
pub struct ByteFrame {
    buf: BytesMut,
    endian: Endian,
}

impl ByteFrame {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
            endian: Endian::Big,
        }
    }

    /// Switch every following multi-byte write to little-endian.
    pub fn set_le(&mut self) {
        self.endian = Endian::Little;
    }

    pub fn set_be(&mut self) {
        self.endian = Endian::Big;
    }

    pub fn write_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn write_u16(&mut self, v: u16) {
        match self.endian {
            Endian::Big => self.buf.put_u16(v),
            Endian::Little => self.buf.put_u16_le(v),
        }
    }

    pub fn write_u32(&mut self, v: u32) {
        match self.endian {
            Endian::Big => self.buf.put_u32(v),
            Endian::Little => self.buf.put_u32_le(v),
        }
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn write_null_terminated_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
        self.buf.put_u8(0);
    }

    /// u16 length (including the trailing NUL) followed by the string and a NUL.
    pub fn write_pascal_u16(&mut self, s: &str) -> Result<(), ByteFrameError> {
        let bytes = s.as_bytes();
        let len = u16::try_from(bytes.len() + 1)
            .map_err(|_| ByteFrameError::StringTooLong(bytes.len()))?;
        self.write_u16(len);
        self.write_null_terminated_bytes(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    pub fn freeze(self) -> Bytes {
        self.buf.freeze()
    }
}

impl Default for ByteFrame {
    fn default() -> Self {
        Self::new()
    }
}
