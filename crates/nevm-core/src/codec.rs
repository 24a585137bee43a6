//! Bounds-checked binary reader and writer for block payloads.
//!
//! Every fixed-width integer is little-endian. Variable-length fields carry a
//! `u32` length prefix unless they are the trailing field of a record.

use crate::crypto::Hash;
use crate::error::CoreError;

/// Cursor over a borrowed byte slice
pub struct BinaryReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BinaryReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        BinaryReader { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8], CoreError> {
        if self.remaining() < len {
            return Err(CoreError::malformed(format!(
                "need {} bytes at offset {}, have {}",
                len,
                self.pos,
                self.remaining()
            )));
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_u8(&mut self) -> Result<u8, CoreError> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, CoreError> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(CoreError::malformed(format!(
                "invalid bool byte {:#04x}",
                other
            ))),
        }
    }

    pub fn read_u32(&mut self) -> Result<u32, CoreError> {
        let mut buf = [0u8; 4];
        buf.copy_from_slice(self.read_bytes(4)?);
        Ok(u32::from_le_bytes(buf))
    }

    pub fn read_hash(&mut self) -> Result<Hash, CoreError> {
        let bytes = self.read_bytes(Hash::LEN)?;
        Hash::from_slice(bytes).ok_or(CoreError::InvalidHashLength)
    }

    /// `u32` length followed by that many bytes
    pub fn read_var_bytes(&mut self) -> Result<&'a [u8], CoreError> {
        let len = self.read_u32()? as usize;
        self.read_bytes(len)
    }

    /// Everything up to the end of the input
    pub fn read_to_end(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Fails if any input is left unread
    pub fn finish(self) -> Result<(), CoreError> {
        if self.remaining() != 0 {
            return Err(CoreError::malformed(format!(
                "{} trailing bytes after offset {}",
                self.remaining(),
                self.pos
            )));
        }
        Ok(())
    }
}

/// Append-only encoder
#[derive(Debug, Default)]
pub struct BinaryWriter {
    buf: Vec<u8>,
}

impl BinaryWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        BinaryWriter {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(bytes);
        self
    }

    pub fn write_u8(&mut self, value: u8) -> &mut Self {
        self.buf.push(value);
        self
    }

    pub fn write_bool(&mut self, value: bool) -> &mut Self {
        self.write_u8(value as u8)
    }

    pub fn write_u32(&mut self, value: u32) -> &mut Self {
        self.write_bytes(&value.to_le_bytes())
    }

    pub fn write_hash(&mut self, hash: &Hash) -> &mut Self {
        self.write_bytes(hash.as_bytes())
    }

    pub fn write_var_bytes(&mut self, bytes: &[u8]) -> Result<&mut Self, CoreError> {
        let len = u32::try_from(bytes.len()).map_err(|_| {
            CoreError::malformed(format!("field of {} bytes exceeds u32 length", bytes.len()))
        })?;
        Ok(self.write_u32(len).write_bytes(bytes))
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}
