//! Append-only blocked byte stream for object persistence
//!
//! Objects serialize themselves into a [`BinaryImage`]: a vector of
//! fixed-size blocks filled in order. Each logical section of an object is
//! prefixed by the 64-bit hash of its ASCII section name, and each object
//! closes with an `end` section, so a reader can verify it is consuming the
//! stream it expects. All scalars are little-endian; strings are
//! length-prefixed. Reads are strict: a wrong marker or a short stream is
//! an error, never a silent truncation.

use crate::error::{Result, TempoError};
use crate::hash::hash64;

/// Payload bytes per block.
pub const IMAGE_BUFF_SIZE: usize = 6136;

/// Longest string accepted when reading a stream back.
const MAX_STR_LEN: usize = 8192;

/// One fixed-size block of a [`BinaryImage`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageBlock {
    /// Bytes of `buffer` in use.
    pub size: u32,
    /// 1-based position of this block in the image.
    pub block_num: u32,
    /// The payload.
    pub buffer: [u8; IMAGE_BUFF_SIZE],
}

/// Read cursor over a [`BinaryImage`], advanced by every `get_*` call.
#[derive(Debug, Clone, Copy, Default)]
pub struct Cursor {
    block: usize,
    offset: usize,
}

/// A sequence of fixed-size blocks holding serialized object state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BinaryImage {
    blocks: Vec<ImageBlock>,
}

impl BinaryImage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of blocks written so far.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    fn tail_block(&mut self) -> &mut ImageBlock {
        let full = self
            .blocks
            .last()
            .map_or(true, |b| b.size as usize == IMAGE_BUFF_SIZE);

        if full {
            let block_num = self.blocks.len() as u32 + 1;
            self.blocks.push(ImageBlock {
                size: 0,
                block_num,
                buffer: [0; IMAGE_BUFF_SIZE],
            });
        }

        let idx = self.blocks.len() - 1;
        &mut self.blocks[idx]
    }

    /// Append raw bytes, spilling across blocks as needed.
    pub fn put_bytes(&mut self, data: &[u8]) {
        let mut start = 0;

        while start < data.len() {
            let block = self.tail_block();
            let used = block.size as usize;
            let take = (data.len() - start).min(IMAGE_BUFF_SIZE - used);

            block.buffer[used..used + take].copy_from_slice(&data[start..start + take]);
            block.size += take as u32;
            start += take;
        }
    }

    /// Read exactly `out.len()` bytes at the cursor, advancing it.
    pub fn get_bytes(&self, cursor: &mut Cursor, out: &mut [u8]) -> Result<()> {
        let mut written = 0;

        while written < out.len() {
            let block = self.blocks.get(cursor.block).ok_or(TempoError::Truncated)?;
            let used = block.size as usize;

            if cursor.offset >= used {
                // Only a completely filled block may be stepped over.
                if cursor.offset > used || used != IMAGE_BUFF_SIZE {
                    return Err(TempoError::Truncated);
                }
                cursor.block += 1;
                cursor.offset = 0;
                continue;
            }

            let take = (out.len() - written).min(used - cursor.offset);
            out[written..written + take]
                .copy_from_slice(&block.buffer[cursor.offset..cursor.offset + take]);
            cursor.offset += take;
            written += take;
        }

        Ok(())
    }

    pub fn put_bool(&mut self, value: bool) {
        self.put_bytes(&[u8::from(value)]);
    }

    pub fn put_u8(&mut self, value: u8) {
        self.put_bytes(&[value]);
    }

    pub fn put_u64(&mut self, value: u64) {
        self.put_bytes(&value.to_le_bytes());
    }

    pub fn put_i64(&mut self, value: i64) {
        self.put_bytes(&value.to_le_bytes());
    }

    pub fn put_f64(&mut self, value: f64) {
        self.put_bytes(&value.to_le_bytes());
    }

    /// Length-prefixed UTF-8 string.
    pub fn put_str(&mut self, value: &str) {
        self.put_u64(value.len() as u64);
        self.put_bytes(value.as_bytes());
    }

    /// Write a section marker: the 64-bit hash of the section name.
    pub fn put_section(&mut self, name: &str) {
        self.put_u64(hash64(name.as_bytes()));
    }

    pub fn get_bool(&self, cursor: &mut Cursor) -> Result<bool> {
        let mut buf = [0u8; 1];
        self.get_bytes(cursor, &mut buf)?;
        Ok(buf[0] != 0)
    }

    pub fn get_u8(&self, cursor: &mut Cursor) -> Result<u8> {
        let mut buf = [0u8; 1];
        self.get_bytes(cursor, &mut buf)?;
        Ok(buf[0])
    }

    pub fn get_u64(&self, cursor: &mut Cursor) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.get_bytes(cursor, &mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    pub fn get_i64(&self, cursor: &mut Cursor) -> Result<i64> {
        let mut buf = [0u8; 8];
        self.get_bytes(cursor, &mut buf)?;
        Ok(i64::from_le_bytes(buf))
    }

    pub fn get_f64(&self, cursor: &mut Cursor) -> Result<f64> {
        let mut buf = [0u8; 8];
        self.get_bytes(cursor, &mut buf)?;
        Ok(f64::from_le_bytes(buf))
    }

    pub fn get_str(&self, cursor: &mut Cursor) -> Result<String> {
        let len = self.get_u64(cursor)? as usize;
        if len > MAX_STR_LEN {
            return Err(TempoError::Truncated);
        }

        let mut buf = vec![0u8; len];
        self.get_bytes(cursor, &mut buf)?;
        String::from_utf8(buf).map_err(|_| TempoError::Truncated)
    }

    /// Read a section marker and verify it names the expected section.
    pub fn expect_section(&self, cursor: &mut Cursor, name: &'static str) -> Result<()> {
        if self.get_u64(cursor)? == hash64(name.as_bytes()) {
            Ok(())
        } else {
            Err(TempoError::BadSection(name))
        }
    }
}
