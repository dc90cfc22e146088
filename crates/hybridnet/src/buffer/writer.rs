use bytes::{BufMut, BytesMut};

use crate::error::{WireError, WireResult};

const INITIAL_CAPACITY: usize = 64;

#[derive(Debug)]
pub struct Writer {
    buf: BytesMut,
    max_size: usize,
}

impl Writer {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_size,
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn reset(&mut self) {
        self.buf.clear();
    }

    /// Doubles the backing storage until `additional` more bytes fit, never
    /// past `max_size`.
    fn reserve(&mut self, additional: usize) -> WireResult<()> {
        let required = self.buf.len() + additional;
        if required > self.max_size {
            return Err(WireError::Capacity {
                required,
                max: self.max_size,
            });
        }

        if required > self.buf.capacity() {
            let mut capacity = self.buf.capacity().max(INITIAL_CAPACITY);
            while capacity < required {
                capacity *= 2;
            }
            // BytesMut::reserve grows amortized and could overshoot the ceiling
            let mut grown = BytesMut::with_capacity(capacity.min(self.max_size));
            grown.extend_from_slice(&self.buf);
            self.buf = grown;
        }

        Ok(())
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> WireResult<()> {
        self.reserve(bytes.len())?;
        self.buf.put_slice(bytes);
        Ok(())
    }

    pub fn write_u8(&mut self, value: u8) -> WireResult<()> {
        self.reserve(1)?;
        self.buf.put_u8(value);
        Ok(())
    }

    pub fn write_bool(&mut self, value: bool) -> WireResult<()> {
        self.write_u8(value as u8)
    }

    pub fn write_u16(&mut self, value: u16) -> WireResult<()> {
        self.reserve(2)?;
        self.buf.put_u16_le(value);
        Ok(())
    }

    pub fn write_u32(&mut self, value: u32) -> WireResult<()> {
        self.reserve(4)?;
        self.buf.put_u32_le(value);
        Ok(())
    }

    pub fn write_i32(&mut self, value: i32) -> WireResult<()> {
        self.reserve(4)?;
        self.buf.put_i32_le(value);
        Ok(())
    }

    pub fn write_u64(&mut self, value: u64) -> WireResult<()> {
        self.reserve(8)?;
        self.buf.put_u64_le(value);
        Ok(())
    }

    pub fn write_f32(&mut self, value: f32) -> WireResult<()> {
        self.reserve(4)?;
        self.buf.put_f32_le(value);
        Ok(())
    }

    pub fn write_f64(&mut self, value: f64) -> WireResult<()> {
        self.reserve(8)?;
        self.buf.put_f64_le(value);
        Ok(())
    }

    pub fn patch_u8(&mut self, position: usize, value: u8) {
        if let Some(byte) = self.buf.get_mut(position) {
            *byte = value;
        }
    }
}
