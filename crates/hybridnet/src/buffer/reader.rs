use bytes::{Buf, BytesMut};

use crate::error::{WireError, WireResult};

#[derive(Debug)]
pub struct Reader {
    buf: BytesMut,
    position: usize,
    max_size: usize,
}

impl Reader {
    pub fn new(max_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            position: 0,
            max_size,
        }
    }

    pub fn load(&mut self, bytes: &[u8]) -> WireResult<()> {
        if bytes.len() > self.max_size {
            return Err(WireError::InputTooLarge {
                len: bytes.len(),
                max: self.max_size,
            });
        }
        self.buf.clear();
        self.buf.extend_from_slice(bytes);
        self.position = 0;
        Ok(())
    }

    pub fn reset(&mut self) {
        self.buf.clear();
        self.position = 0;
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.buf.len() - self.position
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    fn ensure(&self, needed: usize) -> WireResult<()> {
        let remaining = self.remaining();
        if needed > remaining {
            return Err(WireError::UnexpectedEof { needed, remaining });
        }
        Ok(())
    }

    pub fn read_bytes(&mut self, len: usize) -> WireResult<&[u8]> {
        self.ensure(len)?;
        let start = self.position;
        self.position += len;
        Ok(&self.buf[start..self.position])
    }

    fn take<T>(&mut self, size: usize, get: impl FnOnce(&mut &[u8]) -> T) -> WireResult<T> {
        self.ensure(size)?;
        let mut cursor = &self.buf[self.position..];
        let value = get(&mut cursor);
        self.position += size;
        Ok(value)
    }

    pub fn read_u8(&mut self) -> WireResult<u8> {
        self.take(1, |b| b.get_u8())
    }

    pub fn read_bool(&mut self) -> WireResult<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            tag => Err(WireError::InvalidTag { what: "bool", tag }),
        }
    }

    pub fn read_u16(&mut self) -> WireResult<u16> {
        self.take(2, |b| b.get_u16_le())
    }

    pub fn read_u32(&mut self) -> WireResult<u32> {
        self.take(4, |b| b.get_u32_le())
    }

    pub fn read_i32(&mut self) -> WireResult<i32> {
        self.take(4, |b| b.get_i32_le())
    }

    pub fn read_u64(&mut self) -> WireResult<u64> {
        self.take(8, |b| b.get_u64_le())
    }

    pub fn read_f32(&mut self) -> WireResult<f32> {
        self.take(4, |b| b.get_f32_le())
    }

    pub fn read_f64(&mut self) -> WireResult<f64> {
        self.take(8, |b| b.get_f64_le())
    }
}
