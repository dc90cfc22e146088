use crate::error::WireResult;

use super::reader::Reader;
use super::writer::Writer;

#[derive(Debug)]
pub struct BufferPool {
    writers: Vec<Writer>,
    readers: Vec<Reader>,
    max_size: usize,
    max_pooled: usize,
    allocated: usize,
}

impl BufferPool {
    pub fn new(max_size: usize, max_pooled: usize) -> Self {
        Self {
            writers: Vec::new(),
            readers: Vec::new(),
            max_size,
            max_pooled,
            allocated: 0,
        }
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_writer(&mut self) -> Writer {
        match self.writers.pop() {
            Some(writer) => writer,
            None => {
                self.allocated += 1;
                Writer::new(self.max_size)
            }
        }
    }

    pub fn release_writer(&mut self, mut writer: Writer) {
        writer.reset();
        if self.writers.len() < self.max_pooled {
            self.writers.push(writer);
        }
    }

    pub fn acquire_reader(&mut self, bytes: &[u8]) -> WireResult<Reader> {
        let mut reader = match self.readers.pop() {
            Some(reader) => reader,
            None => {
                self.allocated += 1;
                Reader::new(self.max_size)
            }
        };

        if let Err(e) = reader.load(bytes) {
            self.release_reader(reader);
            return Err(e);
        }
        Ok(reader)
    }

    pub fn release_reader(&mut self, mut reader: Reader) {
        reader.reset();
        if self.readers.len() < self.max_pooled {
            self.readers.push(reader);
        }
    }

    pub fn idle_writers(&self) -> usize {
        self.writers.len()
    }

    pub fn idle_readers(&self) -> usize {
        self.readers.len()
    }

    pub fn allocated(&self) -> usize {
        self.allocated
    }
}
