use std::collections::VecDeque;

use crate::buffer::{BufferPool, Writer};
use crate::error::{WireError, WireResult};

pub const MAX_BATCH_MESSAGES: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchFraming {
    CountPrefixed,
    Unframed,
}

#[derive(Debug)]
pub struct Batcher {
    queue: VecDeque<Writer>,
    queued_bytes: usize,
    max_batch_size: usize,
    framing: BatchFraming,
}

impl Batcher {
    pub fn new(max_batch_size: usize, framing: BatchFraming) -> Self {
        Self {
            queue: VecDeque::new(),
            queued_bytes: 0,
            max_batch_size,
            framing,
        }
    }

    pub fn framing(&self) -> BatchFraming {
        self.framing
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }

    fn overhead(&self) -> usize {
        match self.framing {
            BatchFraming::CountPrefixed => 1,
            BatchFraming::Unframed => 0,
        }
    }

    /// Queues a serialized message. A message that could never fit a batch
    /// on its own is rejected and its buffer returned to the pool.
    pub fn push(&mut self, message: Writer, pool: &mut BufferPool) -> WireResult<()> {
        let len = message.len();
        if len + self.overhead() > self.max_batch_size {
            pool.release_writer(message);
            return Err(WireError::MessageTooLarge {
                len,
                max: self.max_batch_size.saturating_sub(self.overhead()),
            });
        }

        self.queued_bytes += len;
        self.queue.push_back(message);
        Ok(())
    }

    pub fn flush(&mut self, out: &mut Writer, pool: &mut BufferPool) -> WireResult<usize> {
        out.reset();
        if self.queue.is_empty() {
            return Ok(0);
        }

        if self.framing == BatchFraming::CountPrefixed {
            out.write_u8(0)?;
        }

        let mut count = 0;
        while let Some(next) = self.queue.front() {
            if out.len() + next.len() > self.max_batch_size {
                break;
            }
            if self.framing == BatchFraming::CountPrefixed && count == MAX_BATCH_MESSAGES {
                break;
            }

            out.write_bytes(next.as_bytes())?;
            self.queued_bytes -= next.len();
            count += 1;
            if let Some(message) = self.queue.pop_front() {
                pool.release_writer(message);
            }
        }

        if self.framing == BatchFraming::CountPrefixed {
            out.patch_u8(0, count as u8);
        }
        Ok(count)
    }

    pub fn clear(&mut self, pool: &mut BufferPool) -> usize {
        let dropped = self.queue.len();
        for message in self.queue.drain(..) {
            pool.release_writer(message);
        }
        self.queued_bytes = 0;
        dropped
    }
}
