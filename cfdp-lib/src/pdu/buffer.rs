use crate::{Error, Result};

/// Fixed capacity buffer for reassembling a single PDU.
///
/// Writes beyond the capacity are rejected, never truncated.
#[derive(Debug, Clone)]
pub struct ReassemblyBuffer {
    data: Vec<u8>,
    capacity: usize,
}

impl ReassemblyBuffer {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `dat`.
    ///
    /// # Errors
    /// [Error::Overrun] if `dat` does not fit in the remaining capacity. Nothing is
    /// written in that case.
    pub fn append(&mut self, dat: &[u8]) -> Result<()> {
        let attempted = self.data.len() + dat.len();
        if attempted > self.capacity {
            return Err(Error::Overrun {
                capacity: self.capacity,
                attempted,
            });
        }
        self.data.extend_from_slice(dat);
        Ok(())
    }

    #[must_use]
    pub fn bytes_read(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Take the buffered bytes, leaving the buffer empty.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::replace(&mut self.data, Vec::with_capacity(self.capacity))
    }

    pub fn reset(&mut self) {
        self.data.clear();
    }
}
