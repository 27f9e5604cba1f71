use std::cell::RefCell;
use std::rc::Rc;

use crate::foundation::error::{TexPipeError, TexPipeResult};

/// Linear host-visible upload buffer shared by every atlas that records into one command list.
///
/// Allocation is a bump pointer. Space is only reclaimed by [`SharedStagingBuffer::reset`], which
/// the owner calls once the GPU has consumed the commands that read from it.
#[derive(Debug, Clone)]
pub struct SharedStagingBuffer {
    data: Vec<u8>,
    offset: u64,
}

/// Handle used when several atlases draw from the same staging buffer.
pub type SharedStaging = Rc<RefCell<SharedStagingBuffer>>;

impl SharedStagingBuffer {
    /// Create a buffer of `size` bytes.
    pub fn new(size: u64) -> TexPipeResult<Self> {
        if size == 0 {
            return Err(TexPipeError::config("staging buffer size must be > 0"));
        }
        let len = usize::try_from(size)
            .map_err(|_| TexPipeError::config(format!("staging buffer too large: {size}")))?;
        Ok(Self {
            data: vec![0; len],
            offset: 0,
        })
    }

    /// Wrap a new buffer in the shared handle.
    pub fn shared(size: u64) -> TexPipeResult<SharedStaging> {
        Ok(Rc::new(RefCell::new(Self::new(size)?)))
    }

    /// Reserve `bytes` at an offset aligned to `align`. Returns `None` when the buffer is full.
    pub fn allocate(&mut self, bytes: u64, align: u64) -> Option<u64> {
        let align = align.max(1);
        let start = self.offset.checked_add(align - 1)? / align * align;
        let end = start.checked_add(bytes)?;
        if end > self.size() {
            return None;
        }
        self.offset = end;
        Some(start)
    }

    /// Copy `bytes` into a previously allocated region.
    pub fn write(&mut self, offset: u64, bytes: &[u8]) {
        let at = offset as usize;
        self.data[at..at + bytes.len()].copy_from_slice(bytes);
    }

    /// Read back a region, as the GPU would when executing a copy.
    pub fn bytes(&self, offset: u64, len: u64) -> Option<&[u8]> {
        let start = usize::try_from(offset).ok()?;
        let end = start.checked_add(usize::try_from(len).ok()?)?;
        self.data.get(start..end)
    }

    /// Capacity in bytes.
    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Bytes handed out since the last reset.
    pub fn used(&self) -> u64 {
        self.offset
    }

    /// Make the whole buffer available again.
    pub fn reset(&mut self) {
        self.offset = 0;
    }
}

#[cfg(test)]
#[path = "../../tests/unit/atlas/staging.rs"]
mod tests;
