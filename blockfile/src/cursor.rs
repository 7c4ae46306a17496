//! Offset allocators for the read and write sides
//!
//! Each side owns one `CursorAllocator`. The two never share a lock, so a
//! reader negotiating its next offset never waits for a writer doing the
//! same, and vice versa.

use parking_lot::Mutex;
use std::fmt;

use crate::error::BlockFileError;

/// Hands out strictly increasing, block-aligned offsets
///
/// # Thread Safety
///
/// The cursor is only touched under its own `parking_lot::Mutex`. The lock
/// is held for the arithmetic alone; no I/O ever happens under it.
pub struct CursorAllocator {
    cursor: Mutex<u64>,
    step: u64,
    name: &'static str,
}

impl CursorAllocator {
    /// Create an allocator starting at `start`, advancing by `step` bytes
    ///
    /// `start` must be a multiple of `step`; the caller validates `step > 0`.
    #[must_use]
    pub fn new(name: &'static str, step: u32, start: u64) -> Self {
        let step = u64::from(step);
        debug_assert!(step > 0);
        debug_assert_eq!(start % step, 0);
        Self {
            cursor: Mutex::new(start),
            step,
            name,
        }
    }

    /// Reserve the next offset
    ///
    /// Returns the pre-advance value. Every call returns a distinct offset.
    pub fn allocate(&self) -> Result<u64, BlockFileError> {
        let mut cursor = self.cursor.lock();
        let offset = *cursor;
        *cursor = offset
            .checked_add(self.step)
            .ok_or(BlockFileError::CursorExhausted)?;
        drop(cursor);

        tracing::trace!(cursor = self.name, offset, "allocated");
        Ok(offset)
    }

    /// Current offset (the next one to be handed out)
    #[must_use]
    pub fn position(&self) -> u64 {
        *self.cursor.lock()
    }

    /// Number of blocks allocated so far
    #[must_use]
    pub fn sequence_number(&self) -> u64 {
        self.position() / self.step
    }

    /// Sequence number of an offset returned by `allocate`
    #[must_use]
    pub fn sequence_of(&self, offset: u64) -> u64 {
        offset / self.step
    }
}

impl fmt::Debug for CursorAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CursorAllocator(name={}, position={}, step={})",
            self.name,
            self.position(),
            self.step
        )
    }
}
