//! Storage media and the reader/writer gate around them
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────┐
//! │  BlockFile (facade)                 │
//! │  - read/write cursors               │
//! │  - write progress, waiting readers  │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ positioned reads (shared) / writes (exclusive)
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  MediumGate                         │
//! │  - RwLock<Option<M>>                │
//! │  - None once the medium is released │
//! └─────────────────────────────────────┘
//!          ▲
//!          │ wraps
//!          ▼
//! ┌─────────────────────────────────────┐
//! │  Medium (byte-addressable storage)  │
//! └─────────────────────────────────────┘
//!      ▲              ▲
//!      │              │
//!  FileMedium     MemMedium
//! ```

pub mod file;
pub mod mem;

pub use file::FileMedium;
pub use mem::MemMedium;

use parking_lot::RwLock;
use std::io;

use crate::error::{BlockFileError, MediumReadError};

/// Byte-addressable storage that blocks are laid out on
///
/// Blocks are stored contiguously from offset 0 with no header or
/// trailer. The medium's extent is the only record of how far it has
/// been written.
pub trait Medium: Send + Sync {
    /// Fill `buf` with the bytes at `offset..offset + buf.len()`
    ///
    /// Returns `MediumReadError::InsufficientData` if the medium does not
    /// extend to the end of the range yet.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), MediumReadError>;

    /// Write all of `data` at `offset`, extending the medium if needed
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current length of the medium in bytes
    fn extent(&self) -> io::Result<u64>;

    /// Push buffered writes down to the medium (no-op if unbuffered)
    fn flush(&mut self) -> io::Result<()>;

    /// Release the medium, reporting any failure to do so
    fn close(self) -> io::Result<()>
    where
        Self: Sized;
}

/// Reader/writer gate around a medium
///
/// Any number of `read_at` calls proceed together; `write_at`, `flush` and
/// `close` exclude everything else for their duration. After `close` the
/// medium is gone and every call fails with `BlockFileError::Closed`.
pub struct MediumGate<M> {
    medium: RwLock<Option<M>>,
}

impl<M: Medium> MediumGate<M> {
    #[must_use]
    pub fn new(medium: M) -> Self {
        Self {
            medium: RwLock::new(Some(medium)),
        }
    }

    /// Positioned read under shared access
    ///
    /// The outer error is the gate's own (closed); the inner one is the
    /// medium's.
    pub fn read_at(
        &self,
        offset: u64,
        buf: &mut [u8],
    ) -> Result<Result<(), MediumReadError>, BlockFileError> {
        let guard = self.medium.read();
        let medium = guard.as_ref().ok_or(BlockFileError::Closed)?;
        Ok(medium.read_at(offset, buf))
    }

    /// Positioned write under exclusive access
    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<(), BlockFileError> {
        let mut guard = self.medium.write();
        let medium = guard.as_mut().ok_or(BlockFileError::Closed)?;
        medium.write_at(offset, data)?;
        Ok(())
    }

    pub fn extent(&self) -> Result<u64, BlockFileError> {
        let guard = self.medium.read();
        let medium = guard.as_ref().ok_or(BlockFileError::Closed)?;
        Ok(medium.extent()?)
    }

    pub fn flush(&self) -> Result<(), BlockFileError> {
        let mut guard = self.medium.write();
        let medium = guard.as_mut().ok_or(BlockFileError::Closed)?;
        medium.flush()?;
        Ok(())
    }

    /// Take the medium out of the gate and release it
    ///
    /// Waits for in-flight reads and writes to finish first.
    pub fn close(&self) -> Result<(), BlockFileError> {
        let medium = self.medium.write().take().ok_or(BlockFileError::Closed)?;
        medium.close()?;
        Ok(())
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.medium.read().is_some()
    }
}
