//! In-memory medium with internal locking
//!
//! Clones share the same bytes, so a test can keep one clone to inspect
//! what a `BlockFile` wrote through another.

use parking_lot::{Mutex, MutexGuard};
use std::io;
use std::ops::Deref;
use std::sync::Arc;

use super::Medium;
use crate::error::MediumReadError;

/// Read-only guard to medium contents
///
/// Holds the lock and provides read-only access to the underlying data.
/// The lock is released when the guard is dropped.
pub struct MemReadGuard<'a>(MutexGuard<'a, Vec<u8>>);

impl Deref for MemReadGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for MemReadGuard<'_> {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Shared in-memory medium
///
/// Backed by `Arc<Mutex<Vec<u8>>>`. Writing past the end grows the vector;
/// any gap between the old end and the write offset is zero-filled, the
/// same way a sparse file reads back.
///
/// # Example
///
/// ```
/// use blockfile::medium::{Medium, MemMedium};
///
/// let mut medium = MemMedium::new();
/// medium.write_at(2, b"hi").unwrap();
///
/// let guard = medium.lock();
/// assert_eq!(&*guard, b"\0\0hi");
/// ```
#[derive(Clone, Default)]
pub struct MemMedium(Arc<Mutex<Vec<u8>>>);

impl MemMedium {
    /// Create a new empty medium
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a medium pre-filled with `bytes`
    #[must_use]
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Arc::new(Mutex::new(bytes)))
    }

    /// Current length in bytes
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }

    /// Lock the medium for inspection
    #[must_use]
    pub fn lock(&self) -> MemReadGuard<'_> {
        MemReadGuard(self.0.lock())
    }
}

fn to_index(value: u64) -> io::Result<usize> {
    usize::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("offset {value} exceeds addressable memory"),
        )
    })
}

impl Medium for MemMedium {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<(), MediumReadError> {
        let start = to_index(offset)?;
        let data = self.0.lock();
        let src = start
            .checked_add(buf.len())
            .and_then(|end| data.get(start..end))
            .ok_or(MediumReadError::InsufficientData)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = to_index(offset)?;
        let end = start
            .checked_add(data.len())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "write range overflow"))?;

        let mut bytes = self.0.lock();
        if bytes.len() < end {
            bytes.resize(end, 0);
        }
        // SAFETY: the vector was just resized to at least `end`
        #[allow(clippy::indexing_slicing)]
        bytes[start..end].copy_from_slice(data);
        Ok(())
    }

    fn extent(&self) -> io::Result<u64> {
        Ok(self.len() as u64)
    }

    fn flush(&mut self) -> io::Result<()> {
        // No-op for in-memory storage
        Ok(())
    }

    fn close(self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_medium_is_empty() {
        let medium = MemMedium::new();
        assert!(medium.is_empty());
        assert_eq!(medium.extent().unwrap(), 0);
    }

    #[test]
    fn test_write_past_end_zero_fills_gap() {
        let mut medium = MemMedium::new();
        medium.write_at(4, b"tail").unwrap();
        assert_eq!(&*medium.lock(), b"\0\0\0\0tail");
    }

    #[test]
    fn test_overwrite_in_place() {
        let mut medium = MemMedium::from_bytes(b"aaaabbbb".to_vec());
        medium.write_at(2, b"XY").unwrap();
        assert_eq!(&*medium.lock(), b"aaXYbbbb");
        assert_eq!(medium.len(), 8);
    }

    #[test]
    fn test_short_read_is_insufficient_data() {
        let medium = MemMedium::from_bytes(b"abc".to_vec());
        let mut buf = [0u8; 4];
        assert!(matches!(
            medium.read_at(0, &mut buf),
            Err(MediumReadError::InsufficientData)
        ));
        assert!(matches!(
            medium.read_at(10, &mut buf),
            Err(MediumReadError::InsufficientData)
        ));
    }

    #[test]
    fn test_clone_shares_data() {
        let medium = MemMedium::new();
        let mut writer = medium.clone();
        writer.write_at(0, b"shared").unwrap();
        assert_eq!(&*medium.lock(), b"shared");
    }
}
