//! Error types for block file operations

use std::io;
use std::path::PathBuf;

/// Error type for `BlockFile` operations
#[derive(Debug, thiserror::Error)]
pub enum BlockFileError {
    /// Requested block length is zero
    #[error("Invalid block length: must be greater than zero")]
    InvalidLength,

    /// The underlying medium could not be created or opened
    #[error("Cannot create storage at {}: {source}", .path.display())]
    StorageCreation {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The medium failed a read, write, flush or release
    #[error("Storage I/O error: {0}")]
    StorageIo(#[from] io::Error),

    /// The block file is closed
    #[error("Block file is closed")]
    Closed,

    /// The read deadline expired before the block was written
    #[error("Timed out waiting for block {sequence}")]
    TimedOut { sequence: u64 },

    /// The read was cancelled before the block was written
    #[error("Cancelled while waiting for block {sequence}")]
    Cancelled { sequence: u64 },

    /// The write for this block failed; it will never be readable
    #[error("Write for block {sequence} failed")]
    WriteFailed { sequence: u64 },

    /// The cancel token was created by a different block file
    #[error("Cancel token belongs to a different block file")]
    ForeignToken,

    /// The next cursor offset does not fit into `u64`
    #[error("Cursor offset overflow")]
    CursorExhausted,
}

impl BlockFileError {
    /// True for errors caused by the medium itself
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::StorageCreation { .. } | Self::StorageIo(_))
    }
}

/// Outcome of a failed positioned read on a medium
///
/// `InsufficientData` means the medium does not extend far enough yet.
/// `BlockFile` absorbs it by waiting for more writes; it never reaches
/// the caller of `BlockFile::read`.
#[derive(Debug, thiserror::Error)]
pub enum MediumReadError {
    #[error("Medium does not extend to the requested range yet")]
    InsufficientData,

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_classification() {
        assert!(BlockFileError::StorageIo(io::Error::other("disk")).is_storage());
        assert!(BlockFileError::StorageCreation {
            path: PathBuf::from("/nowhere"),
            source: io::Error::from(io::ErrorKind::NotFound),
        }
        .is_storage());
        assert!(!BlockFileError::Closed.is_storage());
        assert!(!BlockFileError::InvalidLength.is_storage());
    }

    #[test]
    fn test_display_names_the_sequence() {
        let err = BlockFileError::TimedOut { sequence: 7 };
        assert_eq!(err.to_string(), "Timed out waiting for block 7");
    }
}
