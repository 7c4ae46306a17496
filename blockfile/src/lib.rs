//! Fixed-block-size data file for concurrent writers and readers
//!
//! Writers append blocks and readers consume them, each one block per call,
//! without coordinating with each other. See [`BlockFile`].
//!
//! ```
//! use blockfile::{BlockFile, BlockFileConfig, MemMedium};
//!
//! let file = BlockFile::with_medium(MemMedium::new(), BlockFileConfig::new(4)).unwrap();
//! assert_eq!(file.write(b"ABCDE").unwrap(), 0);
//!
//! let block = file.read().unwrap();
//! assert_eq!(block.sequence, 0);
//! assert_eq!(block.data, b"ABCD");
//! ```

pub mod backoff;
pub mod block_file;
pub mod config;
pub mod cursor;
pub mod error;
pub mod medium;
mod progress;


// Re-export the facade and its types for convenience
pub use block_file::{Block, BlockFile, CancelToken};
pub use config::{BlockFileConfig, OpenMode, ReadWait, ShortWrite};
pub use error::{BlockFileError, MediumReadError};

// Re-export media for convenience
pub use medium::{FileMedium, Medium, MediumGate, MemMedium};
