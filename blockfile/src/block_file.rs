//! Fixed-length block file shared by concurrent writers and readers
//!
//! Implements a block store where:
//! - Writers each get their own block-aligned offset and write one block
//! - Readers each get their own block-aligned offset and read one block
//! - A reader whose block is not written yet waits until it is
//!
//! Offsets come from two independent cursors (one per side), so writers
//! and readers never contend while negotiating where to go. The medium
//! sits behind a reader/writer gate: reads share it, a write excludes
//! everything else.

use std::borrow::Cow;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::backoff::Backoff;
use crate::config::{BlockFileConfig, OpenMode, ReadWait, ShortWrite};
use crate::cursor::CursorAllocator;
use crate::error::{BlockFileError, MediumReadError};
use crate::medium::{FileMedium, Medium, MediumGate};
use crate::progress::{WaitOutcome, WriteProgress};

/// One block handed to a reader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Position of the block in allocation order (`offset / L`)
    pub sequence: u64,
    /// Exactly L bytes, as stored by the most recent write at that offset
    pub data: Vec<u8>,
}

/// Result of one read attempt
enum Attempt {
    Ready,
    /// Not readable yet; wait for the generation to move past this value
    Pending(u64),
}

/// Cancels waiting reads that were given this token
///
/// Obtained from `BlockFile::cancel_token`. Clones share the same flag.
/// Cancelling wakes every waiting reader of the file; those holding this
/// token return `BlockFileError::Cancelled`, the others go back to sleep.
/// A token only works with the file that created it; other files reject
/// it with `BlockFileError::ForeignToken`.
#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    progress: Arc<WriteProgress>,
}

impl CancelToken {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.progress.interrupt();
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CancelToken(cancelled={})", self.is_cancelled())
    }
}

/// Fixed-length block file
///
/// # Thread Safety
///
/// `BlockFile` is `Send + Sync`; share it between threads or tasks with
/// `Arc`. Three independent locks are involved and none is ever held while
/// acquiring another:
///
/// - **write cursor**: held only to compute the next write offset
/// - **read cursor**: held only to compute the next read offset
/// - **medium gate**: shared for reads, exclusive for writes, held for the
///   duration of the I/O
///
/// # Blocking
///
/// `read` blocks until the block at its sequence number is written. There
/// is no deadline unless `BlockFileConfig::read_timeout` is set or the read
/// is given a `CancelToken`. A reader that gives up (timeout, cancel) has
/// still consumed its sequence number.
///
/// # Lifecycle
///
/// Open after construction, closed by `close`. Every operation except
/// `length` fails with `BlockFileError::Closed` afterwards, and readers
/// waiting at the time of `close` are woken with the same error.
pub struct BlockFile<M: Medium = FileMedium> {
    config: BlockFileConfig,
    write_cursor: CursorAllocator,
    read_cursor: CursorAllocator,
    gate: MediumGate<M>,
    progress: Arc<WriteProgress>,
    closed: AtomicBool,
}

impl BlockFile<FileMedium> {
    /// Create (or truncate) the file at `path` with block length `block_length`
    pub fn open(path: impl Into<PathBuf>, block_length: u32) -> Result<Self, BlockFileError> {
        Self::open_with(path, BlockFileConfig::new(block_length))
    }

    /// Open the file at `path` with an explicit configuration
    pub fn open_with(
        path: impl Into<PathBuf>,
        config: BlockFileConfig,
    ) -> Result<Self, BlockFileError> {
        // Reject the length before touching the filesystem
        if config.block_length == 0 {
            return Err(BlockFileError::InvalidLength);
        }
        let medium = FileMedium::open(path, config.open_mode)?;
        Self::with_medium(medium, config)
    }
}

impl<M: Medium> BlockFile<M> {
    /// Build a block file on top of an already opened medium
    ///
    /// With `OpenMode::Truncate` any bytes already in the medium are
    /// ignored: both cursors start at 0 and no block counts as written.
    /// With `OpenMode::Resume` every whole block in the medium counts as
    /// written and the write cursor starts right after the last one (a
    /// partial trailing block gets overwritten).
    pub fn with_medium(medium: M, config: BlockFileConfig) -> Result<Self, BlockFileError> {
        let block_length = config.block_length;
        if block_length == 0 {
            return Err(BlockFileError::InvalidLength);
        }

        let existing_blocks = match config.open_mode {
            OpenMode::Truncate => 0,
            OpenMode::Resume => medium.extent()? / u64::from(block_length),
        };
        let write_start = existing_blocks * u64::from(block_length);

        tracing::debug!(
            block_length,
            existing_blocks,
            "block file open ({:?}, {:?}, {:?})",
            config.short_write,
            config.read_wait,
            config.read_timeout
        );

        Ok(Self {
            write_cursor: CursorAllocator::new("write", block_length, write_start),
            read_cursor: CursorAllocator::new("read", block_length, 0),
            gate: MediumGate::new(medium),
            progress: Arc::new(WriteProgress::new(existing_blocks)),
            closed: AtomicBool::new(false),
            config,
        })
    }

    /// Write one block
    ///
    /// Returns the sequence number the block was stored at. Data longer
    /// than L is silently truncated to its first L bytes. Data shorter than
    /// L is handled per `BlockFileConfig::short_write`. Medium failures are
    /// returned as `StorageIo`, without retry; the sequence number is
    /// consumed either way, and a reader of that sequence number gets
    /// `WriteFailed`.
    pub fn write(&self, data: &[u8]) -> Result<u64, BlockFileError> {
        self.ensure_open()?;

        let offset = self.write_cursor.allocate()?;
        let sequence = self.write_cursor.sequence_of(offset);
        let payload = self.payload(data);
        if data.len() > payload.len() {
            tracing::trace!(sequence, len = data.len(), "write truncated to block length");
        }

        if let Err(e) = self.gate.write_at(offset, &payload) {
            tracing::debug!(sequence, "write failed: {e}");
            self.progress.mark_failed(sequence);
            return Err(e);
        }
        self.progress.mark_written(sequence);

        tracing::trace!(sequence, offset, "block written");
        Ok(sequence)
    }

    /// The bytes actually written for `data`
    fn payload<'a>(&self, data: &'a [u8]) -> Cow<'a, [u8]> {
        let len = self.block_len();
        let block = data.get(..len).unwrap_or(data);
        match self.config.short_write {
            ShortWrite::ZeroFill if block.len() < len => {
                let mut padded = block.to_vec();
                padded.resize(len, 0);
                Cow::Owned(padded)
            }
            ShortWrite::ZeroFill | ShortWrite::LeaveAsIs => Cow::Borrowed(block),
        }
    }

    /// Read the next block, blocking until it is written
    ///
    /// Honours `BlockFileConfig::read_timeout`.
    pub fn read(&self) -> Result<Block, BlockFileError> {
        self.read_inner(None)
    }

    /// Like `read`, but gives up with `Cancelled` once `token` is cancelled
    pub fn read_cancellable(&self, token: &CancelToken) -> Result<Block, BlockFileError> {
        self.read_inner(Some(token))
    }

    fn read_inner(&self, cancel: Option<&CancelToken>) -> Result<Block, BlockFileError> {
        self.check_token(cancel)?;
        let (offset, sequence) = self.allocate_read()?;
        let deadline = self
            .config
            .read_timeout
            .and_then(|t| Instant::now().checked_add(t));

        let mut buf = vec![0u8; self.block_len()];
        let mut backoff = Backoff::new();
        loop {
            let generation = match self.try_read(offset, sequence, &mut buf, cancel)? {
                Attempt::Ready => return Ok(Block { sequence, data: buf }),
                Attempt::Pending(generation) => generation,
            };

            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Err(BlockFileError::TimedOut { sequence });
            }
            match self.config.read_wait {
                ReadWait::Notify => {
                    if self.progress.wait_past(generation, deadline) == WaitOutcome::TimedOut {
                        return Err(BlockFileError::TimedOut { sequence });
                    }
                }
                ReadWait::Spin => backoff.snooze(),
            }
        }
    }

    /// Read the next block, waiting without blocking the executor thread
    ///
    /// Dropping the future abandons the read; its sequence number stays
    /// consumed.
    ///
    /// # Panics
    ///
    /// With `BlockFileConfig::read_timeout` set, the deadline runs on the
    /// Tokio timer, so the future must be polled inside a Tokio runtime
    /// with the time driver enabled.
    pub async fn read_async(&self) -> Result<Block, BlockFileError> {
        self.read_async_inner(None).await
    }

    /// Like `read_async`, but gives up with `Cancelled` once `token` is cancelled
    pub async fn read_cancellable_async(
        &self,
        token: &CancelToken,
    ) -> Result<Block, BlockFileError> {
        self.read_async_inner(Some(token)).await
    }

    async fn read_async_inner(
        &self,
        cancel: Option<&CancelToken>,
    ) -> Result<Block, BlockFileError> {
        self.check_token(cancel)?;
        let (offset, sequence) = self.allocate_read()?;
        let wait = self.wait_for_block(offset, sequence, cancel);
        match self.config.read_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait)
                .await
                .unwrap_or(Err(BlockFileError::TimedOut { sequence })),
            None => wait.await,
        }
    }

    async fn wait_for_block(
        &self,
        offset: u64,
        sequence: u64,
        cancel: Option<&CancelToken>,
    ) -> Result<Block, BlockFileError> {
        let mut buf = vec![0u8; self.block_len()];
        let mut backoff = Backoff::new();
        loop {
            let generation = match self.try_read(offset, sequence, &mut buf, cancel)? {
                Attempt::Ready => return Ok(Block { sequence, data: buf }),
                Attempt::Pending(generation) => generation,
            };

            match self.config.read_wait {
                ReadWait::Notify => {
                    self.progress
                        .wait_past_async(generation, sequence)
                        .await;
                }
                ReadWait::Spin => {
                    backoff.snooze();
                    if backoff.is_yielding() {
                        tokio::task::yield_now().await;
                    }
                }
            }
        }
    }

    /// Reject tokens from other files before a sequence number is consumed
    fn check_token(&self, cancel: Option<&CancelToken>) -> Result<(), BlockFileError> {
        match cancel {
            Some(token) if !Arc::ptr_eq(&token.progress, &self.progress) => {
                Err(BlockFileError::ForeignToken)
            }
            _ => Ok(()),
        }
    }

    fn allocate_read(&self) -> Result<(u64, u64), BlockFileError> {
        self.ensure_open()?;
        let offset = self.read_cursor.allocate()?;
        Ok((offset, self.read_cursor.sequence_of(offset)))
    }

    /// One read attempt
    ///
    /// A block is readable once its write has completed *and* the medium
    /// extends over it. A later block may land first and extend the medium
    /// past a hole, so the extent alone is not enough.
    fn try_read(
        &self,
        offset: u64,
        sequence: u64,
        buf: &mut [u8],
        cancel: Option<&CancelToken>,
    ) -> Result<Attempt, BlockFileError> {
        let snapshot = self.progress.snapshot(sequence);
        if snapshot.closed {
            return Err(BlockFileError::Closed);
        }
        if cancel.is_some_and(CancelToken::is_cancelled) {
            tracing::debug!(sequence, "read cancelled");
            return Err(BlockFileError::Cancelled { sequence });
        }
        if snapshot.failed {
            return Err(BlockFileError::WriteFailed { sequence });
        }
        if !snapshot.written {
            return Ok(Attempt::Pending(snapshot.generation));
        }

        match self.gate.read_at(offset, buf)? {
            Ok(()) => {
                tracing::trace!(sequence, offset, "block read");
                Ok(Attempt::Ready)
            }
            Err(MediumReadError::InsufficientData) => {
                tracing::trace!(sequence, "block written but medium too short, retrying");
                Ok(Attempt::Pending(snapshot.generation))
            }
            Err(MediumReadError::Io(e)) => Err(BlockFileError::StorageIo(e)),
        }
    }

    /// Number of blocks handed to readers so far
    pub fn read_sequence_number(&self) -> Result<u64, BlockFileError> {
        self.ensure_open()?;
        Ok(self.read_cursor.sequence_number())
    }

    /// Number of blocks handed to writers so far (including resumed blocks)
    ///
    /// Counts allocations, not completed writes.
    pub fn write_sequence_number(&self) -> Result<u64, BlockFileError> {
        self.ensure_open()?;
        Ok(self.write_cursor.sequence_number())
    }

    /// Number of blocks whose write has completed
    pub fn written_blocks(&self) -> Result<u64, BlockFileError> {
        self.ensure_open()?;
        Ok(self.progress.written_blocks())
    }

    /// Block length L
    #[must_use]
    pub fn length(&self) -> u32 {
        self.config.block_length
    }

    #[must_use]
    pub fn config(&self) -> &BlockFileConfig {
        &self.config
    }

    /// Push completed writes down to the medium
    pub fn flush(&self) -> Result<(), BlockFileError> {
        self.ensure_open()?;
        self.gate.flush()
    }

    /// Create a token that can cancel `read_cancellable*` calls
    #[must_use]
    pub fn cancel_token(&self) -> CancelToken {
        CancelToken {
            cancelled: Arc::new(AtomicBool::new(false)),
            progress: Arc::clone(&self.progress),
        }
    }

    /// Release the medium
    ///
    /// Waits for in-flight reads and writes, releases the medium and wakes
    /// every waiting reader. Failure to release the medium is returned.
    /// Closing twice returns `Closed`.
    pub fn close(&self) -> Result<(), BlockFileError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            tracing::warn!("BlockFile::close() called on already closed file: {self:?}");
            return Err(BlockFileError::Closed);
        }

        let result = self.gate.close();
        self.progress.close();
        match &result {
            Ok(()) => tracing::debug!("block file closed: {self:?}"),
            Err(e) => tracing::warn!("block file closed with error: {e}"),
        }
        result
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<(), BlockFileError> {
        if self.is_closed() {
            Err(BlockFileError::Closed)
        } else {
            Ok(())
        }
    }

    fn block_len(&self) -> usize {
        self.config.block_length as usize
    }
}

impl<M: Medium> fmt::Debug for BlockFile<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "BlockFile(length={}, write_seq={}, read_seq={}, closed={}, progress={:?})",
            self.config.block_length,
            self.write_cursor.sequence_number(),
            self.read_cursor.sequence_number(),
            self.is_closed(),
            self.progress
        )
    }
}

impl<M: Medium> Drop for BlockFile<M> {
    fn drop(&mut self) {
        if !self.is_closed() {
            if let Err(e) = self.close() {
                tracing::warn!("BlockFile dropped, release failed: {e}");
            }
        }
    }
}
