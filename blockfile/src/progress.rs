//! Write progress tracking and reader wake-up
//!
//! Writers report each completed block here; readers waiting for a block
//! that is not written yet sleep here until something changes.
//!
//! # Waiting for a block
//!
//! Every change (a completed write, a cancellation, close) bumps a
//! generation counter. The reader workflow is:
//!
//! 10. Reader: take a snapshot (written? generation?)
//! 20. Reader: if written, try the medium read and return on success
//! 30. Reader: wait until the generation differs from the snapshot
//! 40. Reader: go to 10
//!
//! A writer can complete between 10 and 30. Because the reader waits for
//! the generation to *differ* from what it saw, and the comparison happens
//! under the tracker lock, that completion is never lost: the wait returns
//! immediately instead of sleeping past it.
//!
//! Blocking readers sleep on a `parking_lot::Condvar`. Async readers
//! register a `tokio::sync::oneshot` sender under the lock, release the
//! lock, and only then await the receiver.

use parking_lot::{Condvar, Mutex};
use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::time::Instant;

/// An async reader waiting for the generation to move
struct WaitingReader {
    sender: tokio::sync::oneshot::Sender<u64>,
    sequence: u64,
}

impl fmt::Debug for WaitingReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaitingReader")
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
struct ProgressState {
    /// Every sequence number below this has finished, written or failed
    watermark: u64,
    /// Sequence numbers above the watermark that finished early
    completed: BTreeSet<u64>,
    /// Sequence numbers whose write failed; they never become readable
    failed: BTreeSet<u64>,
    generation: u64,
    closed: bool,
    waiters: Vec<WaitingReader>,
}

impl ProgressState {
    fn is_finished(&self, sequence: u64) -> bool {
        sequence < self.watermark || self.completed.contains(&sequence)
    }

    fn is_written(&self, sequence: u64) -> bool {
        self.is_finished(sequence) && !self.failed.contains(&sequence)
    }

    /// Record `sequence` as finished, folding in blocks that finished ahead
    fn finish(&mut self, sequence: u64) {
        if sequence == self.watermark {
            self.watermark += 1;
            loop {
                let next = self.watermark;
                if !self.completed.remove(&next) {
                    break;
                }
                self.watermark += 1;
            }
        } else if sequence < self.watermark || !self.completed.insert(sequence) {
            tracing::warn!("progress: block {sequence} finished twice");
        }
    }

    /// Bump the generation and hand the new value to every async waiter
    fn advance(&mut self) -> Vec<WaitingReader> {
        self.generation = self.generation.wrapping_add(1);
        std::mem::take(&mut self.waiters)
    }
}

/// What a reader saw when it looked at the tracker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub written: bool,
    /// The write for this block failed; it will never be readable
    pub failed: bool,
    pub generation: u64,
    pub closed: bool,
}

/// Result of a bounded blocking wait
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The generation moved; re-check
    Progressed,
    /// The deadline passed with no change
    TimedOut,
}

/// Tracks which blocks have been written and wakes waiting readers
///
/// # Thread Safety
///
/// All state sits behind one `parking_lot::Mutex`. Notification of async
/// waiters happens after the lock is released.
pub struct WriteProgress {
    state: Mutex<ProgressState>,
    cond: Condvar,
}

impl WriteProgress {
    /// Create a tracker where blocks `0..watermark` are already written
    #[must_use]
    pub fn new(watermark: u64) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                watermark,
                completed: BTreeSet::new(),
                failed: BTreeSet::new(),
                generation: 0,
                closed: false,
                waiters: Vec::new(),
            }),
            cond: Condvar::new(),
        }
    }

    /// Record that the block at `sequence` is fully written
    pub fn mark_written(&self, sequence: u64) {
        let waiters = {
            let mut state = self.state.lock();
            state.finish(sequence);
            state.advance()
        };
        self.wake(waiters, "write");
    }

    /// Record that the write for `sequence` failed
    ///
    /// The block counts as finished, so later blocks still move the
    /// watermark, but it never becomes readable.
    pub fn mark_failed(&self, sequence: u64) {
        let waiters = {
            let mut state = self.state.lock();
            if state.is_finished(sequence) {
                tracing::warn!("progress: block {sequence} failed after finishing");
            } else {
                state.failed.insert(sequence);
                state.finish(sequence);
            }
            state.advance()
        };
        self.wake(waiters, "failed write");
    }

    /// Wake every waiting reader without recording a write
    ///
    /// Readers re-check their own exit conditions (cancel token, deadline).
    pub fn interrupt(&self) {
        let waiters = self.state.lock().advance();
        self.wake(waiters, "interrupt");
    }

    /// Mark the tracker closed and wake every waiting reader
    pub fn close(&self) {
        let waiters = {
            let mut state = self.state.lock();
            state.closed = true;
            state.advance()
        };
        self.wake(waiters, "close");
    }

    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }

    #[cfg(test)]
    pub fn is_written(&self, sequence: u64) -> bool {
        self.state.lock().is_written(sequence)
    }

    #[must_use]
    pub fn snapshot(&self, sequence: u64) -> Snapshot {
        let state = self.state.lock();
        Snapshot {
            written: state.is_written(sequence),
            failed: state.failed.contains(&sequence),
            generation: state.generation,
            closed: state.closed,
        }
    }

    /// Number of blocks known to be written
    #[must_use]
    pub fn written_blocks(&self) -> u64 {
        let state = self.state.lock();
        // Every failed block is either below the watermark or in `completed`
        let finished = state.watermark + state.completed.len() as u64;
        finished.saturating_sub(state.failed.len() as u64)
    }

    /// Every block below this sequence number has finished
    #[cfg(test)]
    pub fn watermark(&self) -> u64 {
        self.state.lock().watermark
    }

    /// Blocks that finished ahead of the watermark
    #[cfg(test)]
    pub fn ahead(&self) -> usize {
        self.state.lock().completed.len()
    }

    #[cfg(test)]
    pub fn waiting_readers(&self) -> usize {
        self.state.lock().waiters.len()
    }

    /// Block until the generation differs from `generation`
    ///
    /// With a deadline, gives up once it passes.
    pub fn wait_past(&self, generation: u64, deadline: Option<Instant>) -> WaitOutcome {
        let mut state = self.state.lock();
        while state.generation == generation {
            match deadline {
                Some(deadline) => {
                    if self.cond.wait_until(&mut state, deadline).timed_out() {
                        return if state.generation == generation {
                            WaitOutcome::TimedOut
                        } else {
                            WaitOutcome::Progressed
                        };
                    }
                }
                None => self.cond.wait(&mut state),
            }
        }
        WaitOutcome::Progressed
    }

    /// Async counterpart of `wait_past` (without a deadline)
    ///
    /// The waiter is registered before this returns, so a change that
    /// happens before the future is first polled still wakes it.
    pub fn wait_past_async(
        &self,
        generation: u64,
        sequence: u64,
    ) -> impl Future<Output = ()> + Send {
        let (tx, rx) = tokio::sync::oneshot::channel();

        let mut state = self.state.lock();
        if state.generation == generation {
            // Readers that timed out or were dropped leave closed senders
            state.waiters.retain(|w| !w.sender.is_closed());
            state.waiters.push(WaitingReader { sender: tx, sequence });
            drop(state);
        } else {
            let current = state.generation;
            drop(state);
            // Immediately resolve the future
            let _ = tx.send(current);
        }

        // A receive error means the tracker was dropped with readers still
        // waiting; the caller re-checks state either way.
        async move {
            let _ = rx.await;
        }
    }

    fn wake(&self, waiters: Vec<WaitingReader>, reason: &str) {
        self.cond.notify_all();
        if waiters.is_empty() {
            return;
        }

        let generation = self.state.lock().generation;
        tracing::debug!(
            "progress: {reason}, waking {} async readers at generation {generation}",
            waiters.len()
        );
        for waiter in waiters {
            if waiter.sender.send(generation).is_err() {
                tracing::trace!(
                    "progress: reader for block {} stopped waiting",
                    waiter.sequence
                );
            }
        }
    }
}

impl fmt::Debug for WriteProgress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        write!(
            f,
            "WriteProgress(watermark={}, ahead={}, failed={}, generation={}, closed={}, waiters={})",
            state.watermark,
            state.completed.len(),
            state.failed.len(),
            state.generation,
            state.closed,
            state.waiters.len()
        )
    }
}
