//! Progressive backoff for the spinning read retry loop.
//!
//! Used by readers configured with `ReadWait::Spin`: they never sleep on a
//! signal, so each failed attempt backs off a little more before the next.

/// Three-phase backoff state
///
/// - **phase 1 (0-100)**: plain spin hint
/// - **phase 2 (100-1000)**: bursts of spin hints, growing with the count
/// - **phase 3 (1000+)**: yield the thread every 16th step
#[derive(Debug, Default, Clone, Copy)]
pub struct Backoff {
    iteration: u32,
}

impl Backoff {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait a little, longer on each call
    #[inline]
    pub fn snooze(&mut self) {
        let i = self.iteration;
        if i < 100 {
            core::hint::spin_loop();
        } else if i < 1000 {
            let pauses = ((i - 100) >> 3) + 1;
            for _ in 0..pauses.min(32) {
                core::hint::spin_loop();
            }
        } else if i % 16 == 0 {
            std::thread::yield_now();
        } else {
            core::hint::spin_loop();
        }
        self.iteration = self.iteration.saturating_add(1);
    }

    /// True once the backoff has reached the yielding phase
    ///
    /// Async readers use this to hand the executor back instead of spinning.
    #[must_use]
    pub fn is_yielding(&self) -> bool {
        self.iteration >= 1000
    }

    #[cfg(test)]
    fn iteration(&self) -> u32 {
        self.iteration
    }
}
