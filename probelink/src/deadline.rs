use std::time::{Duration, Instant};

/// A time limit computed once when an operation starts.
///
/// Every polling step of the operation checks against the same deadline,
/// instead of counting down a timeout from step to step.
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    timeout: Duration,
}

impl Deadline {
    /// Starts a deadline expiring `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self {
            start: Instant::now(),
            timeout,
        }
    }

    /// The timeout this deadline was created with.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time since the deadline was started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.start.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.start.elapsed() >= self.timeout
    }

    /// Calls `check` until it returns `Some`, sleeping `interval` between calls.
    ///
    /// `check` runs at least once, even for an already expired deadline.
    /// Returns `Ok(None)` when the deadline expires first.
    pub fn poll<T, E>(
        &self,
        interval: Duration,
        mut check: impl FnMut() -> Result<Option<T>, E>,
    ) -> Result<Option<T>, E> {
        loop {
            if let Some(value) = check()? {
                return Ok(Some(value));
            }

            if self.is_expired() {
                return Ok(None);
            }

            std::thread::sleep(interval.min(self.remaining()));
        }
    }
}
