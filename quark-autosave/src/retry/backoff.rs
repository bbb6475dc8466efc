use std::time::Duration;

use rand::Rng;

/// How much of the computed pause is randomised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Jitter {
    /// Always wait the full ceiling for the attempt.
    Off,
    /// Wait anywhere in `0..=ceiling`, spreading concurrent writers apart.
    Full,
}

/// Pause schedule that doubles from `first` on every attempt until it hits
/// `ceiling`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    first: Duration,
    ceiling: Duration,
    jitter: Jitter,
}

impl Backoff {
    pub const fn new(first: Duration, ceiling: Duration, jitter: Jitter) -> Self {
        Self {
            first,
            ceiling,
            jitter,
        }
    }

    /// SQLite `database is locked` and similar short-lived contention.
    pub const fn lock_contention() -> Self {
        Self::new(Duration::from_millis(50), Duration::from_secs(2), Jitter::Full)
    }

    /// Remote save and delete tasks reported as still running.
    pub const fn task_poll() -> Self {
        Self::new(Duration::from_millis(500), Duration::from_secs(5), Jitter::Off)
    }

    /// Longest pause after the failed attempt number `attempt` (0-based).
    pub fn ceiling_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.first.saturating_mul(factor).min(self.ceiling)
    }

    pub fn delay(&self, attempt: u32) -> Duration {
        self.sample(attempt, &mut rand::thread_rng())
    }

    pub fn sample<R: Rng + ?Sized>(&self, attempt: u32, rng: &mut R) -> Duration {
        let ceiling = self.ceiling_for(attempt);
        match self.jitter {
            Jitter::Off => ceiling,
            Jitter::Full => rng.gen_range(Duration::ZERO..=ceiling),
        }
    }
}
