//! Bounded and debounced polling.
//!
//! None of the WCN power transitions raise an interrupt when they complete,
//! so every confirmation is a register read repeated with a short sleep.
//! [`Poller::poll_until`] bounds the number of attempts and
//! [`debounced`] filters reads taken while the state machine is mid-transition.
//!
//! ```no_run
//! use wcn_boot::poll::{PollConfig, Poller};
//! # fn example(delay: &mut impl embedded_hal_1::delay::DelayNs) -> Result<(), wcn_boot::Error> {
//! let poller = Poller::new(PollConfig::new());
//! poller.poll_debounced(delay, "sys awake", || Ok::<_, wcn_boot::Error>(true))?;
//! # Ok(()) }
//! ```

use embedded_hal_1::delay::DelayNs;

/// Attempts before a register poll gives up.
pub const POLL_MAX_ATTEMPTS: u32 = 256;

/// Sleep between two register poll attempts.
pub const POLL_INTERVAL_US: u32 = 64;

/// Consecutive agreeing raw reads required by [`debounced`].
pub const STABLE_READS: u8 = 3;

/// A poll ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollTimeout {
    /// What was being waited for.
    pub what: &'static str,
    /// How many times the predicate was evaluated.
    pub attempts: u32,
}

/// Poll budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PollConfig {
    pub max_attempts: u32,
    pub interval_us: u32,
    pub stable_reads: u8,
}

impl PollConfig {
    /// Register-poll defaults.
    pub const fn new() -> Self {
        Self {
            max_attempts: POLL_MAX_ATTEMPTS,
            interval_us: POLL_INTERVAL_US,
            stable_reads: STABLE_READS,
        }
    }

    /// Budget that covers a wall-clock window polled every `interval_ms`.
    ///
    /// Single reads: shared-memory magic values are not debounced.
    pub const fn window(timeout_ms: u32, interval_ms: u32) -> Self {
        let interval_ms = if interval_ms == 0 { 1 } else { interval_ms };
        let attempts = timeout_ms / interval_ms;
        Self {
            max_attempts: if attempts == 0 { 1 } else { attempts },
            interval_us: interval_ms.saturating_mul(1000),
            stable_reads: 1,
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Wrap a single-shot predicate so it only reports `true` after
/// `stable_reads` consecutive `true` reads.
///
/// Any disagreeing read makes the wrapped predicate return `false` for that
/// attempt; the caller's poll loop decides whether to try again.
pub fn debounced<E, F>(stable_reads: u8, mut raw: F) -> impl FnMut() -> Result<bool, E>
where
    F: FnMut() -> Result<bool, E>,
{
    let reads = if stable_reads == 0 { 1 } else { stable_reads };
    move || {
        for _ in 0..reads {
            if !raw()? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// Bounded retry loop parameterized by a [`PollConfig`].
#[derive(Debug, Clone, Copy)]
pub struct Poller {
    config: PollConfig,
}

impl Poller {
    pub const fn new(config: PollConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Evaluate `predicate` up to `max_attempts` times, sleeping
    /// `interval_us` between attempts.
    ///
    /// Returns the number of attempts it took. Errors from the predicate are
    /// returned immediately; exhaustion is a [`PollTimeout`] and is never
    /// retried here.
    pub fn poll_until<E, D, F>(&self, delay: &mut D, what: &'static str, mut predicate: F) -> Result<u32, E>
    where
        E: From<PollTimeout>,
        D: DelayNs,
        F: FnMut() -> Result<bool, E>,
    {
        let max = self.config.max_attempts.max(1);

        for attempt in 1..=max {
            if predicate()? {
                trace!("poll '{}' satisfied after {} attempt(s)", what, attempt);
                return Ok(attempt);
            }
            if attempt < max {
                delay.delay_us(self.config.interval_us);
            }
        }

        warn!("poll '{}' timed out after {} attempts", what, max);
        Err(PollTimeout { what, attempts: max }.into())
    }

    /// [`poll_until`](Self::poll_until) over a [`debounced`] predicate.
    pub fn poll_debounced<E, D, F>(&self, delay: &mut D, what: &'static str, raw: F) -> Result<u32, E>
    where
        E: From<PollTimeout>,
        D: DelayNs,
        F: FnMut() -> Result<bool, E>,
    {
        self.poll_until(delay, what, debounced(self.config.stable_reads, raw))
    }

    /// Single debounced check without retries.
    pub fn check<E, F>(&self, raw: F) -> Result<bool, E>
    where
        F: FnMut() -> Result<bool, E>,
    {
        debounced(self.config.stable_reads, raw)()
    }
}
