//! Bounded polling.
//!
//! Every wait on vehicle state goes through a [`Poller`]: it probes, sleeps an interval that may
//! grow by a backoff factor up to a cap, and gives up with [`WaitError::Timeout`] once the
//! deadline passes. Sleeps are sliced so that a raised [`Interrupt`] is noticed quickly.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use thiserror::Error;

const SLICE: Duration = Duration::from_millis(50);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WaitError {
    #[error("Timed out after {after:?} waiting for {what}")] Timeout {
        what: String,
        after: Duration,
    },
    #[error("Interrupted by user")] Interrupted,
}

/// Shared cancellation flag, raised from a signal handler and observed by waits.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self) -> Result<(), WaitError> {
        if self.is_triggered() { Err(WaitError::Interrupted) } else { Ok(()) }
    }

    /// Sleeps for `duration` unless interrupted first.
    pub fn sleep(&self, duration: Duration) -> Result<(), WaitError> {
        let deadline = Instant::now() + duration;
        loop {
            self.check()?;
            let now = Instant::now();
            if now >= deadline {
                return Ok(());
            }
            sleep(SLICE.min(deadline - now));
        }
    }
}

#[derive(Debug, Clone)]
pub struct Poller {
    interval: Duration,
    backoff: f64,
    max_interval: Duration,
    timeout: Duration,
    interrupt: Interrupt,
}

impl Poller {
    /// Fixed-interval poller.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            backoff: 1.,
            max_interval: interval,
            timeout,
            interrupt: Interrupt::default(),
        }
    }

    /// Multiplies the interval by `factor` after each miss, capped at `max_interval`.
    pub fn with_backoff(mut self, factor: f64, max_interval: Duration) -> Self {
        self.backoff = factor.max(1.);
        self.max_interval = max_interval.max(self.interval);
        self
    }

    pub fn with_interrupt(mut self, interrupt: &Interrupt) -> Self {
        self.interrupt = interrupt.clone();
        self
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The sleep schedule between probes, ignoring the deadline.
    pub fn intervals(&self) -> impl Iterator<Item = Duration> {
        let (backoff, max) = (self.backoff, self.max_interval);
        std::iter::successors(Some(self.interval), move |last| {
            Some(last.mul_f64(backoff).min(max))
        })
    }

    /// Calls `probe` until it yields a value, the timeout elapses or the interrupt is raised.
    /// `probe` always runs at least once.
    pub fn until<T, E, F>(&self, what: &str, mut probe: F) -> Result<T, E>
        where F: FnMut() -> Result<Option<T>, E>,
              E: From<WaitError> {
        let start = Instant::now();
        let mut schedule = self.intervals();
        loop {
            let interval = schedule.next().unwrap_or(self.max_interval);
            self.interrupt.check()?;
            if let Some(value) = probe()? {
                return Ok(value);
            }
            let elapsed = start.elapsed();
            if elapsed >= self.timeout {
                log::warn!("Gave up waiting for {what} after {elapsed:?}");
                return Err(WaitError::Timeout { what: what.to_string(), after: elapsed }.into());
            }
            self.interrupt.sleep(interval.min(self.timeout - elapsed))?;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_and_caps() {
        let poller = Poller::new(Duration::from_millis(100), Duration::from_secs(1))
            .with_backoff(2., Duration::from_millis(500));
        let schedule: Vec<_> = poller.intervals().take(5).map(|d| d.as_millis()).collect();
        assert_eq!(schedule, vec![100, 200, 400, 500, 500]);
    }

    #[test]
    fn fixed_interval_stays_fixed() {
        let poller = Poller::new(Duration::from_secs(1), Duration::from_secs(10));
        assert!(poller.intervals().take(4).all(|d| d == Duration::from_secs(1)));
    }

    #[test]
    fn returns_first_success() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(5));
        let mut calls = 0;
        let value: Result<u32, WaitError> = poller.until("third call", || {
            calls += 1;
            Ok(if calls == 3 { Some(calls) } else { None })
        });
        assert_eq!(value, Ok(3));
    }

    #[test]
    fn times_out_with_distinct_error() {
        let poller = Poller::new(Duration::from_millis(1), Duration::from_millis(20));
        let mut calls = 0;
        let result: Result<(), WaitError> = poller.until("nothing", || {
            calls += 1;
            Ok(None)
        });
        match result {
            Err(WaitError::Timeout { what, after }) => {
                assert_eq!(what, "nothing");
                assert!(after >= Duration::from_millis(20));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
        assert!(calls >= 2);
    }

    #[test]
    fn zero_timeout_still_probes_once() {
        let poller = Poller::new(Duration::from_millis(1), Duration::ZERO);
        let result: Result<&str, WaitError> = poller.until("ready", || Ok(Some("ready")));
        assert_eq!(result, Ok("ready"));
    }

    #[test]
    fn interrupt_stops_the_wait() {
        let interrupt = Interrupt::new();
        let poller = Poller::new(Duration::from_millis(1), Duration::from_secs(60))
            .with_interrupt(&interrupt);
        let mut calls = 0;
        let result: Result<(), WaitError> = poller.until("never", || {
            calls += 1;
            if calls == 2 {
                interrupt.trigger();
            }
            Ok(None)
        });
        assert_eq!(result, Err(WaitError::Interrupted));
        assert_eq!(calls, 2);
    }

    #[test]
    fn interrupted_sleep_returns_early() {
        let interrupt = Interrupt::new();
        interrupt.trigger();
        let start = Instant::now();
        assert_eq!(interrupt.sleep(Duration::from_secs(30)), Err(WaitError::Interrupted));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}
