//! Suppresses repeated scans of the same barcode.
//!
//! A phone camera pointed at one barcode decodes it many times per second.
//! The de-duplicator lets the first read through and drops identical codes
//! until `window` has passed since the last code that was *sent*.  A
//! different code always goes through and becomes the new reference.

use std::time::{Duration, Instant};

/// Source of the current time.  Mocked in tests.
#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Drops a barcode identical to the previous one within `window`.
#[derive(Debug)]
pub struct BarcodeDeduplicator<C: Clock = SystemClock> {
    clock: C,
    window: Duration,
    last: Option<(String, Instant)>,
}

impl BarcodeDeduplicator<SystemClock> {
    pub fn new(window: Duration) -> Self {
        Self::with_clock(SystemClock, window)
    }
}

impl<C: Clock> BarcodeDeduplicator<C> {
    pub fn with_clock(clock: C, window: Duration) -> Self {
        Self {
            clock,
            window,
            last: None,
        }
    }

    /// Returns `true` if `code` should be sent, and records it if so.
    pub fn should_send(&mut self, code: &str) -> bool {
        let now = self.clock.now();
        if let Some((last_code, sent_at)) = &self.last {
            if last_code == code && now.saturating_duration_since(*sent_at) < self.window {
                return false;
            }
        }
        self.last = Some((code.to_string(), now));
        true
    }

    /// Forgets the last code, e.g. after a reconnect.
    pub fn reset(&mut self) {
        self.last = None;
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
