//! Exponential backoff policy for reconnecting after an abnormal close.
//!
//! The base delay depends on *why* the socket closed:
//!
//! | Close code              | Meaning                      | Base delay |
//! |-------------------------|------------------------------|------------|
//! | 1000                    | normal closure               | no retry   |
//! | 1006                    | dropped without close frame  | 5 s        |
//! | 1001, 1011, 1012, 1013  | server going away / trouble  | 6 s        |
//! | anything else           |                              | 4 s        |
//!
//! Attempt `n` (1-based) waits `base * multiplier^(n-1)`, capped at
//! `max_delay_ms`.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use scanlink_core::close_code;

/// Reconnection policy.  All delays are in milliseconds so the policy reads
/// naturally from a TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Base delay after an abnormal drop (1006).
    pub abnormal_base_ms: u64,
    /// Base delay when the server went away or reported trouble.
    pub server_base_ms: u64,
    /// Base delay for every other close code.
    pub default_base_ms: u64,
    /// Growth factor applied per attempt.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
    /// Attempts allowed before giving up and waiting for a manual retry.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            abnormal_base_ms: 5_000,
            server_base_ms: 6_000,
            default_base_ms: 4_000,
            multiplier: 1.5,
            max_delay_ms: 30_000,
            max_attempts: 5,
        }
    }
}

impl ReconnectPolicy {
    /// `false` for a normal (1000) closure; everything else may reconnect.
    pub fn should_reconnect(&self, code: u16) -> bool {
        code != close_code::NORMAL
    }

    /// Whether attempt number `attempt` (1-based) is still within budget.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt <= self.max_attempts
    }

    /// The unscaled delay for a close code.
    pub fn base_delay(&self, code: u16) -> Duration {
        let ms = match code {
            close_code::ABNORMAL => self.abnormal_base_ms,
            close_code::GOING_AWAY
            | close_code::INTERNAL_ERROR
            | close_code::SERVICE_RESTART
            | close_code::TRY_AGAIN_LATER => self.server_base_ms,
            _ => self.default_base_ms,
        };
        Duration::from_millis(ms)
    }

    /// The delay before attempt `attempt` (1-based) after closing with `code`.
    pub fn delay_for_attempt(&self, code: u16, attempt: u32) -> Duration {
        let base_ms = self.base_delay(code).as_millis() as f64;
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let delay_ms = base_ms * self.multiplier.powi(exponent);
        let capped_ms = delay_ms.min(self.max_delay_ms as f64);
        Duration::from_millis(capped_ms as u64)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
