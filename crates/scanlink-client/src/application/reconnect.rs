//! Reconnect state machine.
//!
//! Pure bookkeeping: the session runner reports what happened to the socket
//! and the machine answers with the next [`ConnectionState`] and, after a
//! close, what to do about it.  It never sleeps or touches the network, so
//! every transition can be tested directly.
//!
//! # Rules
//!
//! - A successful open resets the attempt counter.
//! - A close requested locally (manual) never reconnects.
//! - A normal (`1000`) close never reconnects.
//! - Any other close schedules attempt `n + 1` with the policy's delay,
//!   until the budget is spent; then the machine is *exhausted* and waits for
//!   [`manual_reconnect`](ReconnectMachine::manual_reconnect).

use std::time::Duration;

use scanlink_core::close_code;

use crate::domain::{ConnectionState, ReconnectPolicy};

/// What the runner should do after a socket closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseDecision {
    /// Wait `delay`, then try again.  `attempt` is 1-based.
    Reconnect { attempt: u32, delay: Duration },
    /// Stay closed; the close was normal or requested locally.
    Stop,
    /// The attempt budget is spent; only a manual reconnect continues.
    Exhausted { attempts: u32 },
}

/// Tracks the lifecycle of one peer connection across reconnects.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ConnectionState,
    attempts: u32,
    manual_close: bool,
}

impl ReconnectMachine {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ConnectionState::Connecting,
            attempts: 0,
            manual_close: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Reconnect attempts made since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_manually_closed(&self) -> bool {
        self.manual_close
    }

    /// A connect attempt is starting.
    pub fn on_connecting(&mut self) -> ConnectionState {
        self.state = ConnectionState::Connecting;
        self.state
    }

    /// The handshake completed.
    pub fn on_open(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.state = ConnectionState::Open;
        self.state
    }

    /// The application asked to close.  Returns the new state.
    pub fn request_close(&mut self) -> ConnectionState {
        self.manual_close = true;
        self.state = match self.state {
            ConnectionState::Open | ConnectionState::Connecting => ConnectionState::Closing,
            _ => ConnectionState::Closed,
        };
        self.state
    }

    /// The socket closed with `code`, or never opened (pass
    /// [`close_code::ABNORMAL`]).
    pub fn on_closed(&mut self, code: u16) -> CloseDecision {
        if self.manual_close || !self.policy.should_reconnect(code) {
            self.state = ConnectionState::Closed;
            return CloseDecision::Stop;
        }

        let attempt = self.attempts + 1;
        if !self.policy.should_retry(attempt) {
            self.state = ConnectionState::Closed;
            return CloseDecision::Exhausted {
                attempts: self.attempts,
            };
        }

        self.attempts = attempt;
        let delay = self.policy.delay_for_attempt(code, attempt);
        self.state = ConnectionState::Reconnecting { attempt, delay };
        CloseDecision::Reconnect { attempt, delay }
    }

    /// User-initiated retry: clears the attempt budget and any manual close.
    pub fn manual_reconnect(&mut self) -> ConnectionState {
        self.attempts = 0;
        self.manual_close = false;
        self.on_connecting()
    }
}

/// Close code to report when a connect attempt fails before any frame.
pub const CONNECT_FAILED: u16 = close_code::ABNORMAL;

// ── Tests ─────────────────────────────────────────────────────────────────────
