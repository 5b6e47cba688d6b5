//! [`LinkMonitor`] – consecutive-failure counter for one robot's poll loop.
//!
//! A single failed poll only marks the link [`LinkHealth::Degraded`]; the
//! robot is declared [`LinkHealth::Unreachable`] once `unreachable_after`
//! polls in a row have failed, and stays so until a poll succeeds.

use std::time::Instant;

use fleetbridge_types::LinkHealth;

#[derive(Debug, Clone)]
pub struct LinkMonitor {
    unreachable_after: u32,
    consecutive_failures: u32,
    last_success: Option<Instant>,
}

impl LinkMonitor {
    /// `unreachable_after` is clamped to at least 1.
    pub fn new(unreachable_after: u32) -> Self {
        Self {
            unreachable_after: unreachable_after.max(1),
            consecutive_failures: 0,
            last_success: None,
        }
    }

    /// Reset the failure counter.
    pub fn record_success(&mut self, now: Instant) -> LinkHealth {
        self.consecutive_failures = 0;
        self.last_success = Some(now);
        self.health()
    }

    pub fn record_failure(&mut self) -> LinkHealth {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.health()
    }

    pub fn health(&self) -> LinkHealth {
        match self.consecutive_failures {
            0 => LinkHealth::Fresh,
            n if n < self.unreachable_after => LinkHealth::Degraded {
                consecutive_failures: n,
            },
            n => LinkHealth::Unreachable {
                consecutive_failures: n,
            },
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// When the last successful poll completed, if ever.
    pub fn last_success(&self) -> Option<Instant> {
        self.last_success
    }
}
