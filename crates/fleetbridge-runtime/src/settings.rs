//! Knobs shared by the per-robot engines.

use std::time::Duration;

use fleetbridge_kernel::TaskPolicy;

/// How commands are sent to a robot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DispatchSettings {
    /// Bound on a single robot command call.
    pub timeout: Duration,
    /// Total attempts for a task command, including the first. At least 1.
    pub attempts: u32,
    /// Delay after the first transient failure; doubled per retry.
    pub retry_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            attempts: 3,
            retry_backoff: Duration::from_millis(200),
            max_backoff: Duration::from_secs(5),
        }
    }
}

impl DispatchSettings {
    /// Delay after failed attempt `attempt` (1-based):
    /// `retry_backoff · 2^(attempt-1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.retry_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Everything [`FleetAdapterCore`][crate::FleetAdapterCore] needs to build a
/// robot's engines.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AdapterSettings {
    pub poll_interval: Duration,
    /// Bound on a single `get_status` call.
    pub poll_timeout: Duration,
    /// Consecutive failed polls before a robot is reported unreachable.
    pub unreachable_after: u32,
    pub policy: TaskPolicy,
    pub dispatch: DispatchSettings,
}

impl Default for AdapterSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            poll_timeout: Duration::from_secs(2),
            unreachable_after: 3,
            policy: TaskPolicy::default(),
            dispatch: DispatchSettings::default(),
        }
    }
}
