//! [`TaskMachine`] – lifecycle of the single task a robot may own.
//!
//! ```text
//!            begin           dispatched         accepted
//!   (none) ───────▶ Pending ───────────▶ Dispatched ──────────▶ InProgress
//!                      │                     │                      │
//!                      └─────── cancel / mark_failed ───────────────┤
//!                                                                   ▼
//!                                         Completed | Failed | Cancelled
//! ```
//!
//! # Epochs
//!
//! Every state change bumps a monotonically increasing epoch. A poll loop
//! snapshots the epoch *before* querying the robot and passes it back to
//! [`TaskMachine::observe`]. If anything changed in between (a cancel, a new
//! assignment, a pause) the observation is stale and is dropped, so a slow
//! "robot reached the goal" reading can never complete a task that was
//! cancelled while the request was in flight.
//!
//! # Deadline
//!
//! The progress deadline is armed when the robot accepts the task. While the
//! task is paused the deadline is suspended; resuming pushes it back by the
//! time spent paused.
//!
//! # Shelves
//!
//! The machine remembers whether the robot carries a shelf, following the
//! robot's own `shelf_docked` reports. A Pickup is refused while carrying and
//! a Dropoff while not; either completes once the robot reports the new shelf
//! state and is no longer docking.

use std::time::{Duration, Instant};

use fleetbridge_types::{
    FleetError, Frame, RobotMode, RobotStatus, TaskCommand, TaskExecutionState, TaskKind,
};
use tracing::debug;

// ────────────────────────────────────────────────────────────────────────────
// Public types
// ────────────────────────────────────────────────────────────────────────────

/// Completion thresholds and the progress timeout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TaskPolicy {
    /// Maximum planar distance (control-plane metres) for "arrived".
    pub position_tolerance: f64,
    /// Maximum heading error (radians). `None` ignores heading.
    pub heading_tolerance: Option<f64>,
    /// Time allowed from acceptance to completion, excluding paused time.
    pub progress_timeout: Duration,
}

impl Default for TaskPolicy {
    fn default() -> Self {
        Self {
            position_tolerance: 0.3,
            heading_tolerance: None,
            progress_timeout: Duration::from_secs(300),
        }
    }
}

/// One state change of the active task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskTransition {
    pub task_id: String,
    pub kind: TaskKind,
    /// `None` when the task was just created.
    pub from: Option<TaskExecutionState>,
    pub to: TaskExecutionState,
    pub is_paused: bool,
    pub reason: Option<String>,
}

/// Read-only copy of the active (or most recent) task.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskSnapshot {
    pub command: TaskCommand,
    pub state: TaskExecutionState,
    pub is_paused: bool,
    pub reason: Option<String>,
    pub created_at: Instant,
    pub deadline: Option<Instant>,
}

impl TaskSnapshot {
    pub fn task_id(&self) -> &str {
        &self.command.id
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Internal record
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct TaskRecord {
    command: TaskCommand,
    state: TaskExecutionState,
    is_paused: bool,
    reason: Option<String>,
    created_at: Instant,
    deadline: Option<Instant>,
    paused_at: Option<Instant>,
}

impl TaskRecord {
    fn is_active(&self) -> bool {
        !self.state.is_terminal()
    }

    fn snapshot(&self) -> TaskSnapshot {
        TaskSnapshot {
            command: self.command.clone(),
            state: self.state,
            is_paused: self.is_paused,
            reason: self.reason.clone(),
            created_at: self.created_at,
            deadline: self.deadline,
        }
    }

    fn deadline_passed(&self, now: Instant) -> bool {
        !self.is_paused && self.deadline.is_some_and(|d| now >= d)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TaskMachine
// ────────────────────────────────────────────────────────────────────────────

/// Per-robot task state. Callers serialise access (one lock per robot).
///
/// # Example
///
/// ```
/// use std::time::Instant;
/// use fleetbridge_kernel::{TaskMachine, TaskPolicy};
/// use fleetbridge_types::{TaskCommand, TaskExecutionState};
///
/// let mut tm = TaskMachine::new("kachaka_1", TaskPolicy::default());
/// let now = Instant::now();
/// tm.begin(TaskCommand::dock("d1"), now).unwrap();
/// tm.mark_dispatched("d1");
/// tm.mark_accepted("d1", now);
/// assert_eq!(tm.active().unwrap().state, TaskExecutionState::InProgress);
///
/// let t = tm.cancel().unwrap();
/// assert_eq!(t.to, TaskExecutionState::Cancelled);
/// assert!(tm.cancel().is_none());
/// ```
#[derive(Debug, Clone)]
pub struct TaskMachine {
    robot: String,
    policy: TaskPolicy,
    task: Option<TaskRecord>,
    epoch: u64,
    carrying_shelf: bool,
}

impl TaskMachine {
    pub fn new(robot: impl Into<String>, policy: TaskPolicy) -> Self {
        Self {
            robot: robot.into(),
            policy,
            task: None,
            epoch: 0,
            carrying_shelf: false,
        }
    }

    pub fn policy(&self) -> &TaskPolicy {
        &self.policy
    }

    /// Incremented on every state change, including pause and resume.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn carrying_shelf(&self) -> bool {
        self.carrying_shelf
    }

    /// The current task, or the last one if it already finished.
    pub fn active(&self) -> Option<TaskSnapshot> {
        self.task.as_ref().map(TaskRecord::snapshot)
    }

    /// Id of the non-terminal task, if any.
    pub fn busy_with(&self) -> Option<&str> {
        self.task
            .as_ref()
            .filter(|t| t.is_active())
            .map(|t| t.command.id.as_str())
    }

    /// State of `task_id` if it is the current (or most recent) task.
    pub fn state_of(&self, task_id: &str) -> Option<TaskExecutionState> {
        self.task
            .as_ref()
            .filter(|t| t.command.id == task_id)
            .map(|t| t.state)
    }

    /// Create a new task in [`TaskExecutionState::Pending`].
    ///
    /// # Errors
    ///
    /// - [`FleetError::InvalidCommand`] for Pause/Resume/Cancel, or a MoveTo
    ///   without a control-plane target, a Pickup while a shelf is docked and
    ///   a Dropoff while none is.
    /// - [`FleetError::RobotBusy`] while another task is non-terminal. The
    ///   existing task is left untouched.
    pub fn begin(
        &mut self,
        command: TaskCommand,
        now: Instant,
    ) -> Result<TaskTransition, FleetError> {
        if !command.kind.is_task() {
            return Err(FleetError::InvalidCommand(format!(
                "{:?} does not create a task",
                command.kind
            )));
        }
        if command.kind == TaskKind::MoveTo {
            match command.target_pose {
                Some(p) if p.frame == Frame::ControlPlane => {}
                Some(_) => {
                    return Err(FleetError::InvalidCommand(format!(
                        "move_to task {} target is not in the control-plane frame",
                        command.id
                    )));
                }
                None => {
                    return Err(FleetError::InvalidCommand(format!(
                        "move_to task {} has no target pose",
                        command.id
                    )));
                }
            }
        }
        if command.kind.shelf_after() == Some(self.carrying_shelf) {
            let details = if self.carrying_shelf {
                "already carrying a shelf"
            } else {
                "no shelf is docked"
            };
            return Err(FleetError::InvalidCommand(format!(
                "{:?} task {} refused: {details}",
                command.kind, command.id
            )));
        }
        if let Some(active) = self.busy_with() {
            return Err(FleetError::RobotBusy {
                robot: self.robot.clone(),
                active_task: active.to_string(),
            });
        }

        let task_id = command.id.clone();
        let kind = command.kind;
        self.task = Some(TaskRecord {
            command,
            state: TaskExecutionState::Pending,
            is_paused: false,
            reason: None,
            created_at: now,
            deadline: None,
            paused_at: None,
        });
        self.epoch += 1;
        debug!(robot = %self.robot, task_id = %task_id, ?kind, "task created");
        Ok(TaskTransition {
            task_id,
            kind,
            from: None,
            to: TaskExecutionState::Pending,
            is_paused: false,
            reason: None,
        })
    }

    /// Pending → Dispatched.
    pub fn mark_dispatched(&mut self, task_id: &str) -> Option<TaskTransition> {
        self.matching(task_id, &[TaskExecutionState::Pending])?;
        self.transition(TaskExecutionState::Dispatched, None)
    }

    /// Dispatched → InProgress; arms the progress deadline.
    ///
    /// Returns `None` when `task_id` is no longer the active task in
    /// Dispatched, e.g. because it was cancelled while the command was in
    /// flight.
    pub fn mark_accepted(&mut self, task_id: &str, now: Instant) -> Option<TaskTransition> {
        let timeout = self.policy.progress_timeout;
        let task = self.matching(task_id, &[TaskExecutionState::Dispatched])?;
        task.deadline = Some(now + timeout);
        if task.is_paused {
            task.paused_at = Some(now);
        }
        self.transition(TaskExecutionState::InProgress, None)
    }

    /// Any non-terminal state → Failed.
    pub fn mark_failed(
        &mut self,
        task_id: &str,
        reason: impl Into<String>,
    ) -> Option<TaskTransition> {
        self.matching(
            task_id,
            &[
                TaskExecutionState::Pending,
                TaskExecutionState::Dispatched,
                TaskExecutionState::InProgress,
            ],
        )?;
        self.transition(TaskExecutionState::Failed, Some(reason.into()))
    }

    /// Any non-terminal state → Cancelled. `None` if nothing is active.
    pub fn cancel(&mut self) -> Option<TaskTransition> {
        self.task.as_ref().filter(|t| t.is_active())?;
        self.transition(
            TaskExecutionState::Cancelled,
            Some("cancelled by control plane".into()),
        )
    }

    /// Set or clear the pause flag on a Dispatched/InProgress task.
    ///
    /// Returns `false` (and changes nothing) when there is no such task or the
    /// flag already has the requested value.
    pub fn set_paused(&mut self, paused: bool, now: Instant) -> bool {
        let Some(task) = self.task.as_mut() else {
            return false;
        };
        let pausable = matches!(
            task.state,
            TaskExecutionState::Dispatched | TaskExecutionState::InProgress
        );
        if !pausable || task.is_paused == paused {
            return false;
        }
        task.is_paused = paused;
        if paused {
            task.paused_at = task.deadline.map(|_| now);
        } else if let (Some(deadline), Some(since)) = (task.deadline, task.paused_at.take()) {
            task.deadline = Some(deadline + now.saturating_duration_since(since));
        }
        self.epoch += 1;
        debug!(robot = %self.robot, task_id = %task.command.id, paused, "pause flag changed");
        true
    }

    /// Evaluate a status poll (already in the control-plane frame) against the
    /// in-progress task.
    ///
    /// `epoch` must be the value of [`epoch`][Self::epoch] captured before the
    /// poll started; a mismatch means the observation is stale and it is
    /// ignored.
    pub fn observe(
        &mut self,
        status: &RobotStatus,
        epoch: u64,
        now: Instant,
    ) -> Option<TaskTransition> {
        if epoch != self.epoch {
            debug!(
                robot = %self.robot,
                observed = epoch,
                current = self.epoch,
                "dropping stale observation"
            );
            return None;
        }
        if let Some(docked) = status.shelf_docked {
            self.carrying_shelf = docked;
        }
        let task = self
            .task
            .as_ref()
            .filter(|t| t.state == TaskExecutionState::InProgress)?;

        if status.mode == RobotMode::Error {
            return self.transition(
                TaskExecutionState::Failed,
                Some("robot reported an error".into()),
            );
        }
        if self.is_complete(task, status) {
            if let Some(docked) = task.command.kind.shelf_after() {
                self.carrying_shelf = docked;
            }
            return self.transition(TaskExecutionState::Completed, None);
        }
        if task.deadline_passed(now) {
            return self.timeout_transition();
        }
        None
    }

    /// Deadline-only evaluation, used when a poll could not reach the robot.
    pub fn check_timeout(&mut self, now: Instant) -> Option<TaskTransition> {
        let task = self.task.as_ref()?;
        if task.state == TaskExecutionState::InProgress && task.deadline_passed(now) {
            self.timeout_transition()
        } else {
            None
        }
    }

    // ── Helpers ─────────────────────────────────────────────────────────────

    fn is_complete(&self, task: &TaskRecord, status: &RobotStatus) -> bool {
        match task.command.kind {
            TaskKind::MoveTo => {
                if matches!(status.mode, RobotMode::Moving | RobotMode::Docking) {
                    return false;
                }
                let Some(target) = task.command.target_pose else {
                    return false;
                };
                let Ok(distance) = status.pose.planar_distance(&target) else {
                    return false;
                };
                let heading_ok = self
                    .policy
                    .heading_tolerance
                    .is_none_or(|tol| status.pose.heading_error(&target) <= tol);
                distance <= self.policy.position_tolerance && heading_ok
            }
            TaskKind::Dock | TaskKind::Charge => {
                status.mode == RobotMode::Charging || status.is_charging
            }
            kind @ (TaskKind::Pickup | TaskKind::Dropoff) => {
                !matches!(status.mode, RobotMode::Moving | RobotMode::Docking)
                    && status.shelf_docked == kind.shelf_after()
            }
            _ => false,
        }
    }

    fn timeout_transition(&mut self) -> Option<TaskTransition> {
        let secs = self.policy.progress_timeout.as_secs_f64();
        self.transition(
            TaskExecutionState::Failed,
            Some(format!("no progress within {secs:.0} s")),
        )
    }

    fn matching(
        &mut self,
        task_id: &str,
        states: &[TaskExecutionState],
    ) -> Option<&mut TaskRecord> {
        self.task
            .as_mut()
            .filter(|t| t.command.id == task_id && states.contains(&t.state))
    }

    fn transition(
        &mut self,
        to: TaskExecutionState,
        reason: Option<String>,
    ) -> Option<TaskTransition> {
        let task = self.task.as_mut()?;
        self.epoch += 1;
        let from = task.state;
        task.state = to;
        if to.is_terminal() {
            task.is_paused = false;
            task.paused_at = None;
            task.reason = reason.clone();
        }
        debug!(robot = %self.robot, task_id = %task.command.id, ?from, ?to, "task transition");
        Some(TaskTransition {
            task_id: task.command.id.clone(),
            kind: task.command.kind,
            from: Some(from),
            to,
            is_paused: task.is_paused,
            reason,
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
