use std::f64::consts::PI;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coordinate frame a [`RobotPose`] is expressed in.
///
/// Poses are always tagged so that control-plane and robot coordinates can
/// never be mixed silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Frame {
    /// The fleet-management control plane's surveyed frame.
    ControlPlane,
    /// The robot's native map frame.
    Robot,
}

/// A planar pose: position in metres plus heading in radians.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RobotPose {
    pub x: f64,
    pub y: f64,
    pub heading: f64,
    pub frame: Frame,
}

impl RobotPose {
    pub fn new(x: f64, y: f64, heading: f64, frame: Frame) -> Self {
        Self { x, y, heading, frame }
    }

    /// A pose in the control-plane frame.
    pub fn control_plane(x: f64, y: f64, heading: f64) -> Self {
        Self::new(x, y, heading, Frame::ControlPlane)
    }

    /// A pose in the robot's native frame.
    pub fn robot(x: f64, y: f64, heading: f64) -> Self {
        Self::new(x, y, heading, Frame::Robot)
    }

    /// Euclidean distance between two poses of the same frame.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::FrameMismatch`] when the frames differ.
    pub fn planar_distance(&self, other: &RobotPose) -> Result<f64, FleetError> {
        if self.frame != other.frame {
            return Err(FleetError::FrameMismatch {
                expected: self.frame,
                actual: other.frame,
            });
        }
        Ok((self.x - other.x).hypot(self.y - other.y))
    }

    /// Absolute heading difference, wrapped to `[0, π]`.
    pub fn heading_error(&self, other: &RobotPose) -> f64 {
        normalize_angle(self.heading - other.heading).abs()
    }
}

/// Wrap an angle in radians into `(-π, π]`.
pub fn normalize_angle(rad: f64) -> f64 {
    let wrapped = rad.rem_euclid(2.0 * PI);
    if wrapped > PI { wrapped - 2.0 * PI } else { wrapped }
}

/// Coarse operating mode reported by the robot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RobotMode {
    Idle,
    Moving,
    Docking,
    Charging,
    Error,
}

/// Snapshot of a robot's state, re-fetched on every poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RobotStatus {
    pub pose: RobotPose,
    /// State of charge in `[0, 1]`.
    pub battery_fraction: f64,
    pub is_charging: bool,
    pub mode: RobotMode,
    #[serde(default)]
    pub current_task_id: Option<String>,
    /// Map / level name reported by the robot, when available.
    #[serde(default)]
    pub map: Option<String>,
    /// Whether a shelf is docked to the robot. `None` when the robot cannot
    /// tell.
    #[serde(default)]
    pub shelf_docked: Option<bool>,
}

impl RobotStatus {
    /// Copy of this snapshot flagged with [`RobotMode::Error`].
    pub fn degraded(&self) -> Self {
        Self {
            mode: RobotMode::Error,
            ..self.clone()
        }
    }

    /// Placeholder reported before the robot has ever answered a poll.
    pub fn unknown() -> Self {
        Self {
            pose: RobotPose::control_plane(0.0, 0.0, 0.0),
            battery_fraction: 0.0,
            is_charging: false,
            mode: RobotMode::Error,
            current_task_id: None,
            map: None,
            shelf_docked: None,
        }
    }
}

/// Kind of command issued by the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    MoveTo,
    Dock,
    Charge,
    Pause,
    Resume,
    Cancel,
    /// Dock the shelf in front of the robot.
    Pickup,
    /// Undock the shelf the robot is carrying.
    Dropoff,
}

impl TaskKind {
    /// `true` for kinds that create a tracked task (MoveTo, Dock, Charge,
    /// Pickup, Dropoff). Pause, Resume and Cancel only modify the active task.
    pub fn is_task(self) -> bool {
        matches!(
            self,
            TaskKind::MoveTo
                | TaskKind::Dock
                | TaskKind::Charge
                | TaskKind::Pickup
                | TaskKind::Dropoff
        )
    }

    /// Shelf state a successful task of this kind leaves behind.
    pub fn shelf_after(self) -> Option<bool> {
        match self {
            TaskKind::Pickup => Some(true),
            TaskKind::Dropoff => Some(false),
            _ => None,
        }
    }
}

/// A command created by the control plane and consumed once by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCommand {
    pub id: String,
    pub kind: TaskKind,
    /// Destination for [`TaskKind::MoveTo`], in the control-plane frame.
    #[serde(default)]
    pub target_pose: Option<RobotPose>,
    /// Linear speed cap in m/s. `None` or `0` selects the robot default.
    #[serde(default)]
    pub speed_limit: Option<f64>,
}

impl TaskCommand {
    fn bare(id: impl Into<String>, kind: TaskKind) -> Self {
        Self {
            id: id.into(),
            kind,
            target_pose: None,
            speed_limit: None,
        }
    }

    pub fn move_to(id: impl Into<String>, target: RobotPose) -> Self {
        Self {
            target_pose: Some(target),
            ..Self::bare(id, TaskKind::MoveTo)
        }
    }

    pub fn dock(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Dock)
    }

    pub fn charge(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Charge)
    }

    pub fn pause(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Pause)
    }

    pub fn resume(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Resume)
    }

    pub fn cancel(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Cancel)
    }

    pub fn pickup(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Pickup)
    }

    pub fn dropoff(id: impl Into<String>) -> Self {
        Self::bare(id, TaskKind::Dropoff)
    }

    /// Builder-style speed cap.
    pub fn with_speed_limit(mut self, speed_limit: f64) -> Self {
        self.speed_limit = Some(speed_limit);
        self
    }
}

/// Lifecycle of the task currently owned by a robot's executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskExecutionState {
    Pending,
    Dispatched,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskExecutionState {
    /// Completed, Failed and Cancelled admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskExecutionState::Completed
                | TaskExecutionState::Failed
                | TaskExecutionState::Cancelled
        )
    }
}

/// Reachability of a robot as seen by its poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum LinkHealth {
    /// The last poll succeeded.
    Fresh,
    /// Recent polls failed but the unreachable threshold is not yet reached.
    Degraded { consecutive_failures: u32 },
    /// The consecutive-failure threshold was crossed.
    Unreachable { consecutive_failures: u32 },
}

impl LinkHealth {
    pub fn is_fresh(self) -> bool {
        matches!(self, LinkHealth::Fresh)
    }

    pub fn is_unreachable(self) -> bool {
        matches!(self, LinkHealth::Unreachable { .. })
    }

    /// `true` when both values belong to the same category, ignoring counters.
    pub fn same_category(self, other: LinkHealth) -> bool {
        std::mem::discriminant(&self) == std::mem::discriminant(&other)
    }
}

/// The status update the control plane receives for one robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusReport {
    pub robot: String,
    pub status: RobotStatus,
    pub health: LinkHealth,
    pub timestamp: DateTime<Utc>,
}

/// A task lifecycle update for one robot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEvent {
    pub robot: String,
    pub task_id: String,
    pub kind: TaskKind,
    pub state: TaskExecutionState,
    pub is_paused: bool,
    #[serde(default)]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Acknowledgement of a robot command (request accepted, not completed).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    /// Vendor-side identifier of the accepted command, if the API returns one.
    pub command_id: Option<String>,
}

/// Unified event wrapper for the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"fleetbridge-runtime::state_reporter/kachaka_1"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Stamp `payload` with a fresh id and the current time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data routed over the internal event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    /// Periodic robot state, already in the control-plane frame.
    RobotState(StatusReport),
    /// A task lifecycle transition.
    TaskUpdate(TaskEvent),
    /// A command received from the control plane for `robot`.
    CommandReceived { robot: String, command: TaskCommand },
    /// A command the adapter refused to execute.
    CommandRejected {
        robot: String,
        task_id: String,
        reason: String,
    },
    /// A robot's reachability changed category.
    LinkChanged { robot: String, health: LinkHealth },
}

/// Error type shared by every fleetbridge crate.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FleetError {
    #[error("at least 3 correspondence points are required, got {got}")]
    InsufficientPoints { got: usize },

    #[error("degenerate correspondence geometry: {0}")]
    DegenerateGeometry(String),

    #[error("transport error talking to {robot}: {details}")]
    Transport { robot: String, details: String },

    #[error("{operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },

    #[error("{robot} rejected the command: {details}")]
    CommandRejected { robot: String, details: String },

    #[error("{robot} is busy with task {active_task}")]
    RobotBusy { robot: String, active_task: String },

    #[error("expected a pose in the {expected:?} frame, got {actual:?}")]
    FrameMismatch { expected: Frame, actual: Frame },

    #[error("invalid command: {0}")]
    InvalidCommand(String),

    #[error("unknown robot: {0}")]
    UnknownRobot(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl FleetError {
    /// Transport failures and per-call timeouts are worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, FleetError::Transport { .. } | FleetError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planar_distance_same_frame() {
        let a = RobotPose::control_plane(0.0, 0.0, 0.0);
        let b = RobotPose::control_plane(3.0, 4.0, 1.0);
        assert!((a.planar_distance(&b).unwrap() - 5.0).abs() < 1e-12);
    }

    #[test]
    fn planar_distance_rejects_mixed_frames() {
        let a = RobotPose::control_plane(0.0, 0.0, 0.0);
        let b = RobotPose::robot(1.0, 0.0, 0.0);
        assert_eq!(
            a.planar_distance(&b),
            Err(FleetError::FrameMismatch {
                expected: Frame::ControlPlane,
                actual: Frame::Robot,
            })
        );
    }

    #[test]
    fn normalize_angle_wraps_into_half_open_range() {
        assert!((normalize_angle(3.0 * PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(-PI) - PI).abs() < 1e-12);
        assert!((normalize_angle(2.5 * PI) - 0.5 * PI).abs() < 1e-12);
        assert!(normalize_angle(0.0).abs() < 1e-12);
    }

    #[test]
    fn heading_error_wraps_across_pi() {
        let a = RobotPose::robot(0.0, 0.0, PI - 0.1);
        let b = RobotPose::robot(0.0, 0.0, -PI + 0.1);
        assert!((a.heading_error(&b) - 0.2).abs() < 1e-9);
    }

    #[test]
    fn terminal_states() {
        assert!(!TaskExecutionState::Pending.is_terminal());
        assert!(!TaskExecutionState::Dispatched.is_terminal());
        assert!(!TaskExecutionState::InProgress.is_terminal());
        assert!(TaskExecutionState::Completed.is_terminal());
        assert!(TaskExecutionState::Failed.is_terminal());
        assert!(TaskExecutionState::Cancelled.is_terminal());
    }

    #[test]
    fn only_tracked_kinds_are_tasks() {
        assert!(TaskKind::MoveTo.is_task());
        assert!(TaskKind::Dock.is_task());
        assert!(TaskKind::Charge.is_task());
        assert!(TaskKind::Pickup.is_task());
        assert!(TaskKind::Dropoff.is_task());
        assert!(!TaskKind::Pause.is_task());
        assert!(!TaskKind::Resume.is_task());
        assert!(!TaskKind::Cancel.is_task());
    }

    #[test]
    fn degraded_keeps_pose_and_flags_error() {
        let status = RobotStatus {
            pose: RobotPose::control_plane(1.0, 2.0, 0.3),
            battery_fraction: 0.7,
            is_charging: false,
            mode: RobotMode::Moving,
            current_task_id: Some("t1".into()),
            map: Some("L1".into()),
            shelf_docked: Some(true),
        };
        let degraded = status.degraded();
        assert_eq!(degraded.mode, RobotMode::Error);
        assert_eq!(degraded.pose, status.pose);
        assert_eq!(degraded.current_task_id.as_deref(), Some("t1"));
        assert_eq!(degraded.shelf_docked, Some(true));
    }

    #[test]
    fn shelf_kinds_parse_and_report_outcome() {
        let cmd: TaskCommand = serde_json::from_str(r#"{"id":"p1","kind":"pickup"}"#).unwrap();
        assert_eq!(cmd, TaskCommand::pickup("p1"));
        assert_eq!(TaskKind::Pickup.shelf_after(), Some(true));
        assert_eq!(TaskKind::Dropoff.shelf_after(), Some(false));
        assert_eq!(TaskKind::Dock.shelf_after(), None);
    }

    #[test]
    fn task_command_parses_from_control_plane_json() {
        let json = r#"{
            "id": "task-7",
            "kind": "move_to",
            "target_pose": {"x": 1.5, "y": -2.0, "heading": 0.0, "frame": "control_plane"},
            "speed_limit": 0.5
        }"#;
        let cmd: TaskCommand = serde_json::from_str(json).unwrap();
        assert_eq!(cmd.kind, TaskKind::MoveTo);
        assert_eq!(cmd.target_pose.unwrap().frame, Frame::ControlPlane);
        assert_eq!(cmd.speed_limit, Some(0.5));
    }

    #[test]
    fn task_command_optional_fields_default() {
        let cmd: TaskCommand = serde_json::from_str(r#"{"id":"d1","kind":"dock"}"#).unwrap();
        assert_eq!(cmd, TaskCommand::dock("d1"));
    }

    #[test]
    fn link_health_category_ignores_counters() {
        let a = LinkHealth::Degraded { consecutive_failures: 1 };
        let b = LinkHealth::Degraded { consecutive_failures: 4 };
        assert!(a.same_category(b));
        assert!(!a.same_category(LinkHealth::Fresh));
        assert!(LinkHealth::Unreachable { consecutive_failures: 5 }.is_unreachable());
    }

    #[test]
    fn fleet_error_transient_classification() {
        let transport = FleetError::Transport {
            robot: "kachaka_1".into(),
            details: "connection refused".into(),
        };
        let timeout = FleetError::Timeout {
            operation: "move_to".into(),
            after_ms: 5000,
        };
        let rejected = FleetError::CommandRejected {
            robot: "kachaka_1".into(),
            details: "HTTP 400".into(),
        };
        assert!(transport.is_transient());
        assert!(timeout.is_transient());
        assert!(!rejected.is_transient());
        assert!(transport.to_string().contains("kachaka_1"));
    }

    #[test]
    fn event_payload_serializes_with_variant_name() {
        let event = Event::new(
            "fleetbridge-runtime::test",
            EventPayload::LinkChanged {
                robot: "r1".into(),
                health: LinkHealth::Unreachable { consecutive_failures: 3 },
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("LinkChanged"));
        assert!(json.contains("unreachable"));
    }
}
