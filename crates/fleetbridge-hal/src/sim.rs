//! In-process simulated robot for tests and `--sim` runs.
//!
//! [`SimRobot`] implements [`RobotClient`] without any network. Each
//! [`get_status`][RobotClient::get_status] advances the robot one step toward
//! its current target, so the poll loop itself drives the simulation.
//!
//! Failure injection lets tests exercise the unhappy paths:
//!
//! | Knob | Effect |
//! |------|--------|
//! | [`fail_status_polls`][SimRobot::fail_status_polls] | next *n* status reads return `Transport` |
//! | [`fail_commands`][SimRobot::fail_commands] | next *n* commands return `Transport` |
//! | [`reject_commands`][SimRobot::reject_commands] | commands return `CommandRejected` |
//! | [`set_command_delay`][SimRobot::set_command_delay] | commands sleep before answering |
//! | [`force_mode`][SimRobot::force_mode] | override the reported mode |
//!
//! Shelf pickup and dropoff take one status read to finish. Docking a shelf
//! while carrying one (or undocking without one) is rejected.
//!
//! # Example
//!
//! ```rust
//! use fleetbridge_hal::{RobotClient, SimRobot};
//! use fleetbridge_types::RobotPose;
//!
//! # tokio_test_block(async {
//! let robot = SimRobot::new("sim_1").with_step(10.0);
//! robot.move_to(&RobotPose::robot(3.0, 4.0, 0.0), None).await.unwrap();
//! let status = robot.get_status().await.unwrap();
//! assert_eq!((status.pose.x, status.pose.y), (3.0, 4.0));
//! # });
//! # fn tokio_test_block(f: impl std::future::Future<Output = ()>) {
//! #     tokio::runtime::Runtime::new().unwrap().block_on(f)
//! # }
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use fleetbridge_types::{Ack, FleetError, RobotMode, RobotPose, RobotStatus};
use tracing::debug;

use crate::robot_client::RobotClient;

/// A command or query received by a [`SimRobot`].
#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    GetStatus,
    MoveTo {
        target: RobotPose,
        speed_limit: Option<f64>,
    },
    Dock,
    Pause,
    Resume,
    Cancel,
    DockShelf,
    UndockShelf,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum SimTarget {
    Pose(RobotPose),
    Dock,
    /// Shelf docking in progress; the value is the shelf state it ends in.
    Shelf(bool),
}

#[derive(Debug)]
struct SimState {
    pose: RobotPose,
    dock_pose: RobotPose,
    battery: f64,
    charging: bool,
    target: Option<SimTarget>,
    paused: bool,
    step: f64,
    map: Option<String>,
    shelf_docked: bool,
    status_failures: u32,
    command_failures: u32,
    reject: bool,
    command_delay: Duration,
    forced_mode: Option<RobotMode>,
    calls: Vec<SimCall>,
}

impl SimState {
    fn mode(&self) -> RobotMode {
        if let Some(mode) = self.forced_mode {
            return mode;
        }
        match (self.target, self.paused) {
            (Some(SimTarget::Pose(_)), false) => RobotMode::Moving,
            (Some(SimTarget::Dock | SimTarget::Shelf(_)), false) => RobotMode::Docking,
            _ if self.charging => RobotMode::Charging,
            _ => RobotMode::Idle,
        }
    }

    /// Move one step toward the target, snapping onto it when within reach.
    fn advance(&mut self) {
        if self.charging {
            self.battery = (self.battery + 0.01).min(1.0);
        }
        let Some(target) = self.target else { return };
        if self.paused || self.step <= 0.0 {
            return;
        }
        let goal = match target {
            SimTarget::Pose(p) => p,
            SimTarget::Dock => self.dock_pose,
            SimTarget::Shelf(docked) => {
                self.shelf_docked = docked;
                self.target = None;
                return;
            }
        };
        let dx = goal.x - self.pose.x;
        let dy = goal.y - self.pose.y;
        let dist = dx.hypot(dy);
        self.battery = (self.battery - 0.001).max(0.0);
        if dist <= self.step {
            self.pose = goal;
            self.target = None;
            self.charging = target == SimTarget::Dock;
        } else {
            self.pose.x += dx / dist * self.step;
            self.pose.y += dy / dist * self.step;
            self.pose.heading = dy.atan2(dx);
        }
    }

    fn status(&self) -> RobotStatus {
        RobotStatus {
            pose: self.pose,
            battery_fraction: self.battery,
            is_charging: self.charging,
            mode: self.mode(),
            current_task_id: None,
            map: self.map.clone(),
            shelf_docked: Some(self.shelf_docked),
        }
    }
}

/// A simulated robot living entirely in memory.
#[derive(Debug)]
pub struct SimRobot {
    name: String,
    state: Mutex<SimState>,
}

impl SimRobot {
    /// Idle at the robot-frame origin, full battery, step 0.5 m per poll.
    pub fn new(name: impl Into<String>) -> Self {
        let origin = RobotPose::robot(0.0, 0.0, 0.0);
        Self {
            name: name.into(),
            state: Mutex::new(SimState {
                pose: origin,
                dock_pose: origin,
                battery: 1.0,
                charging: false,
                target: None,
                paused: false,
                step: 0.5,
                map: None,
                shelf_docked: false,
                status_failures: 0,
                command_failures: 0,
                reject: false,
                command_delay: Duration::ZERO,
                forced_mode: None,
                calls: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ── Builders ────────────────────────────────────────────────────────────

    pub fn with_pose(self, pose: RobotPose) -> Self {
        self.lock().pose = pose;
        self
    }

    pub fn with_dock(self, pose: RobotPose) -> Self {
        self.lock().dock_pose = pose;
        self
    }

    /// Distance travelled per status read. `0` freezes the robot in place.
    pub fn with_step(self, step: f64) -> Self {
        self.lock().step = step;
        self
    }

    pub fn with_battery(self, fraction: f64) -> Self {
        self.lock().battery = fraction.clamp(0.0, 1.0);
        self
    }

    pub fn with_map(self, map: impl Into<String>) -> Self {
        self.lock().map = Some(map.into());
        self
    }

    /// Start with a shelf already docked.
    pub fn with_shelf(self) -> Self {
        self.lock().shelf_docked = true;
        self
    }

    // ── Runtime controls ────────────────────────────────────────────────────

    pub fn set_step(&self, step: f64) {
        self.lock().step = step;
    }

    /// Move the robot instantly, without touching its target.
    pub fn teleport(&self, pose: RobotPose) {
        self.lock().pose = pose;
    }

    pub fn fail_status_polls(&self, n: u32) {
        self.lock().status_failures = n;
    }

    pub fn fail_commands(&self, n: u32) {
        self.lock().command_failures = n;
    }

    pub fn reject_commands(&self, reject: bool) {
        self.lock().reject = reject;
    }

    pub fn set_command_delay(&self, delay: Duration) {
        self.lock().command_delay = delay;
    }

    pub fn force_mode(&self, mode: Option<RobotMode>) {
        self.lock().forced_mode = mode;
    }

    // ── Inspection ──────────────────────────────────────────────────────────

    pub fn pose(&self) -> RobotPose {
        self.lock().pose
    }

    pub fn is_paused(&self) -> bool {
        self.lock().paused
    }

    pub fn shelf_docked(&self) -> bool {
        self.lock().shelf_docked
    }

    /// Every call received so far, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.lock().calls.clone()
    }

    /// Commands received so far, excluding status reads.
    pub fn commands(&self) -> Vec<SimCall> {
        self.lock()
            .calls
            .iter()
            .filter(|c| **c != SimCall::GetStatus)
            .cloned()
            .collect()
    }

    /// Record the call, honour the injected delay, then apply failure
    /// injection. The lock is released while sleeping.
    async fn command(
        &self,
        call: SimCall,
        apply: impl FnOnce(&mut SimState),
    ) -> Result<Ack, FleetError> {
        self.try_command(call, |s| {
            apply(s);
            Ok(())
        })
        .await
    }

    /// Like [`command`][Self::command], but `apply` may refuse the request;
    /// its message becomes a `CommandRejected`.
    async fn try_command(
        &self,
        call: SimCall,
        apply: impl FnOnce(&mut SimState) -> Result<(), String>,
    ) -> Result<Ack, FleetError> {
        let delay = {
            let mut state = self.lock();
            state.calls.push(call.clone());
            state.command_delay
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.lock();
        if state.command_failures > 0 {
            state.command_failures -= 1;
            return Err(FleetError::Transport {
                robot: self.name.clone(),
                details: "injected command failure".into(),
            });
        }
        if state.reject {
            return Err(FleetError::CommandRejected {
                robot: self.name.clone(),
                details: "injected rejection".into(),
            });
        }
        apply(&mut *state).map_err(|details| FleetError::CommandRejected {
            robot: self.name.clone(),
            details,
        })?;
        debug!(robot = %self.name, ?call, "sim command applied");
        Ok(Ack::default())
    }
}

#[async_trait]
impl RobotClient for SimRobot {
    fn name(&self) -> &str {
        &self.name
    }

    async fn get_status(&self) -> Result<RobotStatus, FleetError> {
        let mut state = self.lock();
        state.calls.push(SimCall::GetStatus);
        if state.status_failures > 0 {
            state.status_failures -= 1;
            return Err(FleetError::Transport {
                robot: self.name.clone(),
                details: "injected status failure".into(),
            });
        }
        state.advance();
        Ok(state.status())
    }

    async fn move_to(
        &self,
        target: &RobotPose,
        speed_limit: Option<f64>,
    ) -> Result<Ack, FleetError> {
        let target = *target;
        self.command(
            SimCall::MoveTo {
                target,
                speed_limit,
            },
            |s| {
                s.target = Some(SimTarget::Pose(target));
                s.paused = false;
                s.charging = false;
            },
        )
        .await
    }

    async fn dock(&self) -> Result<Ack, FleetError> {
        self.command(SimCall::Dock, |s| {
            s.target = Some(SimTarget::Dock);
            s.paused = false;
        })
        .await
    }

    async fn pause(&self) -> Result<Ack, FleetError> {
        self.command(SimCall::Pause, |s| s.paused = true).await
    }

    async fn resume(&self) -> Result<Ack, FleetError> {
        self.command(SimCall::Resume, |s| s.paused = false).await
    }

    async fn cancel(&self) -> Result<Ack, FleetError> {
        self.command(SimCall::Cancel, |s| {
            s.target = None;
            s.paused = false;
        })
        .await
    }

    async fn dock_shelf(&self) -> Result<Ack, FleetError> {
        self.try_command(SimCall::DockShelf, |s| {
            if s.shelf_docked {
                return Err("already carrying a shelf".into());
            }
            s.target = Some(SimTarget::Shelf(true));
            s.paused = false;
            Ok(())
        })
        .await
    }

    async fn undock_shelf(&self) -> Result<Ack, FleetError> {
        self.try_command(SimCall::UndockShelf, |s| {
            if !s.shelf_docked {
                return Err("no shelf is docked".into());
            }
            s.target = Some(SimTarget::Shelf(false));
            s.paused = false;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn walks_toward_target_and_stops() {
        let robot = SimRobot::new("sim").with_step(1.0);
        robot
            .move_to(&RobotPose::robot(2.5, 0.0, 0.0), None)
            .await
            .unwrap();

        let s1 = robot.get_status().await.unwrap();
        assert_eq!(s1.mode, RobotMode::Moving);
        assert!((s1.pose.x - 1.0).abs() < 1e-9);

        robot.get_status().await.unwrap();
        let s3 = robot.get_status().await.unwrap();
        assert_eq!(s3.mode, RobotMode::Idle);
        assert!((s3.pose.x - 2.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn dock_ends_charging() {
        let robot = SimRobot::new("sim")
            .with_pose(RobotPose::robot(1.0, 0.0, 0.0))
            .with_step(5.0);
        robot.dock().await.unwrap();
        let status = robot.get_status().await.unwrap();
        assert!(status.is_charging);
        assert_eq!(status.mode, RobotMode::Charging);
    }

    #[tokio::test]
    async fn pause_freezes_and_resume_continues() {
        let robot = SimRobot::new("sim").with_step(1.0);
        robot
            .move_to(&RobotPose::robot(10.0, 0.0, 0.0), None)
            .await
            .unwrap();
        robot.pause().await.unwrap();
        let paused = robot.get_status().await.unwrap();
        assert!(paused.pose.x.abs() < 1e-9);
        assert_eq!(paused.mode, RobotMode::Idle);

        robot.resume().await.unwrap();
        let moving = robot.get_status().await.unwrap();
        assert!((moving.pose.x - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn injected_failures_run_out() {
        let robot = SimRobot::new("sim");
        robot.fail_status_polls(2);
        assert!(robot.get_status().await.unwrap_err().is_transient());
        assert!(robot.get_status().await.is_err());
        assert!(robot.get_status().await.is_ok());

        robot.fail_commands(1);
        assert!(robot.dock().await.unwrap_err().is_transient());
        assert!(robot.dock().await.is_ok());
    }

    #[tokio::test]
    async fn rejection_is_not_transient() {
        let robot = SimRobot::new("sim");
        robot.reject_commands(true);
        let err = robot.cancel().await.unwrap_err();
        assert!(matches!(err, FleetError::CommandRejected { .. }));
    }

    #[tokio::test]
    async fn forced_mode_overrides() {
        let robot = SimRobot::new("sim");
        robot.force_mode(Some(RobotMode::Error));
        assert_eq!(robot.get_status().await.unwrap().mode, RobotMode::Error);
        robot.force_mode(None);
        assert_eq!(robot.get_status().await.unwrap().mode, RobotMode::Idle);
    }

    #[tokio::test]
    async fn records_calls_in_order() {
        let robot = SimRobot::new("sim");
        robot.get_status().await.unwrap();
        robot
            .move_to(&RobotPose::robot(1.0, 1.0, 0.0), Some(0.3))
            .await
            .unwrap();
        robot.cancel().await.unwrap();
        assert_eq!(
            robot.calls(),
            vec![
                SimCall::GetStatus,
                SimCall::MoveTo {
                    target: RobotPose::robot(1.0, 1.0, 0.0),
                    speed_limit: Some(0.3),
                },
                SimCall::Cancel,
            ]
        );
        assert_eq!(robot.commands().len(), 2);
    }

    #[tokio::test]
    async fn shelf_pickup_and_dropoff_finish_on_next_read() {
        let robot = SimRobot::new("sim");
        assert_eq!(robot.get_status().await.unwrap().shelf_docked, Some(false));

        robot.dock_shelf().await.unwrap();
        let picked = robot.get_status().await.unwrap();
        assert_eq!(picked.shelf_docked, Some(true));
        assert_eq!(picked.mode, RobotMode::Idle);

        let err = robot.dock_shelf().await.unwrap_err();
        assert!(matches!(err, FleetError::CommandRejected { .. }));

        robot.undock_shelf().await.unwrap();
        robot.get_status().await.unwrap();
        assert!(!robot.shelf_docked());
        assert!(robot.undock_shelf().await.is_err());
    }

    #[tokio::test]
    async fn command_delay_is_honoured() {
        let robot = SimRobot::new("sim");
        robot.set_command_delay(Duration::from_millis(50));
        let started = tokio::time::Instant::now();
        robot.dock().await.unwrap();
        assert!(started.elapsed() >= Duration::from_millis(50));
    }
}
