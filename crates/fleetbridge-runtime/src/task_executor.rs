//! [`TaskExecutor`] – turns control-plane commands into robot calls.
//!
//! Task commands (MoveTo, Dock, Charge, Pickup, Dropoff) are validated and
//! recorded synchronously, then dispatched to the robot on a spawned task so
//! the caller is never blocked by robot I/O. A cancel issued while a dispatch
//! is still in flight takes effect immediately. If the robot acknowledges the
//! cancelled command afterwards, the cancel is sent to the robot again.
//!
//! # Retry policy
//!
//! | Error | Handling |
//! |---|---|
//! | `Transport`, `Timeout` | retried with capped exponential backoff |
//! | `CommandRejected` and anything else | task fails immediately |
//! | attempts exhausted | task fails with the last error |

use std::sync::Arc;
use std::time::Instant;

use fleetbridge_frames::FrameTransformer;
use fleetbridge_hal::RobotClient;
use fleetbridge_kernel::{TaskSnapshot, TaskTransition};
use fleetbridge_middleware::EventBus;
use fleetbridge_types::{
    Ack, FleetError, RobotPose, TaskCommand, TaskExecutionState, TaskKind,
};
use tracing::{debug, info, warn};

use crate::events::publish_transition;
use crate::robot_state::SharedRobotState;
use crate::settings::DispatchSettings;

/// Executes commands for one robot.
#[derive(Clone)]
pub struct TaskExecutor {
    robot: String,
    source: String,
    client: Arc<dyn RobotClient>,
    frames: Arc<FrameTransformer>,
    state: SharedRobotState,
    bus: Arc<EventBus>,
    dispatch: DispatchSettings,
}

impl TaskExecutor {
    pub fn new(
        client: Arc<dyn RobotClient>,
        frames: Arc<FrameTransformer>,
        state: SharedRobotState,
        bus: Arc<EventBus>,
        dispatch: DispatchSettings,
    ) -> Self {
        let robot = client.name().to_owned();
        Self {
            source: format!("fleetbridge-runtime::task_executor/{robot}"),
            robot,
            client,
            frames,
            state,
            bus,
            dispatch,
        }
    }

    pub fn robot(&self) -> &str {
        &self.robot
    }

    /// Snapshot of the current (or most recent) task.
    pub async fn task_state(&self) -> Option<TaskSnapshot> {
        self.state.lock().await.machine.active()
    }

    /// Handle one control-plane command.
    ///
    /// # Errors
    ///
    /// - [`FleetError::RobotBusy`] if a task is already active.
    /// - [`FleetError::InvalidCommand`] / [`FleetError::FrameMismatch`] for a
    ///   malformed MoveTo, a Pickup while carrying a shelf or a Dropoff
    ///   without one.
    /// - Robot errors from Pause and Resume.
    ///
    /// Dispatch failures of task commands are not returned here; they surface
    /// as a Failed task.
    pub async fn assign(&self, command: TaskCommand) -> Result<(), FleetError> {
        match command.kind {
            TaskKind::Cancel => {
                self.cancel().await;
                Ok(())
            }
            TaskKind::Pause => self.pause().await,
            TaskKind::Resume => self.resume().await,
            TaskKind::MoveTo
            | TaskKind::Dock
            | TaskKind::Charge
            | TaskKind::Pickup
            | TaskKind::Dropoff => self.start(command).await,
        }
    }

    /// Cancel the active task, if any, and stop the robot.
    ///
    /// The Cancelled transition is published before the robot is contacted.
    /// The robot call runs in the background; its failure is only logged.
    pub async fn cancel(&self) {
        {
            let mut state = self.state.lock().await;
            match state.machine.cancel() {
                Some(t) => publish_transition(&self.bus, &self.source, &self.robot, &t),
                None => info!(robot = %self.robot, "cancel with no active task; stopping robot"),
            }
        }
        self.stop_robot();
    }

    pub async fn pause(&self) -> Result<(), FleetError> {
        self.call(self.client.pause(), "pause").await?;
        self.set_paused(true).await;
        Ok(())
    }

    pub async fn resume(&self) -> Result<(), FleetError> {
        self.call(self.client.resume(), "resume").await?;
        self.set_paused(false).await;
        Ok(())
    }

    // ── Internals ───────────────────────────────────────────────────────────

    async fn start(&self, command: TaskCommand) -> Result<(), FleetError> {
        let robot_target = match command.kind {
            TaskKind::MoveTo => {
                let target = command.target_pose.ok_or_else(|| {
                    FleetError::InvalidCommand(format!(
                        "move_to task {} has no target pose",
                        command.id
                    ))
                })?;
                Some(self.frames.to_robot_frame(&target)?)
            }
            _ => None,
        };

        {
            let mut state = self.state.lock().await;
            let created = state.machine.begin(command.clone(), Instant::now())?;
            publish_transition(&self.bus, &self.source, &self.robot, &created);
            if let Some(t) = state.machine.mark_dispatched(&command.id) {
                publish_transition(&self.bus, &self.source, &self.robot, &t);
            }
        }

        info!(
            robot = %self.robot,
            task_id = %command.id,
            kind = ?command.kind,
            "dispatching task"
        );
        let executor = self.clone();
        tokio::spawn(async move { executor.dispatch(command, robot_target).await });
        Ok(())
    }

    async fn dispatch(self, command: TaskCommand, robot_target: Option<RobotPose>) {
        let attempts = self.dispatch.attempts.max(1);
        for attempt in 1..=attempts {
            if !self.still_dispatched(&command.id).await {
                debug!(robot = %self.robot, task_id = %command.id, "task no longer dispatched; abandoning");
                return;
            }

            match self.send(&command, robot_target).await {
                Ok(ack) => {
                    let mut state = self.state.lock().await;
                    match state.machine.mark_accepted(&command.id, Instant::now()) {
                        Some(t) => {
                            debug!(robot = %self.robot, task_id = %command.id, command_id = ?ack.command_id, "robot accepted task");
                            publish_transition(&self.bus, &self.source, &self.robot, &t);
                        }
                        None if state.machine.state_of(&command.id)
                            == Some(TaskExecutionState::Cancelled) =>
                        {
                            // The robot may now be executing a cancelled task.
                            info!(
                                robot = %self.robot,
                                task_id = %command.id,
                                "acknowledged after cancel; stopping robot again"
                            );
                            self.stop_robot();
                        }
                        None => info!(
                            robot = %self.robot,
                            task_id = %command.id,
                            "ignoring late acknowledgement"
                        ),
                    }
                    return;
                }
                Err(e) if e.is_transient() && attempt < attempts => {
                    let delay = self.dispatch.backoff(attempt);
                    warn!(
                        robot = %self.robot,
                        task_id = %command.id,
                        attempt,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "dispatch failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    warn!(robot = %self.robot, task_id = %command.id, attempt, error = %e, "dispatch failed");
                    let mut state = self.state.lock().await;
                    if let Some(t) = state.machine.mark_failed(&command.id, e.to_string()) {
                        publish_transition(&self.bus, &self.source, &self.robot, &t);
                    }
                    return;
                }
            }
        }
    }

    async fn send(
        &self,
        command: &TaskCommand,
        robot_target: Option<RobotPose>,
    ) -> Result<Ack, FleetError> {
        match (command.kind, robot_target) {
            (TaskKind::MoveTo, Some(target)) => {
                self.call(self.client.move_to(&target, command.speed_limit), "move_to")
                    .await
            }
            // The robot's charger is its dock.
            (TaskKind::Dock | TaskKind::Charge, _) => self.call(self.client.dock(), "dock").await,
            (TaskKind::Pickup, _) => self.call(self.client.dock_shelf(), "dock_shelf").await,
            (TaskKind::Dropoff, _) => {
                self.call(self.client.undock_shelf(), "undock_shelf").await
            }
            (kind, _) => Err(FleetError::InvalidCommand(format!(
                "{kind:?} cannot be dispatched"
            ))),
        }
    }

    /// Run a robot call under the dispatch timeout.
    async fn call<F>(&self, fut: F, operation: &str) -> Result<Ack, FleetError>
    where
        F: std::future::Future<Output = Result<Ack, FleetError>>,
    {
        tokio::time::timeout(self.dispatch.timeout, fut)
            .await
            .map_err(|_| FleetError::Timeout {
                operation: format!("{}: {operation}", self.robot),
                after_ms: self.dispatch.timeout.as_millis() as u64,
            })?
    }

    /// Send a cancel to the robot in the background. Failures are logged.
    fn stop_robot(&self) {
        let executor = self.clone();
        tokio::spawn(async move {
            match executor.call(executor.client.cancel(), "cancel").await {
                Ok(_) => debug!(robot = %executor.robot, "robot acknowledged cancel"),
                Err(e) => warn!(robot = %executor.robot, error = %e, "robot cancel failed"),
            }
        });
    }

    async fn still_dispatched(&self, task_id: &str) -> bool {
        self.state.lock().await.machine.state_of(task_id) == Some(TaskExecutionState::Dispatched)
    }

    async fn set_paused(&self, paused: bool) {
        let mut state = self.state.lock().await;
        if !state.machine.set_paused(paused, Instant::now()) {
            debug!(robot = %self.robot, paused, "no task to (un)pause");
            return;
        }
        if let Some(task) = state.machine.active() {
            let update = TaskTransition {
                task_id: task.command.id.clone(),
                kind: task.command.kind,
                from: Some(task.state),
                to: task.state,
                is_paused: task.is_paused,
                reason: None,
            };
            publish_transition(&self.bus, &self.source, &self.robot, &update);
        }
    }
}
