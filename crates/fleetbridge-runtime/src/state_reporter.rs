//! [`StateReporter`] – periodic status polling for one robot.
//!
//! Each poll:
//!
//! 1. snapshots the task-machine epoch,
//! 2. calls [`RobotClient::get_status`] under the poll timeout,
//! 3. converts the pose into the control-plane frame,
//! 4. updates reachability and evaluates the active task,
//! 5. publishes the resulting [`StatusReport`], any task transition and any
//!    reachability change on the bus, still holding the robot's state lock.
//!
//! A failed poll never stalls the control plane: it still receives a report,
//! flagged with [`RobotMode::Error`][fleetbridge_types::RobotMode::Error].

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use fleetbridge_frames::FrameTransformer;
use fleetbridge_hal::RobotClient;
use fleetbridge_middleware::{EventBus, Topic};
use fleetbridge_types::{EventPayload, FleetError, LinkHealth, RobotStatus, StatusReport};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::events::publish_transition;
use crate::robot_state::SharedRobotState;

/// Polls one robot and reports its state.
#[derive(Clone)]
pub struct StateReporter {
    robot: String,
    source: String,
    client: Arc<dyn RobotClient>,
    frames: Arc<FrameTransformer>,
    state: SharedRobotState,
    bus: Arc<EventBus>,
    poll_timeout: Duration,
}

impl StateReporter {
    pub fn new(
        client: Arc<dyn RobotClient>,
        frames: Arc<FrameTransformer>,
        state: SharedRobotState,
        bus: Arc<EventBus>,
        poll_timeout: Duration,
    ) -> Self {
        let robot = client.name().to_owned();
        Self {
            source: format!("fleetbridge-runtime::state_reporter/{robot}"),
            robot,
            client,
            frames,
            state,
            bus,
            poll_timeout,
        }
    }

    pub fn robot(&self) -> &str {
        &self.robot
    }

    /// Run one poll and return the report that was published.
    pub async fn poll_once(&self) -> StatusReport {
        let epoch = self.state.lock().await.machine.epoch();
        let fetched = self.fetch().await;
        let now = Instant::now();

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let previous = state.link.health();
        let (mut status, health, transition) = match fetched {
            Ok(status) => {
                let health = state.link.record_success(now);
                state.latest = Some(status.clone());
                let transition = state.machine.observe(&status, epoch, now);
                (status, health, transition)
            }
            Err(e) => {
                let health = state.link.record_failure();
                warn!(
                    robot = %self.robot,
                    error = %e,
                    consecutive_failures = state.link.consecutive_failures(),
                    "status poll failed"
                );
                let status = state
                    .latest
                    .as_ref()
                    .map(RobotStatus::degraded)
                    .unwrap_or_else(RobotStatus::unknown);
                let transition = state.machine.check_timeout(now);
                (status, health, transition)
            }
        };
        status.current_task_id = state.machine.busy_with().map(str::to_owned);

        if let Some(transition) = &transition {
            publish_transition(&self.bus, &self.source, &self.robot, transition);
        }
        if !previous.same_category(health) {
            self.report_link_change(health);
        }

        let report = StatusReport {
            robot: self.robot.clone(),
            status,
            health,
            timestamp: Utc::now(),
        };
        self.bus.emit(
            Topic::RobotState,
            self.source.as_str(),
            EventPayload::RobotState(report.clone()),
        );
        drop(guard);
        report
    }

    /// Poll every `interval` until `shutdown` becomes `true`. Missed ticks are
    /// delayed, never bunched.
    pub async fn run(self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(robot = %self.robot, interval_ms = interval.as_millis() as u64, "state reporter started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.poll_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!(robot = %self.robot, "state reporter stopped");
    }

    /// `get_status` under the poll timeout, converted to the control-plane
    /// frame.
    async fn fetch(&self) -> Result<RobotStatus, FleetError> {
        let status = tokio::time::timeout(self.poll_timeout, self.client.get_status())
            .await
            .map_err(|_| FleetError::Timeout {
                operation: format!("{}: get_status", self.robot),
                after_ms: self.poll_timeout.as_millis() as u64,
            })??;
        let pose = self.frames.to_control_frame(&status.pose)?;
        Ok(RobotStatus { pose, ..status })
    }

    fn report_link_change(&self, health: LinkHealth) {
        match health {
            LinkHealth::Fresh => info!(robot = %self.robot, "robot reachable"),
            LinkHealth::Degraded { consecutive_failures } => {
                debug!(robot = %self.robot, consecutive_failures, "robot link degraded");
            }
            LinkHealth::Unreachable { consecutive_failures } => {
                warn!(robot = %self.robot, consecutive_failures, "robot unreachable");
            }
        }
        self.bus.emit(
            Topic::SystemAlerts,
            self.source.as_str(),
            EventPayload::LinkChanged {
                robot: self.robot.clone(),
                health,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::robot_state::RobotState;
    use async_trait::async_trait;
    use fleetbridge_frames::CorrespondencePoint;
    use fleetbridge_hal::SimRobot;
    use fleetbridge_kernel::TaskPolicy;
    use crate::settings::DispatchSettings;
    use crate::task_executor::TaskExecutor;
    use fleetbridge_middleware::TopicReceiver;
    use fleetbridge_types::{
        Ack, Frame, RobotMode, RobotPose, TaskCommand, TaskEvent, TaskExecutionState,
    };

    /// Robot frame = control-plane frame rotated by 90°.
    fn rotated() -> Arc<FrameTransformer> {
        Arc::new(
            FrameTransformer::fit(&[
                CorrespondencePoint::new((0.0, 0.0), (0.0, 0.0)),
                CorrespondencePoint::new((10.0, 0.0), (0.0, 10.0)),
                CorrespondencePoint::new((0.0, 10.0), (-10.0, 0.0)),
            ])
            .unwrap(),
        )
    }

    fn reporter(
        client: Arc<dyn RobotClient>,
        bus: Arc<EventBus>,
        unreachable_after: u32,
    ) -> StateReporter {
        let state = RobotState::shared(client.name(), TaskPolicy::default(), unreachable_after);
        StateReporter::new(client, rotated(), state, bus, Duration::from_millis(200))
    }

    #[tokio::test]
    async fn reports_pose_in_control_plane_frame() {
        let sim = Arc::new(SimRobot::new("sim_1").with_pose(RobotPose::robot(0.0, 10.0, 0.0)));
        let bus = Arc::new(EventBus::default());
        let mut state_rx = bus.subscribe_to(Topic::RobotState);
        let reporter = reporter(sim, Arc::clone(&bus), 3);

        let report = reporter.poll_once().await;
        assert_eq!(report.health, LinkHealth::Fresh);
        assert_eq!(report.status.pose.frame, Frame::ControlPlane);
        assert!((report.status.pose.x - 10.0).abs() < 1e-9);
        assert!(report.status.pose.y.abs() < 1e-9);
        assert_eq!(report.status.mode, RobotMode::Idle);

        let event = state_rx.recv().await.unwrap();
        assert!(matches!(event.payload, EventPayload::RobotState(r) if r.robot == "sim_1"));
    }

    #[tokio::test]
    async fn degraded_then_unreachable_then_recovered() {
        let sim = Arc::new(SimRobot::new("sim_1").with_pose(RobotPose::robot(1.0, 0.0, 0.0)));
        let bus = Arc::new(EventBus::default());
        let mut alerts = bus.subscribe_to(Topic::SystemAlerts);
        let reporter = reporter(Arc::clone(&sim) as Arc<dyn RobotClient>, Arc::clone(&bus), 3);

        let good = reporter.poll_once().await;
        sim.fail_status_polls(3);

        let r1 = reporter.poll_once().await;
        assert_eq!(r1.health, LinkHealth::Degraded { consecutive_failures: 1 });
        assert_eq!(r1.status.mode, RobotMode::Error);
        assert_eq!(r1.status.pose, good.status.pose);

        let r2 = reporter.poll_once().await;
        assert_eq!(r2.health, LinkHealth::Degraded { consecutive_failures: 2 });

        let r3 = reporter.poll_once().await;
        assert_eq!(r3.health, LinkHealth::Unreachable { consecutive_failures: 3 });

        // The stored snapshot is not overwritten by degraded copies.
        let latest = reporter.state.lock().await.latest.clone().unwrap();
        assert_eq!(latest.mode, RobotMode::Idle);

        let r4 = reporter.poll_once().await;
        assert_eq!(r4.health, LinkHealth::Fresh);
        assert_eq!(r4.status.mode, RobotMode::Idle);

        // One alert per category change: degraded, unreachable, fresh.
        let mut seen = Vec::new();
        for _ in 0..3 {
            match alerts.recv().await.unwrap().payload {
                EventPayload::LinkChanged { health, .. } => seen.push(health),
                other => panic!("unexpected payload: {other:?}"),
            }
        }
        assert_eq!(
            seen,
            vec![
                LinkHealth::Degraded { consecutive_failures: 1 },
                LinkHealth::Unreachable { consecutive_failures: 3 },
                LinkHealth::Fresh,
            ]
        );
    }

    #[tokio::test]
    async fn placeholder_when_never_polled_successfully() {
        let sim = Arc::new(SimRobot::new("sim_1"));
        sim.fail_status_polls(1);
        let reporter = reporter(sim, Arc::new(EventBus::default()), 3);

        let report = reporter.poll_once().await;
        assert_eq!(report.status.mode, RobotMode::Error);
        assert_eq!(report.status.pose, RobotPose::control_plane(0.0, 0.0, 0.0));
    }

    /// A client whose status call never answers in time.
    struct HangingRobot;

    #[async_trait]
    impl RobotClient for HangingRobot {
        fn name(&self) -> &str {
            "hanging"
        }

        async fn get_status(&self) -> Result<RobotStatus, FleetError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(FleetError::Channel("unreachable".into()))
        }

        async fn move_to(&self, _: &RobotPose, _: Option<f64>) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn dock(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn pause(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn resume(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn cancel(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }
    }

    #[tokio::test]
    async fn poll_timeout_counts_as_failure() {
        let reporter = reporter(Arc::new(HangingRobot), Arc::new(EventBus::default()), 1);
        let started = Instant::now();
        let report = reporter.poll_once().await;
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(report.health.is_unreachable());
    }

    #[tokio::test]
    async fn completes_move_to_when_robot_arrives() {
        let sim = Arc::new(SimRobot::new("sim_1").with_pose(RobotPose::robot(0.0, 10.0, 0.0)));
        let bus = Arc::new(EventBus::default());
        let mut tasks = bus.subscribe_to(Topic::TaskEvents);
        let reporter = reporter(sim, Arc::clone(&bus), 3);
        {
            // The robot already sits at control-plane (10, 0).
            let mut state = reporter.state.lock().await;
            let now = Instant::now();
            state
                .machine
                .begin(
                    TaskCommand::move_to("t1", RobotPose::control_plane(10.0, 0.0, 0.0)),
                    now,
                )
                .unwrap();
            state.machine.mark_dispatched("t1");
            state.machine.mark_accepted("t1", now);
        }

        let report = reporter.poll_once().await;
        assert_eq!(report.status.current_task_id, None);

        let event = tasks.recv().await.unwrap();
        match event.payload {
            EventPayload::TaskUpdate(update) => {
                assert_eq!(update.task_id, "t1");
                assert_eq!(update.state, TaskExecutionState::Completed);
            }
            other => panic!("unexpected payload: {other:?}"),
        }
    }

    /// Answers status calls slowly, always at control-plane (10, 0) and idle.
    struct SlowArrivedRobot;

    #[async_trait]
    impl RobotClient for SlowArrivedRobot {
        fn name(&self) -> &str {
            "slow"
        }

        async fn get_status(&self) -> Result<RobotStatus, FleetError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(RobotStatus {
                pose: RobotPose::robot(0.0, 10.0, 0.0),
                battery_fraction: 0.8,
                mode: RobotMode::Idle,
                ..RobotStatus::unknown()
            })
        }

        async fn move_to(&self, _: &RobotPose, _: Option<f64>) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn dock(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn pause(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn resume(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }

        async fn cancel(&self) -> Result<Ack, FleetError> {
            Ok(Ack::default())
        }
    }

    /// Task events received until the topic stays quiet for a moment.
    async fn drain_task_events(rx: &mut TopicReceiver) -> Vec<TaskEvent> {
        let mut events = Vec::new();
        let quiet = Duration::from_millis(50);
        while let Ok(Ok(event)) = tokio::time::timeout(quiet, rx.recv()).await {
            if let EventPayload::TaskUpdate(update) = event.payload {
                events.push(update);
            }
        }
        events
    }

    #[tokio::test]
    async fn cancel_during_poll_beats_arrival() {
        let bus = Arc::new(EventBus::default());
        let mut tasks = bus.subscribe_to(Topic::TaskEvents);
        let reporter = reporter(Arc::new(SlowArrivedRobot), Arc::clone(&bus), 3);
        {
            let mut state = reporter.state.lock().await;
            let now = Instant::now();
            state
                .machine
                .begin(
                    TaskCommand::move_to("t1", RobotPose::control_plane(10.0, 0.0, 0.0)),
                    now,
                )
                .unwrap();
            state.machine.mark_dispatched("t1");
            state.machine.mark_accepted("t1", now);
        }

        let poll = tokio::spawn({
            let reporter = reporter.clone();
            async move { reporter.poll_once().await }
        });
        tokio::time::sleep(Duration::from_millis(30)).await;
        {
            let mut state = reporter.state.lock().await;
            let t = state.machine.cancel().unwrap();
            publish_transition(&bus, "test", "slow", &t);
        }
        let report = poll.await.unwrap();

        assert_eq!(report.status.current_task_id, None);
        let state = reporter.state.lock().await.machine.active().unwrap().state;
        assert_eq!(state, TaskExecutionState::Cancelled);
        let states: Vec<_> = drain_task_events(&mut tasks)
            .await
            .into_iter()
            .map(|e| e.state)
            .collect();
        assert_eq!(states, vec![TaskExecutionState::Cancelled]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn nothing_follows_a_terminal_event() {
        for round in 0..20 {
            let sim = Arc::new(SimRobot::new("sim_1"));
            let client = Arc::clone(&sim) as Arc<dyn RobotClient>;
            let bus = Arc::new(EventBus::default());
            let mut tasks = bus.subscribe_to(Topic::TaskEvents);
            let state = RobotState::shared("sim_1", TaskPolicy::default(), 3);
            let reporter = StateReporter::new(
                Arc::clone(&client),
                rotated(),
                Arc::clone(&state),
                Arc::clone(&bus),
                Duration::from_millis(200),
            );
            let executor = TaskExecutor::new(
                client,
                rotated(),
                state,
                Arc::clone(&bus),
                DispatchSettings::default(),
            );

            // The robot already sits on the target, so the next poll completes.
            executor
                .assign(TaskCommand::move_to("t1", RobotPose::control_plane(0.0, 0.0, 0.0)))
                .await
                .unwrap();
            while executor.task_state().await.map(|t| t.state)
                != Some(TaskExecutionState::InProgress)
            {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }

            let pausing = tokio::spawn({
                let executor = executor.clone();
                async move { executor.pause().await }
            });
            reporter.poll_once().await;
            pausing.await.unwrap().unwrap();
            reporter.poll_once().await;

            let events = drain_task_events(&mut tasks).await;
            let terminal = events
                .iter()
                .position(|e| e.state.is_terminal())
                .unwrap_or_else(|| panic!("round {round}: no terminal event in {events:?}"));
            assert_eq!(terminal, events.len() - 1, "round {round}: {events:?}");
        }
    }

    #[tokio::test]
    async fn in_progress_task_id_is_reported() {
        let sim = Arc::new(SimRobot::new("sim_1"));
        let reporter = reporter(sim, Arc::new(EventBus::default()), 3);
        {
            let mut state = reporter.state.lock().await;
            state
                .machine
                .begin(TaskCommand::dock("d1"), Instant::now())
                .unwrap();
        }
        let report = reporter.poll_once().await;
        assert_eq!(report.status.current_task_id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let sim = Arc::new(SimRobot::new("sim_1"));
        let reporter = reporter(Arc::clone(&sim) as Arc<dyn RobotClient>, Arc::new(EventBus::default()), 3);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reporter.run(Duration::from_millis(10), rx));

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(sim.calls().len() >= 2);
    }
}
