//! [`FleetAdapterCore`] – owns every robot's engines and their workers.
//!
//! ```text
//!  Commands topic ──► relay ──► TaskExecutor(robot) ──► RobotClient
//!                       │  └──► control lane(robot) ──► TaskExecutor(robot)
//!                       │
//!                       └──► CommandRejected (Commands topic)
//!
//!  StateReporter(robot) ── poll loop ──► RobotState / TaskEvents / SystemAlerts
//! ```
//!
//! Task commands and cancels are handled by the relay itself; they never wait
//! on the robot. Pause and Resume do, so each robot has its own control lane
//! that runs them in arrival order. A slow robot only delays its own lane.
//!
//! Robots are registered with [`add_robot`][FleetAdapterCore::add_robot]
//! before [`start`][FleetAdapterCore::start]; the robot set is fixed once the
//! workers are running.

use std::collections::BTreeMap;
use std::sync::Arc;

use fleetbridge_frames::FrameTransformer;
use fleetbridge_hal::RobotClient;
use fleetbridge_kernel::TaskSnapshot;
use fleetbridge_middleware::{EventBus, Topic, TopicReceiver};
use fleetbridge_types::{EventPayload, FleetError, RobotStatus, TaskCommand, TaskKind};
use tokio::sync::{broadcast::error::RecvError, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::robot_state::{RobotState, SharedRobotState};
use crate::settings::AdapterSettings;
use crate::state_reporter::StateReporter;
use crate::task_executor::TaskExecutor;

const SOURCE: &str = "fleetbridge-runtime::adapter_core";

struct RobotEntry {
    reporter: StateReporter,
    executor: TaskExecutor,
    state: SharedRobotState,
}

pub struct FleetAdapterCore {
    bus: Arc<EventBus>,
    settings: AdapterSettings,
    robots: BTreeMap<String, RobotEntry>,
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    started: bool,
}

impl FleetAdapterCore {
    pub fn new(bus: Arc<EventBus>, settings: AdapterSettings) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            bus,
            settings,
            robots: BTreeMap::new(),
            shutdown_tx,
            workers: Vec::new(),
            started: false,
        }
    }

    /// Register a robot and build its reporter and executor.
    ///
    /// The robot is keyed by `name`; `client.name()` is used in log fields
    /// and events and is expected to match.
    pub fn add_robot(
        &mut self,
        name: impl Into<String>,
        client: Arc<dyn RobotClient>,
        transformer: Arc<FrameTransformer>,
    ) -> Result<(), FleetError> {
        let name = name.into();
        if self.started {
            return Err(FleetError::InvalidCommand(format!(
                "cannot add robot {name} after the adapter has started"
            )));
        }
        if self.robots.contains_key(&name) {
            return Err(FleetError::InvalidCommand(format!(
                "robot {name} is already registered"
            )));
        }

        let state = RobotState::shared(
            &name,
            self.settings.policy,
            self.settings.unreachable_after,
        );
        let reporter = StateReporter::new(
            Arc::clone(&client),
            Arc::clone(&transformer),
            Arc::clone(&state),
            Arc::clone(&self.bus),
            self.settings.poll_timeout,
        );
        let executor = TaskExecutor::new(
            client,
            transformer,
            Arc::clone(&state),
            Arc::clone(&self.bus),
            self.settings.dispatch,
        );
        info!(robot = %name, "robot registered");
        self.robots.insert(
            name,
            RobotEntry {
                reporter,
                executor,
                state,
            },
        );
        Ok(())
    }

    /// Registered robot names, sorted.
    pub fn robot_names(&self) -> Vec<String> {
        self.robots.keys().cloned().collect()
    }

    /// Spawn one poll loop and one control lane per robot, plus the command
    /// relay.
    pub fn start(&mut self) -> Result<(), FleetError> {
        if self.started {
            return Err(FleetError::InvalidCommand(
                "adapter already started".into(),
            ));
        }
        self.started = true;

        // Subscribe before spawning anything so no command is missed.
        let commands = self.bus.subscribe_to(Topic::Commands);
        for entry in self.robots.values() {
            let reporter = entry.reporter.clone();
            let shutdown = self.shutdown_tx.subscribe();
            let interval = self.settings.poll_interval;
            self.workers
                .push(tokio::spawn(async move { reporter.run(interval, shutdown).await }));
        }

        let mut lanes = BTreeMap::new();
        for (name, entry) in &self.robots {
            let (control, queue) = mpsc::unbounded_channel();
            let executor = entry.executor.clone();
            let bus = Arc::clone(&self.bus);
            let shutdown = self.shutdown_tx.subscribe();
            self.workers.push(tokio::spawn(async move {
                control_lane(executor, queue, bus, shutdown).await
            }));
            lanes.insert(
                name.clone(),
                RobotLane {
                    executor: entry.executor.clone(),
                    control,
                },
            );
        }
        let relay = CommandRelay {
            lanes,
            bus: Arc::clone(&self.bus),
        };
        let shutdown = self.shutdown_tx.subscribe();
        self.workers
            .push(tokio::spawn(async move { relay.run(commands, shutdown).await }));

        info!(robots = self.robots.len(), "fleet adapter started");
        Ok(())
    }

    /// Route a command straight to a robot's executor.
    pub async fn assign(&self, robot: &str, command: TaskCommand) -> Result<(), FleetError> {
        self.entry(robot)?.executor.assign(command).await
    }

    /// Most recent status report contents for `robot`, in the control-plane
    /// frame. `None` until the first successful poll.
    pub async fn latest_status(&self, robot: &str) -> Result<Option<RobotStatus>, FleetError> {
        Ok(self.entry(robot)?.state.lock().await.latest.clone())
    }

    pub async fn task_state(&self, robot: &str) -> Result<Option<TaskSnapshot>, FleetError> {
        Ok(self.entry(robot)?.executor.task_state().await)
    }

    /// Signal every worker to stop and wait for them.
    pub async fn shutdown(&mut self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!(error = %e, "worker ended abnormally");
            }
        }
        info!("fleet adapter stopped");
    }

    fn entry(&self, robot: &str) -> Result<&RobotEntry, FleetError> {
        self.robots
            .get(robot)
            .ok_or_else(|| FleetError::UnknownRobot(robot.to_owned()))
    }
}

struct RobotLane {
    executor: TaskExecutor,
    /// Pause and Resume, in arrival order.
    control: mpsc::UnboundedSender<TaskCommand>,
}

/// Routes `CommandReceived` events to executors and reports refusals.
struct CommandRelay {
    lanes: BTreeMap<String, RobotLane>,
    bus: Arc<EventBus>,
}

impl CommandRelay {
    async fn run(self, mut commands: TopicReceiver, mut shutdown: watch::Receiver<bool>) {
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                received = commands.recv() => match received {
                    Ok(event) => {
                        if let EventPayload::CommandReceived { robot, command } = event.payload {
                            self.route(robot, command).await;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        warn!(skipped = n, "command relay lagged; commands were dropped");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("command relay stopped");
    }

    async fn route(&self, robot: String, command: TaskCommand) {
        let Some(lane) = self.lanes.get(&robot) else {
            let task_id = command.id.clone();
            reject(&self.bus, robot.clone(), task_id, FleetError::UnknownRobot(robot));
            return;
        };
        if matches!(command.kind, TaskKind::Pause | TaskKind::Resume) {
            if let Err(mpsc::error::SendError(command)) = lane.control.send(command) {
                let e = FleetError::Channel("control lane is closed".into());
                reject(&self.bus, robot, command.id, e);
            }
            return;
        }
        let task_id = command.id.clone();
        if let Err(e) = lane.executor.assign(command).await {
            reject(&self.bus, robot, task_id, e);
        }
    }
}

/// Run one robot's Pause and Resume commands until the relay goes away or
/// shutdown is signalled.
async fn control_lane(
    executor: TaskExecutor,
    mut queue: mpsc::UnboundedReceiver<TaskCommand>,
    bus: Arc<EventBus>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            next = queue.recv() => {
                let Some(command) = next else { break };
                let task_id = command.id.clone();
                if let Err(e) = executor.assign(command).await {
                    reject(&bus, executor.robot().to_owned(), task_id, e);
                }
            }
        }
    }
    debug!(robot = %executor.robot(), "control lane stopped");
}

fn reject(bus: &EventBus, robot: String, task_id: String, error: FleetError) {
    warn!(robot = %robot, task_id = %task_id, error = %error, "command rejected");
    bus.emit(
        Topic::Commands,
        SOURCE,
        EventPayload::CommandRejected {
            robot,
            task_id,
            reason: error.to_string(),
        },
    );
}
