//! State shared by one robot's reporter and executor.
//!
//! Both engines take the same `tokio::sync::Mutex`; neither holds it across a
//! call to the robot. Transitions are published while it is held, so bus
//! subscribers see a robot's task events in the order they were applied.

use std::sync::Arc;

use fleetbridge_kernel::{LinkMonitor, TaskMachine, TaskPolicy};
use fleetbridge_types::RobotStatus;
use tokio::sync::Mutex;

#[derive(Debug)]
pub struct RobotState {
    pub machine: TaskMachine,
    pub link: LinkMonitor,
    /// Last successfully polled status, in the control-plane frame.
    pub latest: Option<RobotStatus>,
}

pub type SharedRobotState = Arc<Mutex<RobotState>>;

impl RobotState {
    pub fn new(robot: &str, policy: TaskPolicy, unreachable_after: u32) -> Self {
        Self {
            machine: TaskMachine::new(robot, policy),
            link: LinkMonitor::new(unreachable_after),
            latest: None,
        }
    }

    pub fn shared(robot: &str, policy: TaskPolicy, unreachable_after: u32) -> SharedRobotState {
        Arc::new(Mutex::new(Self::new(robot, policy, unreachable_after)))
    }
}
