//! The `RobotClient` contract every vendor integration implements.
//!
//! All poses crossing this trait are in the robot's own frame
//! ([`Frame::Robot`][fleetbridge_types::Frame::Robot]); conversion from and to
//! the control-plane frame happens above it.
//!
//! Command methods return as soon as the robot has *accepted* the request.
//! Completion is never signalled here: callers observe it by polling
//! [`RobotClient::get_status`].

use async_trait::async_trait;
use fleetbridge_types::{Ack, FleetError, RobotPose, RobotStatus};

/// Uniform async interface to one robot.
///
/// # Contract
///
/// * Every method may fail with [`FleetError::Transport`] or
///   [`FleetError::Timeout`]; those are transient and may be retried.
/// * A refusal by the robot is [`FleetError::CommandRejected`] and is final.
/// * Implementations are shared behind `Arc<dyn RobotClient>` and called
///   concurrently from the poll loop and from command dispatch.
#[async_trait]
pub trait RobotClient: Send + Sync {
    /// Stable robot name, e.g. `"kachaka_1"`.
    fn name(&self) -> &str;

    /// Fetch a fresh status snapshot in the robot frame.
    async fn get_status(&self) -> Result<RobotStatus, FleetError>;

    /// Start navigating to `target`. `speed_limit` in m/s; `None` selects the
    /// robot default.
    async fn move_to(&self, target: &RobotPose, speed_limit: Option<f64>)
    -> Result<Ack, FleetError>;

    /// Return to the dock / charger.
    async fn dock(&self) -> Result<Ack, FleetError>;

    async fn pause(&self) -> Result<Ack, FleetError>;

    async fn resume(&self) -> Result<Ack, FleetError>;

    /// Stop whatever the robot is doing.
    async fn cancel(&self) -> Result<Ack, FleetError>;

    /// Dock the shelf in front of the robot. Completion shows up as
    /// `shelf_docked == Some(true)` in a later status.
    ///
    /// Robots without shelf handling reject the request.
    async fn dock_shelf(&self) -> Result<Ack, FleetError> {
        Err(FleetError::CommandRejected {
            robot: self.name().to_owned(),
            details: "shelf handling is not supported".into(),
        })
    }

    /// Undock the carried shelf. Completion shows up as
    /// `shelf_docked == Some(false)`.
    async fn undock_shelf(&self) -> Result<Ack, FleetError> {
        Err(FleetError::CommandRejected {
            robot: self.name().to_owned(),
            details: "shelf handling is not supported".into(),
        })
    }

    /// Cheap reachability check used at startup.
    async fn check_connection(&self) -> bool {
        self.get_status().await.is_ok()
    }
}
