//! `fleetbridge-hal` – the robot-side boundary.
//!
//! Everything above this crate talks to a robot through the
//! [`RobotClient`][robot_client::RobotClient] trait only, so vendor APIs can be
//! swapped without touching the task or reporting logic.
//!
//! # Modules
//!
//! - [`robot_client`] – the async [`RobotClient`][robot_client::RobotClient]
//!   contract.
//! - [`http_client`] – [`KachakaClient`][http_client::KachakaClient], the
//!   vendor REST implementation.
//! - [`sim`] – [`SimRobot`][sim::SimRobot], an in-process robot for tests and
//!   `--sim` runs.

pub mod http_client;
pub mod robot_client;
pub mod sim;

pub use http_client::{Credentials, KachakaClient};
pub use robot_client::RobotClient;
pub use sim::{SimCall, SimRobot};
