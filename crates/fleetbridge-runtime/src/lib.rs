//! `fleetbridge-runtime` – the per-robot engines and their orchestration.
//!
//! # Modules
//!
//! - [`settings`] – timing, retry and tolerance knobs shared by the engines.
//! - [`robot_state`] – the lock-protected state each robot's workers share.
//! - [`state_reporter`] – [`StateReporter`][state_reporter::StateReporter]:
//!   polls a robot, converts its pose into the control-plane frame, tracks
//!   reachability and drives task completion.
//! - [`task_executor`] – [`TaskExecutor`][task_executor::TaskExecutor]:
//!   validates and dispatches control-plane commands to the robot with
//!   timeouts and retries.
//! - [`adapter_core`] – [`FleetAdapterCore`][adapter_core::FleetAdapterCore]:
//!   owns every robot's engines, routes commands from the bus and manages
//!   worker lifetimes.
//! - [`telemetry`] – `tracing` subscriber and optional OTLP exporter setup.

pub mod adapter_core;
mod events;
pub mod robot_state;
pub mod settings;
pub mod state_reporter;
pub mod task_executor;
pub mod telemetry;

pub use adapter_core::FleetAdapterCore;
pub use settings::{AdapterSettings, DispatchSettings};
pub use state_reporter::StateReporter;
pub use task_executor::TaskExecutor;
