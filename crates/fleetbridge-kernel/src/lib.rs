//! `fleetbridge-kernel` – pure per-robot bookkeeping.
//!
//! Nothing in this crate performs I/O or reads a clock; callers pass `now`
//! in. That keeps the rules deterministic and testable without a runtime.
//!
//! # Modules
//!
//! - [`task_machine`] – [`TaskMachine`][task_machine::TaskMachine]: the
//!   lifecycle of the one task a robot may own at a time, including the
//!   progress deadline, the pause flag and the epoch used to discard stale
//!   poll observations.
//! - [`reachability`] – [`LinkMonitor`][reachability::LinkMonitor]: counts
//!   consecutive poll failures and classifies a robot as fresh, degraded or
//!   unreachable.

pub mod reachability;
pub mod task_machine;

pub use reachability::LinkMonitor;
pub use task_machine::{TaskMachine, TaskPolicy, TaskSnapshot, TaskTransition};
