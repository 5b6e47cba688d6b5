//! `fleetbridge-frames` – coordinate mapping between the control plane and
//! the robot.
//!
//! The control plane and the robot survey the same building independently, so
//! their coordinates differ by a uniform scale, a rotation and a translation.
//! This crate estimates that similarity transform from surveyed point pairs
//! and applies it to poses in both directions.
//!
//! # Modules
//!
//! - [`transform`] – [`SimilarityTransform`][transform::SimilarityTransform]
//!   and its least-squares fit, plus
//!   [`FrameTransformer`][transform::FrameTransformer], which converts tagged
//!   [`RobotPose`][fleetbridge_types::RobotPose] values between frames.
//! - [`registry`] – [`FrameRegistry`][registry::FrameRegistry]: one fitted
//!   transformer per building level, shared read-only by every robot on it.

pub mod registry;
pub mod transform;

pub use registry::FrameRegistry;
pub use transform::{CorrespondencePoint, FrameTransformer, Point2, SimilarityTransform};
