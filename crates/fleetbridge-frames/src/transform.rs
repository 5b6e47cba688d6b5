//! Similarity transform estimation between two surveyed 2-D frames.
//!
//! Given corresponding points `a_i` (control plane) and `b_i` (robot), the fit
//! finds the scale `s > 0`, rotation `θ` and translation `t` minimising
//!
//! ```text
//! Σ | s·R(θ)·a_i + t − b_i |²
//! ```
//!
//! Treating centred points as complex numbers the optimum is closed-form:
//! `s·e^{iθ} = Σ conj(a'_i)·b'_i / Σ |a'_i|²`, and `t = b̄ − s·R(θ)·ā`.
//! Reflections and per-axis scaling cannot be represented.
//!
//! # Example
//!
//! ```rust
//! use fleetbridge_frames::transform::{CorrespondencePoint, FrameTransformer};
//! use fleetbridge_types::RobotPose;
//!
//! // The robot frame is the control-plane frame rotated by 90°.
//! let points = [
//!     CorrespondencePoint::new((0.0, 0.0), (0.0, 0.0)),
//!     CorrespondencePoint::new((10.0, 0.0), (0.0, 10.0)),
//!     CorrespondencePoint::new((0.0, 10.0), (-10.0, 0.0)),
//! ];
//! let tf = FrameTransformer::fit(&points).unwrap();
//!
//! let p = tf.to_robot_frame(&RobotPose::control_plane(5.0, 5.0, 0.0)).unwrap();
//! assert!((p.x + 5.0).abs() < 1e-9);
//! assert!((p.y - 5.0).abs() < 1e-9);
//! ```

use fleetbridge_types::{normalize_angle, FleetError, Frame, RobotPose};
use tracing::debug;

/// Relative threshold on `det(C) / trace(C)²` below which a point cloud is
/// treated as collinear. The ratio is scale invariant and at most `1/4`.
const COLLINEARITY_TOLERANCE: f64 = 1e-9;

/// Absolute threshold on the spread of a point cloud (m²).
const MIN_SPREAD: f64 = 1e-12;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 2-D point or vector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn zero() -> Self {
        Self::new(0.0, 0.0)
    }

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }

    fn norm_sq(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    /// Rotate by `angle` radians about the origin.
    fn rotate(self, angle: f64) -> Self {
        let (sin, cos) = angle.sin_cos();
        Self::new(cos * self.x - sin * self.y, sin * self.x + cos * self.y)
    }
}

impl From<(f64, f64)> for Point2 {
    fn from((x, y): (f64, f64)) -> Self {
        Self::new(x, y)
    }
}

/// One surveyed location expressed in both frames.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CorrespondencePoint {
    pub control_plane: Point2,
    pub robot: Point2,
}

impl CorrespondencePoint {
    pub fn new(control_plane: impl Into<Point2>, robot: impl Into<Point2>) -> Self {
        Self {
            control_plane: control_plane.into(),
            robot: robot.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimilarityTransform
// ────────────────────────────────────────────────────────────────────────────

/// Uniform scale, then rotation, then translation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimilarityTransform {
    /// Strictly positive.
    pub scale: f64,
    /// Radians, counter-clockwise.
    pub rotation: f64,
    pub translation: Point2,
}

impl SimilarityTransform {
    pub fn new(scale: f64, rotation: f64, translation: Point2) -> Self {
        Self {
            scale,
            rotation,
            translation,
        }
    }

    pub fn identity() -> Self {
        Self::new(1.0, 0.0, Point2::zero())
    }

    /// Map a point from the source frame into the target frame.
    pub fn apply(&self, p: Point2) -> Point2 {
        let r = p.rotate(self.rotation);
        Point2::new(
            self.scale * r.x + self.translation.x,
            self.scale * r.y + self.translation.y,
        )
    }

    /// Map a heading. Only the rotation applies to orientation.
    pub fn apply_heading(&self, heading: f64) -> f64 {
        normalize_angle(heading + self.rotation)
    }

    /// The algebraic inverse: `inverse().apply(apply(p)) == p`.
    pub fn inverse(&self) -> Self {
        let scale = 1.0 / self.scale;
        let rotation = -self.rotation;
        let t = self.translation.rotate(rotation);
        Self::new(scale, rotation, Point2::new(-scale * t.x, -scale * t.y))
    }

    /// Least-squares fit mapping each `control_plane` point onto its `robot`
    /// counterpart.
    ///
    /// # Errors
    ///
    /// - [`FleetError::InsufficientPoints`] for fewer than three pairs.
    /// - [`FleetError::DegenerateGeometry`] when either point set is collinear
    ///   or coincident, or when no positive scale fits the data.
    pub fn fit(points: &[CorrespondencePoint]) -> Result<Self, FleetError> {
        if points.len() < 3 {
            return Err(FleetError::InsufficientPoints { got: points.len() });
        }

        let src: Vec<Point2> = points.iter().map(|p| p.control_plane).collect();
        let dst: Vec<Point2> = points.iter().map(|p| p.robot).collect();
        let src_mean = centroid(&src);
        let dst_mean = centroid(&dst);

        check_spread(&src, src_mean, "control-plane")?;
        check_spread(&dst, dst_mean, "robot")?;

        let mut sum_aa = 0.0;
        let mut sxx = 0.0;
        let mut sxy = 0.0;
        for (a, b) in src.iter().zip(&dst) {
            let a = a.sub(src_mean);
            let b = b.sub(dst_mean);
            sum_aa += a.norm_sq();
            sxx += a.x * b.x + a.y * b.y;
            sxy += a.x * b.y - a.y * b.x;
        }

        let correlation = sxx.hypot(sxy);
        if correlation <= MIN_SPREAD {
            return Err(FleetError::DegenerateGeometry(
                "point sets are uncorrelated; no positive scale fits".to_string(),
            ));
        }

        let scale = correlation / sum_aa;
        let rotation = sxy.atan2(sxx);
        let mapped_mean = src_mean.rotate(rotation);
        let translation = Point2::new(
            dst_mean.x - scale * mapped_mean.x,
            dst_mean.y - scale * mapped_mean.y,
        );

        Ok(Self::new(scale, rotation, translation))
    }

    /// Root-mean-square distance between mapped and surveyed robot points.
    pub fn residual_rms(&self, points: &[CorrespondencePoint]) -> f64 {
        if points.is_empty() {
            return 0.0;
        }
        let sum: f64 = points
            .iter()
            .map(|p| self.apply(p.control_plane).sub(p.robot).norm_sq())
            .sum();
        (sum / points.len() as f64).sqrt()
    }
}

fn centroid(points: &[Point2]) -> Point2 {
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2::new(sx / n, sy / n)
}

/// Reject point clouds whose 2×2 covariance is rank deficient.
fn check_spread(points: &[Point2], mean: Point2, label: &str) -> Result<(), FleetError> {
    let (mut cxx, mut cyy, mut cxy) = (0.0, 0.0, 0.0);
    for p in points {
        let d = p.sub(mean);
        cxx += d.x * d.x;
        cyy += d.y * d.y;
        cxy += d.x * d.y;
    }
    let trace = cxx + cyy;
    if trace <= MIN_SPREAD {
        return Err(FleetError::DegenerateGeometry(format!(
            "all {label} points coincide"
        )));
    }
    let det = cxx * cyy - cxy * cxy;
    if det <= COLLINEARITY_TOLERANCE * trace * trace {
        return Err(FleetError::DegenerateGeometry(format!(
            "{label} points are collinear"
        )));
    }
    Ok(())
}

// ────────────────────────────────────────────────────────────────────────────
// FrameTransformer
// ────────────────────────────────────────────────────────────────────────────

/// Converts [`RobotPose`]s between the control-plane and robot frames.
///
/// Built once from the configured correspondence points and immutable
/// afterwards; share it behind an `Arc`. The robot → control-plane direction
/// uses the algebraic inverse of the fitted transform, so a round trip returns
/// the original pose up to floating-point error.
#[derive(Debug, Clone)]
pub struct FrameTransformer {
    points: Vec<CorrespondencePoint>,
    forward: SimilarityTransform,
    inverse: SimilarityTransform,
    residual_rms: f64,
}

impl FrameTransformer {
    /// Fit a transformer from correspondence points.
    ///
    /// # Errors
    ///
    /// See [`SimilarityTransform::fit`].
    pub fn fit(points: &[CorrespondencePoint]) -> Result<Self, FleetError> {
        let forward = SimilarityTransform::fit(points)?;
        let residual_rms = forward.residual_rms(points);
        debug!(
            scale = forward.scale,
            rotation_rad = forward.rotation,
            tx = forward.translation.x,
            ty = forward.translation.y,
            residual_rms,
            "fitted control-plane -> robot transform"
        );
        Ok(Self {
            points: points.to_vec(),
            forward,
            inverse: forward.inverse(),
            residual_rms,
        })
    }

    /// The fitted control-plane → robot transform.
    pub fn transform(&self) -> &SimilarityTransform {
        &self.forward
    }

    /// The correspondence points the transform was fitted from.
    pub fn points(&self) -> &[CorrespondencePoint] {
        &self.points
    }

    /// RMS fit residual in robot-frame units. Zero (up to rounding) for three
    /// consistent points.
    pub fn residual_rms(&self) -> f64 {
        self.residual_rms
    }

    /// Convert a control-plane pose into the robot frame.
    ///
    /// # Errors
    ///
    /// [`FleetError::FrameMismatch`] if `pose` is not in [`Frame::ControlPlane`].
    pub fn to_robot_frame(&self, pose: &RobotPose) -> Result<RobotPose, FleetError> {
        convert(&self.forward, pose, Frame::ControlPlane, Frame::Robot)
    }

    /// Convert a robot-frame pose into the control-plane frame.
    ///
    /// # Errors
    ///
    /// [`FleetError::FrameMismatch`] if `pose` is not in [`Frame::Robot`].
    pub fn to_control_frame(&self, pose: &RobotPose) -> Result<RobotPose, FleetError> {
        convert(&self.inverse, pose, Frame::Robot, Frame::ControlPlane)
    }
}

fn convert(
    tf: &SimilarityTransform,
    pose: &RobotPose,
    from: Frame,
    to: Frame,
) -> Result<RobotPose, FleetError> {
    if pose.frame != from {
        return Err(FleetError::FrameMismatch {
            expected: from,
            actual: pose.frame,
        });
    }
    let p = tf.apply(Point2::new(pose.x, pose.y));
    Ok(RobotPose::new(p.x, p.y, tf.apply_heading(pose.heading), to))
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────
