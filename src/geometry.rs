//! Small geometry helpers shared by measures and skills.
//!
//! Positions and directions are `nalgebra::Vector3<f64>` in world
//! coordinates, with y as the up axis. "Planar" quantities are projected onto
//! the ground (x, z) plane, which is where navigation distances and headings
//! live.

use nalgebra::{UnitQuaternion, Vector3};

/// World-space position or direction.
pub type Vec3 = Vector3<f64>;

/// Length below which a vector is treated as degenerate (zero direction).
pub const EPS_LEN: f64 = 1e-8;

/// Euclidean distance between two points, ignoring the vertical (y) axis.
pub fn planar_distance(a: &Vec3, b: &Vec3) -> f64 {
    let dx = a.x - b.x;
    let dz = a.z - b.z;
    (dx * dx + dz * dz).sqrt()
}

/// Full 3D Euclidean distance.
pub fn distance(a: &Vec3, b: &Vec3) -> f64 {
    (a - b).norm()
}

/// Unit vector from `from` to `to`, or `None` when the two points coincide.
pub fn direction(from: &Vec3, to: &Vec3) -> Option<Vec3> {
    let d = to - from;
    let n = d.norm();
    if n < EPS_LEN {
        None
    } else {
        Some(d / n)
    }
}

/// Absolute angle (radians) between the agent's forward axis and the
/// direction to `target`, both projected onto the ground plane.
///
/// The target is first expressed in the agent's local frame, flattened to
/// y = 0, and compared against the local forward axis (+x). A target directly
/// above or below the agent projects to a zero-length vector; that degenerate
/// case reads as 0.0 rather than NaN.
pub fn heading_error(position: &Vec3, rotation: &UnitQuaternion<f64>, target: &Vec3) -> f64 {
    let mut local = rotation.inverse_transform_vector(&(target - position));
    local.y = 0.0;
    let n = local.norm();
    if n < EPS_LEN {
        return 0.0;
    }
    local /= n;
    // Clamp guards acos against float drift just outside [-1, 1].
    local.x.clamp(-1.0, 1.0).acos().abs()
}

/// Yaw (rotation about +y) that points the +x forward axis toward `dir`.
pub fn yaw_toward(dir: &Vec3) -> f64 {
    (-dir.z).atan2(dir.x)
}

/// Round to three decimal places.
///
/// Reward deltas are rounded before scaling so that floating-point jitter in
/// pose queries is not amplified into reward noise.
pub fn round3(x: f64) -> f64 {
    (x * 1000.0).round() / 1000.0
}
