//! The [`Simulator`] trait and the pose/command types exchanged across it.

use nalgebra::UnitQuaternion;
use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;

/// Index of an articulated agent in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub usize);

/// Index of a tracked rigid object in the scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub usize);

/// World transform of a rigid object.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: UnitQuaternion<f64>,
}

impl Pose {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }
}

/// Base transform of an articulated agent.
///
/// The agent's forward axis is local +x, as in the underlying simulator's
/// base-transformation convention.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentPose {
    pub position: Vec3,
    pub rotation: UnitQuaternion<f64>,
}

impl AgentPose {
    pub fn from_position(position: Vec3) -> Self {
        Self {
            position,
            rotation: UnitQuaternion::identity(),
        }
    }

    /// World-space forward axis.
    pub fn forward(&self) -> Vec3 {
        self.rotation.transform_vector(&Vec3::new(1.0, 0.0, 0.0))
    }

    /// Transform a point from the agent's local frame into world space.
    pub fn local_to_world(&self, local: &Vec3) -> Vec3 {
        self.rotation.transform_vector(local) + self.position
    }
}

/// A low-level pose command emitted by a skill for the current step.
///
/// This is the payload handed to the backend's commanded-pose sink; the
/// backend decides how it maps onto joint targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Move the end effector toward this world-space point.
    Reach(Vec3),
    /// Hold a resting pose this step.
    Stop,
    /// Move the agent base to this position with the given yaw.
    Walk { position: Vec3, yaw: f64 },
}

/// Read/command surface the core consumes from the simulation backend.
///
/// Pose queries return `None` for entities that are not present (e.g. an
/// object that has left the scene); callers treat that as a recoverable
/// condition, not an error.
pub trait Simulator {
    /// Base pose of an agent.
    fn agent_pose(&self, agent: AgentId) -> Option<AgentPose>;

    /// World transform of a tracked object.
    fn object_pose(&self, object: ObjectId) -> Option<Pose>;

    /// Number of tracked objects in the scene.
    fn num_objects(&self) -> usize;

    /// World position of an agent's end effector.
    fn end_effector_pos(&self, agent: AgentId) -> Option<Vec3>;

    /// Ordered waypoints of a navigable path from `start` to `end`, including
    /// both endpoints, or `None` when no path exists.
    fn shortest_path(&self, start: &Vec3, end: &Vec3) -> Option<Vec<Vec3>>;

    /// Length of the shortest navigable path, or `None` when no path exists.
    fn geodesic_distance(&self, start: &Vec3, end: &Vec3) -> Option<f64>;

    /// Constrain a requested base movement to the navigable surface.
    fn step_filter(&self, previous: &Vec3, requested: &Vec3) -> Vec3;

    /// Rigidly attach an object to the agent's gripper.
    fn attach(&mut self, agent: AgentId, object: ObjectId);

    /// Release the held object, returning its id. With `force`, the release
    /// happens even if the backend would normally defer it.
    fn detach(&mut self, agent: AgentId, force: bool) -> Option<ObjectId>;

    /// Whether the agent is currently holding an object.
    fn is_attached(&self, agent: AgentId) -> bool;

    /// The held object, if any.
    fn attached_object(&self, agent: AgentId) -> Option<ObjectId>;

    /// Teleport an object to an exact pose (used when placing).
    fn set_object_pose(&mut self, object: ObjectId, pose: Pose);

    /// Commanded-pose sink: apply a skill command for the current step.
    fn apply_command(&mut self, agent: AgentId, command: &Command);
}
