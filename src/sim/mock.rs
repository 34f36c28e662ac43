//! Kinematic in-memory simulator for tests and the demo driver.
//!
//! Agents and objects are plain poses; "paths" are straight lines, the step
//! filter is a pass-through, and an attached object rides along with its
//! agent's end effector. Enough fidelity to exercise every measure and skill
//! without a physics engine.

use std::collections::HashMap;

use crate::geometry::{self, Vec3};

use super::traits::{AgentId, AgentPose, Command, ObjectId, Pose, Simulator};

/// Fixed offset from an agent's base to its resting end-effector position,
/// expressed in the agent's local frame.
const EE_OFFSET: Vec3 = Vec3::new(0.2, 0.2, 0.0);

#[derive(Debug, Clone)]
struct MockAgent {
    pose: AgentPose,
    /// Commanded end-effector position for the current step, if any.
    ee_target: Option<Vec3>,
}

/// A straight-line-world implementation of [`Simulator`].
#[derive(Debug, Default)]
pub struct MockSimulator {
    agents: Vec<MockAgent>,
    objects: Vec<Pose>,
    attached: HashMap<AgentId, ObjectId>,
    /// When set, `shortest_path` and `geodesic_distance` report no path.
    pathfinding_blocked: bool,
}

impl MockSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an agent at the given pose and return its id.
    pub fn add_agent(&mut self, pose: AgentPose) -> AgentId {
        self.agents.push(MockAgent {
            pose,
            ee_target: None,
        });
        AgentId(self.agents.len() - 1)
    }

    /// Add an object at the given position and return its id.
    pub fn add_object(&mut self, position: Vec3) -> ObjectId {
        self.objects.push(Pose::from_position(position));
        ObjectId(self.objects.len() - 1)
    }

    /// Move an agent's base directly (test scaffolding).
    pub fn set_agent_pose(&mut self, agent: AgentId, pose: AgentPose) {
        if let Some(a) = self.agents.get_mut(agent.0) {
            a.pose = pose;
            self.drag_attached(agent);
        }
    }

    /// Make path queries fail, forcing callers onto their fallbacks.
    pub fn block_pathfinding(&mut self, blocked: bool) {
        self.pathfinding_blocked = blocked;
    }

    fn resting_ee(&self, agent: &MockAgent) -> Vec3 {
        agent.pose.local_to_world(&EE_OFFSET)
    }

    /// Keep a held object glued to its agent's end effector.
    fn drag_attached(&mut self, agent: AgentId) {
        if let Some(&object) = self.attached.get(&agent) {
            if let Some(ee) = self.end_effector_pos(agent) {
                if let Some(pose) = self.objects.get_mut(object.0) {
                    pose.position = ee;
                }
            }
        }
    }
}

impl Simulator for MockSimulator {
    fn agent_pose(&self, agent: AgentId) -> Option<AgentPose> {
        self.agents.get(agent.0).map(|a| a.pose)
    }

    fn object_pose(&self, object: ObjectId) -> Option<Pose> {
        self.objects.get(object.0).copied()
    }

    fn num_objects(&self) -> usize {
        self.objects.len()
    }

    fn end_effector_pos(&self, agent: AgentId) -> Option<Vec3> {
        let a = self.agents.get(agent.0)?;
        Some(a.ee_target.unwrap_or_else(|| self.resting_ee(a)))
    }

    fn shortest_path(&self, start: &Vec3, end: &Vec3) -> Option<Vec<Vec3>> {
        if self.pathfinding_blocked {
            return None;
        }
        // Straight-line world: one intermediate waypoint at the midpoint so
        // that callers exercising `path[1]` get something distinct from the
        // endpoints.
        Some(vec![*start, (start + end) / 2.0, *end])
    }

    fn geodesic_distance(&self, start: &Vec3, end: &Vec3) -> Option<f64> {
        if self.pathfinding_blocked {
            return None;
        }
        Some(geometry::distance(start, end))
    }

    fn step_filter(&self, _previous: &Vec3, requested: &Vec3) -> Vec3 {
        *requested
    }

    fn attach(&mut self, agent: AgentId, object: ObjectId) {
        self.attached.insert(agent, object);
        self.drag_attached(agent);
    }

    fn detach(&mut self, agent: AgentId, _force: bool) -> Option<ObjectId> {
        self.attached.remove(&agent)
    }

    fn is_attached(&self, agent: AgentId) -> bool {
        self.attached.contains_key(&agent)
    }

    fn attached_object(&self, agent: AgentId) -> Option<ObjectId> {
        self.attached.get(&agent).copied()
    }

    fn set_object_pose(&mut self, object: ObjectId, pose: Pose) {
        if let Some(p) = self.objects.get_mut(object.0) {
            *p = pose;
        }
    }

    fn apply_command(&mut self, agent: AgentId, command: &Command) {
        let Some(a) = self.agents.get_mut(agent.0) else {
            return;
        };
        match command {
            Command::Reach(point) => {
                a.ee_target = Some(*point);
            }
            Command::Stop => {
                a.ee_target = None;
            }
            Command::Walk { position, yaw } => {
                a.pose.position = *position;
                a.pose.rotation =
                    nalgebra::UnitQuaternion::from_axis_angle(&Vec3::y_axis(), *yaw);
                a.ee_target = None;
            }
        }
        self.drag_attached(agent);
    }
}
