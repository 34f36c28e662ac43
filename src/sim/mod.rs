//! Simulation-backend abstraction.
//!
//! The core never owns physics state. Everything it needs from the simulator
//! goes through the [`Simulator`] trait: pose queries, a shortest-path query,
//! a navmesh step filter, grasp commands, and a commanded-pose sink.
//!
//! [`MockSimulator`] is a kinematic in-memory implementation used by the
//! tests and the demo driver.

pub mod mock;
pub mod traits;

pub use mock::MockSimulator;
pub use traits::{AgentId, AgentPose, Command, ObjectId, Pose, Simulator};
