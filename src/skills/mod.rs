//! Discrete skill state machines.
//!
//! A skill turns one high-level [`SkillIntent`] into a sequence of low-level
//! [`Command`]s, one per step, with explicit stages and snap thresholds. The
//! intent is re-supplied every step; an absent or changed intent cancels the
//! current stage cleanly (the hand retracts, the base stops) rather than
//! crashing the control loop.
//!
//! [`Command`]: crate::sim::Command

use serde::{Deserialize, Serialize};

use crate::geometry::Vec3;
use crate::sim::AgentId;

pub mod nav;
pub mod pick;

pub use nav::NavSkill;
pub use pick::PickSkill;

/// One high-level request for the current step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SkillIntent {
    /// Reach toward the object and grasp it.
    Pick { object_index: usize },
    /// Reach toward `position` and release the held object there.
    Place { object_index: usize, position: Vec3 },
    /// Walk the base to a fixed goal.
    NavigateTo { goal: Vec3 },
    /// Walk the base toward another agent's current position.
    FollowAgent { agent: AgentId },
}
