//! Distance, heading, and navigation-success measures.

use crate::config::NavSuccessConfig;
use crate::geometry;
use crate::measures::{Measure, MeasureDeps, MeasureError, MeasureValue, StepContext};

pub const DIST_TO_GOAL: &str = "dist_to_goal";
pub const ROT_DIST_TO_GOAL: &str = "rot_dist_to_goal";
pub const NAV_TO_POS_SUCCESS: &str = "nav_to_pos_success";
pub const DOES_WANT_TERMINATE: &str = "does_want_terminate";
pub const NAV_TO_OBJ_SUCCESS: &str = "nav_to_obj_success";

fn robot_pose(
    ctx: &StepContext<'_>,
    measure: &'static str,
) -> Result<crate::sim::AgentPose, MeasureError> {
    ctx.sim
        .agent_pose(ctx.task.robot)
        .ok_or_else(|| MeasureError::PoseUnavailable {
            measure: measure.to_string(),
            entity: format!("agent {}", ctx.task.robot.0),
        })
}

// ---------------------------------------------------------------------------
// DistToGoal
// ---------------------------------------------------------------------------

/// Planar (x, z) Euclidean distance from the robot base to the navigation
/// goal. The goal may be refreshed each step by the task when it tracks a
/// moving agent.
#[derive(Debug, Default)]
pub struct DistToGoal;

impl Measure for DistToGoal {
    fn name(&self) -> &'static str {
        DIST_TO_GOAL
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let pose = robot_pose(ctx, DIST_TO_GOAL)?;
        Ok(geometry::planar_distance(&pose.position, &ctx.task.nav_goal).into())
    }
}

// ---------------------------------------------------------------------------
// RotDistToGoal
// ---------------------------------------------------------------------------

/// Absolute angle between the robot's forward axis and the direction to the
/// goal, projected onto the ground plane. A goal directly above or below the
/// robot reads as 0.0.
#[derive(Debug, Default)]
pub struct RotDistToGoal;

impl Measure for RotDistToGoal {
    fn name(&self) -> &'static str {
        ROT_DIST_TO_GOAL
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let pose = robot_pose(ctx, ROT_DIST_TO_GOAL)?;
        Ok(geometry::heading_error(&pose.position, &pose.rotation, &ctx.task.nav_goal).into())
    }
}

// ---------------------------------------------------------------------------
// NavToPosSuccess
// ---------------------------------------------------------------------------

/// Whether the robot base is within the success distance of the goal.
#[derive(Debug)]
pub struct NavToPosSuccess {
    success_distance: f64,
}

impl NavToPosSuccess {
    pub fn new(config: &NavSuccessConfig) -> Self {
        Self {
            success_distance: config.success_distance,
        }
    }
}

impl Measure for NavToPosSuccess {
    fn name(&self) -> &'static str {
        NAV_TO_POS_SUCCESS
    }

    fn dependencies(&self) -> &[&'static str] {
        &[DIST_TO_GOAL]
    }

    fn update(
        &mut self,
        _ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let dist = deps.scalar(DIST_TO_GOAL)?;
        Ok((dist < self.success_distance).into())
    }
}

// ---------------------------------------------------------------------------
// DoesWantTerminate
// ---------------------------------------------------------------------------

/// The agent's explicit "I am done" signal, forwarded from task state.
#[derive(Debug, Default)]
pub struct DoesWantTerminate;

impl Measure for DoesWantTerminate {
    fn name(&self) -> &'static str {
        DOES_WANT_TERMINATE
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        Ok(ctx.task.want_terminate.into())
    }
}

// ---------------------------------------------------------------------------
// NavToObjSuccess
// ---------------------------------------------------------------------------

/// Full navigation success: position reached, optionally looking at the
/// target, optionally gated on the explicit terminate signal.
///
/// With `must_call_stop`, reaching the success region without calling stop is
/// a no-op (the metric stays false and the episode continues); when stop is
/// called the episode should end, which this measure signals through the
/// task's `should_end` flag.
#[derive(Debug)]
pub struct NavToObjSuccess {
    config: NavSuccessConfig,
}

impl NavToObjSuccess {
    pub fn new(config: &NavSuccessConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }
}

impl Measure for NavToObjSuccess {
    fn name(&self) -> &'static str {
        NAV_TO_OBJ_SUCCESS
    }

    fn dependencies(&self) -> &[&'static str] {
        &[NAV_TO_POS_SUCCESS, ROT_DIST_TO_GOAL, DOES_WANT_TERMINATE]
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let angle_dist = deps.scalar(ROT_DIST_TO_GOAL)?;
        let nav_pos_succ = deps.boolean(NAV_TO_POS_SUCCESS)?;
        let called_stop = deps.boolean(DOES_WANT_TERMINATE)?;

        let mut success = if self.config.must_look_at_targ {
            nav_pos_succ && angle_dist < self.config.success_angle_dist
        } else {
            nav_pos_succ
        };

        if self.config.must_call_stop {
            if called_stop {
                ctx.task.should_end.set(true);
            } else {
                success = false;
            }
        }
        Ok(success.into())
    }
}
