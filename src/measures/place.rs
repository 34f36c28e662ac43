//! Placement measures: object-to-goal distances, resting stability, and the
//! place success criterion.

use std::collections::BTreeMap;

use crate::config::PlaceConfig;
use crate::geometry;
use crate::measures::{Measure, MeasureDeps, MeasureError, MeasureValue, StepContext};

pub const OBJECT_TO_GOAL_DISTANCE: &str = "object_to_goal_distance";
pub const EE_TO_GOAL_DISTANCE: &str = "ee_to_goal_distance";
pub const OBJ_AT_GOAL: &str = "obj_at_goal";
pub const EE_TO_REST_DISTANCE: &str = "ee_to_rest_distance";
pub const PLACEMENT_STABILITY: &str = "placement_stability";
pub const PLACE_SUCCESS: &str = "place_success";

// ---------------------------------------------------------------------------
// ObjectToGoalDistance
// ---------------------------------------------------------------------------

/// Euclidean distance from each goal-assigned object to its goal position,
/// keyed by object index.
#[derive(Debug, Default)]
pub struct ObjectToGoalDistance;

impl Measure for ObjectToGoalDistance {
    fn name(&self) -> &'static str {
        OBJECT_TO_GOAL_DISTANCE
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let mut distances = BTreeMap::new();
        for (idx, goal) in &ctx.task.object_goals {
            let pose = ctx.sim.object_pose(crate::sim::ObjectId(*idx)).ok_or_else(|| {
                MeasureError::PoseUnavailable {
                    measure: OBJECT_TO_GOAL_DISTANCE.to_string(),
                    entity: format!("object {idx}"),
                }
            })?;
            distances.insert(idx.to_string(), geometry::distance(&pose.position, goal));
        }
        Ok(distances.into())
    }
}

// ---------------------------------------------------------------------------
// EndEffectorToGoalDistance
// ---------------------------------------------------------------------------

/// Euclidean distance from the end effector to each object goal, keyed by
/// object index.
#[derive(Debug, Default)]
pub struct EndEffectorToGoalDistance;

impl Measure for EndEffectorToGoalDistance {
    fn name(&self) -> &'static str {
        EE_TO_GOAL_DISTANCE
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let ee = ctx
            .sim
            .end_effector_pos(ctx.task.robot)
            .ok_or_else(|| MeasureError::PoseUnavailable {
                measure: EE_TO_GOAL_DISTANCE.to_string(),
                entity: format!("end effector of agent {}", ctx.task.robot.0),
            })?;
        let distances: BTreeMap<String, f64> = ctx
            .task
            .object_goals
            .iter()
            .map(|(idx, goal)| (idx.to_string(), geometry::distance(&ee, goal)))
            .collect();
        Ok(distances.into())
    }
}

// ---------------------------------------------------------------------------
// ObjAtGoal
// ---------------------------------------------------------------------------

/// Per-object boolean (0.0 / 1.0): the object sits within `succ_thresh` of
/// its goal.
#[derive(Debug)]
pub struct ObjAtGoal {
    succ_thresh: f64,
}

impl ObjAtGoal {
    pub fn new(config: &PlaceConfig) -> Self {
        Self {
            succ_thresh: config.succ_thresh,
        }
    }
}

impl Measure for ObjAtGoal {
    fn name(&self) -> &'static str {
        OBJ_AT_GOAL
    }

    fn dependencies(&self) -> &[&'static str] {
        &[OBJECT_TO_GOAL_DISTANCE]
    }

    fn update(
        &mut self,
        _ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let distances = deps
            .value(OBJECT_TO_GOAL_DISTANCE)?
            .as_map()
            .ok_or_else(|| MeasureError::WrongType {
                measure: OBJ_AT_GOAL.to_string(),
                dependency: OBJECT_TO_GOAL_DISTANCE.to_string(),
                expected: "map",
            })?;
        let at_goal: BTreeMap<String, f64> = distances
            .iter()
            .map(|(k, d)| (k.clone(), if *d < self.succ_thresh { 1.0 } else { 0.0 }))
            .collect();
        Ok(at_goal.into())
    }
}

// ---------------------------------------------------------------------------
// EndEffectorToRestDistance
// ---------------------------------------------------------------------------

/// Distance from the end effector to its resting position.
#[derive(Debug, Default)]
pub struct EndEffectorToRestDistance;

impl Measure for EndEffectorToRestDistance {
    fn name(&self) -> &'static str {
        EE_TO_REST_DISTANCE
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let ee = ctx
            .sim
            .end_effector_pos(ctx.task.robot)
            .ok_or_else(|| MeasureError::PoseUnavailable {
                measure: EE_TO_REST_DISTANCE.to_string(),
                entity: format!("end effector of agent {}", ctx.task.robot.0),
            })?;
        Ok(geometry::distance(&ee, &ctx.task.ee_rest_pos).into())
    }
}

// ---------------------------------------------------------------------------
// PlacementStability
// ---------------------------------------------------------------------------

/// Whether the picked object has rested at its goal, unheld, for
/// `stability_steps` consecutive steps before the current qualifying step.
/// The counter resets to zero the instant the condition breaks.
#[derive(Debug)]
pub struct PlacementStability {
    stability_steps: usize,
    consecutive: usize,
}

impl PlacementStability {
    pub fn new(config: &PlaceConfig) -> Self {
        Self {
            stability_steps: config.stability_steps,
            consecutive: 0,
        }
    }
}

impl Measure for PlacementStability {
    fn name(&self) -> &'static str {
        PLACEMENT_STABILITY
    }

    fn dependencies(&self) -> &[&'static str] {
        &[OBJ_AT_GOAL]
    }

    fn reset(&mut self, _ctx: &StepContext<'_>) {
        self.consecutive = 0;
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let at_goal = deps.map_entry(OBJ_AT_GOAL, ctx.task.picked_object_idx)? > 0.5;
        let holding = ctx.sim.is_attached(ctx.task.robot);

        let qualifies = at_goal && !holding;
        let stable = qualifies && self.consecutive >= self.stability_steps;
        if qualifies {
            self.consecutive += 1;
        } else {
            self.consecutive = 0;
        }
        Ok(stable.into())
    }
}

// ---------------------------------------------------------------------------
// PlaceSuccess
// ---------------------------------------------------------------------------

/// Place success: the object was released at its goal, the arm is back near
/// its resting position, and (when configured) the placement has been stable.
#[derive(Debug)]
pub struct PlaceSuccess {
    ee_resting_success_threshold: f64,
    check_stability: bool,
    deps: Vec<&'static str>,
}

impl PlaceSuccess {
    pub fn new(config: &PlaceConfig) -> Self {
        let mut deps = vec![OBJ_AT_GOAL, EE_TO_REST_DISTANCE];
        if config.check_stability {
            deps.push(PLACEMENT_STABILITY);
        }
        Self {
            ee_resting_success_threshold: config.ee_resting_success_threshold,
            check_stability: config.check_stability,
            deps,
        }
    }
}

impl Measure for PlaceSuccess {
    fn name(&self) -> &'static str {
        PLACE_SUCCESS
    }

    fn dependencies(&self) -> &[&'static str] {
        &self.deps
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let at_goal = deps.map_entry(OBJ_AT_GOAL, ctx.task.picked_object_idx)? > 0.5;
        let ee_to_rest = deps.scalar(EE_TO_REST_DISTANCE)?;
        let holding = ctx.sim.is_attached(ctx.task.robot);
        let stable = if self.check_stability {
            deps.boolean(PLACEMENT_STABILITY)?
        } else {
            true
        };

        let success = !holding
            && at_goal
            && ee_to_rest < self.ee_resting_success_threshold
            && stable;
        Ok(success.into())
    }
}
