//! Reward measures: per-step scalars composed from metric deltas and
//! one-time stage-transition bonuses/penalties.
//!
//! Rewards are ordinary measures registered alongside the metrics they read,
//! so they share the same per-step memoization and dependency checking. All
//! delta-based shaping goes through [`DeltaTracker`]: the first sample of an
//! episode (or after a stage change) contributes zero instead of an
//! initial-gap spike, and deltas are rounded to three decimals before
//! scaling.

use crate::config::{DropPenaltyKind, NavRewardConfig, PlaceConfig, SocialNavRewardConfig};
use crate::geometry;
use crate::measures::nav::{DIST_TO_GOAL, NAV_TO_OBJ_SUCCESS, ROT_DIST_TO_GOAL};
use crate::measures::place::{
    EE_TO_GOAL_DISTANCE, EE_TO_REST_DISTANCE, OBJECT_TO_GOAL_DISTANCE, OBJ_AT_GOAL,
};
use crate::measures::{Measure, MeasureDeps, MeasureError, MeasureValue, StepContext};

pub const NAV_TO_OBJ_REWARD: &str = "nav_to_obj_reward";
pub const SOCIAL_NAV_REWARD: &str = "social_nav_reward";
pub const PLACE_REWARD: &str = "place_reward";

// ---------------------------------------------------------------------------
// DeltaTracker
// ---------------------------------------------------------------------------

/// Previous-value state for delta-based shaping.
///
/// `progress` returns `round3(previous - current)` and records `current` as
/// the new previous value. With no previous value (start of an episode, or
/// after `invalidate` at a stage change) the delta is defined to be zero.
#[derive(Debug, Default, Clone)]
pub struct DeltaTracker {
    prev: Option<f64>,
}

impl DeltaTracker {
    /// How much the tracked quantity shrank since the last sample.
    pub fn progress(&mut self, current: f64) -> f64 {
        let delta = match self.prev {
            Some(prev) => geometry::round3(prev - current),
            None => 0.0,
        };
        self.prev = Some(current);
        delta
    }

    /// Drop the previous value; the next `progress` call yields zero.
    pub fn invalidate(&mut self) {
        self.prev = None;
    }

    /// Whether a previous sample exists.
    pub fn primed(&self) -> bool {
        self.prev.is_some()
    }
}

// ---------------------------------------------------------------------------
// NavToObjReward
// ---------------------------------------------------------------------------

/// Dense navigation reward: scaled distance progress, plus scaled
/// heading-error progress once the agent is close enough that turning toward
/// the target matters.
pub struct NavToObjReward {
    config: NavRewardConfig,
    dist: DeltaTracker,
    angle: DeltaTracker,
}

impl NavToObjReward {
    pub fn new(config: &NavRewardConfig) -> Self {
        Self {
            config: config.clone(),
            dist: DeltaTracker::default(),
            angle: DeltaTracker::default(),
        }
    }
}

impl Measure for NavToObjReward {
    fn name(&self) -> &'static str {
        NAV_TO_OBJ_REWARD
    }

    fn dependencies(&self) -> &[&'static str] {
        &[NAV_TO_OBJ_SUCCESS, DIST_TO_GOAL, ROT_DIST_TO_GOAL]
    }

    fn reset(&mut self, _ctx: &StepContext<'_>) {
        self.dist.invalidate();
        self.angle.invalidate();
    }

    fn update(
        &mut self,
        _ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let cur_dist = deps.scalar(DIST_TO_GOAL)?;
        let mut reward = self.config.dist_reward * self.dist.progress(cur_dist);

        // The angle tracker is only sampled inside the turn zone, so leaving
        // and re-entering it does not produce a stale-angle spike.
        if self.config.should_reward_turn && cur_dist < self.config.turn_reward_dist {
            let angle_dist = deps.scalar(ROT_DIST_TO_GOAL)?;
            reward += self.config.angle_dist_reward * self.angle.progress(angle_dist);
        }
        Ok(reward.into())
    }
}

// ---------------------------------------------------------------------------
// SocialNavReward
// ---------------------------------------------------------------------------

/// Three-band distance shaping around the human plus a facing bonus.
///
/// Inside `[safe_dis_min, safe_dis_max)` the reward is a flat bonus; closer
/// than the band, moving away is rewarded; farther, closing in is rewarded.
/// The first step of an episode always yields zero.
pub struct SocialNavReward {
    config: SocialNavRewardConfig,
    dist: DeltaTracker,
}

impl SocialNavReward {
    pub fn new(config: &SocialNavRewardConfig) -> Self {
        Self {
            config: config.clone(),
            dist: DeltaTracker::default(),
        }
    }
}

impl Measure for SocialNavReward {
    fn name(&self) -> &'static str {
        SOCIAL_NAV_REWARD
    }

    fn reset(&mut self, _ctx: &StepContext<'_>) {
        self.dist.invalidate();
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let robot = ctx
            .sim
            .agent_pose(ctx.task.robot)
            .ok_or_else(|| MeasureError::PoseUnavailable {
                measure: SOCIAL_NAV_REWARD.to_string(),
                entity: format!("agent {}", ctx.task.robot.0),
            })?;
        let human = ctx
            .task
            .human
            .ok_or_else(|| MeasureError::PoseUnavailable {
                measure: SOCIAL_NAV_REWARD.to_string(),
                entity: "human agent (none configured)".to_string(),
            })?;
        let human_pos = ctx
            .sim
            .agent_pose(human)
            .ok_or_else(|| MeasureError::PoseUnavailable {
                measure: SOCIAL_NAV_REWARD.to_string(),
                entity: format!("agent {}", human.0),
            })?
            .position;

        let dis = if self.config.use_geo_distance {
            ctx.sim
                .geodesic_distance(&robot.position, &human_pos)
                .unwrap_or_else(|| geometry::distance(&robot.position, &human_pos))
        } else {
            geometry::distance(&robot.position, &human_pos)
        };

        let first_step = !self.dist.primed();
        let progress = self.dist.progress(dis);

        let mut reward = if dis >= self.config.safe_dis_min && dis < self.config.safe_dis_max {
            self.config.safe_dis_reward
        } else if dis < self.config.safe_dis_min {
            // Too close: reward is the (negative-when-approaching) change.
            -progress
        } else {
            progress
        };

        if dis < self.config.facing_human_dis && self.config.facing_human_reward != -1.0 {
            if let Some(dir) = geometry::direction(&robot.position, &human_pos) {
                reward += self.config.facing_human_reward * robot.forward().dot(&dir);
            }
        }

        if first_step {
            reward = 0.0;
        }
        Ok(reward.into())
    }
}

// ---------------------------------------------------------------------------
// PlaceReward
// ---------------------------------------------------------------------------

/// Two-stage placement reward.
///
/// While the object is held or away from its goal, shaping follows the
/// object-to-goal (or end-effector-to-goal) distance; after a correct
/// release, shaping switches to returning the arm to rest. The release itself
/// is a one-time transition: a bonus when the object lands at the goal, a
/// penalty otherwise, guarded by a handled-this-drop flag that is re-armed
/// only when the agent holds an object again.
pub struct PlaceReward {
    config: PlaceConfig,
    dist: DeltaTracker,
    prev_dropped: bool,
    curr_step: usize,
    deps: Vec<&'static str>,
}

impl PlaceReward {
    pub fn new(config: &PlaceConfig) -> Self {
        let mut deps = vec![OBJ_AT_GOAL, EE_TO_REST_DISTANCE];
        if !config.sparse_reward {
            deps.push(if config.use_ee_dist {
                EE_TO_GOAL_DISTANCE
            } else {
                OBJECT_TO_GOAL_DISTANCE
            });
        }
        Self {
            config: config.clone(),
            dist: DeltaTracker::default(),
            prev_dropped: false,
            curr_step: 0,
            deps,
        }
    }
}

impl Measure for PlaceReward {
    fn name(&self) -> &'static str {
        PLACE_REWARD
    }

    fn dependencies(&self) -> &[&'static str] {
        &self.deps
    }

    fn reset(&mut self, ctx: &StepContext<'_>) {
        self.dist.invalidate();
        self.prev_dropped = !ctx.sim.is_attached(ctx.task.robot);
        self.curr_step = 0;
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let mut reward = 0.0;
        let picked = ctx.task.picked_object_idx;
        let ee_to_rest = deps.scalar(EE_TO_REST_DISTANCE)?;
        let obj_at_goal = deps.map_entry(OBJ_AT_GOAL, picked)? > 0.5;
        let cur_picked = ctx.sim.is_attached(ctx.task.robot);

        if cur_picked {
            // Holding again: the next release is a fresh transition.
            self.prev_dropped = false;
        }

        let (dist_to_goal, min_dist) = if !obj_at_goal || cur_picked {
            // First stage: bring the object (or the hand) to the goal.
            let d = if self.config.sparse_reward {
                0.0
            } else if self.config.use_ee_dist {
                deps.map_entry(EE_TO_GOAL_DISTANCE, picked)?
            } else {
                deps.map_entry(OBJECT_TO_GOAL_DISTANCE, picked)?
            };
            (d, self.config.min_dist_to_goal)
        } else {
            // Second stage: object released at the goal, return the arm to
            // rest.
            (ee_to_rest, self.config.ee_resting_success_threshold)
        };

        if !self.prev_dropped && !cur_picked {
            self.prev_dropped = true;
            if obj_at_goal {
                reward += self.config.place_reward;
                // The stage just changed, so the tracked distance is stale.
                self.dist.invalidate();
            } else {
                let mut drop_pen = self.config.drop_pen;
                match self.config.drop_pen_type {
                    DropPenaltyKind::Constant => {}
                    DropPenaltyKind::PenalizeRemainingDist => drop_pen *= dist_to_goal,
                    DropPenaltyKind::PenalizeRemainingTime => {
                        let budget = ctx.task.max_steps as f64;
                        drop_pen *= (budget - self.curr_step as f64) / budget;
                    }
                }
                reward -= drop_pen;
                if self.config.wrong_drop_should_end {
                    tracing::debug!(
                        step = self.curr_step,
                        "object dropped away from its goal, ending episode"
                    );
                    ctx.task.should_end.set(true);
                    return Ok(reward.into());
                }
            }
        }

        // The tracker is sampled every step so the previous distance stays
        // fresh even while shaping is suppressed under `min_dist`.
        let progress = self.dist.progress(dist_to_goal);
        if dist_to_goal >= min_dist {
            if self.config.use_diff {
                reward += self.config.dist_reward * progress;
            } else {
                reward -= self.config.dist_reward * dist_to_goal;
            }
        }
        self.curr_step += 1;

        Ok(reward.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{NavSuccessConfig, TaskConfig};
    use crate::geometry::Vec3;
    use crate::measures::nav::{DistToGoal, DoesWantTerminate, NavToObjSuccess, NavToPosSuccess, RotDistToGoal};
    use crate::measures::place::{
        EndEffectorToRestDistance, ObjAtGoal, ObjectToGoalDistance,
    };
    use crate::measures::MeasureRegistry;
    use crate::sim::{AgentId, AgentPose, MockSimulator, ObjectId, Pose, Simulator};
    use crate::task::TaskState;

    fn reward_of(reg: &mut MeasureRegistry, name: &str, sim: &MockSimulator, task: &TaskState) -> f64 {
        reg.begin_step();
        let ctx = StepContext { sim, task };
        reg.get(name, &ctx).unwrap().as_scalar().unwrap()
    }

    // -- nav ---------------------------------------------------------------

    fn nav_scene() -> (MockSimulator, TaskState, AgentId, MeasureRegistry) {
        let mut sim = MockSimulator::new();
        let robot = sim.add_agent(AgentPose::from_position(Vec3::new(0.0, 0.0, 0.0)));
        let mut task = TaskState::default();
        task.robot = robot;
        task.nav_goal = Vec3::new(5.0, 0.0, 0.0);

        let nav_success = NavSuccessConfig {
            success_distance: 1.5,
            success_angle_dist: 0.261799,
            must_look_at_targ: true,
            must_call_stop: true,
        };
        let mut reg = MeasureRegistry::new();
        reg.register(Box::new(DistToGoal)).unwrap();
        reg.register(Box::new(RotDistToGoal)).unwrap();
        reg.register(Box::new(NavToPosSuccess::new(&nav_success))).unwrap();
        reg.register(Box::new(DoesWantTerminate)).unwrap();
        reg.register(Box::new(NavToObjSuccess::new(&nav_success))).unwrap();
        reg.register(Box::new(NavToObjReward::new(&TaskConfig::default().nav_reward)))
            .unwrap();
        (sim, task, robot, reg)
    }

    #[test]
    fn test_nav_reward_first_step_is_zero() {
        let (sim, task, _, mut reg) = nav_scene();
        let reward = reward_of(&mut reg, NAV_TO_OBJ_REWARD, &sim, &task);
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn test_nav_reward_scales_distance_progress() {
        let (mut sim, task, robot, mut reg) = nav_scene();
        reward_of(&mut reg, NAV_TO_OBJ_REWARD, &sim, &task);

        // 0.5 closer to the goal, still outside the 3.0 turn zone.
        sim.set_agent_pose(robot, AgentPose::from_position(Vec3::new(0.5, 0.0, 0.0)));
        let reward = reward_of(&mut reg, NAV_TO_OBJ_REWARD, &sim, &task);
        assert!((reward - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_nav_reward_turn_shaping_enters_late() {
        let (mut sim, task, robot, mut reg) = nav_scene();
        reward_of(&mut reg, NAV_TO_OBJ_REWARD, &sim, &task);

        // First step inside the turn zone: angle tracker is unprimed, so only
        // the distance delta counts.
        sim.set_agent_pose(robot, AgentPose::from_position(Vec3::new(2.5, 0.0, 0.0)));
        let reward = reward_of(&mut reg, NAV_TO_OBJ_REWARD, &sim, &task);
        assert!((reward - 2.5).abs() < 1e-9);
    }

    // -- social ------------------------------------------------------------

    fn social_scene(facing_human_reward: f64) -> (MockSimulator, TaskState, MeasureRegistry) {
        let mut sim = MockSimulator::new();
        let robot = sim.add_agent(AgentPose::from_position(Vec3::zeros()));
        let human = sim.add_agent(AgentPose::from_position(Vec3::new(1.5, 0.0, 0.0)));
        let mut task = TaskState::default();
        task.robot = robot;
        task.human = Some(human);

        let config = SocialNavRewardConfig {
            safe_dis_min: 1.0,
            safe_dis_max: 2.0,
            safe_dis_reward: 2.0,
            facing_human_dis: 3.0,
            facing_human_reward,
            use_geo_distance: true,
        };
        let mut reg = MeasureRegistry::new();
        reg.register(Box::new(SocialNavReward::new(&config))).unwrap();
        (sim, task, reg)
    }

    #[test]
    fn test_social_reward_first_step_is_zero() {
        let (sim, task, mut reg) = social_scene(0.01);
        assert_eq!(reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task), 0.0);
    }

    #[test]
    fn test_social_reward_bands() {
        let (mut sim, task, mut reg) = social_scene(-1.0);
        let human = task.human.unwrap();
        reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task);

        // In the safe band: flat bonus.
        let reward = reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task);
        assert_eq!(reward, 2.0);

        // Human walks away to 4.5: too far, prev - cur = 1.5 - 4.5 = -3.0.
        sim.set_agent_pose(human, AgentPose::from_position(Vec3::new(4.5, 0.0, 0.0)));
        let reward = reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task);
        assert!((reward - (-3.0)).abs() < 1e-9);

        // Human steps in to 0.5: too close, cur - prev = 0.5 - 4.5 = -4.0.
        sim.set_agent_pose(human, AgentPose::from_position(Vec3::new(0.5, 0.0, 0.0)));
        let reward = reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task);
        assert!((reward - (-4.0)).abs() < 1e-9);
    }

    #[test]
    fn test_social_facing_bonus() {
        let (sim, task, mut reg) = social_scene(0.01);
        reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task);
        // Robot faces +x, human at +x, in the safe band: flat bonus plus the
        // full facing dot product.
        let reward = reward_of(&mut reg, SOCIAL_NAV_REWARD, &sim, &task);
        assert!((reward - 2.01).abs() < 1e-9);
    }

    // -- place -------------------------------------------------------------

    fn place_scene(config: &PlaceConfig) -> (MockSimulator, TaskState, ObjectId, MeasureRegistry) {
        let mut sim = MockSimulator::new();
        let robot = sim.add_agent(AgentPose::from_position(Vec3::zeros()));
        let object = sim.add_object(Vec3::new(0.2, 0.2, 0.0));
        let mut task = TaskState::default();
        task.robot = robot;
        task.picked_object_idx = object.0;
        task.object_goals.insert(object.0, Vec3::new(1.0, 0.0, 0.0));
        task.ee_rest_pos = Vec3::new(0.2, 0.2, 0.0);
        task.max_steps = 300;
        sim.attach(robot, object);

        let mut reg = MeasureRegistry::new();
        reg.register(Box::new(ObjectToGoalDistance)).unwrap();
        reg.register(Box::new(ObjAtGoal::new(config))).unwrap();
        reg.register(Box::new(EndEffectorToRestDistance)).unwrap();
        reg.register(Box::new(PlaceReward::new(config))).unwrap();
        (sim, task, object, reg)
    }

    fn default_place() -> PlaceConfig {
        TaskConfig::default().place
    }

    #[test]
    fn test_place_reward_bonus_fires_once() {
        let config = default_place();
        let (mut sim, task, object, mut reg) = place_scene(&config);
        let goal = task.object_goals[&object.0];

        reward_of(&mut reg, PLACE_REWARD, &sim, &task);

        // Release the object exactly at its goal.
        sim.detach(task.robot, true);
        sim.set_object_pose(object, Pose::from_position(goal));
        let reward = reward_of(&mut reg, PLACE_REWARD, &sim, &task);
        assert!((reward - config.place_reward).abs() < 1e-9);

        // No second bonus on the next step.
        let reward = reward_of(&mut reg, PLACE_REWARD, &sim, &task);
        assert_eq!(reward, 0.0);
    }

    #[test]
    fn test_place_reward_wrong_drop_penalty() {
        let mut config = default_place();
        config.drop_pen_type = DropPenaltyKind::PenalizeRemainingDist;
        let (mut sim, task, object, mut reg) = place_scene(&config);

        reward_of(&mut reg, PLACE_REWARD, &sim, &task);

        // Drop 1.0 away from the goal: penalty scales with the remaining
        // distance.
        sim.detach(task.robot, true);
        sim.set_object_pose(object, Pose::from_position(Vec3::new(2.0, 0.0, 0.0)));
        let reward = reward_of(&mut reg, PLACE_REWARD, &sim, &task);
        // obj-to-goal = 1.0; delta shaping also contributes this step.
        let expected_pen = -config.drop_pen * 1.0;
        assert!(reward <= expected_pen + 1e-9);
    }

    #[test]
    fn test_place_reward_wrong_drop_can_end_episode() {
        let mut config = default_place();
        config.wrong_drop_should_end = true;
        let (mut sim, task, object, mut reg) = place_scene(&config);

        reward_of(&mut reg, PLACE_REWARD, &sim, &task);
        sim.detach(task.robot, true);
        sim.set_object_pose(object, Pose::from_position(Vec3::new(5.0, 0.0, 0.0)));
        let reward = reward_of(&mut reg, PLACE_REWARD, &sim, &task);
        assert!((reward - (-config.drop_pen)).abs() < 1e-9);
        assert!(task.should_end.get());
    }

    #[test]
    fn test_place_reward_shapes_distance_progress() {
        let config = default_place();
        let (mut sim, task, object, mut reg) = place_scene(&config);

        reward_of(&mut reg, PLACE_REWARD, &sim, &task);

        // Carry the object closer to the goal (attached objects ride the end
        // effector, which sits at the resting offset from the base).
        sim.set_agent_pose(
            task.robot,
            AgentPose::from_position(Vec3::new(0.4, 0.0, 0.0)),
        );
        let goal = task.object_goals[&object.0];
        let before = (Vec3::new(0.2, 0.2, 0.0) - goal).norm();
        let after = (Vec3::new(0.6, 0.2, 0.0) - goal).norm();
        let expected = config.dist_reward * geometry::round3(before - after);
        let reward = reward_of(&mut reg, PLACE_REWARD, &sim, &task);
        assert!((reward - expected).abs() < 1e-9);
    }
}
