//! Social-proximity measures: episode-long encounter statistics and the
//! seek-and-follow success criterion.

use std::collections::BTreeMap;

use crate::config::{SeekSuccessConfig, SocialNavStatsConfig};
use crate::geometry::{self, Vec3};
use crate::measures::nav::{DIST_TO_GOAL, ROT_DIST_TO_GOAL};
use crate::measures::{Measure, MeasureDeps, MeasureError, MeasureValue, StepContext};
use crate::sim::{AgentId, AgentPose, Simulator};

pub const SOCIAL_NAV_STATS: &str = "social_nav_stats";
pub const NAV_SEEK_SUCCESS: &str = "nav_seek_success";

/// Geodesic distance when the backend can provide one, straight-line
/// otherwise.
fn geo_or_euclid(sim: &dyn Simulator, a: &Vec3, b: &Vec3) -> f64 {
    sim.geodesic_distance(a, b)
        .unwrap_or_else(|| geometry::distance(a, b))
}

/// Whether the robot's forward axis points at the human within the given
/// dot-product threshold. Coincident positions read as not facing.
fn facing_human(robot: &AgentPose, human_pos: &Vec3, threshold: f64) -> bool {
    match geometry::direction(&robot.position, human_pos) {
        Some(dir) => robot.forward().dot(&dir) > threshold,
        None => false,
    }
}

fn agent_pose_or_err(
    sim: &dyn Simulator,
    agent: AgentId,
    measure: &'static str,
) -> Result<AgentPose, MeasureError> {
    sim.agent_pose(agent)
        .ok_or_else(|| MeasureError::PoseUnavailable {
            measure: measure.to_string(),
            entity: format!("agent {}", agent.0),
        })
}

fn human_agent(ctx: &StepContext<'_>, measure: &'static str) -> Result<AgentId, MeasureError> {
    ctx.task
        .human
        .ok_or_else(|| MeasureError::PoseUnavailable {
            measure: measure.to_string(),
            entity: "human agent (none configured)".to_string(),
        })
}

// ---------------------------------------------------------------------------
// SocialNavStats
// ---------------------------------------------------------------------------

/// Running counters tracked across a whole social navigation episode.
#[derive(Debug, Clone)]
struct SocialNavCounters {
    /// Steps observed so far (1-based after the first update).
    step: usize,
    has_found_human: bool,
    /// Step at which the encounter condition first held; latched.
    found_step: Option<usize>,
    /// Steps on which the encounter condition held.
    found_times: usize,
    /// Encounter-condition steps after the first encounter.
    after_found_times: usize,
    /// Steps elapsed since the first encounter. Starts at 1 so the
    /// after-encounter rates are well defined on the encounter step itself.
    steps_after_found: usize,
    dis_sum: f64,
    dis_after_found_sum: f64,
    backup_count: usize,
    yield_count: usize,
}

impl Default for SocialNavCounters {
    fn default() -> Self {
        Self {
            step: 0,
            has_found_human: false,
            found_step: None,
            found_times: 0,
            after_found_times: 0,
            steps_after_found: 1,
            dis_sum: 0.0,
            dis_after_found_sum: 0.0,
            backup_count: 0,
            yield_count: 0,
        }
    }
}

/// Episode-long social navigation statistics, reported as a map.
///
/// Tracks when the robot first "finds" the human (within a distance band and
/// facing it), how consistently it keeps following afterwards, how often it
/// backs up or yields while close, and how the time to first encounter
/// compares against a shortest-path lower bound computed lazily once.
///
/// Every ratio guards its denominator: an episode where the human is never
/// found, or where the lower bound is unavailable, reports the configured
/// fallback instead of dividing by zero or producing a NaN.
pub struct SocialNavStats {
    config: SocialNavStatsConfig,
    counters: SocialNavCounters,
    prev_robot: Option<AgentPose>,
    robot_init_pos: Option<Vec3>,
    /// Shortest-path step lower bound, computed at most once per episode.
    min_steps_bound: Option<f64>,
}

impl SocialNavStats {
    pub fn new(config: &SocialNavStatsConfig) -> Self {
        Self {
            config: config.clone(),
            counters: SocialNavCounters::default(),
            prev_robot: None,
            robot_init_pos: None,
            min_steps_bound: None,
        }
    }

    /// Signed planar speed of the base since the previous step, expressed in
    /// the previous step's frame: negative means net backward displacement.
    /// The first step of an episode reads as stationary.
    fn signed_speed(&self, robot: &AgentPose) -> f64 {
        let prev = self.prev_robot.unwrap_or(*robot);
        let mut local = prev
            .rotation
            .inverse_transform_vector(&(robot.position - prev.position));
        local.y = 0.0;
        local.norm() * self.config.ctrl_freq * local.x.signum()
    }
}

impl Measure for SocialNavStats {
    fn name(&self) -> &'static str {
        SOCIAL_NAV_STATS
    }

    fn reset(&mut self, ctx: &StepContext<'_>) {
        self.counters = SocialNavCounters::default();
        self.min_steps_bound = None;
        self.prev_robot = ctx.sim.agent_pose(ctx.task.robot);
        self.robot_init_pos = self.prev_robot.map(|p| p.position);
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        _deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let robot = agent_pose_or_err(ctx.sim, ctx.task.robot, SOCIAL_NAV_STATS)?;
        let human = human_agent(ctx, SOCIAL_NAV_STATS)?;
        let human_pos = agent_pose_or_err(ctx.sim, human, SOCIAL_NAV_STATS)?.position;

        let dis = geometry::distance(&robot.position, &human_pos);
        let speed = self.signed_speed(&robot);

        let c = &mut self.counters;
        c.dis_sum += dis;

        if dis <= self.config.dis_threshold_for_backup_yield && speed < 0.0 {
            c.backup_count += 1;
        } else if dis <= self.config.dis_threshold_for_backup_yield
            && speed.abs() < self.config.min_abs_vel_for_yield
        {
            c.yield_count += 1;
        }

        c.step += 1;

        let found_now = {
            let geo = geo_or_euclid(ctx.sim, &robot.position, &human_pos);
            geo >= self.config.min_dis_human
                && geo <= self.config.max_dis_human
                && facing_human(&robot, &human_pos, self.config.robot_face_human_threshold)
        };
        if found_now {
            c.has_found_human = true;
            c.found_times += 1;
        }
        if c.has_found_human {
            c.dis_after_found_sum += dis;
            c.after_found_times += usize::from(found_now);
            if c.found_step.is_none() {
                c.found_step = Some(c.step);
            }
        }

        // Lazy shortest-path lower bound from the episode's start position to
        // the human, expressed in steps.
        if self.min_steps_bound.is_none() && self.config.enable_shortest_path_computation {
            if let Some(init) = &self.robot_init_pos {
                self.min_steps_bound = ctx
                    .sim
                    .geodesic_distance(init, &human_pos)
                    .map(|d| (d / self.config.dist_move_per_step).ceil().max(1.0));
            }
        }

        let total_steps = ctx.task.max_steps as f64;
        let step = c.step as f64;
        let found_step = c.found_step.unwrap_or(ctx.task.max_steps) as f64;
        let fallback = self.config.spl_fallback;

        let first_encounter_spl = match (c.has_found_human, self.min_steps_bound) {
            (false, _) => 0.0,
            (true, Some(bound)) => bound / bound.max(found_step),
            (true, None) => fallback,
        };
        let first_encounter_steps_ratio = match self.min_steps_bound {
            Some(bound) if bound > 0.0 => found_step / bound,
            _ => fallback,
        };
        let follow_steps_ratio = match self.min_steps_bound {
            Some(bound) if total_steps > bound => c.after_found_times as f64 / (total_steps - bound),
            _ => fallback,
        };

        self.prev_robot = Some(robot);

        let after = c.steps_after_found as f64;
        let metric: BTreeMap<String, f64> = [
            ("has_found_human", if c.has_found_human { 1.0 } else { 0.0 }),
            ("has_found_human_step", found_step),
            ("found_human_rate", c.found_times as f64 / step),
            (
                "found_human_rate_after_encounter",
                c.after_found_times as f64 / after,
            ),
            ("avg_dis", c.dis_sum / step),
            ("avg_dis_after_encounter", c.dis_after_found_sum / after),
            ("first_encounter_spl", first_encounter_spl),
            ("first_encounter_steps_ratio", first_encounter_steps_ratio),
            ("follow_steps", c.after_found_times as f64),
            ("follow_steps_ratio", follow_steps_ratio),
            ("backup_ratio", c.backup_count as f64 / step),
            ("yield_ratio", c.yield_count as f64 / step),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();

        if c.has_found_human {
            c.steps_after_found += 1;
        }

        Ok(metric.into())
    }
}

// ---------------------------------------------------------------------------
// SocialNavSeekSuccess
// ---------------------------------------------------------------------------

/// Success once the robot has followed the human inside the safe distance
/// band (facing it, if required) for enough cumulative steps.
pub struct SocialNavSeekSuccess {
    config: SeekSuccessConfig,
    following_steps: usize,
}

impl SocialNavSeekSuccess {
    pub fn new(config: &SeekSuccessConfig) -> Self {
        Self {
            config: config.clone(),
            following_steps: 0,
        }
    }
}

impl Measure for SocialNavSeekSuccess {
    fn name(&self) -> &'static str {
        NAV_SEEK_SUCCESS
    }

    fn dependencies(&self) -> &[&'static str] {
        &[ROT_DIST_TO_GOAL, DIST_TO_GOAL]
    }

    fn reset(&mut self, _ctx: &StepContext<'_>) {
        self.following_steps = 0;
    }

    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError> {
        let angle_dist = deps.scalar(ROT_DIST_TO_GOAL)?;
        let robot = agent_pose_or_err(ctx.sim, ctx.task.robot, NAV_SEEK_SUCCESS)?;
        let human = human_agent(ctx, NAV_SEEK_SUCCESS)?;
        let human_pos = agent_pose_or_err(ctx.sim, human, NAV_SEEK_SUCCESS)?.position;

        let dist = if self.config.use_geo_distance {
            geo_or_euclid(ctx.sim, &robot.position, &human_pos)
        } else {
            deps.scalar(DIST_TO_GOAL)?
        };

        let facing = facing_human(&robot, &human_pos, self.config.facing_threshold);
        if dist >= self.config.safe_dis_min
            && dist < self.config.safe_dis_max
            && (!self.config.need_to_face_human || facing)
        {
            self.following_steps += 1;
        }

        let mut success = self.following_steps >= self.config.following_step_succ_threshold;
        if self.config.must_look_at_targ {
            success = success && angle_dist < self.config.success_angle_dist;
        }
        Ok(success.into())
    }
}
