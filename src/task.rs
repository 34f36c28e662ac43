//! Episode lifecycle and the task facade tying measures and skills together.

use std::cell::Cell;
use std::collections::BTreeMap;

use anyhow::{ensure, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{TaskConfig, TaskKind};
use crate::geometry::Vec3;
use crate::measures::nav::{
    DistToGoal, DoesWantTerminate, NavToObjSuccess, NavToPosSuccess, RotDistToGoal,
    NAV_TO_OBJ_SUCCESS,
};
use crate::measures::place::{
    EndEffectorToGoalDistance, EndEffectorToRestDistance, ObjAtGoal, ObjectToGoalDistance,
    PlaceSuccess, PlacementStability, PLACE_SUCCESS,
};
use crate::measures::social::{SocialNavSeekSuccess, SocialNavStats, NAV_SEEK_SUCCESS};
use crate::measures::{MeasureRegistry, MeasureValue, StepContext};
use crate::reward::{
    NavToObjReward, PlaceReward, SocialNavReward, NAV_TO_OBJ_REWARD, PLACE_REWARD,
    SOCIAL_NAV_REWARD,
};
use crate::sim::{AgentId, Command, ObjectId, Simulator};
use crate::skills::{NavSkill, PickSkill, SkillIntent};

// ---------------------------------------------------------------------------
// Episode
// ---------------------------------------------------------------------------

/// Identity of one episode. A change of `id` across `reset` calls triggers a
/// full reset of measures, skills, and task state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Episode {
    pub id: String,
    pub started_at: DateTime<Utc>,
    /// Step budget; reaching it ends the episode.
    pub max_steps: usize,
}

impl Episode {
    pub fn new(max_steps: usize) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            max_steps,
        }
    }
}

// ---------------------------------------------------------------------------
// TaskState
// ---------------------------------------------------------------------------

/// Mutable per-episode task state read by measures through [`StepContext`].
#[derive(Debug)]
pub struct TaskState {
    /// The controlled agent.
    pub robot: AgentId,
    /// The other agent, for social tasks and moving goals.
    pub human: Option<AgentId>,
    /// Current navigation goal (refreshed every step when it tracks an
    /// agent).
    pub nav_goal: Vec3,
    /// Goal position per object index.
    pub object_goals: BTreeMap<usize, Vec3>,
    /// Index of the object the placement measures follow.
    pub picked_object_idx: usize,
    /// World-space resting position of the end effector, captured at reset.
    pub ee_rest_pos: Vec3,
    /// The agent's explicit stop signal for this step.
    pub want_terminate: bool,
    /// Steps taken this episode.
    pub step: usize,
    /// Step budget, mirrored from the episode.
    pub max_steps: usize,
    /// Set by measures (success with stop called, wrong drop) to request the
    /// episode's end. A `Cell` because measures only hold a shared reference
    /// to the state.
    pub should_end: Cell<bool>,
}

impl Default for TaskState {
    fn default() -> Self {
        Self {
            robot: AgentId(0),
            human: None,
            nav_goal: Vec3::zeros(),
            object_goals: BTreeMap::new(),
            picked_object_idx: 0,
            ee_rest_pos: Vec3::zeros(),
            want_terminate: false,
            step: 0,
            max_steps: 1500,
            should_end: Cell::new(false),
        }
    }
}

// ---------------------------------------------------------------------------
// RearrangeTask
// ---------------------------------------------------------------------------

/// Everything one synchronous step produced.
#[derive(Debug)]
pub struct StepOutcome {
    pub metrics: BTreeMap<String, MeasureValue>,
    pub reward: f64,
    pub success: bool,
    /// Episode should end: success-with-stop, wrong drop, or exhausted step
    /// budget.
    pub should_end: bool,
    /// The command handed to the backend this step.
    pub command: Command,
}

/// Owns the measure registry, the skills, and the task state for one task
/// instance, and drives them through the episode lifecycle.
pub struct RearrangeTask {
    config: TaskConfig,
    registry: MeasureRegistry,
    pick: PickSkill,
    nav: NavSkill,
    state: TaskState,
    episode: Option<Episode>,
    reward_name: &'static str,
    success_name: &'static str,
    last_reward: f64,
    last_success: bool,
}

impl RearrangeTask {
    /// Wire up the measures and skills for the configured task kind.
    pub fn new(config: TaskConfig) -> Result<Self> {
        let mut registry = MeasureRegistry::new();
        let (reward_name, success_name) = match config.kind {
            TaskKind::NavToObj => {
                registry.register(Box::new(DistToGoal))?;
                registry.register(Box::new(RotDistToGoal))?;
                registry.register(Box::new(NavToPosSuccess::new(&config.nav_success)))?;
                registry.register(Box::new(DoesWantTerminate))?;
                registry.register(Box::new(NavToObjSuccess::new(&config.nav_success)))?;
                registry.register(Box::new(NavToObjReward::new(&config.nav_reward)))?;
                (NAV_TO_OBJ_REWARD, NAV_TO_OBJ_SUCCESS)
            }
            TaskKind::SocialNav => {
                registry.register(Box::new(DistToGoal))?;
                registry.register(Box::new(RotDistToGoal))?;
                registry.register(Box::new(SocialNavStats::new(&config.social_stats)))?;
                registry.register(Box::new(SocialNavSeekSuccess::new(&config.seek_success)))?;
                registry.register(Box::new(SocialNavReward::new(&config.social_reward)))?;
                (SOCIAL_NAV_REWARD, NAV_SEEK_SUCCESS)
            }
            TaskKind::Place => {
                registry.register(Box::new(ObjectToGoalDistance))?;
                registry.register(Box::new(EndEffectorToGoalDistance))?;
                registry.register(Box::new(ObjAtGoal::new(&config.place)))?;
                registry.register(Box::new(EndEffectorToRestDistance))?;
                registry.register(Box::new(PlacementStability::new(&config.place)))?;
                registry.register(Box::new(PlaceSuccess::new(&config.place)))?;
                registry.register(Box::new(PlaceReward::new(&config.place)))?;
                (PLACE_REWARD, PLACE_SUCCESS)
            }
        };

        let mut state = TaskState::default();
        state.robot = AgentId(config.robot_agent_idx);
        state.human = match config.kind {
            TaskKind::SocialNav => Some(AgentId(config.human_agent_idx)),
            _ if config.goal_is_human => Some(AgentId(config.human_agent_idx)),
            _ => None,
        };
        state.max_steps = config.max_steps;

        Ok(Self {
            pick: PickSkill::new(&config.pick_skill),
            nav: NavSkill::new(&config.nav_skill),
            config,
            registry,
            state,
            episode: None,
            reward_name,
            success_name,
            last_reward: 0.0,
            last_success: false,
        })
    }

    pub fn state(&self) -> &TaskState {
        &self.state
    }

    /// Goals and agent assignments are scene data owned by the caller.
    pub fn state_mut(&mut self) -> &mut TaskState {
        &mut self.state
    }

    pub fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// The agent's explicit stop signal, forwarded to the terminate measure
    /// on the next step.
    pub fn set_want_terminate(&mut self, want: bool) {
        self.state.want_terminate = want;
    }

    /// Reward computed by the most recent step.
    pub fn reward(&self) -> f64 {
        self.last_reward
    }

    /// Success computed by the most recent step.
    pub fn success(&self) -> bool {
        self.last_success
    }

    /// Whether a skill reported completion on the most recent step.
    pub fn skill_done(&self) -> bool {
        self.pick.just_finished() || self.nav.just_finished()
    }

    /// Begin (or continue) an episode. A repeated reset with the same episode
    /// id is a no-op; a new id resets measures, skills, and per-episode
    /// state, releases anything held, and for place tasks snaps the target
    /// object into the gripper, capturing its orientation for the eventual
    /// release.
    pub fn reset(&mut self, episode: Episode, sim: &mut dyn Simulator) {
        if self
            .episode
            .as_ref()
            .is_some_and(|current| current.id == episode.id)
        {
            return;
        }
        tracing::info!(
            episode = %episode.id,
            kind = ?self.config.kind,
            max_steps = episode.max_steps,
            "episode reset"
        );

        self.state.step = 0;
        self.state.want_terminate = false;
        self.state.should_end.set(false);
        self.state.max_steps = episode.max_steps;
        self.pick.reset();
        self.nav.reset();
        self.last_reward = 0.0;
        self.last_success = false;

        // Anything held from a previous episode is force-released.
        sim.detach(self.state.robot, true);

        if let Some(ee) = sim.end_effector_pos(self.state.robot) {
            self.state.ee_rest_pos = ee;
        }

        if self.config.kind == TaskKind::Place {
            // Place episodes start with the object in the gripper.
            let object = ObjectId(self.state.picked_object_idx);
            if let Some(pose) = sim.object_pose(object) {
                self.pick.set_grasp_rotation(pose.rotation);
            }
            sim.attach(self.state.robot, object);
        }

        self.refresh_goal(&*sim);
        let ctx = StepContext {
            sim: &*sim,
            task: &self.state,
        };
        self.registry.reset_all(&ctx);
        self.episode = Some(episode);
    }

    /// Evaluate every registered measure for the current step.
    pub fn compute_metrics(
        &mut self,
        sim: &dyn Simulator,
    ) -> Result<BTreeMap<String, MeasureValue>> {
        let ctx = StepContext {
            sim,
            task: &self.state,
        };
        self.registry
            .compute_all(&ctx)
            .context("metric evaluation failed")
    }

    /// Run one synchronous step: refresh moving goals, evaluate metrics,
    /// derive reward and success, advance the skill selected by the intent,
    /// and hand its command to the backend.
    pub fn step(
        &mut self,
        sim: &mut dyn Simulator,
        intent: Option<&SkillIntent>,
    ) -> Result<StepOutcome> {
        ensure!(self.episode.is_some(), "step called before reset");

        self.state.step += 1;
        self.refresh_goal(&*sim);
        self.registry.begin_step();

        let metrics = self.compute_metrics(&*sim)?;
        let reward = metrics
            .get(self.reward_name)
            .and_then(MeasureValue::as_scalar)
            .unwrap_or(0.0);
        let success = metrics
            .get(self.success_name)
            .and_then(MeasureValue::as_bool)
            .unwrap_or(false);
        self.last_reward = reward;
        self.last_success = success;

        let robot = self.state.robot;
        let command = match intent {
            Some(i @ (SkillIntent::Pick { .. } | SkillIntent::Place { .. })) => {
                self.pick.step(sim, robot, Some(i))
            }
            Some(i @ (SkillIntent::NavigateTo { .. } | SkillIntent::FollowAgent { .. })) => {
                self.nav.step(&*sim, robot, Some(i))
            }
            // No intent still steps the hand so an in-flight reach retracts
            // cleanly.
            None => self.pick.step(sim, robot, None),
        };
        sim.apply_command(robot, &command);

        let should_end = self.state.should_end.get() || self.state.step >= self.state.max_steps;
        tracing::debug!(
            step = self.state.step,
            reward,
            success,
            should_end,
            "task step"
        );
        Ok(StepOutcome {
            metrics,
            reward,
            success,
            should_end,
            command,
        })
    }

    /// Re-aim the navigation goal at the tracked agent's current position.
    fn refresh_goal(&mut self, sim: &dyn Simulator) {
        if !self.config.goal_is_human && self.config.kind != TaskKind::SocialNav {
            return;
        }
        if let Some(pose) = self.state.human.and_then(|h| sim.agent_pose(h)) {
            self.state.nav_goal = pose.position;
        }
    }
}
