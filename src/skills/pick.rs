//! Hand reach/retract state machine for picking and placing objects.
//!
//! The hand travels in a straight line from a fixed origin offset (relative
//! to the agent base) to the target, one travel-increment per step, performs
//! its effect atomically on the step the remaining distance falls under the
//! snap threshold, then runs the same interpolation in reverse back to the
//! origin.

use nalgebra::UnitQuaternion;

use crate::config::PickSkillConfig;
use crate::geometry::{self, Vec3};
use crate::sim::{AgentId, Command, ObjectId, Pose, Simulator};
use crate::skills::SkillIntent;

/// Discrete stage of the hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandStage {
    Idle,
    Approaching,
    AtTarget,
    Retracting,
}

/// Trajectory data computed once when an intent is accepted.
#[derive(Debug, Clone, Copy)]
struct ReachPlan {
    /// The accepted intent; a differing intent on a later step cancels the
    /// approach.
    intent: SkillIntent,
    /// World-space hand origin at acceptance time.
    origin: Vec3,
    /// Unit vector from origin to target (zero when they coincide).
    direction: Vec3,
    /// Straight-line origin-to-target distance.
    distance: f64,
    /// ceil(distance / travel-per-step); the progress counter never exceeds
    /// this.
    max_iters: usize,
    target: Vec3,
    object: ObjectId,
}

/// Reach/grasp/release skill.
pub struct PickSkill {
    config: PickSkillConfig,
    stage: HandStage,
    /// Progress counter along the planned line, in travel increments.
    iter: usize,
    plan: Option<ReachPlan>,
    /// Object orientation captured at grasp time, restored on release.
    grasp_rotation: Option<UnitQuaternion<f64>>,
    done: bool,
}

impl PickSkill {
    pub fn new(config: &PickSkillConfig) -> Self {
        Self {
            config: config.clone(),
            stage: HandStage::Idle,
            iter: 0,
            plan: None,
            grasp_rotation: None,
            done: false,
        }
    }

    /// Clear all episode-scoped state.
    pub fn reset(&mut self) {
        self.stage = HandStage::Idle;
        self.iter = 0;
        self.plan = None;
        self.grasp_rotation = None;
        self.done = false;
    }

    /// Whether the skill finished (returned to idle) on the step that just
    /// ran. True for exactly one step per completed reach/retract cycle.
    pub fn just_finished(&self) -> bool {
        self.done
    }

    pub fn is_idle(&self) -> bool {
        self.stage == HandStage::Idle
    }

    /// Record the orientation to restore when the held object is released.
    /// Used when an episode starts with the object already in the gripper.
    pub fn set_grasp_rotation(&mut self, rotation: UnitQuaternion<f64>) {
        self.grasp_rotation = Some(rotation);
    }

    /// Advance the machine by one step and emit the command for it.
    pub fn step(
        &mut self,
        sim: &mut dyn Simulator,
        agent: AgentId,
        intent: Option<&SkillIntent>,
    ) -> Command {
        self.done = false;
        match self.stage {
            HandStage::Idle => self.accept(sim, agent, intent),
            HandStage::Approaching => {
                if intent.copied() != self.plan.map(|p| p.intent) {
                    // Intent withdrawn or changed: abandon the approach and
                    // bring the hand home.
                    self.stage = HandStage::Retracting;
                    self.retract()
                } else {
                    self.approach(sim, agent)
                }
            }
            // The effect fired last step; the intent is consumed.
            HandStage::AtTarget => {
                self.stage = HandStage::Retracting;
                self.retract()
            }
            HandStage::Retracting => self.retract(),
        }
    }

    /// Idle: validate the intent and plan the straight-line trajectory.
    fn accept(
        &mut self,
        sim: &mut dyn Simulator,
        agent: AgentId,
        intent: Option<&SkillIntent>,
    ) -> Command {
        let Some(&intent) = intent else {
            return Command::Stop;
        };
        let (object_index, target) = match intent {
            SkillIntent::Pick { object_index } => {
                if sim.is_attached(agent) {
                    // Already holding something: no regrasp.
                    return Command::Stop;
                }
                // An index that resolves to no object is a no-op, not an
                // error.
                let Some(pose) = sim.object_pose(ObjectId(object_index)) else {
                    return Command::Stop;
                };
                (object_index, pose.position)
            }
            SkillIntent::Place {
                object_index,
                position,
            } => {
                if object_index >= sim.num_objects() {
                    return Command::Stop;
                }
                (object_index, position)
            }
            // Base-motion intents belong to the navigation skill.
            _ => return Command::Stop,
        };
        let Some(agent_pose) = sim.agent_pose(agent) else {
            return Command::Stop;
        };

        let offset = Vec3::new(
            self.config.init_offset[0],
            self.config.init_offset[1],
            self.config.init_offset[2],
        );
        let origin = agent_pose.local_to_world(&offset);
        let distance = geometry::distance(&origin, &target);
        let direction = geometry::direction(&origin, &target).unwrap_or_else(Vec3::zeros);
        let max_iters = (distance / self.config.dist_move_per_step).ceil() as usize;

        tracing::debug!(
            object = object_index,
            distance,
            max_iters,
            "hand approach planned"
        );
        self.plan = Some(ReachPlan {
            intent,
            origin,
            direction,
            distance,
            max_iters,
            target,
            object: ObjectId(object_index),
        });
        self.iter = 0;
        self.stage = HandStage::Approaching;
        self.approach(sim, agent)
    }

    fn approach(&mut self, sim: &mut dyn Simulator, agent: AgentId) -> Command {
        let Some(plan) = self.plan else {
            self.stage = HandStage::Idle;
            return Command::Stop;
        };
        let hand = self.hand_at(&plan);
        self.iter = (self.iter + 1).min(plan.max_iters);

        if geometry::distance(&hand, &plan.target) < self.config.dist_to_snap {
            self.stage = HandStage::AtTarget;
            self.perform_effect(sim, agent, &plan);
        }
        Command::Reach(hand)
    }

    fn retract(&mut self) -> Command {
        let Some(plan) = self.plan else {
            self.stage = HandStage::Idle;
            return Command::Stop;
        };
        let hand = self.hand_at(&plan);
        self.iter = self.iter.saturating_sub(1);

        if geometry::distance(&hand, &plan.origin) < self.config.dist_to_snap {
            self.stage = HandStage::Idle;
            self.iter = 0;
            self.plan = None;
            self.done = true;
            tracing::debug!("hand back at origin, reach cycle done");
        }
        Command::Reach(hand)
    }

    /// Hand position for the current progress counter, clamped to the target.
    fn hand_at(&self, plan: &ReachPlan) -> Vec3 {
        let travel = (self.iter as f64 * self.config.dist_move_per_step).min(plan.distance);
        plan.origin + plan.direction * travel
    }

    /// Grasp or release, atomically, on the arrival step.
    fn perform_effect(&mut self, sim: &mut dyn Simulator, agent: AgentId, plan: &ReachPlan) {
        match plan.intent {
            SkillIntent::Pick { .. } => {
                if !sim.is_attached(agent) {
                    if let Some(pose) = sim.object_pose(plan.object) {
                        self.grasp_rotation = Some(pose.rotation);
                    }
                    sim.attach(agent, plan.object);
                    tracing::debug!(object = plan.object.0, "object grasped");
                }
            }
            SkillIntent::Place { .. } => {
                if let Some(released) = sim.detach(agent, true) {
                    let rotation = self
                        .grasp_rotation
                        .take()
                        .unwrap_or_else(UnitQuaternion::identity);
                    sim.set_object_pose(
                        released,
                        Pose {
                            position: plan.target,
                            rotation,
                        },
                    );
                    tracing::debug!(object = released.0, "object released at target");
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{AgentPose, MockSimulator};
    use std::f64::consts::FRAC_PI_4;

    fn skill_config() -> PickSkillConfig {
        PickSkillConfig {
            init_offset: [0.2, 0.2, 0.0],
            dist_move_per_step: 0.04,
            dist_to_snap: 0.02,
        }
    }

    /// Wraps the mock to count grasp commands.
    struct CountingSim {
        inner: MockSimulator,
        attach_calls: usize,
    }

    impl CountingSim {
        fn new(inner: MockSimulator) -> Self {
            Self {
                inner,
                attach_calls: 0,
            }
        }
    }

    impl Simulator for CountingSim {
        fn agent_pose(&self, agent: AgentId) -> Option<AgentPose> {
            self.inner.agent_pose(agent)
        }
        fn object_pose(&self, object: ObjectId) -> Option<Pose> {
            self.inner.object_pose(object)
        }
        fn num_objects(&self) -> usize {
            self.inner.num_objects()
        }
        fn end_effector_pos(&self, agent: AgentId) -> Option<Vec3> {
            self.inner.end_effector_pos(agent)
        }
        fn shortest_path(&self, start: &Vec3, end: &Vec3) -> Option<Vec<Vec3>> {
            self.inner.shortest_path(start, end)
        }
        fn geodesic_distance(&self, start: &Vec3, end: &Vec3) -> Option<f64> {
            self.inner.geodesic_distance(start, end)
        }
        fn step_filter(&self, previous: &Vec3, requested: &Vec3) -> Vec3 {
            self.inner.step_filter(previous, requested)
        }
        fn attach(&mut self, agent: AgentId, object: ObjectId) {
            self.attach_calls += 1;
            self.inner.attach(agent, object);
        }
        fn detach(&mut self, agent: AgentId, force: bool) -> Option<ObjectId> {
            self.inner.detach(agent, force)
        }
        fn is_attached(&self, agent: AgentId) -> bool {
            self.inner.is_attached(agent)
        }
        fn attached_object(&self, agent: AgentId) -> Option<ObjectId> {
            self.inner.attached_object(agent)
        }
        fn set_object_pose(&mut self, object: ObjectId, pose: Pose) {
            self.inner.set_object_pose(object, pose)
        }
        fn apply_command(&mut self, agent: AgentId, command: &Command) {
            self.inner.apply_command(agent, command)
        }
    }

    /// Agent at the origin; object 0.4 straight out from the hand origin.
    fn pick_scene() -> (CountingSim, AgentId, ObjectId) {
        let mut sim = MockSimulator::new();
        let agent = sim.add_agent(AgentPose::from_position(Vec3::zeros()));
        let object = sim.add_object(Vec3::new(0.2, 0.2, 0.4));
        (CountingSim::new(sim), agent, object)
    }

    #[test]
    fn test_approach_takes_ceil_steps_and_attaches_once() {
        let (mut sim, agent, object) = pick_scene();
        let mut skill = PickSkill::new(&skill_config());
        skill.reset();
        let intent = SkillIntent::Pick {
            object_index: object.0,
        };

        // D = 0.4, T = 0.04 -> 10 approaching steps, grasp on step 11.
        for step in 1..=10 {
            skill.step(&mut sim, agent, Some(&intent));
            assert!(!sim.is_attached(agent), "attached early at step {step}");
        }
        let cmd = skill.step(&mut sim, agent, Some(&intent));
        assert!(sim.is_attached(agent));
        assert_eq!(sim.attach_calls, 1);
        assert_eq!(cmd, Command::Reach(Vec3::new(0.2, 0.2, 0.4)));

        // Keeping the intent up does not regrasp while retracting.
        for _ in 0..20 {
            skill.step(&mut sim, agent, Some(&intent));
        }
        assert_eq!(sim.attach_calls, 1);
    }

    #[test]
    fn test_retract_reports_done_exactly_once() {
        let (mut sim, agent, object) = pick_scene();
        let mut skill = PickSkill::new(&skill_config());
        skill.reset();
        let intent = SkillIntent::Pick {
            object_index: object.0,
        };

        let mut done_count = 0;
        for _ in 0..40 {
            skill.step(&mut sim, agent, Some(&intent));
            if skill.just_finished() {
                done_count += 1;
            }
        }
        assert_eq!(done_count, 1);
        assert!(skill.is_idle());
        assert!(sim.is_attached(agent));
    }

    #[test]
    fn test_pick_while_holding_is_ignored() {
        let (mut sim, agent, object) = pick_scene();
        let other = sim.inner.add_object(Vec3::new(0.2, 0.2, -0.4));
        sim.inner.attach(agent, object);

        let mut skill = PickSkill::new(&skill_config());
        skill.reset();
        let intent = SkillIntent::Pick {
            object_index: other.0,
        };
        let cmd = skill.step(&mut sim, agent, Some(&intent));
        assert_eq!(cmd, Command::Stop);
        assert!(skill.is_idle());
        assert_eq!(sim.attached_object(agent), Some(object));
    }

    #[test]
    fn test_invalid_object_index_is_noop() {
        let (mut sim, agent, _) = pick_scene();
        let mut skill = PickSkill::new(&skill_config());
        skill.reset();
        let intent = SkillIntent::Pick { object_index: 99 };
        let cmd = skill.step(&mut sim, agent, Some(&intent));
        assert_eq!(cmd, Command::Stop);
        assert!(skill.is_idle());
        assert_eq!(sim.attach_calls, 0);
    }

    #[test]
    fn test_withdrawn_intent_retracts_without_grasping() {
        let (mut sim, agent, object) = pick_scene();
        let mut skill = PickSkill::new(&skill_config());
        skill.reset();
        let intent = SkillIntent::Pick {
            object_index: object.0,
        };

        for _ in 0..3 {
            skill.step(&mut sim, agent, Some(&intent));
        }
        // Intent gone: the hand comes home and the cycle completes.
        let mut done_count = 0;
        for _ in 0..10 {
            skill.step(&mut sim, agent, None);
            if skill.just_finished() {
                done_count += 1;
            }
        }
        assert_eq!(done_count, 1);
        assert!(!sim.is_attached(agent));
        assert_eq!(sim.attach_calls, 0);
    }

    #[test]
    fn test_place_releases_and_restores_orientation() {
        let (mut sim, agent, object) = pick_scene();
        let rotation = UnitQuaternion::from_axis_angle(&Vec3::y_axis(), FRAC_PI_4);
        sim.inner.attach(agent, object);

        let mut skill = PickSkill::new(&skill_config());
        skill.reset();
        skill.set_grasp_rotation(rotation);

        let drop_pos = Vec3::new(0.2, 0.2, 0.3);
        let intent = SkillIntent::Place {
            object_index: object.0,
            position: drop_pos,
        };
        for _ in 0..40 {
            skill.step(&mut sim, agent, Some(&intent));
        }
        assert!(!sim.is_attached(agent));
        let pose = sim.object_pose(object).unwrap();
        assert!((pose.position - drop_pos).norm() < 1e-9);
        assert_eq!(pose.rotation, rotation);
        assert!(skill.is_idle());
    }
}
