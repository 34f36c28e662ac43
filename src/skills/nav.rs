//! Waypoint-following base navigation.
//!
//! Each step re-queries the backend's shortest path and advances toward the
//! next waypoint, constrained through the navmesh step filter. A failed path
//! query degrades to a straight line toward the final goal rather than
//! failing the step.

use crate::config::NavSkillConfig;
use crate::geometry::{self, Vec3};
use crate::sim::{AgentId, Command, Simulator};
use crate::skills::SkillIntent;

/// Base navigation skill.
pub struct NavSkill {
    config: NavSkillConfig,
    /// Latched while the base sits inside the goal snap radius, so arrival is
    /// reported once per approach rather than every step.
    arrived: bool,
    done: bool,
}

impl NavSkill {
    pub fn new(config: &NavSkillConfig) -> Self {
        Self {
            config: config.clone(),
            arrived: false,
            done: false,
        }
    }

    pub fn reset(&mut self) {
        self.arrived = false;
        self.done = false;
    }

    /// Whether the base arrived at the goal on the step that just ran.
    pub fn just_finished(&self) -> bool {
        self.done
    }

    /// Advance one step toward the intent's goal and emit the base command.
    ///
    /// `FollowAgent` re-resolves the goal to the other agent's current
    /// position every step, so the path bends as the target moves.
    pub fn step(
        &mut self,
        sim: &dyn Simulator,
        agent: AgentId,
        intent: Option<&SkillIntent>,
    ) -> Command {
        self.done = false;
        let Some(pose) = sim.agent_pose(agent) else {
            return Command::Stop;
        };
        let goal = match intent {
            Some(SkillIntent::NavigateTo { goal }) => *goal,
            Some(SkillIntent::FollowAgent { agent: target }) => {
                match sim.agent_pose(*target) {
                    Some(p) => p.position,
                    // Target left the scene: hold position.
                    None => return Command::Stop,
                }
            }
            _ => return Command::Stop,
        };

        if geometry::planar_distance(&pose.position, &goal) < self.config.goal_snap_dist {
            if !self.arrived {
                self.arrived = true;
                self.done = true;
                tracing::debug!(?goal, "base arrived at goal");
            }
            return Command::Stop;
        }
        // A moving goal can pull back out of the snap radius; the next
        // arrival reports again.
        self.arrived = false;

        let waypoint = sim
            .shortest_path(&pose.position, &goal)
            .and_then(|path| path.get(1).copied())
            .unwrap_or(goal);
        let Some(dir) = geometry::direction(&pose.position, &waypoint) else {
            return Command::Stop;
        };
        let travel = self
            .config
            .dist_move_per_step
            .min(geometry::distance(&pose.position, &waypoint));
        let requested = pose.position + dir * travel;
        let position = sim.step_filter(&pose.position, &requested);
        Command::Walk {
            position,
            yaw: geometry::yaw_toward(&dir),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{AgentPose, MockSimulator};

    fn skill_config() -> NavSkillConfig {
        NavSkillConfig {
            dist_move_per_step: 0.25,
            goal_snap_dist: 0.2,
        }
    }

    fn scene() -> (MockSimulator, AgentId) {
        let mut sim = MockSimulator::new();
        let agent = sim.add_agent(AgentPose::from_position(Vec3::zeros()));
        (sim, agent)
    }

    /// Step the skill and apply its command, returning whether it finished.
    fn tick(
        skill: &mut NavSkill,
        sim: &mut MockSimulator,
        agent: AgentId,
        intent: &SkillIntent,
    ) -> bool {
        let cmd = skill.step(sim, agent, Some(intent));
        sim.apply_command(agent, &cmd);
        skill.just_finished()
    }

    #[test]
    fn test_walks_to_goal_and_reports_done_once() {
        let (mut sim, agent) = scene();
        let mut skill = NavSkill::new(&skill_config());
        let intent = SkillIntent::NavigateTo {
            goal: Vec3::new(1.0, 0.0, 0.0),
        };

        let mut done_count = 0;
        for _ in 0..20 {
            if tick(&mut skill, &mut sim, agent, &intent) {
                done_count += 1;
            }
        }
        assert_eq!(done_count, 1);
        let pos = sim.agent_pose(agent).unwrap().position;
        assert!(geometry::planar_distance(&pos, &Vec3::new(1.0, 0.0, 0.0)) < 0.2);
    }

    #[test]
    fn test_straight_line_fallback_when_no_path() {
        let (mut sim, agent) = scene();
        sim.block_pathfinding(true);
        let mut skill = NavSkill::new(&skill_config());
        let goal = Vec3::new(2.0, 0.0, 0.0);
        let intent = SkillIntent::NavigateTo { goal };

        let before = sim.agent_pose(agent).unwrap().position;
        let cmd = skill.step(&sim, agent, Some(&intent));
        match cmd {
            Command::Walk { position, .. } => {
                assert!(
                    geometry::distance(&position, &goal) < geometry::distance(&before, &goal)
                );
            }
            other => panic!("expected a walk command, got {other:?}"),
        }
    }

    #[test]
    fn test_follow_agent_tracks_moving_target() {
        let (mut sim, agent) = scene();
        let human = sim.add_agent(AgentPose::from_position(Vec3::new(0.0, 0.0, 2.0)));
        let mut skill = NavSkill::new(&skill_config());
        let intent = SkillIntent::FollowAgent { agent: human };

        let cmd = skill.step(&sim, agent, Some(&intent));
        let first_yaw = match cmd {
            Command::Walk { yaw, .. } => yaw,
            other => panic!("expected a walk command, got {other:?}"),
        };

        // The human moves; the next command points somewhere new.
        sim.set_agent_pose(human, AgentPose::from_position(Vec3::new(2.0, 0.0, 0.0)));
        let cmd = skill.step(&sim, agent, Some(&intent));
        match cmd {
            Command::Walk { yaw, .. } => assert!((yaw - first_yaw).abs() > 0.5),
            other => panic!("expected a walk command, got {other:?}"),
        }
    }

    #[test]
    fn test_arrival_rearms_when_goal_moves_away() {
        let (mut sim, agent) = scene();
        let human = sim.add_agent(AgentPose::from_position(Vec3::new(0.5, 0.0, 0.0)));
        let mut skill = NavSkill::new(&skill_config());
        let intent = SkillIntent::FollowAgent { agent: human };

        let mut done_count = 0;
        for _ in 0..10 {
            if tick(&mut skill, &mut sim, agent, &intent) {
                done_count += 1;
            }
        }
        assert_eq!(done_count, 1);

        // The human walks off and stops again; a second arrival reports.
        sim.set_agent_pose(human, AgentPose::from_position(Vec3::new(3.0, 0.0, 0.0)));
        for _ in 0..20 {
            if tick(&mut skill, &mut sim, agent, &intent) {
                done_count += 1;
            }
        }
        assert_eq!(done_count, 2);
    }
}
