use serde::{Deserialize, Serialize};

/// Which measure/reward family a task instance wires up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Navigate the agent base to a (possibly moving) goal position.
    NavToObj,
    /// Find and then follow another agent at a safe distance.
    SocialNav,
    /// Place the held object at its goal and retract.
    Place,
}

/// Complete configuration for one rearrangement task instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub kind: TaskKind,
    /// When true, the navigation goal tracks the human agent's position each
    /// step instead of a fixed point.
    pub goal_is_human: bool,
    /// Scene index of the human agent (for social tasks).
    pub human_agent_idx: usize,
    /// Scene index of the robot agent.
    pub robot_agent_idx: usize,
    /// Step budget per episode.
    pub max_steps: usize,
    pub nav_success: NavSuccessConfig,
    pub nav_reward: NavRewardConfig,
    pub social_reward: SocialNavRewardConfig,
    pub social_stats: SocialNavStatsConfig,
    pub seek_success: SeekSuccessConfig,
    pub place: PlaceConfig,
    pub pick_skill: PickSkillConfig,
    pub nav_skill: NavSkillConfig,
}

/// Navigation success thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavSuccessConfig {
    /// Distance to goal under which the position is reached (default: 1.5).
    pub success_distance: f64,
    /// Angular deviation (radians) under which the agent counts as looking
    /// at the target (default: 0.261799, ~15 degrees).
    pub success_angle_dist: f64,
    /// Require looking at the target for success (default: true).
    pub must_look_at_targ: bool,
    /// Require the agent's explicit terminate signal for success; reaching
    /// the success region without it is a no-op and the episode continues
    /// (default: true).
    pub must_call_stop: bool,
}

/// Dense navigation reward shaping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavRewardConfig {
    /// Scale on the per-step distance delta (default: 1.0).
    pub dist_reward: f64,
    /// Also reward reducing the heading error when close (default: true).
    pub should_reward_turn: bool,
    /// Distance under which turn shaping kicks in (default: 3.0).
    pub turn_reward_dist: f64,
    /// Scale on the per-step heading-error delta (default: 1.0).
    pub angle_dist_reward: f64,
}

/// Three-band social navigation reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialNavRewardConfig {
    /// Lower edge of the safe following band (default: 1.0).
    pub safe_dis_min: f64,
    /// Upper edge of the safe following band (default: 2.0).
    pub safe_dis_max: f64,
    /// Flat reward while inside the band (default: 2.0).
    pub safe_dis_reward: f64,
    /// Distance under which the facing bonus applies (default: 3.0).
    pub facing_human_dis: f64,
    /// Scale on the facing dot product; -1.0 disables the bonus
    /// (default: 0.01).
    pub facing_human_reward: f64,
    /// Use geodesic distance when a path exists, else Euclidean
    /// (default: true).
    pub use_geo_distance: bool,
}

/// Running social-proximity statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SocialNavStatsConfig {
    /// Closest acceptable encounter distance (default: 1.0).
    pub min_dis_human: f64,
    /// Farthest acceptable encounter distance (default: 2.0).
    pub max_dis_human: f64,
    /// Distance under which backup/yield behavior is counted (default: 1.5).
    pub dis_threshold_for_backup_yield: f64,
    /// Speeds with absolute value below this count as yielding
    /// (default: 1.0).
    pub min_abs_vel_for_yield: f64,
    /// Forward-to-human dot product above which the robot faces the human
    /// (default: 0.5).
    pub robot_face_human_threshold: f64,
    /// Compute the shortest-path lower bound for the first-encounter ratio
    /// (default: true).
    pub enable_shortest_path_computation: bool,
    /// Value reported for path-ratio statistics when the lower bound is
    /// unavailable (default: 0.0).
    pub spl_fallback: f64,
    /// Base travel per step used to convert the shortest-path length into a
    /// step lower bound (default: 0.083).
    pub dist_move_per_step: f64,
    /// Control rate used to convert per-step displacement into a velocity
    /// (default: 120.0).
    pub ctrl_freq: f64,
}

/// Seek-and-follow success criterion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeekSuccessConfig {
    /// Following steps required for success (default: 400).
    pub following_step_succ_threshold: usize,
    /// Lower edge of the following band (default: 1.0).
    pub safe_dis_min: f64,
    /// Upper edge of the following band (default: 2.0).
    pub safe_dis_max: f64,
    /// Only count steps where the robot faces the human (default: true).
    pub need_to_face_human: bool,
    /// Facing dot-product threshold (default: 0.5).
    pub facing_threshold: f64,
    /// Use geodesic distance instead of the cached distance measure
    /// (default: true).
    pub use_geo_distance: bool,
    /// Additionally gate success on the heading error (default: false).
    pub must_look_at_targ: bool,
    /// Heading-error threshold for the gate (default: 0.261799).
    pub success_angle_dist: f64,
}

/// How a wrong-drop penalty scales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropPenaltyKind {
    /// Flat penalty.
    Constant,
    /// Penalty scaled by the remaining distance to goal.
    PenalizeRemainingDist,
    /// Penalty scaled by the remaining fraction of the step budget.
    PenalizeRemainingTime,
}

/// Placement measures and reward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlaceConfig {
    /// Object-to-goal distance under which the object is at its goal
    /// (default: 0.15).
    pub succ_thresh: f64,
    /// Consecutive qualifying steps required for a stable placement
    /// (default: 50).
    pub stability_steps: usize,
    /// Gate place success on placement stability (default: true).
    pub check_stability: bool,
    /// End-effector-to-rest distance under which the arm is back at rest
    /// (default: 0.15).
    pub ee_resting_success_threshold: f64,
    /// Distance below which dense shaping stops (default: 0.1).
    pub min_dist_to_goal: f64,
    /// One-time bonus for releasing the object at its goal (default: 5.0).
    pub place_reward: f64,
    /// One-time penalty for releasing it anywhere else (default: 0.5).
    pub drop_pen: f64,
    pub drop_pen_type: DropPenaltyKind,
    /// End the episode on a wrong drop (default: false).
    pub wrong_drop_should_end: bool,
    /// Shape on end-effector-to-goal distance instead of object-to-goal
    /// (default: false).
    pub use_ee_dist: bool,
    /// Reward the per-step delta rather than the negated absolute distance
    /// (default: true).
    pub use_diff: bool,
    /// Skip dense goal-distance shaping entirely (default: false).
    pub sparse_reward: bool,
    /// Scale on the distance term (default: 2.0).
    pub dist_reward: f64,
}

/// Hand reach/retract skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PickSkillConfig {
    /// Hand origin relative to the agent base (default: [0.2, 0.2, 0.0]).
    pub init_offset: [f64; 3],
    /// Hand travel per step (default: 0.04).
    pub dist_move_per_step: f64,
    /// Distance under which an approach/retract counts as arrived
    /// (default: 0.02).
    pub dist_to_snap: f64,
}

/// Waypoint-following navigation skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavSkillConfig {
    /// Base travel per step (default: 0.083, i.e. 10 m/s at 120 Hz).
    pub dist_move_per_step: f64,
    /// Distance to the final goal under which navigation is done
    /// (default: 0.2).
    pub goal_snap_dist: f64,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            kind: TaskKind::NavToObj,
            goal_is_human: false,
            human_agent_idx: 1,
            robot_agent_idx: 0,
            max_steps: 1500,
            nav_success: NavSuccessConfig {
                success_distance: 1.5,
                success_angle_dist: 0.261799,
                must_look_at_targ: true,
                must_call_stop: true,
            },
            nav_reward: NavRewardConfig {
                dist_reward: 1.0,
                should_reward_turn: true,
                turn_reward_dist: 3.0,
                angle_dist_reward: 1.0,
            },
            social_reward: SocialNavRewardConfig {
                safe_dis_min: 1.0,
                safe_dis_max: 2.0,
                safe_dis_reward: 2.0,
                facing_human_dis: 3.0,
                facing_human_reward: 0.01,
                use_geo_distance: true,
            },
            social_stats: SocialNavStatsConfig {
                min_dis_human: 1.0,
                max_dis_human: 2.0,
                dis_threshold_for_backup_yield: 1.5,
                min_abs_vel_for_yield: 1.0,
                robot_face_human_threshold: 0.5,
                enable_shortest_path_computation: true,
                spl_fallback: 0.0,
                dist_move_per_step: 0.083,
                ctrl_freq: 120.0,
            },
            seek_success: SeekSuccessConfig {
                following_step_succ_threshold: 400,
                safe_dis_min: 1.0,
                safe_dis_max: 2.0,
                need_to_face_human: true,
                facing_threshold: 0.5,
                use_geo_distance: true,
                must_look_at_targ: false,
                success_angle_dist: 0.261799,
            },
            place: PlaceConfig {
                succ_thresh: 0.15,
                stability_steps: 50,
                check_stability: true,
                ee_resting_success_threshold: 0.15,
                min_dist_to_goal: 0.1,
                place_reward: 5.0,
                drop_pen: 0.5,
                drop_pen_type: DropPenaltyKind::Constant,
                wrong_drop_should_end: false,
                use_ee_dist: false,
                use_diff: true,
                sparse_reward: false,
                dist_reward: 2.0,
            },
            pick_skill: PickSkillConfig {
                init_offset: [0.2, 0.2, 0.0],
                dist_move_per_step: 0.04,
                dist_to_snap: 0.02,
            },
            nav_skill: NavSkillConfig {
                dist_move_per_step: 0.083,
                goal_snap_dist: 0.2,
            },
        }
    }
}
