//! Stilt demo driver: scripted episodes on the in-memory mock backend.
//!
//! Subcommands:
//!
//! - `run`            -- run one scripted episode and print its final metrics
//! - `inspect-config` -- print the effective task configuration as JSON

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::EnvFilter;

use stilt::config::{TaskConfig, TaskKind};
use stilt::geometry::{self, Vec3};
use stilt::measures::MeasureValue;
use stilt::sim::{AgentPose, MockSimulator, Simulator};
use stilt::skills::SkillIntent;
use stilt::task::{Episode, RearrangeTask};

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// Stilt: metrics and skill control for embodied rearrangement tasks.
#[derive(Parser)]
#[command(name = "stilt", version, about)]
struct Cli {
    /// Path to a JSON task configuration (uses defaults if not provided).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum TaskChoice {
    /// Navigate to the nearest object and call stop.
    Nav,
    /// Find and follow a wandering human.
    Social,
    /// Place the held object at its goal and retract.
    Place,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one scripted episode on the mock simulator.
    Run {
        /// Which task to run.
        #[arg(long, default_value = "nav")]
        task: TaskChoice,

        /// Step budget for the episode.
        #[arg(long, default_value_t = 500)]
        steps: usize,

        /// Seed for the scripted human walk.
        #[arg(long, default_value_t = 7)]
        seed: u64,
    },

    /// Print the effective task configuration as JSON.
    InspectConfig,
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    // Initialise tracing (reads RUST_LOG env var, defaults to info).
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config from {}", path.display()))?;
            serde_json::from_str::<TaskConfig>(&text)
                .with_context(|| format!("Failed to parse config from {}", path.display()))?
        }
        None => TaskConfig::default(),
    };

    match cli.command {
        Commands::Run { task, steps, seed } => cmd_run(config, &task, steps, seed),
        Commands::InspectConfig => cmd_inspect_config(&config),
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

fn cmd_inspect_config(config: &TaskConfig) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(config)?);
    Ok(())
}

fn cmd_run(mut config: TaskConfig, choice: &TaskChoice, steps: usize, seed: u64) -> Result<()> {
    config.kind = match choice {
        TaskChoice::Nav => TaskKind::NavToObj,
        TaskChoice::Social => TaskKind::SocialNav,
        TaskChoice::Place => TaskKind::Place,
    };
    config.max_steps = steps;
    let kind = config.kind;

    let mut sim = MockSimulator::new();
    let robot = sim.add_agent(AgentPose::from_position(Vec3::zeros()));
    let mut rng = StdRng::seed_from_u64(seed);

    let mut task = RearrangeTask::new(config)?;

    // Scene setup per task kind.
    let mut human = None;
    let mut place_intent = None;
    match kind {
        TaskKind::NavToObj => {
            let positions = [
                Vec3::new(6.0, 0.0, 2.0),
                Vec3::new(3.0, 0.0, -4.0),
                Vec3::new(-8.0, 0.0, 1.0),
            ];
            for pos in positions {
                sim.add_object(pos);
            }
            // Navigate to the nearest object.
            let robot_pos = sim.agent_pose(robot).context("missing robot pose")?.position;
            let goal = positions
                .into_iter()
                .min_by_key(|p| OrderedFloat(geometry::planar_distance(&robot_pos, p)))
                .context("no objects in the scene")?;
            task.state_mut().nav_goal = goal;
        }
        TaskKind::SocialNav => {
            human = Some(sim.add_agent(AgentPose::from_position(Vec3::new(5.0, 0.0, 3.0))));
        }
        TaskKind::Place => {
            let object = sim.add_object(Vec3::new(0.4, 0.1, 0.2));
            let goal = Vec3::new(0.6, 0.2, 0.4);
            task.state_mut().picked_object_idx = object.0;
            task.state_mut().object_goals.insert(object.0, goal);
            place_intent = Some(SkillIntent::Place {
                object_index: object.0,
                position: goal,
            });
        }
    }

    task.reset(Episode::new(steps), &mut sim);

    let mut total_reward = 0.0;
    let mut last_metrics: BTreeMap<String, MeasureValue> = BTreeMap::new();
    let mut place_done = false;

    for _ in 0..steps {
        // Scripted human: wander roughly +x with lateral jitter.
        if let Some(h) = human {
            if let Some(pose) = sim.agent_pose(h) {
                let drift = Vec3::new(
                    0.04 + rng.gen_range(-0.02..0.02),
                    0.0,
                    rng.gen_range(-0.03..0.03),
                );
                sim.set_agent_pose(h, AgentPose::from_position(pose.position + drift));
            }
        }

        let intent = match kind {
            TaskKind::NavToObj => Some(SkillIntent::NavigateTo {
                goal: task.state().nav_goal,
            }),
            TaskKind::SocialNav => human.map(|agent| SkillIntent::FollowAgent { agent }),
            TaskKind::Place => {
                if place_done {
                    None
                } else {
                    place_intent
                }
            }
        };

        let outcome = task.step(&mut sim, intent.as_ref())?;
        total_reward += outcome.reward;
        last_metrics = outcome.metrics;

        match kind {
            // Arrived: call stop so the success measure can fire.
            TaskKind::NavToObj if task.skill_done() => task.set_want_terminate(true),
            TaskKind::Place if task.skill_done() => place_done = true,
            _ => {}
        }
        if outcome.should_end {
            break;
        }
    }

    tracing::info!(
        steps = task.state().step,
        total_reward,
        success = task.success(),
        "episode finished"
    );
    println!("{}", serde_json::to_string_pretty(&last_metrics)?);
    Ok(())
}
