//! Stilt: per-step metric computation and discrete skill control for
//! embodied rearrangement tasks.
//!
//! The crate has two tightly coupled halves:
//!
//! 1. A **measure registry** ([`measures`]) that lets many interdependent,
//!    stateful per-step metrics be declared independently and evaluated in
//!    dependency order, at most once per simulation step.
//! 2. **Skill state machines** ([`skills`]) that turn a single high-level
//!    intent ("pick object 3", "walk to the goal") into a sequence of
//!    interpolated low-level pose commands.
//!
//! The physics simulation itself is an external collaborator reached through
//! the [`sim::Simulator`] trait; [`sim::MockSimulator`] provides a kinematic
//! in-memory backend so the whole crate can be exercised without one.

pub mod config;
pub mod geometry;
pub mod measures;
pub mod reward;
pub mod sim;
pub mod skills;
pub mod task;
