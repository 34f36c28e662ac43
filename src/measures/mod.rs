//! Per-step measures and the dependency-resolving registry that evaluates
//! them.
//!
//! A **measure** is a named, possibly stateful computation over the current
//! step's simulation state plus previously computed sibling measures. Each
//! measure declares the siblings it reads; the [`registry::MeasureRegistry`]
//! guarantees that, within a step, every measure is computed at most once and
//! only after its declared dependencies.
//!
//! Measure families live in the submodules:
//! - [`nav`] -- distance / heading / navigation success.
//! - [`social`] -- social-proximity running statistics and seek success.
//! - [`place`] -- object placement, stability, and place success.
//!
//! Reward signals are measures too; they live in [`crate::reward`].

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sim::Simulator;
use crate::task::TaskState;

pub mod nav;
pub mod place;
pub mod registry;
pub mod social;

pub use registry::MeasureRegistry;

// ---------------------------------------------------------------------------
// Values
// ---------------------------------------------------------------------------

/// The value a measure produces for one step.
///
/// Map values are keyed by object index (stringified); booleans inside maps
/// are encoded as 0.0 / 1.0.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasureValue {
    Scalar(f64),
    Bool(bool),
    Map(BTreeMap<String, f64>),
}

impl MeasureValue {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Self::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }
}

impl From<f64> for MeasureValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<bool> for MeasureValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<BTreeMap<String, f64>> for MeasureValue {
    fn from(m: BTreeMap<String, f64>) -> Self {
        Self::Map(m)
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Configuration and wiring errors surfaced by the measure engine.
///
/// These indicate programming errors (bad dependency declarations, unknown
/// names) and abort the episode's metric evaluation; they are never retried.
#[derive(Debug, Error)]
pub enum MeasureError {
    /// A name was requested that no registered measure carries.
    #[error("unknown measure '{0}'")]
    Unknown(String),

    /// Two measures were registered under the same name.
    #[error("measure '{0}' is already registered")]
    Duplicate(String),

    /// The declared dependency graph contains a cycle.
    #[error("cyclic dependency involving measure '{0}'")]
    CyclicDependency(String),

    /// A measure read a declared dependency that has not been computed this
    /// step. This is a loud failure in place of silently reading a stale
    /// value from the previous step.
    #[error("measure '{measure}' requires '{dependency}' which has not been computed this step")]
    MissingDependency { measure: String, dependency: String },

    /// A measure read a sibling it never declared as a dependency.
    #[error("measure '{measure}' read undeclared dependency '{dependency}'")]
    UndeclaredDependency { measure: String, dependency: String },

    /// A dependency value had an unexpected shape.
    #[error("measure '{measure}' expected '{dependency}' to be a {expected}")]
    WrongType {
        measure: String,
        dependency: String,
        expected: &'static str,
    },

    /// A pose query for a configured agent or object came back empty.
    #[error("measure '{measure}' could not query the pose of {entity}")]
    PoseUnavailable { measure: String, entity: String },
}

// ---------------------------------------------------------------------------
// Step context
// ---------------------------------------------------------------------------

/// Everything a measure may read during one step: the simulation backend and
/// the task-level state (goals, picked object, stop signal, step counter).
///
/// Passed explicitly into every `reset`/`update` call; there is no ambient
/// task-wide registry.
pub struct StepContext<'a> {
    pub sim: &'a dyn Simulator,
    pub task: &'a TaskState,
}

// ---------------------------------------------------------------------------
// Dependency view
// ---------------------------------------------------------------------------

/// Read access to sibling measure values during `update`.
///
/// Every read is checked: the sibling must be declared by the reading measure
/// and must already be computed this step.
pub struct MeasureDeps<'a> {
    owner: &'a str,
    declared: &'a [&'static str],
    index: &'a HashMap<String, usize>,
    values: &'a [Option<MeasureValue>],
}

impl<'a> MeasureDeps<'a> {
    pub(crate) fn new(
        owner: &'a str,
        declared: &'a [&'static str],
        index: &'a HashMap<String, usize>,
        values: &'a [Option<MeasureValue>],
    ) -> Self {
        Self {
            owner,
            declared,
            index,
            values,
        }
    }

    /// The raw value of a declared, already-computed sibling.
    pub fn value(&self, name: &str) -> Result<&MeasureValue, MeasureError> {
        if !self.declared.contains(&name) {
            return Err(MeasureError::UndeclaredDependency {
                measure: self.owner.to_string(),
                dependency: name.to_string(),
            });
        }
        let idx = self
            .index
            .get(name)
            .ok_or_else(|| MeasureError::Unknown(name.to_string()))?;
        self.values[*idx]
            .as_ref()
            .ok_or_else(|| MeasureError::MissingDependency {
                measure: self.owner.to_string(),
                dependency: name.to_string(),
            })
    }

    /// A scalar sibling value.
    pub fn scalar(&self, name: &str) -> Result<f64, MeasureError> {
        self.value(name)?
            .as_scalar()
            .ok_or_else(|| self.wrong_type(name, "scalar"))
    }

    /// A boolean sibling value.
    pub fn boolean(&self, name: &str) -> Result<bool, MeasureError> {
        self.value(name)?
            .as_bool()
            .ok_or_else(|| self.wrong_type(name, "bool"))
    }

    /// One entry of a map-valued sibling, keyed by object index.
    pub fn map_entry(&self, name: &str, key: usize) -> Result<f64, MeasureError> {
        let map = self
            .value(name)?
            .as_map()
            .ok_or_else(|| self.wrong_type(name, "map"))?;
        map.get(&key.to_string())
            .copied()
            .ok_or_else(|| self.wrong_type(name, "map containing the picked object index"))
    }

    fn wrong_type(&self, name: &str, expected: &'static str) -> MeasureError {
        MeasureError::WrongType {
            measure: self.owner.to_string(),
            dependency: name.to_string(),
            expected,
        }
    }
}

// ---------------------------------------------------------------------------
// Measure trait
// ---------------------------------------------------------------------------

/// A named, per-step computed quantity with episode-scoped private state.
pub trait Measure {
    /// Unique name this measure is registered and cached under.
    fn name(&self) -> &'static str;

    /// Names of the sibling measures this one reads. Must be acyclic across
    /// the registry.
    fn dependencies(&self) -> &[&'static str] {
        &[]
    }

    /// Reset episode-scoped state. Called by the registry when the episode
    /// identity changes; stateless measures can keep the default no-op.
    fn reset(&mut self, _ctx: &StepContext<'_>) {}

    /// Compute this step's value. All declared dependencies are guaranteed to
    /// be available through `deps`.
    fn update(
        &mut self,
        ctx: &StepContext<'_>,
        deps: &MeasureDeps<'_>,
    ) -> Result<MeasureValue, MeasureError>;
}
