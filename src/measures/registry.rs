//! Dependency graph and evaluation cache for the active measures of a task.
//!
//! Evaluation is demand-driven: `get` computes the measure's declared
//! dependencies first (transitively), then the measure itself, memoizing
//! every value for the remainder of the step. Cycles are rejected eagerly at
//! registration and, defensively, again during evaluation -- never by
//! unbounded recursion.

use std::collections::{BTreeMap, HashMap};

use crate::measures::{Measure, MeasureDeps, MeasureError, MeasureValue, StepContext};

/// Holds all active measures for an episode and resolves their declared
/// dependencies into a valid evaluation order.
#[derive(Default)]
pub struct MeasureRegistry {
    measures: Vec<Box<dyn Measure>>,
    /// Per-step memoized values, parallel to `measures`. `None` = not yet
    /// computed this step.
    values: Vec<Option<MeasureValue>>,
    index: HashMap<String, usize>,
}

impl MeasureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a measure under its unique name.
    ///
    /// Dependency edges between already-registered measures are validated for
    /// cycles immediately; a registration that would close a cycle is
    /// rejected and not retained. Forward references to measures registered
    /// later are allowed and resolved at evaluation time.
    pub fn register(&mut self, measure: Box<dyn Measure>) -> Result<(), MeasureError> {
        let name = measure.name();
        if self.index.contains_key(name) {
            return Err(MeasureError::Duplicate(name.to_string()));
        }
        self.index.insert(name.to_string(), self.measures.len());
        self.measures.push(measure);
        self.values.push(None);

        if let Some(offender) = self.find_cycle() {
            let last = self.measures.pop().expect("just pushed");
            self.values.pop();
            self.index.remove(last.name());
            return Err(MeasureError::CyclicDependency(offender));
        }
        Ok(())
    }

    /// Number of registered measures.
    pub fn len(&self) -> usize {
        self.measures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measures.is_empty()
    }

    /// Registered names in declaration order.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.measures.iter().map(|m| m.name())
    }

    /// Forget all memoized values; the next `get` per measure recomputes.
    /// Called once at each step boundary.
    pub fn begin_step(&mut self) {
        for v in &mut self.values {
            *v = None;
        }
    }

    /// Clear every cache entry and invoke each measure's reset hook, in
    /// declaration order. Called when the episode identity changes.
    pub fn reset_all(&mut self, ctx: &StepContext<'_>) {
        self.begin_step();
        for measure in &mut self.measures {
            measure.reset(ctx);
        }
    }

    /// Assert that every listed measure has already been computed this step.
    ///
    /// Fails with [`MeasureError::MissingDependency`] naming the first unmet
    /// entry, so measure authors get a loud failure instead of silently
    /// reading a stale value.
    pub fn require(&self, owner: &str, names: &[&str]) -> Result<(), MeasureError> {
        for name in names {
            let idx = self
                .index
                .get(*name)
                .ok_or_else(|| MeasureError::Unknown((*name).to_string()))?;
            if self.values[*idx].is_none() {
                return Err(MeasureError::MissingDependency {
                    measure: owner.to_string(),
                    dependency: (*name).to_string(),
                });
            }
        }
        Ok(())
    }

    /// The current-step value of `name`, computing it (and its dependencies,
    /// transitively) on first access. Subsequent calls within the same step
    /// return the memoized value without recomputation.
    pub fn get(&mut self, name: &str, ctx: &StepContext<'_>) -> Result<MeasureValue, MeasureError> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| MeasureError::Unknown(name.to_string()))?;
        self.evaluate(idx, ctx)?;
        Ok(self.values[idx].clone().expect("evaluated above"))
    }

    /// Evaluate every registered measure for this step and return the values
    /// keyed by name.
    pub fn compute_all(
        &mut self,
        ctx: &StepContext<'_>,
    ) -> Result<BTreeMap<String, MeasureValue>, MeasureError> {
        for idx in 0..self.measures.len() {
            self.evaluate(idx, ctx)?;
        }
        Ok(self
            .measures
            .iter()
            .zip(&self.values)
            .map(|(m, v)| (m.name().to_string(), v.clone().expect("all evaluated")))
            .collect())
    }

    /// Iterative dependency-first evaluation of node `root`.
    ///
    /// An explicit stack replaces recursion so a cyclic declaration that
    /// slipped past registration (or references resolved late) fails with
    /// [`MeasureError::CyclicDependency`] instead of overflowing the stack.
    fn evaluate(&mut self, root: usize, ctx: &StepContext<'_>) -> Result<(), MeasureError> {
        if self.values[root].is_some() {
            return Ok(());
        }

        let mut stack = vec![root];
        let mut on_stack = vec![false; self.measures.len()];
        on_stack[root] = true;

        while let Some(&current) = stack.last() {
            if self.values[current].is_some() {
                on_stack[current] = false;
                stack.pop();
                continue;
            }

            // Push the first uncomputed dependency, if any.
            let mut pending = None;
            for dep in self.measures[current].dependencies() {
                let dep_idx = *self
                    .index
                    .get(*dep)
                    .ok_or_else(|| MeasureError::Unknown((*dep).to_string()))?;
                if self.values[dep_idx].is_none() {
                    if on_stack[dep_idx] {
                        return Err(MeasureError::CyclicDependency((*dep).to_string()));
                    }
                    pending = Some(dep_idx);
                    break;
                }
            }

            match pending {
                Some(dep_idx) => {
                    on_stack[dep_idx] = true;
                    stack.push(dep_idx);
                }
                None => {
                    let name = self.measures[current].name();
                    let declared: Vec<&'static str> =
                        self.measures[current].dependencies().to_vec();
                    let deps = MeasureDeps::new(name, &declared, &self.index, &self.values);
                    let value = self.measures[current].update(ctx, &deps)?;
                    self.values[current] = Some(value);
                    on_stack[current] = false;
                    stack.pop();
                }
            }
        }
        Ok(())
    }

    /// Depth-first search for a cycle over the declared edges that resolve to
    /// registered measures. Returns the name of a measure on a cycle.
    fn find_cycle(&self) -> Option<String> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            White,
            Grey,
            Black,
        }
        let n = self.measures.len();
        let mut marks = vec![Mark::White; n];

        for start in 0..n {
            if marks[start] != Mark::White {
                continue;
            }
            // Iterative DFS with an explicit (node, next-edge) stack.
            let mut stack: Vec<(usize, usize)> = vec![(start, 0)];
            marks[start] = Mark::Grey;
            while let Some(&mut (node, ref mut edge)) = stack.last_mut() {
                let deps = self.measures[node].dependencies();
                if *edge >= deps.len() {
                    marks[node] = Mark::Black;
                    stack.pop();
                    continue;
                }
                let dep_name = deps[*edge];
                *edge += 1;
                // Unregistered forward references are checked at evaluation.
                let Some(&dep_idx) = self.index.get(dep_name) else {
                    continue;
                };
                match marks[dep_idx] {
                    Mark::Grey => return Some(dep_name.to_string()),
                    Mark::White => {
                        marks[dep_idx] = Mark::Grey;
                        stack.push((dep_idx, 0));
                    }
                    Mark::Black => {}
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::MockSimulator;
    use crate::task::TaskState;

    /// Counts how many times it is recomputed; used to check memoization.
    struct Counter {
        name: &'static str,
        deps: Vec<&'static str>,
        calls: std::rc::Rc<std::cell::Cell<usize>>,
    }

    impl Measure for Counter {
        fn name(&self) -> &'static str {
            self.name
        }

        fn dependencies(&self) -> &[&'static str] {
            &self.deps
        }

        fn update(
            &mut self,
            _ctx: &StepContext<'_>,
            deps: &MeasureDeps<'_>,
        ) -> Result<MeasureValue, MeasureError> {
            let mut total = 1.0;
            for dep in &self.deps {
                total += deps.scalar(dep)?;
            }
            self.calls.set(self.calls.get() + 1);
            Ok(MeasureValue::Scalar(total))
        }
    }

    fn counter(
        name: &'static str,
        deps: Vec<&'static str>,
    ) -> (Box<Counter>, std::rc::Rc<std::cell::Cell<usize>>) {
        let calls = std::rc::Rc::new(std::cell::Cell::new(0));
        (
            Box::new(Counter {
                name,
                deps,
                calls: calls.clone(),
            }),
            calls,
        )
    }

    fn ctx_fixture() -> (MockSimulator, TaskState) {
        (MockSimulator::new(), TaskState::default())
    }

    #[test]
    fn test_get_memoizes_within_step() {
        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        let (m, calls) = counter("a", vec![]);
        reg.register(m).unwrap();

        let first = reg.get("a", &ctx).unwrap();
        let second = reg.get("a", &ctx).unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.get(), 1);

        // New step boundary -> recomputed exactly once more.
        reg.begin_step();
        reg.get("a", &ctx).unwrap();
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_dependencies_computed_first_and_once() {
        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        let (a, a_calls) = counter("a", vec![]);
        let (b, b_calls) = counter("b", vec!["a"]);
        let (c, c_calls) = counter("c", vec!["a", "b"]);
        reg.register(a).unwrap();
        reg.register(b).unwrap();
        reg.register(c).unwrap();

        let v = reg.get("c", &ctx).unwrap();
        // a = 1, b = 1 + a = 2, c = 1 + a + b = 4.
        assert_eq!(v, MeasureValue::Scalar(4.0));
        assert_eq!(a_calls.get(), 1);
        assert_eq!(b_calls.get(), 1);
        assert_eq!(c_calls.get(), 1);
    }

    #[test]
    fn test_cycle_rejected_at_registration() {
        let mut reg = MeasureRegistry::new();
        let (a, _) = counter("a", vec!["b"]);
        let (b, _) = counter("b", vec!["a"]);
        reg.register(a).unwrap();
        let err = reg.register(b).unwrap_err();
        assert!(matches!(err, MeasureError::CyclicDependency(_)));
        // The offending registration was not retained.
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn test_self_cycle_rejected() {
        let mut reg = MeasureRegistry::new();
        let (a, _) = counter("a", vec!["a"]);
        let err = reg.register(a).unwrap_err();
        assert!(matches!(err, MeasureError::CyclicDependency(_)));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut reg = MeasureRegistry::new();
        let (a1, _) = counter("a", vec![]);
        let (a2, _) = counter("a", vec![]);
        reg.register(a1).unwrap();
        assert!(matches!(
            reg.register(a2).unwrap_err(),
            MeasureError::Duplicate(_)
        ));
    }

    #[test]
    fn test_unknown_measure() {
        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        assert!(matches!(
            reg.get("nope", &ctx).unwrap_err(),
            MeasureError::Unknown(_)
        ));
    }

    #[test]
    fn test_unknown_dependency_fails_at_evaluation() {
        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        let (a, _) = counter("a", vec!["ghost"]);
        reg.register(a).unwrap();
        assert!(matches!(
            reg.get("a", &ctx).unwrap_err(),
            MeasureError::Unknown(_)
        ));
    }

    #[test]
    fn test_require_reports_first_unmet() {
        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        let (a, _) = counter("a", vec![]);
        let (b, _) = counter("b", vec![]);
        reg.register(a).unwrap();
        reg.register(b).unwrap();

        reg.get("a", &ctx).unwrap();
        // "a" computed, "b" not.
        assert!(reg.require("caller", &["a"]).is_ok());
        match reg.require("caller", &["a", "b"]).unwrap_err() {
            MeasureError::MissingDependency { dependency, .. } => assert_eq!(dependency, "b"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_undeclared_read_is_an_error() {
        struct Sneaky;
        impl Measure for Sneaky {
            fn name(&self) -> &'static str {
                "sneaky"
            }
            fn update(
                &mut self,
                _ctx: &StepContext<'_>,
                deps: &MeasureDeps<'_>,
            ) -> Result<MeasureValue, MeasureError> {
                // Reads "a" without declaring it.
                deps.scalar("a").map(MeasureValue::Scalar)
            }
        }

        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        let (a, _) = counter("a", vec![]);
        reg.register(a).unwrap();
        reg.register(Box::new(Sneaky)).unwrap();

        reg.get("a", &ctx).unwrap();
        assert!(matches!(
            reg.get("sneaky", &ctx).unwrap_err(),
            MeasureError::UndeclaredDependency { .. }
        ));
    }

    #[test]
    fn test_compute_all_returns_every_value() {
        let (sim, task) = ctx_fixture();
        let ctx = StepContext {
            sim: &sim,
            task: &task,
        };
        let mut reg = MeasureRegistry::new();
        let (a, _) = counter("a", vec![]);
        let (b, _) = counter("b", vec!["a"]);
        reg.register(a).unwrap();
        reg.register(b).unwrap();

        let all = reg.compute_all(&ctx).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], MeasureValue::Scalar(1.0));
        assert_eq!(all["b"], MeasureValue::Scalar(2.0));
    }
}
