//! Gated task graph
//!
//! The task graph is the planner's output: a DAG of [`TaskSpec`] nodes whose
//! edges are data dependencies (`requires`) plus [`Gate`] barriers whose
//! edges are gate dependencies (`depends_on` / `blocks`). The executor
//! drives the graph through [`TaskGraph::ready_tasks`], which encodes both
//! edge kinds:
//!
//! ```text
//!   t1 ──┐
//!   t2 ──┼─► [Gate: import] ──► t4
//!   t3 ──┘                      t5
//! ```
//!
//! `t4`/`t5` never dispatch before the import gate over `t1..t3` passes.
//!
//! All mutation happens at construction time; a validated graph is immutable
//! and the executor tracks completion in its own sets.

use crate::error::{CoreError, Result};
use crate::gate::{Gate, GateId};
use crate::task::{TaskId, TaskSpec};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// The acyclic directed graph of tasks plus inserted gate barriers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskGraph {
    /// Tasks keyed by id; BTreeMap keeps iteration deterministic
    pub tasks: BTreeMap<TaskId, TaskSpec>,

    /// Gates keyed by id
    pub gates: BTreeMap<GateId, Gate>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_task(&mut self, task: TaskSpec) {
        self.tasks.insert(task.id.clone(), task);
    }

    pub fn add_gate(&mut self, gate: Gate) {
        self.gates.insert(gate.id.clone(), gate);
    }

    pub fn task(&self, id: &str) -> Option<&TaskSpec> {
        self.tasks.get(id)
    }

    pub fn gate(&self, id: &str) -> Option<&Gate> {
        self.gates.get(id)
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Validate the structural invariants:
    ///
    /// - every `requires` edge points at an existing task
    /// - `requires` forms a DAG (no cycles)
    /// - every gate's `depends_on` and `blocks` reference existing tasks
    /// - `depends_on ∩ blocks = ∅` per gate
    /// - each task feeds at most one gate
    pub fn validate(&self) -> Result<()> {
        for (id, task) in &self.tasks {
            for dep in &task.requires {
                if !self.tasks.contains_key(dep) {
                    return Err(CoreError::Graph(format!(
                        "task '{}' requires unknown task '{}'",
                        id, dep
                    )));
                }
            }
        }

        self.topo_order()?;

        let mut feeder_of: BTreeMap<&TaskId, &GateId> = BTreeMap::new();
        for (gate_id, gate) in &self.gates {
            if !gate.is_well_formed() {
                return Err(CoreError::Graph(format!(
                    "gate '{}' has overlapping depends_on and blocks",
                    gate_id
                )));
            }
            for t in gate.depends_on.iter().chain(gate.blocks.iter()) {
                if !self.tasks.contains_key(t) {
                    return Err(CoreError::Graph(format!(
                        "gate '{}' references unknown task '{}'",
                        gate_id, t
                    )));
                }
            }
            for t in &gate.depends_on {
                if let Some(other) = feeder_of.insert(t, gate_id) {
                    return Err(CoreError::Graph(format!(
                        "task '{}' feeds both gate '{}' and gate '{}'",
                        t, other, gate_id
                    )));
                }
            }
        }

        Ok(())
    }

    /// Stable topological ordering of task ids (Kahn's algorithm; ties broken
    /// by ascending id). Fails with the offending cycle members on a cycle.
    pub fn topo_order(&self) -> Result<Vec<TaskId>> {
        let mut in_degree: BTreeMap<&TaskId, usize> = self
            .tasks
            .keys()
            .map(|id| (id, self.tasks[id].requires.len()))
            .collect();
        let mut dependents: BTreeMap<&TaskId, Vec<&TaskId>> = BTreeMap::new();
        for (id, task) in &self.tasks {
            for dep in &task.requires {
                dependents.entry(dep).or_default().push(id);
            }
        }

        // BTreeSet keeps the ready frontier sorted by id, which makes the
        // ordering (and every downstream tie-break) deterministic.
        let mut ready: BTreeSet<&TaskId> = in_degree
            .iter()
            .filter(|(_, deg)| **deg == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = Vec::with_capacity(self.tasks.len());

        while let Some(&id) = ready.iter().next() {
            ready.remove(id);
            order.push(id.clone());
            for &dependent in dependents.get(id).into_iter().flatten() {
                let deg = in_degree.get_mut(dependent).expect("known task");
                *deg -= 1;
                if *deg == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() != self.tasks.len() {
            let stuck: Vec<&str> = in_degree
                .iter()
                .filter(|(id, _)| !order.iter().any(|o| o.as_str() == id.as_str()))
                .map(|(id, _)| id.as_str())
                .collect();
            return Err(CoreError::Graph(format!(
                "cycle detected among tasks: {}",
                stuck.join(", ")
            )));
        }
        Ok(order)
    }

    /// Gates whose every blocking edge gates the given task
    pub fn gates_blocking<'a>(&'a self, task_id: &str) -> impl Iterator<Item = &'a Gate> + 'a {
        let task_id = task_id.to_string();
        self.gates.values().filter(move |g| g.blocks.contains(&task_id))
    }

    /// The gate a task feeds, if any (validated: at most one)
    pub fn feeder_gate(&self, task_id: &str) -> Option<&Gate> {
        self.gates.values().find(|g| g.depends_on.contains(task_id))
    }

    /// Tasks eligible for dispatch: all `requires` completed and every gate
    /// blocking the task already passed. Returned in stable topo/id order.
    pub fn ready_tasks(
        &self,
        completed: &BTreeSet<TaskId>,
        gate_passed: &BTreeSet<GateId>,
    ) -> Vec<TaskId> {
        let order = match self.topo_order() {
            Ok(order) => order,
            Err(_) => return Vec::new(),
        };
        order
            .into_iter()
            .filter(|id| !completed.contains(id))
            .filter(|id| self.tasks[id].requires.iter().all(|d| completed.contains(d)))
            .filter(|id| {
                self.gates_blocking(id)
                    .all(|g| gate_passed.contains(&g.id))
            })
            .collect()
    }

    /// Gates whose feeders are all completed but which have not passed yet
    pub fn gates_ready_to_run(
        &self,
        completed: &BTreeSet<TaskId>,
        gate_passed: &BTreeSet<GateId>,
    ) -> Vec<GateId> {
        self.gates
            .values()
            .filter(|g| !gate_passed.contains(&g.id))
            .filter(|g| g.depends_on.iter().all(|t| completed.contains(t)))
            .map(|g| g.id.clone())
            .collect()
    }

    /// True when every gate has passed and every task completed
    pub fn is_complete(&self, completed: &BTreeSet<TaskId>, gate_passed: &BTreeSet<GateId>) -> bool {
        self.tasks.keys().all(|t| completed.contains(t))
            && self.gates.keys().all(|g| gate_passed.contains(g))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::GateKind;
    use crate::task::ArtifactKind;
    use proptest::prelude::*;

    fn task(id: &str, requires: &[&str]) -> TaskSpec {
        TaskSpec::new(id, format!("task {}", id), ArtifactKind::Module)
            .with_requires(requires.iter().copied())
    }

    fn diamond() -> TaskGraph {
        let mut g = TaskGraph::new();
        g.add_task(task("a", &[]));
        g.add_task(task("b", &["a"]));
        g.add_task(task("c", &["a"]));
        g.add_task(task("d", &["b", "c"]));
        g
    }

    #[test]
    fn test_validate_ok() {
        let g = diamond();
        assert!(g.validate().is_ok());
    }

    #[test]
    fn test_cycle_detected() {
        let mut g = TaskGraph::new();
        g.add_task(task("a", &["b"]));
        g.add_task(task("b", &["a"]));
        let err = g.validate().unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let mut g = TaskGraph::new();
        g.add_task(task("a", &["ghost"]));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_topo_order_stable() {
        let g = diamond();
        let order = g.topo_order().unwrap();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_task_feeds_single_gate() {
        let mut g = diamond();
        g.add_gate(Gate::new("g1", GateKind::Import).with_depends_on(["b"]));
        g.add_gate(Gate::new("g2", GateKind::Schema).with_depends_on(["b"]));
        assert!(g.validate().is_err());
    }

    #[test]
    fn test_ready_respects_gate_barrier() {
        // A task in blocks(G) never becomes ready before G passes.
        let mut g = diamond();
        g.add_gate(
            Gate::new("g1", GateKind::Import)
                .with_depends_on(["b", "c"])
                .with_blocks(["d"]),
        );
        g.validate().unwrap();

        let mut completed = BTreeSet::new();
        let mut passed = BTreeSet::new();

        assert_eq!(g.ready_tasks(&completed, &passed), vec!["a"]);

        completed.insert("a".to_string());
        let ready = g.ready_tasks(&completed, &passed);
        assert_eq!(ready, vec!["b", "c"]);

        completed.insert("b".to_string());
        completed.insert("c".to_string());
        // d requires b,c (done) but is blocked by the unpassed gate.
        assert!(g.ready_tasks(&completed, &passed).is_empty());
        assert_eq!(g.gates_ready_to_run(&completed, &passed), vec!["g1"]);

        passed.insert("g1".to_string());
        assert_eq!(g.ready_tasks(&completed, &passed), vec!["d"]);

        completed.insert("d".to_string());
        assert!(g.is_complete(&completed, &passed));
    }

    #[test]
    fn test_feeder_gate_lookup() {
        let mut g = diamond();
        g.add_gate(Gate::new("g1", GateKind::Lint).with_depends_on(["a"]));
        assert_eq!(g.feeder_gate("a").map(|x| x.id.as_str()), Some("g1"));
        assert!(g.feeder_gate("d").is_none());
    }

    // Generate DAGs by construction: task i may only depend on tasks < i.
    fn arb_dag() -> impl Strategy<Value = TaskGraph> {
        (2usize..12).prop_flat_map(|n| {
            let deps = proptest::collection::vec(
                proptest::collection::btree_set(0usize..n.saturating_sub(1), 0..3),
                n,
            );
            deps.prop_map(move |per_task| {
                let mut g = TaskGraph::new();
                for (i, deps) in per_task.iter().enumerate() {
                    let requires: Vec<String> = deps
                        .iter()
                        .filter(|d| **d < i)
                        .map(|d| format!("t{:02}", d))
                        .collect();
                    g.add_task(
                        TaskSpec::new(format!("t{:02}", i), "generated", ArtifactKind::Module)
                            .with_requires(requires),
                    );
                }
                g
            })
        })
    }

    proptest! {
        // Construction-valid graphs always validate, and the topological
        // order respects every requires edge.
        #[test]
        fn prop_dag_acyclic(g in arb_dag()) {
            g.validate().unwrap();
            let order = g.topo_order().unwrap();
            prop_assert_eq!(order.len(), g.tasks.len());
            let position: BTreeMap<_, _> =
                order.iter().enumerate().map(|(i, id)| (id.clone(), i)).collect();
            for (id, task) in &g.tasks {
                for dep in &task.requires {
                    prop_assert!(position[dep] < position[id]);
                }
            }
        }

        // ready_tasks never yields a task whose dependencies are incomplete.
        #[test]
        fn prop_ready_tasks_deps_complete(g in arb_dag()) {
            let mut completed = BTreeSet::new();
            let passed = BTreeSet::new();
            loop {
                let ready = g.ready_tasks(&completed, &passed);
                if ready.is_empty() {
                    break;
                }
                for id in &ready {
                    for dep in &g.tasks[id].requires {
                        prop_assert!(completed.contains(dep));
                    }
                }
                completed.insert(ready[0].clone());
            }
            prop_assert_eq!(completed.len(), g.tasks.len());
        }
    }
}
