//! Dependency graph and batch planner (spec §4.1).
//!
//! The graph is an arena of node records plus two adjacency lists (parents,
//! children) indexed by [`TaskId`] (spec §9) — nodes never hold owning
//! references to each other, sidestepping cyclic-ownership concerns.

use crate::error::{HermesError, Result};
use crate::models::{RunStatus, Task, TaskId};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

struct Node {
    task: Task,
    run_status: RunStatus,
    parents: HashSet<TaskId>,
    children: HashSet<TaskId>,
}

/// Immutable-shape DAG over a fixed task list, with mutable per-node run
/// state (spec §3: I1-I3, the graph is immutable for one scheduler run —
/// only `run_status` moves).
pub struct DependencyGraph {
    nodes: HashMap<TaskId, Node>,
    /// Insertion order, used to break ties deterministically.
    order: Vec<TaskId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

impl DependencyGraph {
    /// Builds the graph, validating I1 (no cycles) and I2 (dependencies
    /// resolve to real tasks) up front.
    pub fn build(tasks: Vec<Task>) -> Result<Self> {
        let mut nodes: HashMap<TaskId, Node> = HashMap::new();
        let mut order = Vec::with_capacity(tasks.len());

        for task in tasks {
            if nodes.contains_key(&task.id) {
                return Err(HermesError::DuplicateTaskId(task.id.to_string()));
            }
            if task.dependencies.contains(&task.id) {
                return Err(HermesError::SelfDependency(task.id.to_string()));
            }
            order.push(task.id.clone());
            nodes.insert(
                task.id.clone(),
                Node {
                    parents: task.dependencies.clone(),
                    children: HashSet::new(),
                    run_status: RunStatus::Pending,
                    task,
                },
            );
        }

        // Validate I2 and build the reverse (children) adjacency list.
        let task_ids: Vec<TaskId> = order.clone();
        for id in &task_ids {
            let parents = nodes[id].parents.clone();
            for parent in &parents {
                if !nodes.contains_key(parent) {
                    return Err(HermesError::UnknownDependency {
                        task: id.to_string(),
                        dependency: parent.to_string(),
                    });
                }
            }
            for parent in parents {
                nodes.get_mut(&parent).unwrap().children.insert(id.clone());
            }
        }

        let graph = Self { nodes, order };
        graph.detect_cycle()?;

        info!(tasks = graph.nodes.len(), "dependency graph constructed");
        Ok(graph)
    }

    /// Three-color depth-first cycle detection (spec §4.1, §9). On failure,
    /// returns the full cycle node list.
    fn detect_cycle(&self) -> Result<()> {
        let mut color: HashMap<&TaskId, Color> = self
            .order
            .iter()
            .map(|id| (id, Color::White))
            .collect();
        let mut stack: Vec<TaskId> = Vec::new();

        for start in &self.order {
            if color[start] != Color::White {
                continue;
            }
            if let Some(cycle) = self.visit(start, &mut color, &mut stack) {
                return Err(HermesError::CycleDetected(
                    cycle.into_iter().map(|id| id.to_string()).collect(),
                ));
            }
        }
        Ok(())
    }

    fn visit<'a>(
        &'a self,
        id: &'a TaskId,
        color: &mut HashMap<&'a TaskId, Color>,
        stack: &mut Vec<TaskId>,
    ) -> Option<Vec<TaskId>> {
        color.insert(id, Color::Gray);
        stack.push(id.clone());

        // Children are the edges `a -> b` for `b in a.dependencies`, i.e.
        // traversing from a task to its dependencies follows `parents`.
        let mut deps: Vec<&TaskId> = self.nodes[id].parents.iter().collect();
        deps.sort();
        for dep in deps {
            match color.get(dep).copied().unwrap_or(Color::White) {
                Color::White => {
                    if let Some(cycle) = self.visit(dep, color, stack) {
                        return Some(cycle);
                    }
                }
                Color::Gray => {
                    let start = stack.iter().position(|n| n == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep.clone());
                    return Some(cycle);
                }
                Color::Black => {}
            }
        }

        stack.pop();
        color.insert(id, Color::Black);
        None
    }

    /// Pure preview of topological batches assuming every task eventually
    /// succeeds. Does not mutate run status (spec §4.1). Deterministic for a
    /// fixed input task list (spec §8).
    pub fn plan(&self) -> Vec<Vec<Task>> {
        let mut done: HashSet<TaskId> = self
            .nodes
            .iter()
            .filter(|(_, n)| n.run_status == RunStatus::Done)
            .map(|(id, _)| id.clone())
            .collect();
        let mut scheduled: HashSet<TaskId> = done.clone();
        let mut batches = Vec::new();

        loop {
            let mut frontier: Vec<&TaskId> = self
                .order
                .iter()
                .filter(|id| {
                    !scheduled.contains(*id)
                        && matches!(
                            self.nodes[*id].run_status,
                            RunStatus::Pending | RunStatus::Ready
                        )
                        && self.nodes[*id].parents.iter().all(|p| done.contains(p))
                })
                .collect();

            if frontier.is_empty() {
                break;
            }

            frontier.sort_by(|a, b| self.tie_break(a, b));

            // Partition the whole frontier before emitting anything, so one
            // non-parallelizable task doesn't fragment the parallel group
            // around it into multiple batches.
            let mut group: Vec<Task> = Vec::new();
            let mut singletons: Vec<Task> = Vec::new();
            for id in &frontier {
                let node = &self.nodes[*id];
                if node.task.parallelizable {
                    group.push(node.task.clone());
                } else {
                    singletons.push(node.task.clone());
                }
                scheduled.insert((*id).clone());
                done.insert((*id).clone());
            }

            if !group.is_empty() {
                batches.push(group);
            }
            for task in singletons {
                batches.push(vec![task]);
            }
        }

        batches
    }

    fn tie_break(&self, a: &TaskId, b: &TaskId) -> std::cmp::Ordering {
        let ta = &self.nodes[a].task;
        let tb = &self.nodes[b].task;
        ta.priority.cmp(&tb.priority).then_with(|| a.cmp(b))
    }

    /// Tasks currently eligible to run: `PENDING` promoted to `READY` once
    /// every parent is `DONE`, plus any already-`READY` task (spec §3, §4.1).
    pub fn ready_tasks(&mut self) -> Vec<Task> {
        let ids: Vec<TaskId> = self.order.clone();
        for id in &ids {
            let all_parents_done = self.nodes[id]
                .parents
                .iter()
                .all(|p| self.nodes[p].run_status == RunStatus::Done);
            let node = self.nodes.get_mut(id).unwrap();
            if node.run_status == RunStatus::Pending && all_parents_done {
                node.run_status = RunStatus::Ready;
            }
        }

        let mut ready: Vec<&TaskId> = ids
            .iter()
            .filter(|id| self.nodes[*id].run_status == RunStatus::Ready)
            .collect();
        ready.sort_by(|a, b| self.tie_break(a, b));
        ready
            .into_iter()
            .map(|id| self.nodes[id].task.clone())
            .collect()
    }

    /// `READY -> RUNNING` at dispatch. Idempotent if already `RUNNING`.
    pub fn mark_running(&mut self, id: &TaskId) -> Result<()> {
        let node = self.get_mut(id)?;
        match node.run_status {
            RunStatus::Pending | RunStatus::Ready => {
                node.run_status = RunStatus::Running;
                Ok(())
            }
            RunStatus::Running => Ok(()),
            other => Err(HermesError::InvalidTransition {
                task: id.to_string(),
                from: other.as_str(),
                to: "RUNNING",
            }),
        }
    }

    /// `RUNNING -> DONE` at successful completion. Idempotent if already
    /// `DONE`.
    pub fn mark_complete(&mut self, id: &TaskId) -> Result<()> {
        let node = self.get_mut(id)?;
        match node.run_status {
            RunStatus::Running => {
                node.run_status = RunStatus::Done;
                debug!(task = %id, "task marked DONE");
                Ok(())
            }
            RunStatus::Done => Ok(()),
            other => Err(HermesError::InvalidTransition {
                task: id.to_string(),
                from: other.as_str(),
                to: "DONE",
            }),
        }
    }

    /// `RUNNING -> FAILED`. A failed node never lets its descendants become
    /// `READY` (spec §4.1: "Failure semantics"). Idempotent if already
    /// `FAILED`.
    pub fn mark_failed(&mut self, id: &TaskId) -> Result<()> {
        let node = self.get_mut(id)?;
        match node.run_status {
            RunStatus::Running => {
                node.run_status = RunStatus::Failed;
                debug!(task = %id, "task marked FAILED");
                Ok(())
            }
            RunStatus::Failed => Ok(()),
            other => Err(HermesError::InvalidTransition {
                task: id.to_string(),
                from: other.as_str(),
                to: "FAILED",
            }),
        }
    }

    pub fn run_status(&self, id: &TaskId) -> Option<RunStatus> {
        self.nodes.get(id).map(|n| n.run_status)
    }

    /// Transitive descendants of a failed task that will never run this
    /// run (spec §4.1: "descendants are reported as SKIPPED").
    pub fn skipped_descendants(&self, id: &TaskId) -> Vec<TaskId> {
        let mut out = Vec::new();
        let mut stack: Vec<TaskId> = self
            .nodes
            .get(id)
            .map(|n| n.children.iter().cloned().collect())
            .unwrap_or_default();
        let mut seen: HashSet<TaskId> = HashSet::new();
        while let Some(next) = stack.pop() {
            if !seen.insert(next.clone()) {
                continue;
            }
            out.push(next.clone());
            if let Some(node) = self.nodes.get(&next) {
                stack.extend(node.children.iter().cloned());
            }
        }
        out
    }

    pub fn task(&self, id: &TaskId) -> Option<&Task> {
        self.nodes.get(id).map(|n| &n.task)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    fn get_mut(&mut self, id: &TaskId) -> Result<&mut Node> {
        self.nodes
            .get_mut(id)
            .ok_or_else(|| HermesError::TaskNotFound(id.to_string()))
    }
}
