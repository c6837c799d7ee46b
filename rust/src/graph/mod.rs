//! Task/dependency arena bounded by start and finish sentinels.
//!
//! Tasks and dependencies live in flat tables addressed by [`TaskId`] and
//! [`DependencyId`]; predecessor and successor lists are index lists, so the
//! graph holds no reference cycles.
//!
//! Invariants maintained by every mutation:
//! - A regular, non-external leaf task with no real predecessors, own or
//!   inherited from an ancestor, has exactly one synthetic link from the
//!   start sentinel; one with no real successors has exactly one synthetic
//!   link to the finish sentinel. Summary and
//!   external tasks have no sentinel links.
//! - The precedence graph over leaf tasks (dependencies on a summary task
//!   expanded to its leaf descendants) is acyclic.
//! - `order` holds the start sentinel, every leaf task, then the finish
//!   sentinel, in an order consistent with precedence.

mod ordering;

use chrono::Duration;
use thiserror::Error;

use crate::models::{
    Constraint, DependencyId, DependencySpec, RelationType, TaskId, TaskSpec,
};
use crate::schedule::{ScheduleMode, ScheduleRecord};

/// Id of the start sentinel in every graph.
pub const START: TaskId = TaskId(0);
/// Id of the finish sentinel in every graph.
pub const FINISH: TaskId = TaskId(1);

/// Longest task duration or dependency lag accepted, in days (1000 years).
pub const MAX_DURATION_DAYS: i64 = 365_250;

/// Errors raised by structural graph edits. The graph is unchanged when one is returned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("Dependency {predecessor} -> {successor} would create a cycle")]
    CycleDetected {
        predecessor: TaskId,
        successor: TaskId,
    },
    #[error("Task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("Dependency not found: {0}")]
    DependencyNotFound(DependencyId),
    #[error("Sentinel task cannot be edited: {0}")]
    SentinelTask(TaskId),
    #[error("{parent} cannot be the parent of {task}")]
    InvalidParent { task: TaskId, parent: TaskId },
    #[error("Duration of {0} days is out of range")]
    DurationOutOfRange(i64),
}

fn check_duration(duration: Duration) -> Result<(), GraphError> {
    let days = duration.num_days();
    if days.abs() > MAX_DURATION_DAYS {
        return Err(GraphError::DurationOutOfRange(days));
    }
    Ok(())
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskKind {
    Regular,
    StartSentinel,
    FinishSentinel,
}

/// A task node.
#[derive(Clone, Debug)]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    pub duration: Duration,
    pub constraint: Constraint,
    pub parent: Option<TaskId>,
    pub children: Vec<TaskId>,
    /// Number of ancestors.
    pub depth: u32,
    pub external: bool,
    pub kind: TaskKind,
    pub predecessors: Vec<DependencyId>,
    pub successors: Vec<DependencyId>,
    records: [ScheduleRecord; 3],
}

impl Task {
    fn new(id: TaskId, spec: TaskSpec, depth: u32) -> Self {
        Self {
            id,
            name: spec.name,
            duration: spec.duration.max(Duration::zero()),
            constraint: spec.constraint,
            parent: spec.parent,
            children: Vec::new(),
            depth,
            external: spec.external,
            kind: TaskKind::Regular,
            predecessors: Vec::new(),
            successors: Vec::new(),
            records: Default::default(),
        }
    }

    fn sentinel(id: TaskId, name: &str, kind: TaskKind) -> Self {
        Self {
            kind,
            ..Self::new(id, TaskSpec::new(name, Duration::zero()), 0)
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.kind != TaskKind::Regular
    }

    pub fn is_summary(&self) -> bool {
        !self.children.is_empty()
    }

    pub fn record(&self, mode: ScheduleMode) -> &ScheduleRecord {
        &self.records[mode.index()]
    }

    pub fn records(&self) -> &[ScheduleRecord; 3] {
        &self.records
    }

    pub(crate) fn record_mut(&mut self, mode: ScheduleMode) -> &mut ScheduleRecord {
        &mut self.records[mode.index()]
    }

    fn invalidate(&mut self) {
        for record in &mut self.records {
            record.invalidate();
        }
    }
}

/// A precedence link. Synthetic links connect tasks to the sentinels.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub id: DependencyId,
    pub predecessor: TaskId,
    pub successor: TaskId,
    pub relation: RelationType,
    pub lag: Duration,
    pub synthetic: bool,
}

/// The dependency graph of one project.
#[derive(Clone, Debug)]
pub struct DependencyGraph {
    tasks: Vec<Option<Task>>,
    dependencies: Vec<Option<Dependency>>,
    order: Vec<TaskId>,
}

impl Default for DependencyGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self {
            tasks: vec![
                Some(Task::sentinel(START, "start", TaskKind::StartSentinel)),
                Some(Task::sentinel(FINISH, "finish", TaskKind::FinishSentinel)),
            ],
            dependencies: Vec::new(),
            order: vec![START, FINISH],
        }
    }

    pub fn task(&self, id: TaskId) -> Result<&Task, GraphError> {
        self.tasks
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::TaskNotFound(id))
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Result<&mut Task, GraphError> {
        self.tasks
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .ok_or(GraphError::TaskNotFound(id))
    }

    /// Look up a task that callers may edit (not a sentinel).
    fn regular_mut(&mut self, id: TaskId) -> Result<&mut Task, GraphError> {
        let task = self.task_mut(id)?;
        if task.is_sentinel() {
            return Err(GraphError::SentinelTask(id));
        }
        Ok(task)
    }

    fn ensure_regular(&self, id: TaskId) -> Result<&Task, GraphError> {
        let task = self.task(id)?;
        if task.is_sentinel() {
            return Err(GraphError::SentinelTask(id));
        }
        Ok(task)
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.task(id).is_ok()
    }

    pub fn dependency(&self, id: DependencyId) -> Result<&Dependency, GraphError> {
        self.dependencies
            .get(id.index())
            .and_then(Option::as_ref)
            .ok_or(GraphError::DependencyNotFound(id))
    }

    /// Real tasks, sentinels excluded.
    pub fn tasks(&self) -> impl Iterator<Item = &Task> {
        self.all_tasks().filter(|t| !t.is_sentinel())
    }

    /// Every task including the sentinels.
    pub fn all_tasks(&self) -> impl Iterator<Item = &Task> {
        self.tasks.iter().flatten()
    }

    /// Real dependencies, sentinel links excluded.
    pub fn dependencies(&self) -> impl Iterator<Item = &Dependency> {
        self.dependencies.iter().flatten().filter(|d| !d.synthetic)
    }

    pub fn task_count(&self) -> usize {
        self.tasks().count()
    }

    /// Size of the task table; every `TaskId` index is below this.
    pub fn capacity(&self) -> usize {
        self.tasks.len()
    }

    /// Traversal order: start sentinel, leaf tasks, finish sentinel.
    pub fn order(&self) -> &[TaskId] {
        &self.order
    }

    pub fn add_task(&mut self, spec: TaskSpec) -> Result<TaskId, GraphError> {
        check_duration(spec.duration)?;
        let depth = match spec.parent {
            Some(parent) => self.ensure_regular(parent)?.depth + 1,
            None => 0,
        };
        let parent = spec.parent;
        let id = TaskId(self.tasks.len() as u32);
        self.tasks.push(Some(Task::new(id, spec, depth)));

        if let Some(parent) = parent {
            self.attach_child(parent, id)?;
        }
        self.relink_sentinels(id)?;
        self.arrange_task(id)?;
        Ok(id)
    }

    /// Remove a task and its whole subtree. Returns the removed ids.
    pub fn remove_task(&mut self, id: TaskId) -> Result<Vec<TaskId>, GraphError> {
        let parent = self.ensure_regular(id)?.parent;
        let subtree = self.subtree(id);

        let mut touched = Vec::new();
        for &task_id in &subtree {
            let task = self.task(task_id)?;
            let links: Vec<DependencyId> = task
                .predecessors
                .iter()
                .chain(task.successors.iter())
                .copied()
                .collect();
            for link in links {
                if let Some(dep) = self.detach_dependency(link) {
                    touched.push(dep.predecessor);
                    touched.push(dep.successor);
                }
            }
        }

        self.order.retain(|t| !subtree.contains(t));
        for &task_id in &subtree {
            self.tasks[task_id.index()] = None;
        }
        if let Some(parent) = parent {
            self.detach_child(parent, id)?;
            self.invalidate(parent);
        }

        touched.sort();
        touched.dedup();
        for task_id in touched {
            if self.contains(task_id) {
                self.relink_subtree(task_id)?;
                self.invalidate(task_id);
            }
        }
        Ok(subtree)
    }

    pub fn add_dependency(&mut self, spec: DependencySpec) -> Result<DependencyId, GraphError> {
        let (pred, succ) = (spec.predecessor, spec.successor);
        self.ensure_regular(pred)?;
        self.ensure_regular(succ)?;
        check_duration(spec.lag)?;
        if self.would_create_cycle(pred, succ) {
            return Err(GraphError::CycleDetected {
                predecessor: pred,
                successor: succ,
            });
        }

        let id = self.insert_dependency(pred, succ, spec.relation, spec.lag, false);
        self.relink_subtree(pred)?;
        self.relink_subtree(succ)?;
        self.invalidate_leaves(succ);
        self.ensure_order(pred, succ)?;
        Ok(id)
    }

    pub fn remove_dependency(&mut self, id: DependencyId) -> Result<Dependency, GraphError> {
        let dep = *self.dependency(id)?;
        if dep.synthetic {
            return Err(GraphError::DependencyNotFound(id));
        }
        self.detach_dependency(id);
        self.relink_subtree(dep.predecessor)?;
        self.relink_subtree(dep.successor)?;
        self.invalidate_leaves(dep.successor);
        Ok(dep)
    }

    pub fn update_dependency(
        &mut self,
        id: DependencyId,
        relation: RelationType,
        lag: Duration,
    ) -> Result<(), GraphError> {
        check_duration(lag)?;
        let dep = self
            .dependencies
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .filter(|d| !d.synthetic)
            .ok_or(GraphError::DependencyNotFound(id))?;
        dep.relation = relation;
        dep.lag = lag;
        let successor = dep.successor;
        self.invalidate_leaves(successor);
        Ok(())
    }

    pub fn set_name(&mut self, id: TaskId, name: String) -> Result<(), GraphError> {
        self.regular_mut(id)?.name = name;
        Ok(())
    }

    pub fn set_duration(&mut self, id: TaskId, duration: Duration) -> Result<(), GraphError> {
        check_duration(duration)?;
        let task = self.regular_mut(id)?;
        task.duration = duration.max(Duration::zero());
        task.invalidate();
        Ok(())
    }

    pub fn set_constraint(&mut self, id: TaskId, constraint: Constraint) -> Result<(), GraphError> {
        let task = self.regular_mut(id)?;
        task.constraint = constraint;
        task.invalidate();
        Ok(())
    }

    pub fn set_external(&mut self, id: TaskId, external: bool) -> Result<(), GraphError> {
        let task = self.regular_mut(id)?;
        task.external = external;
        task.invalidate();
        self.relink_sentinels(id)
    }

    /// Move a task (with its subtree) under a new parent, or to the top level.
    ///
    /// Rejected with `CycleDetected` when the move closes a precedence loop,
    /// which happens when inherited dependencies link a task to its own ancestor.
    pub fn set_parent(&mut self, id: TaskId, parent: Option<TaskId>) -> Result<(), GraphError> {
        let old = self.ensure_regular(id)?.parent;
        if let Some(new_parent) = parent {
            self.ensure_regular(new_parent)?;
            if new_parent == id || self.is_ancestor(id, new_parent) {
                return Err(GraphError::InvalidParent {
                    task: id,
                    parent: new_parent,
                });
            }
        }
        if old == parent {
            return Ok(());
        }

        self.move_task(id, parent)?;
        if let Err(err) = self.rearrange_all() {
            self.move_task(id, old)?;
            self.rearrange_all()?;
            return Err(err);
        }
        Ok(())
    }

    /// Mark all of a task's records for recomputation.
    pub(crate) fn invalidate(&mut self, id: TaskId) {
        if let Ok(task) = self.task_mut(id) {
            task.invalidate();
        }
    }

    /// Invalidate every leaf a dependency on `id` applies to.
    pub(crate) fn invalidate_leaves(&mut self, id: TaskId) {
        for leaf in self.leaves_of(id) {
            self.invalidate(leaf);
        }
    }

    pub(crate) fn invalidate_all(&mut self) {
        for task in self.tasks.iter_mut().flatten() {
            task.invalidate();
        }
    }

    pub(crate) fn reset_records(&mut self) {
        for task in self.tasks.iter_mut().flatten() {
            for record in &mut task.records {
                record.reset();
            }
        }
    }

    fn insert_dependency(
        &mut self,
        predecessor: TaskId,
        successor: TaskId,
        relation: RelationType,
        lag: Duration,
        synthetic: bool,
    ) -> DependencyId {
        let id = DependencyId(self.dependencies.len() as u32);
        self.dependencies.push(Some(Dependency {
            id,
            predecessor,
            successor,
            relation,
            lag,
            synthetic,
        }));
        if let Ok(task) = self.task_mut(predecessor) {
            task.successors.push(id);
        }
        if let Ok(task) = self.task_mut(successor) {
            task.predecessors.push(id);
        }
        id
    }

    /// Take a dependency out of the table and both endpoint lists.
    fn detach_dependency(&mut self, id: DependencyId) -> Option<Dependency> {
        let dep = self.dependencies.get_mut(id.index())?.take()?;
        if let Ok(task) = self.task_mut(dep.predecessor) {
            task.successors.retain(|d| *d != id);
        }
        if let Ok(task) = self.task_mut(dep.successor) {
            task.predecessors.retain(|d| *d != id);
        }
        Some(dep)
    }

    /// (Dis)connect a task from the sentinels so the linking invariant holds.
    ///
    /// Links inherited from ancestors count as real: a leaf under a summary
    /// with predecessors is already driven by them.
    fn relink_sentinels(&mut self, id: TaskId) -> Result<(), GraphError> {
        let task = self.task(id)?;
        if task.is_sentinel() {
            return Ok(());
        }
        let eligible = !task.is_summary() && !task.external;

        let (_, start_link) = self.classify_links(&task.predecessors);
        let (_, finish_link) = self.classify_links(&task.successors);
        let (has_real_pred, _) = self.classify_links(&self.incoming_links(id));
        let (has_real_succ, _) = self.classify_links(&self.outgoing_links(id));

        let mut changed = false;
        match (eligible && !has_real_pred, start_link) {
            (true, None) => {
                self.insert_dependency(START, id, RelationType::FinishToStart, Duration::zero(), true);
                changed = true;
            }
            (false, Some(link)) => {
                self.detach_dependency(link);
                changed = true;
            }
            _ => {}
        }
        match (eligible && !has_real_succ, finish_link) {
            (true, None) => {
                self.insert_dependency(id, FINISH, RelationType::FinishToStart, Duration::zero(), true);
                self.invalidate(FINISH);
                changed = true;
            }
            (false, Some(link)) => {
                self.detach_dependency(link);
                self.invalidate(FINISH);
                changed = true;
            }
            _ => {}
        }
        if changed {
            self.invalidate(id);
        }
        Ok(())
    }

    /// Relink a task and every descendant, which all inherit its links.
    fn relink_subtree(&mut self, id: TaskId) -> Result<(), GraphError> {
        for task_id in self.subtree(id) {
            self.relink_sentinels(task_id)?;
        }
        Ok(())
    }

    /// Whether a link list has a real entry, and its synthetic entry if any.
    fn classify_links(&self, links: &[DependencyId]) -> (bool, Option<DependencyId>) {
        let mut has_real = false;
        let mut synthetic = None;
        for &link in links {
            match self.dependency(link) {
                Ok(dep) if dep.synthetic => synthetic = Some(link),
                Ok(_) => has_real = true,
                Err(_) => {}
            }
        }
        (has_real, synthetic)
    }

    fn attach_child(&mut self, parent: TaskId, child: TaskId) -> Result<(), GraphError> {
        let parent_task = self.task_mut(parent)?;
        let was_leaf = parent_task.children.is_empty();
        parent_task.children.push(child);
        parent_task.invalidate();
        if was_leaf {
            self.order.retain(|t| *t != parent);
            self.relink_sentinels(parent)?;
        }
        Ok(())
    }

    fn detach_child(&mut self, parent: TaskId, child: TaskId) -> Result<(), GraphError> {
        let parent_task = self.task_mut(parent)?;
        parent_task.children.retain(|c| *c != child);
        parent_task.invalidate();
        if parent_task.children.is_empty() {
            self.relink_sentinels(parent)?;
            self.arrange_task(parent)?;
        }
        Ok(())
    }

    /// Re-parent without touching the traversal order; callers rearrange.
    fn move_task(&mut self, id: TaskId, parent: Option<TaskId>) -> Result<(), GraphError> {
        let previous = self.task(id)?.parent;
        if let Some(old) = previous {
            let old_task = self.task_mut(old)?;
            old_task.children.retain(|c| *c != id);
            old_task.invalidate();
            self.relink_sentinels(old)?;
        }

        let depth = match parent {
            Some(p) => self.task(p)?.depth + 1,
            None => 0,
        };
        self.task_mut(id)?.parent = parent;
        if let Some(new_parent) = parent {
            let parent_task = self.task_mut(new_parent)?;
            parent_task.children.push(id);
            parent_task.invalidate();
            self.relink_sentinels(new_parent)?;
        }
        self.set_depth(id, depth)?;
        self.relink_subtree(id)?;
        self.invalidate_leaves(id);
        Ok(())
    }

    fn set_depth(&mut self, id: TaskId, depth: u32) -> Result<(), GraphError> {
        let task = self.task_mut(id)?;
        task.depth = depth;
        let children = task.children.clone();
        for child in children {
            self.set_depth(child, depth + 1)?;
        }
        Ok(())
    }

    /// `id` followed by all of its descendants.
    fn subtree(&self, id: TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            result.push(current);
            if let Ok(task) = self.task(current) {
                stack.extend(task.children.iter().rev().copied());
            }
        }
        result
    }
}
