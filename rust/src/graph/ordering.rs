//! Traversal order, hierarchy expansion and cycle detection.

use rustc_hash::{FxHashMap, FxHashSet};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};

use crate::models::{DependencyId, TaskId};

use super::{DependencyGraph, GraphError, Task, FINISH, START};

impl DependencyGraph {
    /// Leaf descendants of a task, or the task itself when it is a leaf.
    pub fn leaves_of(&self, id: TaskId) -> Vec<TaskId> {
        let mut leaves = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            match self.task(current) {
                Ok(task) if task.is_summary() => {
                    stack.extend(task.children.iter().rev().copied());
                }
                Ok(_) => leaves.push(current),
                Err(_) => {}
            }
        }
        leaves
    }

    /// Parent chain, nearest first.
    pub fn ancestors(&self, id: TaskId) -> Vec<TaskId> {
        let mut result = Vec::new();
        let mut current = self.task(id).ok().and_then(|t| t.parent);
        while let Some(parent) = current {
            result.push(parent);
            current = self.task(parent).ok().and_then(|t| t.parent);
        }
        result
    }

    pub fn is_ancestor(&self, ancestor: TaskId, id: TaskId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Links that drive a leaf forward: its own predecessors plus those
    /// inherited from its ancestors.
    pub fn incoming_links(&self, leaf: TaskId) -> Vec<DependencyId> {
        self.inherited_links(leaf, |task| &task.predecessors)
    }

    /// Links that bound a leaf backward: its own successors plus those
    /// inherited from its ancestors.
    pub fn outgoing_links(&self, leaf: TaskId) -> Vec<DependencyId> {
        self.inherited_links(leaf, |task| &task.successors)
    }

    fn inherited_links<F>(&self, leaf: TaskId, links: F) -> Vec<DependencyId>
    where
        F: Fn(&Task) -> &Vec<DependencyId>,
    {
        let mut result = Vec::new();
        for id in std::iter::once(leaf).chain(self.ancestors(leaf)) {
            if let Ok(task) = self.task(id) {
                result.extend(links(task).iter().copied());
            }
        }
        result
    }

    /// Leaves that must come before `leaf`, via real dependencies only.
    pub fn leaf_predecessors(&self, leaf: TaskId) -> Vec<TaskId> {
        self.incoming_links(leaf)
            .into_iter()
            .filter_map(|link| self.dependency(link).ok())
            .filter(|dep| !dep.synthetic)
            .flat_map(|dep| self.leaves_of(dep.predecessor))
            .collect()
    }

    /// Leaves that must come after `leaf`, via real dependencies only.
    pub fn leaf_successors(&self, leaf: TaskId) -> Vec<TaskId> {
        self.outgoing_links(leaf)
            .into_iter()
            .filter_map(|link| self.dependency(link).ok())
            .filter(|dep| !dep.synthetic)
            .flat_map(|dep| self.leaves_of(dep.successor))
            .collect()
    }

    /// Whether a new `predecessor -> successor` link would close a loop.
    pub fn would_create_cycle(&self, predecessor: TaskId, successor: TaskId) -> bool {
        let sources: FxHashSet<TaskId> = self.leaves_of(predecessor).into_iter().collect();
        let mut seen: FxHashSet<TaskId> = FxHashSet::default();
        let mut queue: VecDeque<TaskId> = self.leaves_of(successor).into_iter().collect();

        while let Some(current) = queue.pop_front() {
            if sources.contains(&current) {
                return true;
            }
            if !seen.insert(current) {
                continue;
            }
            queue.extend(self.leaf_successors(current));
        }
        false
    }

    /// Position of each task in the traversal order, indexed by task id.
    pub(crate) fn positions(&self) -> Vec<usize> {
        let mut positions = vec![usize::MAX; self.tasks.len()];
        for (pos, id) in self.order.iter().enumerate() {
            positions[id.index()] = pos;
        }
        positions
    }

    /// Keep the order valid after a new `predecessor -> successor` link.
    pub(super) fn ensure_order(
        &mut self,
        predecessor: TaskId,
        successor: TaskId,
    ) -> Result<(), GraphError> {
        let positions = self.positions();
        let successors = self.leaves_of(successor);
        let violated = self.leaves_of(predecessor).iter().any(|p| {
            successors
                .iter()
                .any(|s| positions[p.index()] >= positions[s.index()])
        });
        if violated {
            self.rearrange_all()?;
        }
        Ok(())
    }

    /// Insert one leaf into the traversal order consistent with its links.
    ///
    /// The task goes right before its earliest successor. When its latest
    /// predecessor sits after that point the whole order is rebuilt.
    /// Returns whether a full rearrangement was needed.
    pub fn arrange_task(&mut self, id: TaskId) -> Result<bool, GraphError> {
        let task = self.task(id)?;
        if task.is_sentinel() || task.is_summary() {
            return Ok(false);
        }
        self.order.retain(|t| *t != id);

        let positions = self.positions();
        let lo = self
            .leaf_predecessors(id)
            .iter()
            .map(|p| positions[p.index()] + 1)
            .max()
            .unwrap_or(1);
        let hi = self
            .leaf_successors(id)
            .iter()
            .map(|s| positions[s.index()])
            .min()
            .unwrap_or(self.order.len() - 1);

        if lo <= hi {
            self.order.insert(hi, id);
            Ok(false)
        } else {
            self.rearrange_all()?;
            Ok(true)
        }
    }

    /// Rebuild the traversal order with Kahn's algorithm.
    ///
    /// Ready tasks are emitted lowest id first so the result depends only on
    /// the graph contents.
    pub fn rearrange_all(&mut self) -> Result<(), GraphError> {
        let leaves: Vec<TaskId> = self
            .tasks()
            .filter(|t| !t.is_summary())
            .map(|t| t.id)
            .collect();

        let mut in_degree: FxHashMap<TaskId, usize> = leaves.iter().map(|&id| (id, 0)).collect();
        let mut edges: FxHashMap<TaskId, Vec<TaskId>> =
            FxHashMap::with_capacity_and_hasher(leaves.len(), Default::default());
        for &leaf in &leaves {
            let successors = self.leaf_successors(leaf);
            for succ in &successors {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree += 1;
                }
            }
            edges.insert(leaf, successors);
        }

        let mut ready: BinaryHeap<Reverse<TaskId>> = leaves
            .iter()
            .filter(|id| in_degree[*id] == 0)
            .map(|&id| Reverse(id))
            .collect();

        let mut order = Vec::with_capacity(leaves.len() + 2);
        order.push(START);
        while let Some(Reverse(id)) = ready.pop() {
            order.push(id);
            for succ in &edges[&id] {
                if let Some(degree) = in_degree.get_mut(succ) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(*succ));
                    }
                }
            }
        }

        if order.len() != leaves.len() + 1 {
            // Report one edge between two tasks left on the loop.
            for &leaf in &leaves {
                if in_degree[&leaf] == 0 {
                    continue;
                }
                if let Some(&succ) = edges[&leaf].iter().find(|s| in_degree[*s] > 0) {
                    return Err(GraphError::CycleDetected {
                        predecessor: leaf,
                        successor: succ,
                    });
                }
            }
            let first = leaves[0];
            return Err(GraphError::CycleDetected {
                predecessor: first,
                successor: first,
            });
        }

        order.push(FINISH);
        self.order = order;
        Ok(())
    }

    /// Summary tasks, deepest first.
    pub fn summaries_by_depth(&self) -> Vec<TaskId> {
        let mut summaries: Vec<(u32, TaskId)> = self
            .tasks()
            .filter(|t| t.is_summary())
            .map(|t| (t.depth, t.id))
            .collect();
        summaries.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));
        summaries.into_iter().map(|(_, id)| id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DependencySpec, TaskSpec};
    use chrono::Duration;

    fn task(graph: &mut DependencyGraph, name: &str) -> TaskId {
        graph.add_task(TaskSpec::new(name, Duration::days(1))).unwrap()
    }

    #[test]
    fn test_dependency_against_order_rearranges() {
        let mut graph = DependencyGraph::new();
        let a = task(&mut graph, "a");
        let b = task(&mut graph, "b");
        assert_eq!(graph.order(), &[START, a, b, FINISH]);

        graph.add_dependency(DependencySpec::finish_to_start(b, a)).unwrap();
        assert_eq!(graph.order(), &[START, b, a, FINISH]);
    }

    #[test]
    fn test_arrange_task_places_before_successor() {
        let mut graph = DependencyGraph::new();
        let a = task(&mut graph, "a");
        let b = task(&mut graph, "b");
        let c = task(&mut graph, "c");
        graph.add_dependency(DependencySpec::finish_to_start(a, c)).unwrap();
        graph.add_dependency(DependencySpec::finish_to_start(b, c)).unwrap();

        let rearranged = graph.arrange_task(c).unwrap();
        assert!(!rearranged);
        assert_eq!(graph.order(), &[START, a, b, c, FINISH]);
    }

    #[test]
    fn test_rearrange_all_is_deterministic() {
        let mut graph = DependencyGraph::new();
        let a = task(&mut graph, "a");
        let b = task(&mut graph, "b");
        let c = task(&mut graph, "c");
        graph.add_dependency(DependencySpec::finish_to_start(c, a)).unwrap();

        graph.rearrange_all().unwrap();
        let first = graph.order().to_vec();
        graph.rearrange_all().unwrap();
        assert_eq!(graph.order(), first.as_slice());
        assert_eq!(first, vec![START, b, c, a, FINISH]);
    }

    #[test]
    fn test_summary_dependency_expands_to_leaves() {
        let mut graph = DependencyGraph::new();
        let summary = task(&mut graph, "summary");
        let x = graph
            .add_task(TaskSpec::new("x", Duration::days(1)).with_parent(summary))
            .unwrap();
        let y = graph
            .add_task(TaskSpec::new("y", Duration::days(1)).with_parent(summary))
            .unwrap();
        let after = task(&mut graph, "after");
        graph
            .add_dependency(DependencySpec::finish_to_start(after, summary))
            .unwrap();

        assert_eq!(graph.leaves_of(summary), vec![x, y]);
        assert_eq!(graph.leaf_successors(after), vec![x, y]);
        assert_eq!(graph.leaf_predecessors(y), vec![after]);
        assert_eq!(graph.order(), &[START, after, x, y, FINISH]);
    }

    #[test]
    fn test_summaries_deepest_first() {
        let mut graph = DependencyGraph::new();
        let top = task(&mut graph, "top");
        let mid = graph
            .add_task(TaskSpec::new("mid", Duration::days(1)).with_parent(top))
            .unwrap();
        graph
            .add_task(TaskSpec::new("leaf", Duration::days(1)).with_parent(mid))
            .unwrap();
        assert_eq!(graph.summaries_by_depth(), vec![mid, top]);
    }
}
