//! Minimal upstream subgraphs and their execution plans.

use crate::{Error, Pipeline, Port, Result, StageKey};
use petgraph::graph::NodeIndex;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::debug;

/// The stages needed to produce one target, grouped by dependency level.
///
/// Each level contains stages that have no dependencies on each other and
/// could run concurrently. The outer vector is ordered by dependency level:
/// every upstream of a stage in level N sits in a level below N.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionPlan {
    target: StageKey,
    levels: Vec<Vec<StageKey>>,
}

impl ExecutionPlan {
    /// Key of the planned target.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Stages grouped by dependency level, each level sorted by key.
    #[must_use]
    pub fn levels(&self) -> &[Vec<StageKey>] {
        &self.levels
    }

    /// All stages in a valid topological order.
    pub fn order(&self) -> impl Iterator<Item = &str> {
        self.levels.iter().flatten().map(String::as_str)
    }

    /// Number of stages in the plan.
    #[must_use]
    pub fn len(&self) -> usize {
        self.levels.iter().map(Vec::len).sum()
    }

    /// Whether the plan is empty. A plan always contains its target.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Whether `key` is part of the plan.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.levels.iter().flatten().any(|k| k == key)
    }
}

impl Pipeline {
    /// Compute the minimal upstream subgraph of a stage.
    ///
    /// Breadth-first search over upstream edges starting at `key`. The result
    /// includes `key` itself.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStage`] if `key` or any key reached from it is
    /// not part of this pipeline.
    pub(crate) fn upstream_closure(&self, key: &str) -> Result<HashSet<NodeIndex>> {
        let start = self.node_index(key)?;
        let mut closure = HashSet::from([start]);
        let mut frontier = VecDeque::from([start]);

        while let Some(current) = frontier.pop_front() {
            for dep in self.graph[current].upstream() {
                let dep_node = self.node_index(dep)?;
                if closure.insert(dep_node) {
                    frontier.push_back(dep_node);
                }
            }
        }

        debug!(stage = key, stages = closure.len(), "Computed upstream subgraph");
        Ok(closure)
    }

    fn node_index(&self, key: &str) -> Result<NodeIndex> {
        self.key_to_node
            .get(key)
            .copied()
            .ok_or_else(|| Error::unknown_stage(key))
    }

    /// Plan the execution of `target` without running anything.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownStage`] if the port does not belong to this
    /// pipeline.
    pub fn plan<T>(&self, target: &Port<T>) -> Result<ExecutionPlan> {
        let closure = self.upstream_closure(target.key())?;

        // Stages can only depend on earlier registrations, so index order is topological.
        let mut sorted: Vec<NodeIndex> = closure.into_iter().collect();
        sorted.sort_unstable();

        let mut levels: Vec<Vec<StageKey>> = Vec::new();
        let mut level_of: HashMap<&str, usize> = HashMap::new();
        for node in sorted {
            let stage = &self.graph[node];
            let level = stage
                .upstream()
                .iter()
                .filter_map(|dep| level_of.get(dep.as_str()))
                .map(|&dep_level| dep_level + 1)
                .max()
                .unwrap_or(0);

            if level >= levels.len() {
                levels.resize_with(level + 1, Vec::new);
            }
            levels[level].push(stage.key().to_string());
            level_of.insert(stage.key(), level);
        }

        for level in &mut levels {
            level.sort();
        }

        Ok(ExecutionPlan {
            target: target.key().to_string(),
            levels,
        })
    }
}
