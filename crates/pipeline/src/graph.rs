//! Stage graph construction using petgraph.
//!
//! Stages are nodes, and an edge `u -> v` means `v` consumes the output of
//! `u`. A stage may only name keys that are already registered, so the graph
//! is acyclic by construction and node indices are a topological order.

use crate::config::ExecutorConfig;
use crate::stage::{DerivedStage, Inputs, SourceStage, Stage};
use crate::{Error, Port, Result, ResultStore, StageError, StageKey, StageValue};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::collections::HashMap;
use tracing::debug;

/// A buildable, runnable graph of typed stages.
///
/// Stages are registered with [`add_stage`](Self::add_stage) and friends, each
/// returning a typed [`Port`] used to wire later stages and to
/// [`run`](Self::run) a target.
pub struct Pipeline {
    /// The directed graph of stages.
    pub(crate) graph: DiGraph<Box<dyn Stage>, ()>,
    /// Map from stage keys to node indices.
    pub(crate) key_to_node: HashMap<StageKey, NodeIndex>,
    /// Outputs of the current run.
    pub(crate) store: ResultStore,
    pub(crate) config: ExecutorConfig,
}

impl Pipeline {
    /// Create an empty pipeline with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ExecutorConfig::default())
    }

    /// Create an empty pipeline with the given configuration.
    #[must_use]
    pub fn with_config(config: ExecutorConfig) -> Self {
        Self {
            graph: DiGraph::new(),
            key_to_node: HashMap::new(),
            store: ResultStore::new(),
            config,
        }
    }

    /// The executor configuration.
    #[must_use]
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Register a stage without inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageAlreadyExists`] if `id` is taken.
    pub fn add_stage<F, O>(&mut self, id: impl Into<StageKey>, func: F) -> Result<Port<O>>
    where
        F: Fn() -> O + Send + Sync + 'static,
        O: StageValue,
    {
        self.try_add_stage(id, move || Ok(func()))
    }

    /// Register a fallible stage without inputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageAlreadyExists`] if `id` is taken.
    pub fn try_add_stage<F, O>(&mut self, id: impl Into<StageKey>, func: F) -> Result<Port<O>>
    where
        F: Fn() -> std::result::Result<O, StageError> + Send + Sync + 'static,
        O: StageValue,
    {
        let key = id.into();
        self.register(Box::new(SourceStage::new(key.clone(), func)))?;
        Ok(Port::new(&key))
    }

    /// Register a stage consuming `inputs`.
    ///
    /// `inputs` is a single [`Port`] or a tuple of ports; the callable receives
    /// the corresponding value or tuple of values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::StageAlreadyExists`] if `id` is taken, or
    /// [`Error::UnknownDependency`] if an input is not registered in this
    /// pipeline.
    pub fn add_stage_with<I, F, O>(
        &mut self,
        id: impl Into<StageKey>,
        func: F,
        inputs: I,
    ) -> Result<Port<O>>
    where
        I: Inputs,
        F: Fn(I::Values) -> O + Send + Sync + 'static,
        O: StageValue,
    {
        self.try_add_stage_with(id, move |values| Ok(func(values)), inputs)
    }

    /// Register a fallible stage consuming `inputs`.
    ///
    /// # Errors
    ///
    /// Same as [`add_stage_with`](Self::add_stage_with).
    pub fn try_add_stage_with<I, F, O>(
        &mut self,
        id: impl Into<StageKey>,
        func: F,
        inputs: I,
    ) -> Result<Port<O>>
    where
        I: Inputs,
        F: Fn(I::Values) -> std::result::Result<O, StageError> + Send + Sync + 'static,
        O: StageValue,
    {
        let key = id.into();
        self.register(Box::new(DerivedStage::new(key.clone(), inputs, func)))?;
        Ok(Port::new(&key))
    }

    /// Register a stage whose output is the pair of `first` and `second`.
    ///
    /// # Errors
    ///
    /// Same as [`add_stage_with`](Self::add_stage_with).
    pub fn join<A, B>(
        &mut self,
        id: impl Into<StageKey>,
        first: Port<A>,
        second: Port<B>,
    ) -> Result<Port<(A, B)>>
    where
        A: StageValue,
        B: StageValue,
    {
        self.add_stage_with(id, |pair: (A, B)| pair, (first, second))
    }

    /// Validate and insert a stage with one edge per upstream key.
    ///
    /// Nothing is modified if validation fails.
    fn register(&mut self, stage: Box<dyn Stage>) -> Result<()> {
        let key = stage.key().to_string();
        if self.key_to_node.contains_key(&key) {
            return Err(Error::stage_already_exists(key));
        }

        let upstream_nodes = stage
            .upstream()
            .iter()
            .map(|dep| {
                self.key_to_node
                    .get(dep)
                    .copied()
                    .ok_or_else(|| Error::unknown_dependency(&key, dep))
            })
            .collect::<Result<Vec<_>>>()?;

        let node = self.graph.add_node(stage);
        for upstream in upstream_nodes {
            self.graph.add_edge(upstream, node, ());
        }
        self.key_to_node.insert(key.clone(), node);
        debug!(stage = %key, inputs = self.graph[node].upstream().len(), "Added stage node");

        Ok(())
    }

    /// Get the number of stages in the pipeline.
    #[must_use]
    pub fn stage_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Check if a stage exists in the pipeline.
    #[must_use]
    pub fn contains_stage(&self, key: &str) -> bool {
        self.key_to_node.contains_key(key)
    }

    /// Upstream keys of a stage, in the order they were wired.
    #[must_use]
    pub fn upstream_of(&self, key: &str) -> Option<&[StageKey]> {
        self.key_to_node
            .get(key)
            .map(|&node| self.graph[node].upstream())
    }

    /// Keys of the stages consuming `key`, sorted and deduplicated.
    #[must_use]
    pub fn downstream_of(&self, key: &str) -> Option<Vec<StageKey>> {
        let &node = self.key_to_node.get(key)?;
        let mut keys: Vec<StageKey> = self
            .graph
            .edges_directed(node, Direction::Outgoing)
            .map(|edge| self.graph[edge.target()].key().to_string())
            .collect();
        keys.sort();
        keys.dedup();
        Some(keys)
    }

    /// Static number of upstream edges of a stage.
    pub(crate) fn in_degree(&self, node: NodeIndex) -> usize {
        self.graph
            .edges_directed(node, Direction::Incoming)
            .count()
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stages: Vec<&str> = self
            .graph
            .node_indices()
            .map(|node| self.graph[node].key())
            .collect();
        f.debug_struct("Pipeline")
            .field("stages", &stages)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
