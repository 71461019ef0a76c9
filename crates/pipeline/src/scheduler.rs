//! Concurrent topological execution of a target's upstream subgraph.
//!
//! - A bounded pool of scoped OS threads drains one shared ready queue
//! - In-degree countdown restricted to the subgraph enforces dependency order
//! - The first stage failure short-circuits all remaining work

use crate::config::ExecutorConfig;
use crate::stage::Stage;
use crate::{Error, Pipeline, Port, Result, ResultStore, StageValue};
use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use std::any::Any;
use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};
use std::thread;
use tracing::{Span, debug, debug_span, trace, warn};

/// Mutable state shared by the workers of one run.
#[derive(Debug)]
struct RunState {
    ready: VecDeque<NodeIndex>,
    in_degree: HashMap<NodeIndex, usize>,
    /// Stages of the subgraph that have not completed yet.
    remaining: usize,
    /// Stages dequeued but not finished.
    in_flight: usize,
    completed: usize,
    failure: Option<Error>,
}

/// Coordinates the workers of a single run.
struct Coordinator<'a> {
    graph: &'a DiGraph<Box<dyn Stage>, ()>,
    store: &'a ResultStore,
    state: Mutex<RunState>,
    wake: Condvar,
    failed: AtomicBool,
}

impl<'a> Coordinator<'a> {
    fn new(pipeline: &'a Pipeline, subgraph: &HashSet<NodeIndex>) -> Self {
        let in_degree: HashMap<NodeIndex, usize> = subgraph
            .iter()
            .map(|&node| (node, pipeline.in_degree(node)))
            .collect();

        let mut ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|&(_, &degree)| degree == 0)
            .map(|(&node, _)| node)
            .collect();
        ready.sort_unstable();

        Self {
            graph: &pipeline.graph,
            store: &pipeline.store,
            state: Mutex::new(RunState {
                ready: ready.into(),
                in_degree,
                remaining: subgraph.len(),
                in_flight: 0,
                completed: 0,
                failure: None,
            }),
            wake: Condvar::new(),
            failed: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RunState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Worker loop: execute ready stages until done, failed or stalled.
    fn work(&self) {
        while let Some(node) = self.next_ready() {
            let stage = &self.graph[node];
            trace!(stage = stage.key(), "Executing stage");
            let outcome = execute(stage.as_ref(), self.store);
            self.finish(node, outcome);
        }
    }

    /// Block until a stage is ready, or return `None` when the worker should exit.
    fn next_ready(&self) -> Option<NodeIndex> {
        let mut state = self.lock();
        loop {
            if self.failed.load(Ordering::Acquire) || state.remaining == 0 {
                return None;
            }
            if let Some(node) = state.ready.pop_front() {
                state.in_flight += 1;
                return Some(node);
            }
            if state.in_flight == 0 {
                // Nothing queued, nothing running, work left: no stage can ever become ready.
                warn!(remaining = state.remaining, "Scheduler stalled");
                return None;
            }
            state = self
                .wake
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Record the outcome of a stage and release its ready downstream neighbours.
    fn finish(&self, node: NodeIndex, outcome: Result<()>) {
        let mut state = self.lock();
        state.in_flight -= 1;

        match outcome {
            Ok(()) => {
                state.completed += 1;
                state.remaining -= 1;
                for edge in self.graph.edges_directed(node, Direction::Outgoing) {
                    let next = edge.target();
                    // Neighbours outside the subgraph have no entry.
                    if let Some(degree) = state.in_degree.get_mut(&next) {
                        *degree -= 1;
                        if *degree == 0 {
                            state.ready.push_back(next);
                        }
                    }
                }
            }
            Err(err) => {
                debug!(stage = self.graph[node].key(), error = %err, "Stage failed, stopping run");
                if state.failure.is_none() {
                    state.failure = Some(err);
                }
                self.failed.store(true, Ordering::Release);
            }
        }

        drop(state);
        self.wake.notify_all();
    }

    fn into_state(self) -> RunState {
        self.state
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

/// Run a stage, turning a panic into [`Error::Runtime`].
fn execute(stage: &dyn Stage, store: &ResultStore) -> Result<()> {
    panic::catch_unwind(AssertUnwindSafe(|| stage.run(store)))
        .unwrap_or_else(|payload| Err(Error::runtime(stage.key(), panic_message(&*payload))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .map_or_else(
            || "stage panicked".to_string(),
            |message| format!("stage panicked: {message}"),
        )
}

impl Pipeline {
    /// Run `target` and its upstream subgraph on the configured number of workers.
    ///
    /// # Errors
    ///
    /// See [`run_with_workers`](Self::run_with_workers).
    pub fn run<T: StageValue>(&mut self, target: &Port<T>) -> Result<T> {
        let workers = self.config.workers;
        self.run_with_workers(target, workers)
    }

    /// Run `target` and exactly the stages it transitively depends on.
    ///
    /// Results of previous runs are discarded first. Independent stages may run
    /// concurrently on up to `workers` OS threads; a stage only starts once all
    /// of its upstream stages completed.
    ///
    /// # Errors
    ///
    /// - [`Error::InvalidThreadCount`] if `workers` is zero or above the available parallelism
    /// - [`Error::UnknownStage`] if `target` does not belong to this pipeline
    /// - [`Error::Io`] / [`Error::Runtime`] for the first failing stage callable
    /// - [`Error::TypeMismatch`] if a stored value does not have the expected type
    /// - [`Error::StageCountMismatch`] if the run ended with stages left unexecuted
    pub fn run_with_workers<T: StageValue>(
        &mut self,
        target: &Port<T>,
        workers: usize,
    ) -> Result<T> {
        ExecutorConfig::validate_workers(workers)?;

        let run_span = debug_span!("pipeline.run", stage = target.key(), workers);
        let _enter = run_span.enter();

        let subgraph = self.upstream_closure(target.key())?;
        let scheduled = subgraph.len();
        self.store.clear();

        let coordinator = Coordinator::new(self, &subgraph);
        let spawned = spawn_workers(&coordinator, workers.min(scheduled), &run_span);
        let state = coordinator.into_state();
        let spawned = spawned?;

        if let Some(err) = state.failure {
            return Err(err);
        }
        if state.completed != scheduled {
            return Err(Error::StageCountMismatch {
                scheduled,
                completed: state.completed,
            });
        }

        debug!(stages = scheduled, workers = spawned, "Run complete");
        self.store.get::<T>(target.key())
    }
}

/// Run `count` workers to completion, returning how many were started.
fn spawn_workers(coordinator: &Coordinator<'_>, count: usize, parent: &Span) -> Result<usize> {
    thread::scope(|scope| {
        let mut spawned = 0;
        let mut spawn_error = None;
        for id in 0..count {
            let span = debug_span!(parent: parent, "worker", id);
            let handle = thread::Builder::new()
                .name(format!("stagegraph-worker-{id}"))
                .spawn_scoped(scope, move || {
                    let _enter = span.enter();
                    coordinator.work();
                });
            match handle {
                Ok(_) => spawned += 1,
                Err(err) => {
                    warn!(worker = id, error = %err, "Failed to spawn worker thread");
                    spawn_error = Some(err);
                    break;
                }
            }
        }

        match spawn_error {
            Some(err) if spawned == 0 => Err(Error::runtime(
                "scheduler",
                format!("failed to spawn worker threads: {err}"),
            )),
            _ => Ok(spawned),
        }
    })
}
