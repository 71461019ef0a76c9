//! Property-based tests for pipeline invariants.
//!
//! These tests verify the behavioral contracts of the scheduler:
//! - Results match a sequential reference evaluation for any worker count
//! - Only the target's upstream closure executes
//! - Execution plans respect every edge

#![allow(clippy::unwrap_used, clippy::expect_used)]

use proptest::prelude::*;
use stagegraph_pipeline::{ExecutorConfig, Pipeline, Port};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Generate a DAG as a list of (seed, dependency indices) per stage.
///
/// A stage may only depend on stages with lower indices, which mirrors the
/// construction rule of the pipeline itself.
fn dag_strategy(
    min_stages: usize,
    max_stages: usize,
) -> impl Strategy<Value = Vec<(u64, Vec<usize>)>> {
    (min_stages..=max_stages).prop_flat_map(|stage_count| {
        let stages: Vec<_> = (0..stage_count)
            .map(|i| {
                let deps = if i == 0 {
                    Just(vec![]).boxed()
                } else {
                    proptest::collection::vec(0..i, 0..=i.min(3))
                        .prop_map(|deps| {
                            let mut deps: Vec<usize> =
                                deps.into_iter().collect::<HashSet<_>>().into_iter().collect();
                            deps.sort_unstable();
                            deps
                        })
                        .boxed()
                };
                (0..1000_u64, deps)
            })
            .collect();
        stages
    })
}

// =============================================================================
// Helper Functions
// =============================================================================

fn stage_name(index: usize) -> String {
    format!("stage_{index}")
}

/// Value of a stage: its seed plus the wrapping sum of its inputs times its index.
fn combine(index: usize, seed: u64, inputs: &[u64]) -> u64 {
    inputs
        .iter()
        .fold(seed, |acc, v| acc.wrapping_add(v.wrapping_mul(index as u64 + 1)))
}

/// Compute every stage's value sequentially.
fn reference_values(stages: &[(u64, Vec<usize>)]) -> Vec<u64> {
    let mut values: Vec<u64> = Vec::with_capacity(stages.len());
    for (index, (seed, deps)) in stages.iter().enumerate() {
        let inputs: Vec<u64> = deps.iter().map(|&d| values[d]).collect();
        values.push(combine(index, *seed, &inputs));
    }
    values
}

/// Transitive upstream closure of `target`, including itself.
fn reference_closure(stages: &[(u64, Vec<usize>)], target: usize) -> HashSet<String> {
    let mut closure = HashSet::new();
    let mut stack = vec![target];
    while let Some(current) = stack.pop() {
        if closure.insert(stage_name(current)) {
            stack.extend(stages[current].1.iter().copied());
        }
    }
    closure
}

/// Build a pipeline where every stage records its execution.
///
/// Stages with several inputs are wired through a chain of joins, so pair
/// outputs and plain outputs both flow through the scheduler.
fn build_pipeline(
    stages: &[(u64, Vec<usize>)],
    executed: &Arc<Mutex<Vec<String>>>,
) -> (Pipeline, Vec<Port<u64>>) {
    let mut pipeline = Pipeline::new();
    let mut ports: Vec<Port<u64>> = Vec::with_capacity(stages.len());

    for (index, (seed, deps)) in stages.iter().enumerate() {
        let name = stage_name(index);
        let seed = *seed;
        let log = Arc::clone(executed);
        let record = name.clone();

        let port = match deps.as_slice() {
            [] => pipeline
                .add_stage(name, move || {
                    log.lock().unwrap().push(record.clone());
                    combine(index, seed, &[])
                })
                .unwrap(),
            [only] => pipeline
                .add_stage_with(
                    name,
                    move |x: u64| {
                        log.lock().unwrap().push(record.clone());
                        combine(index, seed, &[x])
                    },
                    ports[*only].clone(),
                )
                .unwrap(),
            [first, rest @ ..] => {
                // Fold the inputs into nested pairs: ((a, b), c) ... flattened by the stage.
                let mut acc: Port<Vec<u64>> = pipeline
                    .add_stage_with(
                        format!("{name}_in_0"),
                        |x: u64| vec![x],
                        ports[*first].clone(),
                    )
                    .unwrap();
                for (n, dep) in rest.iter().enumerate() {
                    let pair = pipeline
                        .join(format!("{name}_pair_{n}"), acc, ports[*dep].clone())
                        .unwrap();
                    acc = pipeline
                        .add_stage_with(
                            format!("{name}_in_{}", n + 1),
                            |(mut values, x): (Vec<u64>, u64)| {
                                values.push(x);
                                values
                            },
                            pair,
                        )
                        .unwrap();
                }
                pipeline
                    .add_stage_with(
                        name,
                        move |inputs: Vec<u64>| {
                            log.lock().unwrap().push(record.clone());
                            combine(index, seed, &inputs)
                        },
                        acc,
                    )
                    .unwrap()
            }
        };
        ports.push(port);
    }

    (pipeline, ports)
}

fn worker_counts() -> Vec<usize> {
    let many = ExecutorConfig::available_parallelism().map_or(4, |n| n.min(4));
    vec![1, many]
}

// =============================================================================
// Property Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// Contract: every target evaluates to the sequential reference value.
    #[test]
    fn run_matches_sequential_reference(
        stages in dag_strategy(1, 12),
        target_pick in any::<prop::sample::Index>(),
    ) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let (mut pipeline, ports) = build_pipeline(&stages, &executed);
        let expected = reference_values(&stages);
        let target = target_pick.index(stages.len());

        for workers in worker_counts() {
            let value = pipeline.run_with_workers(&ports[target], workers).unwrap();
            prop_assert_eq!(value, expected[target], "workers = {}", workers);
        }
    }

    /// Contract: a run executes exactly the target's upstream closure, once each.
    #[test]
    fn run_executes_exactly_the_closure(
        stages in dag_strategy(1, 12),
        target_pick in any::<prop::sample::Index>(),
    ) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let (mut pipeline, ports) = build_pipeline(&stages, &executed);
        let target = target_pick.index(stages.len());

        for workers in worker_counts() {
            executed.lock().unwrap().clear();
            pipeline.run_with_workers(&ports[target], workers).unwrap();

            let ran = executed.lock().unwrap().clone();
            let unique: HashSet<String> = ran.iter().cloned().collect();
            prop_assert_eq!(ran.len(), unique.len(), "a stage ran twice");
            prop_assert_eq!(unique, reference_closure(&stages, target));
        }
    }

    /// Contract: recorded execution order respects every dependency.
    #[test]
    fn execution_order_respects_dependencies(stages in dag_strategy(2, 12)) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let (mut pipeline, ports) = build_pipeline(&stages, &executed);
        let target = stages.len() - 1;

        let workers = worker_counts().into_iter().max().unwrap_or(1);
        pipeline.run_with_workers(&ports[target], workers).unwrap();

        let ran = executed.lock().unwrap().clone();
        let positions: HashMap<&str, usize> = ran
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();

        for (index, (_, deps)) in stages.iter().enumerate() {
            let name = stage_name(index);
            let Some(&pos) = positions.get(name.as_str()) else { continue };
            for dep in deps {
                let dep_name = stage_name(*dep);
                let dep_pos = positions[dep_name.as_str()];
                prop_assert!(
                    dep_pos < pos,
                    "Dependency '{}' (pos {}) should run before '{}' (pos {})",
                    dep_name, dep_pos, name, pos
                );
            }
        }
    }

    /// Contract: plan levels place every upstream stage on a lower level.
    #[test]
    fn plan_levels_respect_edges(stages in dag_strategy(1, 12)) {
        let executed = Arc::new(Mutex::new(Vec::new()));
        let (pipeline, ports) = build_pipeline(&stages, &executed);
        let plan = pipeline.plan(&ports[stages.len() - 1]).unwrap();

        let level_of: HashMap<&str, usize> = plan
            .levels()
            .iter()
            .enumerate()
            .flat_map(|(level, keys)| keys.iter().map(move |k| (k.as_str(), level)))
            .collect();

        prop_assert_eq!(level_of.len(), plan.len());
        for (key, &level) in &level_of {
            for dep in pipeline.upstream_of(key).unwrap() {
                prop_assert!(level_of[dep.as_str()] < level);
            }
        }
        prop_assert!(executed.lock().unwrap().is_empty(), "planning must not execute stages");
    }
}
