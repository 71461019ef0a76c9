//! Typed stage graphs with concurrent topological execution.
//!
//! This crate builds a directed acyclic graph (DAG) of computation stages
//! whose outputs flow across dynamically wired, statically typed edges, and
//! runs the subgraph needed for a requested output on a pool of worker threads.
//!
//! # Key Types
//!
//! - [`Pipeline`]: owns the stages and their edges, and runs targets
//! - [`Port`]: typed handle to a stage's output, used for wiring and running
//! - [`ExecutionPlan`]: the minimal upstream subgraph of a target, by level
//! - [`Error`]: closed error taxonomy returned by every fallible operation
//!
//! # Example
//!
//! ```
//! use stagegraph_pipeline::Pipeline;
//!
//! let mut pipeline = Pipeline::new();
//! let src = pipeline.add_stage("src", || 5)?;
//! let incr = pipeline.add_stage_with("incr", |x: i32| x + 1, src.clone())?;
//! let triple = pipeline.add_stage_with("triple", |x: i32| x * 3, src)?;
//! let both = pipeline.join("both", incr, triple)?;
//! let sum = pipeline.add_stage_with("sum", |(a, b): (i32, i32)| a + b, both)?;
//!
//! assert_eq!(pipeline.run(&sum)?, 21);
//! # Ok::<(), stagegraph_pipeline::Error>(())
//! ```

mod config;
mod error;
mod graph;
mod plan;
mod port;
mod scheduler;
mod stage;
mod store;

pub use config::{DEFAULT_WORKERS, ExecutorConfig};
pub use error::{Error, Result, StageError};
pub use graph::Pipeline;
pub use plan::ExecutionPlan;
pub use port::Port;
pub use stage::Inputs;
pub use store::ResultStore;

/// Caller-supplied unique name of a stage.
pub type StageKey = String;

/// Values that can flow between stages.
///
/// Downstream stages receive their own clone of each input, and stages may
/// run on any worker thread.
pub trait StageValue: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> StageValue for T {}
