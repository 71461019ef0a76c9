//! Error types for pipeline construction and execution.

// Rust 1.92 compiler bug: false positives for thiserror/miette derive macro fields
// https://github.com/rust-lang/rust/issues/147648
#![allow(unused_assignments)]

use miette::Diagnostic;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for pipeline operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by the construction and execution surface of a [`Pipeline`](crate::Pipeline).
#[derive(Error, Debug, Diagnostic)]
pub enum Error {
    /// A stage with this key is already registered.
    #[error("Stage '{stage}' already exists")]
    #[diagnostic(
        code(stagegraph::graph::duplicate),
        help("Stage keys must be unique within a pipeline")
    )]
    StageAlreadyExists {
        /// The duplicate key.
        stage: String,
    },

    /// The key does not name a stage of this pipeline.
    #[error("Unknown stage '{stage}'")]
    #[diagnostic(code(stagegraph::graph::unknown_stage))]
    UnknownStage {
        /// The unknown key.
        stage: String,
    },

    /// A stage was wired to an upstream key that is not registered yet.
    #[error("Stage '{stage}' depends on unknown stage '{dependency}'")]
    #[diagnostic(
        code(stagegraph::graph::unknown_dependency),
        help("Register every upstream stage before the stages that consume it")
    )]
    UnknownDependency {
        /// The stage being registered.
        stage: String,
        /// The missing upstream key.
        dependency: String,
    },

    /// A stored value did not have the type its reader expected.
    #[error("Stage '{stage}' did not produce a value of type {expected}")]
    #[diagnostic(code(stagegraph::store::type_mismatch))]
    TypeMismatch {
        /// The stage whose value was read.
        stage: String,
        /// Name of the expected type.
        expected: &'static str,
    },

    /// Fewer stages completed than were scheduled.
    #[error("Scheduled {scheduled} stages but only {completed} completed")]
    #[diagnostic(code(stagegraph::scheduler::stage_count))]
    StageCountMismatch {
        /// Size of the scheduled subgraph.
        scheduled: usize,
        /// Number of stages that completed.
        completed: usize,
    },

    /// A stage callable failed on an I/O operation.
    #[error("Stage '{stage}' failed to {operation}{}", path.as_ref().map_or(String::new(), |p| format!(" {}", p.display())))]
    #[diagnostic(
        code(stagegraph::stage::io),
        help("Check file permissions and ensure the path exists")
    )]
    Io {
        /// The failing stage.
        stage: String,
        /// Operation that failed (e.g. "read", "write").
        operation: String,
        /// Path involved, if any.
        path: Option<Box<Path>>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A stage callable failed or panicked.
    #[error("Stage '{stage}' failed: {message}")]
    #[diagnostic(code(stagegraph::stage::runtime))]
    Runtime {
        /// The failing stage.
        stage: String,
        /// Failure description.
        message: String,
    },

    /// The requested worker count is zero or above the available parallelism.
    #[error("Invalid worker count {requested}{}", available.map_or(String::new(), |n| format!(" (available parallelism: {n})")))]
    #[diagnostic(
        code(stagegraph::scheduler::thread_count),
        help("Use at least one worker and no more than the available parallelism")
    )]
    InvalidThreadCount {
        /// The requested number of workers.
        requested: usize,
        /// The hardware ceiling, if known.
        available: Option<usize>,
    },
}

impl Error {
    /// Create a duplicate stage error.
    #[must_use]
    pub fn stage_already_exists(stage: impl Into<String>) -> Self {
        Self::StageAlreadyExists {
            stage: stage.into(),
        }
    }

    /// Create an unknown stage error.
    #[must_use]
    pub fn unknown_stage(stage: impl Into<String>) -> Self {
        Self::UnknownStage {
            stage: stage.into(),
        }
    }

    /// Create an unknown dependency error.
    #[must_use]
    pub fn unknown_dependency(stage: impl Into<String>, dependency: impl Into<String>) -> Self {
        Self::UnknownDependency {
            stage: stage.into(),
            dependency: dependency.into(),
        }
    }

    /// Create a type mismatch error for a value expected to be a `T`.
    #[must_use]
    pub fn type_mismatch<T>(stage: impl Into<String>) -> Self {
        Self::TypeMismatch {
            stage: stage.into(),
            expected: std::any::type_name::<T>(),
        }
    }

    /// Create a runtime failure error.
    #[must_use]
    pub fn runtime(stage: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Runtime {
            stage: stage.into(),
            message: message.into(),
        }
    }

    /// Attach the failing stage key to a [`StageError`].
    #[must_use]
    pub fn from_stage(stage: impl Into<String>, error: StageError) -> Self {
        match error {
            StageError::Io {
                operation,
                path,
                source,
            } => Self::Io {
                stage: stage.into(),
                operation,
                path,
                source,
            },
            StageError::Failed { message } => Self::Runtime {
                stage: stage.into(),
                message,
            },
        }
    }
}

/// Failure returned by a fallible stage callable.
///
/// The scheduler tags it with the stage key and reports it as
/// [`Error::Io`] or [`Error::Runtime`].
#[derive(Error, Debug)]
pub enum StageError {
    /// An I/O operation failed.
    #[error("I/O {operation} failed{}", path.as_ref().map_or(String::new(), |p| format!(": {}", p.display())))]
    Io {
        /// Operation that failed.
        operation: String,
        /// Path involved, if any.
        path: Option<Box<Path>>,
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Any other failure.
    #[error("{message}")]
    Failed {
        /// Failure description.
        message: String,
    },
}

impl StageError {
    /// Create an I/O failure with path context.
    #[must_use]
    pub fn io(source: std::io::Error, path: impl Into<PathBuf>, operation: impl Into<String>) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.into().into_boxed_path()),
            source,
        }
    }

    /// Create a general failure.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

impl From<std::io::Error> for StageError {
    fn from(source: std::io::Error) -> Self {
        Self::Io {
            operation: "perform I/O".to_string(),
            path: None,
            source,
        }
    }
}
