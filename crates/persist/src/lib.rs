//! Byte-stream persistence stages for stagegraph pipelines.
//!
//! These are ordinary stages whose callable performs file I/O. A failed read
//! or write surfaces from [`Pipeline::run`] as
//! [`Error::Io`](stagegraph_pipeline::Error::Io) naming the stage, the
//! operation and the path.
//!
//! ```no_run
//! use stagegraph_pipeline::Pipeline;
//! use stagegraph_persist::PersistStages;
//!
//! let mut pipeline = Pipeline::new();
//! let text = pipeline.add_stage("text", || b"hello".to_vec())?;
//! let written = pipeline.write_bytes("write", "out/hello.bin", text)?;
//! let read = pipeline.read_bytes_after("read", "out/hello.bin", written)?;
//! assert_eq!(pipeline.run(&read)?, b"hello");
//! # Ok::<(), stagegraph_pipeline::Error>(())
//! ```

use stagegraph_pipeline::{Pipeline, Port, Result, StageError, StageKey};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Convenience constructors for stages reading and writing byte sequences.
pub trait PersistStages {
    /// Register a stage writing its input to `path`, creating parent
    /// directories as needed.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's construction errors.
    fn write_bytes(
        &mut self,
        id: impl Into<StageKey>,
        path: impl Into<PathBuf>,
        input: Port<Vec<u8>>,
    ) -> Result<Port<()>>;

    /// Register a stage reading the contents of `path`.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's construction errors.
    fn read_bytes(&mut self, id: impl Into<StageKey>, path: impl Into<PathBuf>)
    -> Result<Port<Vec<u8>>>;

    /// Register a stage reading `path` once `after` has completed.
    ///
    /// Typically `after` is the port of a [`write_bytes`](Self::write_bytes)
    /// stage producing the file.
    ///
    /// # Errors
    ///
    /// Returns the pipeline's construction errors.
    fn read_bytes_after(
        &mut self,
        id: impl Into<StageKey>,
        path: impl Into<PathBuf>,
        after: Port<()>,
    ) -> Result<Port<Vec<u8>>>;
}

impl PersistStages for Pipeline {
    fn write_bytes(
        &mut self,
        id: impl Into<StageKey>,
        path: impl Into<PathBuf>,
        input: Port<Vec<u8>>,
    ) -> Result<Port<()>> {
        let path = path.into();
        self.try_add_stage_with(id, move |bytes: Vec<u8>| write_file(&path, &bytes), input)
    }

    fn read_bytes(
        &mut self,
        id: impl Into<StageKey>,
        path: impl Into<PathBuf>,
    ) -> Result<Port<Vec<u8>>> {
        let path = path.into();
        self.try_add_stage(id, move || read_file(&path))
    }

    fn read_bytes_after(
        &mut self,
        id: impl Into<StageKey>,
        path: impl Into<PathBuf>,
        after: Port<()>,
    ) -> Result<Port<Vec<u8>>> {
        let path = path.into();
        self.try_add_stage_with(id, move |()| read_file(&path), after)
    }
}

fn write_file(path: &Path, bytes: &[u8]) -> std::result::Result<(), StageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| StageError::io(e, parent, "create directory"))?;
    }
    fs::write(path, bytes).map_err(|e| StageError::io(e, path, "write"))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Wrote stage output");
    Ok(())
}

fn read_file(path: &Path) -> std::result::Result<Vec<u8>, StageError> {
    let bytes = fs::read(path).map_err(|e| StageError::io(e, path, "read"))?;
    debug!(path = %path.display(), bytes = bytes.len(), "Read stage input");
    Ok(bytes)
}
