//! Persistence stages wired into full pipelines.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use stagegraph_persist::PersistStages;
use stagegraph_pipeline::{Error, ExecutorConfig, Pipeline};
use tempfile::TempDir;

#[test]
fn string_survives_write_then_read() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("greeting.txt");
    let original = "hello, stage graph";

    let mut pipeline = Pipeline::new();
    let text = pipeline.add_stage("text", move || original.to_string()).unwrap();
    let bytes = pipeline
        .add_stage_with("encode", |s: String| s.into_bytes(), text)
        .unwrap();
    let written = pipeline.write_bytes("write", &path, bytes).unwrap();
    let read = pipeline.read_bytes_after("read", &path, written).unwrap();
    let decoded = pipeline
        .try_add_stage_with(
            "decode",
            |bytes: Vec<u8>| {
                String::from_utf8(bytes)
                    .map_err(|e| stagegraph_pipeline::StageError::failed(e.to_string()))
            },
            read,
        )
        .unwrap();

    let workers = ExecutorConfig::available_parallelism().map_or(2, |n| n.min(2));
    assert_eq!(pipeline.run_with_workers(&decoded, workers).unwrap(), original);
}

#[test]
fn read_of_existing_file_needs_no_writer() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("input.bin");
    std::fs::write(&path, [0xde_u8, 0xad, 0xbe, 0xef]).unwrap();

    let mut pipeline = Pipeline::new();
    let read = pipeline.read_bytes("read", &path).unwrap();
    let len = pipeline
        .add_stage_with("len", |bytes: Vec<u8>| bytes.len(), read)
        .unwrap();

    assert_eq!(pipeline.run(&len).unwrap(), 4);
}

#[test]
fn write_into_unwritable_location_fails_run() {
    let temp = TempDir::new().unwrap();
    // A regular file where a directory is expected.
    let blocker = temp.path().join("blocker");
    std::fs::write(&blocker, b"x").unwrap();

    let mut pipeline = Pipeline::new();
    let bytes = pipeline.add_stage("bytes", || vec![1_u8]).unwrap();
    let written = pipeline
        .write_bytes("write", blocker.join("out.bin"), bytes)
        .unwrap();

    let err = pipeline.run(&written).unwrap_err();
    assert!(matches!(err, Error::Io { ref stage, .. } if stage == "write"));
}

#[test]
fn persistence_stages_reject_duplicate_ids() {
    let temp = TempDir::new().unwrap();
    let mut pipeline = Pipeline::new();
    pipeline.read_bytes("read", temp.path().join("a")).unwrap();

    let err = pipeline
        .read_bytes("read", temp.path().join("b"))
        .unwrap_err();
    assert!(matches!(err, Error::StageAlreadyExists { .. }));
}
