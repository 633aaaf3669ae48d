//! Job file integration tests.
//!
//! Tests that verify the pipeline from a YAML job file to execution.

use jobgraph::config::SchedulerKind;
use jobgraph::{
    ConfigError, ExecutionMode, GraphError, JobStatus, YamlLoader, execute, load_job_file,
};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::write_job_file;

const PIPELINE: &str = r#"
jobs:
  - name: extract
    command: echo extracted
  - name: report
    command: echo report
    depends_on: [search]
groups:
  - name: search
    command: echo $mismatch $infile
    arguments:
      mismatch: ["0", "1"]
      infile: [a.fas, b.fas]
    depends_on: [extract]
batches:
  - prefix: blast
    commands:
      - echo one
      - echo two
"#;

#[tokio::test]
async fn test_job_file_runs_locally() {
    let dir = TempDir::new().unwrap();
    let path = write_job_file(dir.path(), PIPELINE);

    let mut graph = load_job_file(&path).unwrap();
    let tiers = graph.tiers().unwrap();
    assert_eq!(tiers.len(), 3);

    let results = execute(
        &mut graph,
        &ExecutionMode::Local { workers: 2 },
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert!(results.success());
    // extract, report, four search tasks, two batched commands
    assert_eq!(results.len(), 8);
    assert_eq!(
        results.get("search[3]").unwrap().stdout.as_deref().map(str::trim),
        Some("1 b.fas")
    );
    assert_eq!(
        results.get("blast_1[1]").unwrap().stdout.as_deref().map(str::trim),
        Some("two")
    );
}

#[test]
fn test_cyclic_job_file_is_rejected_before_running() {
    let dir = TempDir::new().unwrap();
    let path = write_job_file(
        dir.path(),
        r#"
jobs:
  - name: a
    command: echo a
    depends_on: [c]
  - name: b
    command: echo b
    depends_on: [a]
  - name: c
    command: echo c
    depends_on: [b]
"#,
    );

    let err = load_job_file(&path).unwrap_err();
    match err {
        ConfigError::Graph(GraphError::CycleDetected(name)) => {
            assert!(["a", "b", "c"].contains(&name.as_str()));
        }
        other => panic!("Expected cycle error, got {:?}", other),
    }
}

#[test]
fn test_job_named_like_a_group_task_is_rejected() {
    let dir = TempDir::new().unwrap();
    let path = write_job_file(
        dir.path(),
        r#"
jobs:
  - name: "g[0]"
    command: exit 1
groups:
  - name: g
    command: echo $x
    arguments:
      x: ["1", "2"]
"#,
    );

    let err = load_job_file(&path).unwrap_err();
    assert!(matches!(
        err,
        ConfigError::Graph(GraphError::InvalidName(ref name)) if name == "g[0]"
    ));
}

#[test]
fn test_invalid_yaml_reports_file() {
    let dir = TempDir::new().unwrap();
    let path = write_job_file(dir.path(), "jobs: [unclosed");

    let err = load_job_file(&path).unwrap_err();
    assert!(matches!(err, ConfigError::YamlFileError { .. }));
    assert!(err.to_string().contains("jobs.yaml"));
}

#[test]
fn test_run_config_file_selects_grid() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("run.yaml");
    std::fs::write(
        &path,
        "scheduler: grid\ngrid:\n  prefix: pdp\n  submit_program: /opt/sge/bin/qsub\n",
    )
    .unwrap();

    let config = YamlLoader::load_run_config(&path).unwrap();

    assert_eq!(config.scheduler, SchedulerKind::Grid);
    match config.mode() {
        ExecutionMode::Grid(grid) => {
            assert_eq!(grid.prefix.as_deref(), Some("pdp"));
            assert_eq!(grid.submit_program, "/opt/sge/bin/qsub");
            assert_eq!(grid.status_program, "qstat");
        }
        other => panic!("Expected grid mode, got {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_job_file_run_reports_statuses() {
    let dir = TempDir::new().unwrap();
    let path = write_job_file(
        dir.path(),
        r#"
jobs:
  - name: fetch
    command: exit 2
  - name: index
    command: echo indexing
  - name: align
    command: echo aligning
    depends_on: [fetch, index]
"#,
    );
    let mut graph = load_job_file(&path).unwrap();

    let results = execute(
        &mut graph,
        &ExecutionMode::Local { workers: 4 },
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(results.get("fetch").unwrap().status, JobStatus::Failed);
    assert_eq!(results.get("index").unwrap().status, JobStatus::Succeeded);
    assert_eq!(results.get("align").unwrap().status, JobStatus::Skipped);
    assert_eq!(results.failed(), vec!["fetch"]);
}
