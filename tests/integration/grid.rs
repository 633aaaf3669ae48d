//! Grid executor integration tests.
//!
//! A scripted in-memory scheduler stands in for the cluster; the paused
//! tokio clock makes polling intervals exact.

use jobgraph::testing::{ScriptedScheduler, diamond};
use jobgraph::{
    Arguments, DependencyGraph, EventBus, GridConfig, GridError, GridExecutor, Job, JobGroup,
    JobStatus, PollBackoff, SgeScheduler, WaitOutcome, compile_job_groups,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::RecordingHandler;

fn grid_config(dir: &TempDir, prefix: &str) -> GridConfig {
    GridConfig {
        prefix: Some(prefix.to_string()),
        script_dir: dir.path().join("scripts"),
        output_dir: dir.path().join("out"),
        backoff: PollBackoff::new(Duration::from_millis(10), Duration::from_millis(80)),
        ..GridConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_diamond_submits_with_prefixed_holds() {
    let dir = TempDir::new().unwrap();
    let mut graph = diamond(|name| format!("echo {}", name)).unwrap();
    let executor = GridExecutor::new(ScriptedScheduler::new(1), grid_config(&dir, "run1"));

    let results = executor
        .run(&mut graph, &CancellationToken::new())
        .await
        .unwrap();

    let submissions = executor.scheduler().submissions();
    assert_eq!(submissions[0].name, "run1_top");
    assert!(submissions[0].holds.is_empty());
    let bottom = submissions.iter().find(|s| s.name == "run1_bottom").unwrap();
    assert_eq!(bottom.holds, vec!["run1_left", "run1_right"]);

    // Polling cannot see exit status, so nothing is reported as succeeded.
    assert_eq!(results.count(JobStatus::Dequeued), 4);
    assert_eq!(results.count(JobStatus::Succeeded), 0);
    assert!(results.get("bottom").is_some());
}

#[tokio::test(start_paused = true)]
async fn test_poll_intervals_double_and_cap() {
    let dir = TempDir::new().unwrap();
    let mut graph = DependencyGraph::new();
    let slow = graph.add(Job::new("slow", "sleep 600")).unwrap();
    let executor = GridExecutor::new(ScriptedScheduler::new(6), grid_config(&dir, "pdp"));
    executor.submit(&mut graph).await.unwrap();

    let backoff = PollBackoff::new(Duration::from_millis(10), Duration::from_millis(50));
    let outcome = executor
        .wait(&graph, slow, &backoff, &CancellationToken::new())
        .await
        .unwrap();

    let times = executor.scheduler().poll_times("pdp_slow");
    let gaps: Vec<u128> = times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
    assert_eq!(gaps, vec![10, 20, 40, 50, 50, 50]);
    assert!(gaps.iter().all(|&gap| gap <= 50));
    assert!(matches!(outcome, WaitOutcome::Dequeued { polls: 7, .. }));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_abandons_wait_all() {
    let dir = TempDir::new().unwrap();
    let mut graph = DependencyGraph::new();
    graph.add(Job::new("quick", "true")).unwrap();
    graph.add(Job::new("stuck", "true")).unwrap();
    let scheduler = ScriptedScheduler::new(0).with_active_polls("pdp_stuck", usize::MAX);
    let executor = GridExecutor::new(scheduler, grid_config(&dir, "pdp"));
    executor.submit(&mut graph).await.unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let results = executor.wait_all(&graph, &cancel).await.unwrap();

    assert!(results.cancelled);
    assert_eq!(results.get("quick").unwrap().status, JobStatus::Dequeued);
    assert_eq!(results.get("stuck").unwrap().status, JobStatus::Running);
    assert!(!results.success());
}

#[tokio::test(start_paused = true)]
async fn test_status_query_failure_is_reported_per_node() {
    let dir = TempDir::new().unwrap();
    let mut graph = DependencyGraph::new();
    graph.add(Job::new("fine", "true")).unwrap();
    graph.add(Job::new("lost", "true")).unwrap();
    let scheduler = ScriptedScheduler::new(0).failing_status("pdp_lost");
    let executor = GridExecutor::new(scheduler, grid_config(&dir, "pdp"));

    let results = executor
        .run(&mut graph, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(results.get("fine").unwrap().status, JobStatus::Dequeued);
    let lost = results.get("lost").unwrap();
    assert_eq!(lost.status, JobStatus::Failed);
    assert!(lost.error.as_deref().unwrap().contains("status query"));
}

#[tokio::test]
async fn test_batched_groups_become_array_jobs() {
    let dir = TempDir::new().unwrap();
    let jobs: Vec<Job> = (0..5)
        .map(|i| Job::new(format!("blast{}", i), format!("blastn -query q{}.fa", i)).with_queue("bio.q"))
        .collect();
    let mut graph = DependencyGraph::new();
    for group in compile_job_groups(&jobs, "blast", 2).unwrap() {
        graph.add(group).unwrap();
    }
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;
    let executor = GridExecutor::new(ScriptedScheduler::new(0), grid_config(&dir, "pdp"))
        .with_event_bus(bus);

    executor.submit(&mut graph).await.unwrap();

    let tasks: Vec<Option<usize>> = executor
        .scheduler()
        .submissions()
        .iter()
        .map(|s| s.tasks)
        .collect();
    assert_eq!(tasks, vec![Some(2), Some(2), Some(1)]);
    assert!(executor
        .scheduler()
        .submissions()
        .iter()
        .all(|s| s.queue.as_deref() == Some("bio.q")));

    let script = std::fs::read_to_string(dir.path().join("scripts/pdp_blast_1")).unwrap();
    assert!(script.contains("cmds_ARRAY=( 'blastn -query q0.fa' 'blastn -query q1.fa' )"));
    assert!(script.ends_with("eval \"$cmds\"\n"));
    assert_eq!(handler.events().await.len(), 3);
}

#[tokio::test]
async fn test_group_script_runs_under_bash_like_an_array_task() {
    let dir = TempDir::new().unwrap();
    let mut graph = DependencyGraph::new();
    let args = Arguments::new().with("x", ["p", "q"]).with("y", ["1", "2"]);
    graph.add(JobGroup::new("g", "echo $x$y", args).unwrap()).unwrap();
    let executor = GridExecutor::new(ScriptedScheduler::new(0), grid_config(&dir, "t"));
    executor.submit(&mut graph).await.unwrap();

    let script = dir.path().join("scripts/t_g");
    let output = tokio::process::Command::new("bash")
        .arg(&script)
        .env("SGE_TASK_ID", "4")
        .output()
        .await
        .unwrap();

    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "q2");
}

#[tokio::test]
async fn test_sge_submission_failure_is_an_error() {
    let dir = TempDir::new().unwrap();
    let mut graph = DependencyGraph::new();
    graph.add(Job::new("a", "true")).unwrap();
    let mut config = grid_config(&dir, "pdp");
    config.submit_program = "false".to_string();
    let executor = GridExecutor::sge(config);

    let err = executor.submit(&mut graph).await.unwrap_err();

    assert!(matches!(
        err,
        jobgraph::ExecuteError::Grid(GridError::Rejected { ref name, .. }) if name == "pdp_a"
    ));
}

#[test]
fn test_sge_scheduler_uses_output_dir() {
    let sge = SgeScheduler::new("/scratch/out");
    assert_eq!(sge.output_dir().to_str(), Some("/scratch/out"));
}
