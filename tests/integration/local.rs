//! Local pool integration tests.
//!
//! Tests that verify tier ordering, failure handling and group expansion on
//! the local worker pool.

use jobgraph::testing::{chain, diamond};
use jobgraph::{
    Arguments, DependencyGraph, EventBus, ExecutionMode, Job, JobGroup, JobStatus,
    LocalPoolExecutor, compile_job_groups, execute,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use crate::common::RecordingHandler;

#[tokio::test]
async fn test_linear_chain_runs_in_timestamp_order() {
    let (mut graph, _) = chain(&["a", "b", "c"], |name| format!("sleep 0.05; echo {}", name)).unwrap();

    let results = LocalPoolExecutor::new(4).run(&mut graph).await.unwrap();

    assert!(results.success());
    let a = results.get("a").unwrap();
    let b = results.get("b").unwrap();
    let c = results.get("c").unwrap();
    assert!(a.finished_at.unwrap() <= b.started_at.unwrap());
    assert!(b.finished_at.unwrap() <= c.started_at.unwrap());
    assert_eq!(c.stdout.as_deref().map(str::trim), Some("c"));
}

#[tokio::test]
async fn test_chain_writes_files_in_order() {
    let dir = TempDir::new().unwrap();
    let log = dir.path().join("log");
    let log = log.display().to_string();
    let (mut graph, _) = chain(&["first", "second", "third"], |name| {
        format!("echo {} >> {}", name, log)
    })
    .unwrap();

    LocalPoolExecutor::new(3).run(&mut graph).await.unwrap();

    let contents = std::fs::read_to_string(&log).unwrap();
    assert_eq!(contents, "first\nsecond\nthird\n");
}

#[tokio::test]
async fn test_failure_in_first_tier_skips_every_dependent() {
    let mut graph = DependencyGraph::new();
    let ok = graph.add(Job::new("ok", "sleep 0.1; echo fine")).unwrap();
    let bad = graph.add(Job::new("bad", "echo broken >&2; exit 7")).unwrap();
    let needs_ok = graph.add(Job::new("needs_ok", "true").depends_on(ok)).unwrap();
    graph
        .add(Job::new("needs_both", "true").depends_on(needs_ok).depends_on(bad))
        .unwrap();

    let results = LocalPoolExecutor::new(2).run(&mut graph).await.unwrap();

    // Siblings finish and report their own outcome.
    assert_eq!(results.get("ok").unwrap().status, JobStatus::Succeeded);
    let bad = results.get("bad").unwrap();
    assert_eq!(bad.status, JobStatus::Failed);
    assert_eq!(bad.exit_code, Some(7));
    assert_eq!(bad.stderr.as_deref().map(str::trim), Some("broken"));

    assert_eq!(results.skipped(), vec!["needs_both", "needs_ok"]);
    assert_eq!(results.halted_at_tier, Some(0));
    assert_eq!(results.len(), 4);
    assert!(!graph.get(needs_ok).unwrap().is_submitted());
}

#[tokio::test]
async fn test_failure_in_middle_tier_keeps_earlier_results() {
    let mut graph = diamond(|name| {
        if name == "right" {
            "exit 1".to_string()
        } else {
            "true".to_string()
        }
    })
    .unwrap();

    let results = LocalPoolExecutor::new(2).run(&mut graph).await.unwrap();

    assert_eq!(results.get("top").unwrap().status, JobStatus::Succeeded);
    assert_eq!(results.get("left").unwrap().status, JobStatus::Succeeded);
    assert_eq!(results.get("right").unwrap().status, JobStatus::Failed);
    assert_eq!(results.get("bottom").unwrap().status, JobStatus::Skipped);
    assert_eq!(results.halted_at_tier, Some(1));
}

#[tokio::test]
async fn test_group_tasks_count_toward_tier_and_decode_arguments() {
    let dir = TempDir::new().unwrap();
    let out = dir.path().display().to_string();
    let mut graph = DependencyGraph::new();
    let setup = graph.add(Job::new("setup", "true")).unwrap();
    let args = Arguments::new()
        .with("foo", ["1", "2"])
        .with("bar", ["a", "b", "c"]);
    graph
        .add(
            JobGroup::new(
                "sweep",
                format!("echo $foo $bar > {}/task_$SGE_TASK_ID", out),
                args,
            )
            .unwrap()
            .depends_on(setup),
        )
        .unwrap();

    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    let results = LocalPoolExecutor::new(3)
        .with_event_bus(bus)
        .run(&mut graph)
        .await
        .unwrap();

    assert!(results.success());
    assert_eq!(results.len(), 7);
    assert_eq!(handler.tiers().await, vec![0, 1]);

    let read = |task: usize| {
        std::fs::read_to_string(dir.path().join(format!("task_{}", task))).unwrap()
    };
    assert_eq!(read(1), "1 a\n");
    assert_eq!(read(2), "2 a\n");
    assert_eq!(read(3), "1 b\n");
    assert_eq!(read(6), "2 c\n");

    let events = handler.events().await;
    let tier1_units = events.iter().find_map(|e| match e {
        jobgraph::Event::TierStarted { tier: 1, units, .. } => Some(*units),
        _ => None,
    });
    assert_eq!(tier1_units, Some(6));
}

#[tokio::test]
async fn test_events_follow_tier_order() {
    let (mut graph, _) = chain(&["a", "b"], |_| "true".to_string()).unwrap();
    let handler = RecordingHandler::new();
    let bus = Arc::new(EventBus::new());
    bus.register(handler.clone()).await;

    LocalPoolExecutor::new(1)
        .with_event_bus(bus)
        .run(&mut graph)
        .await
        .unwrap();

    assert_eq!(handler.started().await, vec!["a", "b"]);
    let events = handler.events().await;
    assert!(matches!(
        events.last(),
        Some(jobgraph::Event::RunCompleted { success: true, .. })
    ));
}

#[tokio::test]
async fn test_cancellation_between_tiers() {
    let (mut graph, _) = chain(&["a", "b", "c"], |_| "sleep 0.2".to_string()).unwrap();
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let results = LocalPoolExecutor::new(1)
        .run_until_cancelled(&mut graph, &cancel)
        .await
        .unwrap();

    // The running tier completes; later tiers never start.
    assert!(results.cancelled);
    assert_eq!(results.get("a").unwrap().status, JobStatus::Succeeded);
    assert_eq!(results.skipped(), vec!["b", "c"]);
    assert!(!results.success());
}

#[tokio::test]
async fn test_execute_runs_local_mode() {
    let mut graph = diamond(|name| format!("echo {}", name)).unwrap();

    let results = execute(
        &mut graph,
        &ExecutionMode::Local { workers: 2 },
        &CancellationToken::new(),
    )
    .await
    .unwrap();

    assert_eq!(results.count(JobStatus::Succeeded), 4);
    let json = serde_json::to_value(&results).unwrap();
    assert_eq!(json["jobs"]["bottom"]["status"], "succeeded");
    assert!(json["jobs"]["bottom"]["started_at"].is_string());
}

#[tokio::test]
async fn test_large_batch_runs_on_local_pool() {
    let commands = 2000;
    let jobs: Vec<Job> = (0..commands)
        .map(|i| {
            Job::new(
                format!("job{}", i),
                format!("echo task-number-{:05} with-some-extra-padding-words > /dev/null", i),
            )
        })
        .collect();
    let groups = compile_job_groups(&jobs, "batch", 10_000).unwrap();
    assert_eq!(groups.len(), 1);
    // Larger than the kernel's per-argument limit.
    assert!(groups[0].generate_script().len() > 128 * 1024);

    let mut graph = DependencyGraph::new();
    graph.add(groups.into_iter().next().unwrap()).unwrap();

    let results = LocalPoolExecutor::new(8).run(&mut graph).await.unwrap();

    assert_eq!(results.len(), commands);
    assert_eq!(results.count(JobStatus::Succeeded), commands);
    assert!(results.success());
}
