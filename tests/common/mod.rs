//! Common test utilities shared across integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use jobgraph::{Event, EventHandler};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Recording event handler for verifying events.
pub struct RecordingHandler {
    events: Mutex<Vec<Event>>,
}

impl RecordingHandler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            events: Mutex::new(Vec::new()),
        })
    }

    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Names from `JobStarted` events, in arrival order.
    pub async fn started(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::JobStarted { name, .. } => Some(name.clone()),
                _ => None,
            })
            .collect()
    }

    /// Tier indices from `TierStarted` events, in arrival order.
    pub async fn tiers(&self) -> Vec<usize> {
        self.events
            .lock()
            .await
            .iter()
            .filter_map(|e| match e {
                Event::TierStarted { tier, .. } => Some(*tier),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    async fn handle(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}

/// Write `yaml` to `jobs.yaml` inside `dir`.
pub fn write_job_file(dir: &Path, yaml: &str) -> PathBuf {
    let path = dir.join("jobs.yaml");
    std::fs::write(&path, yaml).unwrap();
    path
}
