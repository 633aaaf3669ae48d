//! Lifecycle events and event handling.
//!
//! Executors emit events as a run progresses so callers can observe it
//! without polling the result set.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::core::types::RunId;
use crate::execution::JobStatus;

/// Lifecycle events emitted during execution.
#[derive(Debug, Clone)]
pub enum Event {
    /// A local tier is about to be dispatched.
    TierStarted {
        run_id: RunId,
        tier: usize,
        /// Units of work in the tier, counting every group task.
        units: usize,
        timestamp: Instant,
    },

    /// A job, or one task of a group, started on the local pool.
    JobStarted {
        run_id: RunId,
        name: String,
        timestamp: Instant,
    },

    /// A job, or one task of a group, reached a terminal state.
    JobFinished {
        run_id: RunId,
        name: String,
        status: JobStatus,
        duration: Duration,
        stdout: Option<String>,
        stderr: Option<String>,
        exit_code: Option<i32>,
        error: Option<String>,
        timestamp: Instant,
    },

    /// A node was accepted by the grid scheduler.
    JobSubmitted {
        run_id: RunId,
        /// Name as known to the grid scheduler.
        name: String,
        holds: Vec<String>,
        tasks: usize,
        timestamp: Instant,
    },

    /// A grid job left the scheduler's active set.
    ///
    /// This does not say whether the job succeeded.
    JobDequeued {
        run_id: RunId,
        name: String,
        waited: Duration,
        timestamp: Instant,
    },

    /// A run finished, or halted after a failed tier.
    RunCompleted {
        run_id: RunId,
        success: bool,
        duration: Duration,
        timestamp: Instant,
    },
}

impl Event {
    /// Get the timestamp of the event.
    pub fn timestamp(&self) -> Instant {
        match self {
            Event::TierStarted { timestamp, .. } => *timestamp,
            Event::JobStarted { timestamp, .. } => *timestamp,
            Event::JobFinished { timestamp, .. } => *timestamp,
            Event::JobSubmitted { timestamp, .. } => *timestamp,
            Event::JobDequeued { timestamp, .. } => *timestamp,
            Event::RunCompleted { timestamp, .. } => *timestamp,
        }
    }

    pub fn tier_started(run_id: RunId, tier: usize, units: usize) -> Self {
        Event::TierStarted {
            run_id,
            tier,
            units,
            timestamp: Instant::now(),
        }
    }

    pub fn job_started(run_id: RunId, name: impl Into<String>) -> Self {
        Event::JobStarted {
            run_id,
            name: name.into(),
            timestamp: Instant::now(),
        }
    }

    /// Create a JobFinished event from a local result record.
    pub fn job_finished(run_id: RunId, result: &crate::execution::JobResult) -> Self {
        Event::JobFinished {
            run_id,
            name: result.name.clone(),
            status: result.status,
            duration: result.duration,
            stdout: result.stdout.clone(),
            stderr: result.stderr.clone(),
            exit_code: result.exit_code,
            error: result.error.clone(),
            timestamp: Instant::now(),
        }
    }

    pub fn job_submitted(
        run_id: RunId,
        name: impl Into<String>,
        holds: Vec<String>,
        tasks: usize,
    ) -> Self {
        Event::JobSubmitted {
            run_id,
            name: name.into(),
            holds,
            tasks,
            timestamp: Instant::now(),
        }
    }

    pub fn job_dequeued(run_id: RunId, name: impl Into<String>, waited: Duration) -> Self {
        Event::JobDequeued {
            run_id,
            name: name.into(),
            waited,
            timestamp: Instant::now(),
        }
    }

    pub fn run_completed(run_id: RunId, success: bool, duration: Duration) -> Self {
        Event::RunCompleted {
            run_id,
            success,
            duration,
            timestamp: Instant::now(),
        }
    }
}

/// Handler for receiving lifecycle events.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle an event.
    async fn handle(&self, event: &Event);
}

/// Event bus for distributing events to registered handlers.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl EventBus {
    /// Create a new event bus with no handlers.
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    /// Register an event handler.
    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        let mut handlers = self.handlers.write().await;
        handlers.push(handler);
    }

    /// Emit an event to all registered handlers, in registration order.
    pub async fn emit(&self, event: Event) {
        let handlers = self.handlers.read().await;
        for handler in handlers.iter() {
            handler.handle(&event).await;
        }
    }

    /// Get the number of registered handlers.
    pub async fn handler_count(&self) -> usize {
        self.handlers.read().await.len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
