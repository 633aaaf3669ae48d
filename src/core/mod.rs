//! Core job-graph types.
//!
//! Jobs and job groups, the dependency graph that orders them, and the
//! polling backoff used by grid waits.

pub mod backoff;
pub mod batch;
pub mod graph;
pub mod group;
pub mod job;
pub mod node;
pub mod types;
