//! Packing many small jobs into job groups.
//!
//! Grid schedulers handle one array job with many tasks far better than many
//! single jobs. [`compile_job_groups`] turns a batch of independent jobs into
//! groups whose single `cmds` parameter enumerates the original commands.

use super::graph::GraphError;
use super::group::{Arguments, JobGroup};
use super::job::Job;

/// Parameter carrying the packed command lines.
pub const BATCH_PARAMETER: &str = "cmds";

/// Pack independent jobs into groups of at most `group_size` commands.
///
/// Jobs are bucketed by executable (the first word of the command) and
/// queue, keeping first-seen order, so each group stays homogeneous.
/// Groups are named `{prefix}_1`, `{prefix}_2`, ... Jobs with dependencies
/// are rejected because a group cannot carry per-task dependencies.
pub fn compile_job_groups(
    jobs: &[Job],
    prefix: &str,
    group_size: usize,
) -> Result<Vec<JobGroup>, GraphError> {
    let group_size = group_size.max(1);

    let mut buckets: Vec<((&str, Option<&str>), Vec<&str>)> = Vec::new();
    for job in jobs {
        if !job.dependencies().is_empty() {
            return Err(GraphError::GroupedJobHasDependencies(job.name().to_string()));
        }
        let executable = job.command().split_whitespace().next().unwrap_or("");
        let key = (executable, job.queue());
        match buckets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, commands)) => commands.push(job.command()),
            None => buckets.push((key, vec![job.command()])),
        }
    }

    let mut groups = Vec::new();
    for ((_, queue), commands) in buckets {
        for chunk in commands.chunks(group_size) {
            let name = format!("{}_{}", prefix, groups.len() + 1);
            let arguments = Arguments::new().with(BATCH_PARAMETER, chunk.iter().copied());
            let mut group = JobGroup::new(name, format!("eval \"${}\"", BATCH_PARAMETER), arguments)?;
            if let Some(queue) = queue {
                group = group.with_queue(queue);
            }
            groups.push(group);
        }
    }
    Ok(groups)
}
