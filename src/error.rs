use thiserror::Error;

use crate::dispatch::job::JobId;
use crate::dispatch::worker::WorkerId;
use crate::registry::ProjectId;

#[derive(Error, Debug)]
pub enum MapswarmError {
    #[error("Malformed project spec: {0}")]
    MalformedSpec(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(ProjectId),

    #[error("Worker not found: {0}")]
    WorkerNotFound(WorkerId),

    #[error("Job {job} is not in flight for worker {worker}")]
    StaleResult { job: JobId, worker: WorkerId },

    #[error("Job id {job} out of range (project has {total} jobs)")]
    JobOutOfRange { job: JobId, total: usize },

    #[error("Project {0} is already complete")]
    AlreadyComplete(ProjectId),

    #[error("Transform error: {0}")]
    Transform(String),
}

pub type Result<T> = std::result::Result<T, MapswarmError>;
