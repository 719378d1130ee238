//! Wire protocol between the gateway and connected agents.
//!
//! Messages are JSON frames over a persistent WebSocket, tagged with a
//! `type` field. Framing and delivery belong to the gateway; the dispatcher
//! core only consumes and produces these shapes.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::job::JobId;
use crate::dispatch::worker::WorkerId;
use crate::registry::ProjectId;
use crate::transform::{MapSpec, ReduceSpec};

/// Everything needed to instantiate a project dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSpec {
    pub title: String,
    pub dataset: Vec<Value>,
    pub map: MapSpec,
    pub reduce: ReduceSpec,
}

/// Events sent by agents to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    CreateProject {
        title: String,
        dataset: Vec<Value>,
        map: MapSpec,
        reduce: ReduceSpec,
    },
    /// Register as a worker on a project, requesting a concurrent-job capacity.
    Join {
        project_id: ProjectId,
        capacity: usize,
    },
    /// Stop working; in-flight jobs return to the project's queue.
    Leave,
    /// A finished job. The worker identity comes from the connection, never
    /// from the frame.
    JobDone { job_id: JobId, result: Value },
    FetchResults { project_id: ProjectId },
}

/// Events sent by the dispatcher (via the gateway) to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    ProjectCreated {
        project_id: ProjectId,
    },
    /// One unit of work for one worker: the payload plus the named map
    /// transform to apply to it.
    JobDispatched {
        job_id: JobId,
        payload: Value,
        map: MapSpec,
    },
    /// Live worker ids on the project, sent to every worker on membership
    /// change. A pure projection of the dispatcher's registry.
    WorkerList {
        workers: Vec<WorkerId>,
    },
    /// Completed results so far, keyed by job id. Sent to a newly joined
    /// worker as join-in-progress catch-up.
    ResultsSnapshot {
        results: Vec<(JobId, Value)>,
    },
    ProjectComplete {
        final_result: Value,
    },
    Error {
        message: String,
    },
}

/// Read-only project overview for the HTTP listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectSummary {
    pub project_id: ProjectId,
    pub title: String,
    pub total: usize,
    pub completed: usize,
    pub workers: usize,
    pub complete: bool,
    pub elapsed_ms: u64,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
