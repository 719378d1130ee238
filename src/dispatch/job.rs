use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dispatch::worker::WorkerId;

/// Identifies one unit of work by its position in the original dataset.
/// Assigned at partition time, stable for the life of the project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(pub usize);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Pending,
    InFlight,
    Completed,
}

/// One indexed, addressable unit of work derived from the input dataset.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub payload: Value,
    pub assigned_worker: Option<WorkerId>,
    pub result: Option<Value>,
}

impl Job {
    pub fn new(id: JobId, payload: Value) -> Self {
        Self {
            id,
            payload,
            assigned_worker: None,
            result: None,
        }
    }

    /// A job is always in exactly one of three states: queued and unassigned,
    /// assigned and awaiting a result, or completed.
    pub fn state(&self) -> JobState {
        if self.result.is_some() {
            JobState::Completed
        } else if self.assigned_worker.is_some() {
            JobState::InFlight
        } else {
            JobState::Pending
        }
    }
}
