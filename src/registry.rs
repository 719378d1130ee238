//! Project directory: creates dispatchers from specs and routes transport
//! events to the owning instance. Explicitly owned state, nothing here is
//! process-global.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::config::ProjectLimits;
use crate::dispatch::job::JobId;
use crate::dispatch::worker::WorkerId;
use crate::dispatch::{OutboundSink, Project};
use crate::error::{MapswarmError, Result};
use crate::protocol::{ProjectSpec, ProjectSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(pub Uuid);

impl ProjectId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProjectId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ProjectId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub struct ProjectRegistry {
    limits: ProjectLimits,
    projects: HashMap<ProjectId, Project>,
    /// Which project each live worker belongs to. A transport disconnect
    /// only knows the connection id; this index routes it.
    membership: HashMap<WorkerId, ProjectId>,
}

impl ProjectRegistry {
    pub fn new(limits: ProjectLimits) -> Self {
        Self {
            limits,
            projects: HashMap::new(),
            membership: HashMap::new(),
        }
    }

    pub fn create_project(&mut self, spec: ProjectSpec) -> Result<ProjectId> {
        if spec.dataset.len() > self.limits.max_dataset_len {
            return Err(MapswarmError::MalformedSpec(format!(
                "dataset has {} items, limit is {}",
                spec.dataset.len(),
                self.limits.max_dataset_len
            )));
        }

        let id = ProjectId::new();
        let project = Project::new(id, spec)?;
        self.projects.insert(id, project);
        Ok(id)
    }

    pub fn project(&self, id: ProjectId) -> Option<&Project> {
        self.projects.get(&id)
    }

    pub fn project_count(&self) -> usize {
        self.projects.len()
    }

    /// Overviews of every project, newest first.
    pub fn summaries(&self) -> Vec<ProjectSummary> {
        let mut summaries: Vec<ProjectSummary> =
            self.projects.values().map(Project::summary).collect();
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        summaries
    }

    /// Register a worker on a project. A worker works on one project at a
    /// time; joining another implicitly leaves the current one, requeueing
    /// its in-flight jobs there.
    pub fn join(
        &mut self,
        worker_id: WorkerId,
        project_id: ProjectId,
        capacity: usize,
        sink: &dyn OutboundSink,
    ) -> Result<()> {
        if capacity == 0 {
            return Err(MapswarmError::MalformedSpec(
                "worker capacity must be at least 1".to_string(),
            ));
        }
        if !self.projects.contains_key(&project_id) {
            return Err(MapswarmError::ProjectNotFound(project_id));
        }

        if let Some(&current) = self.membership.get(&worker_id) {
            if current == project_id {
                tracing::warn!(worker_id = %worker_id, project_id = %project_id, "Duplicate join ignored");
                return Ok(());
            }
            self.leave(worker_id, sink);
        }

        let capacity = capacity.min(self.limits.max_worker_capacity);
        self.membership.insert(worker_id, project_id);
        if let Some(project) = self.projects.get_mut(&project_id) {
            project.connect_worker(worker_id, capacity, sink);
        }
        Ok(())
    }

    /// Route a disconnect (explicit leave or socket close) to the worker's
    /// project. Unknown workers are a non-event; sockets that never joined
    /// disconnect all the time.
    pub fn leave(&mut self, worker_id: WorkerId, sink: &dyn OutboundSink) {
        let Some(project_id) = self.membership.remove(&worker_id) else {
            tracing::debug!(worker_id = %worker_id, "Disconnect from non-member connection");
            return;
        };
        if let Some(project) = self.projects.get_mut(&project_id) {
            project.disconnect_worker(worker_id, sink);
        }
    }

    /// Route a finished job to the worker's project.
    pub fn record_result(
        &mut self,
        worker_id: WorkerId,
        job_id: JobId,
        result: Value,
        sink: &dyn OutboundSink,
    ) -> Result<()> {
        let project_id = *self
            .membership
            .get(&worker_id)
            .ok_or(MapswarmError::WorkerNotFound(worker_id))?;
        let project = self
            .projects
            .get_mut(&project_id)
            .ok_or(MapswarmError::ProjectNotFound(project_id))?;
        project.record_result(job_id, worker_id, result, sink)
    }

    /// Read-only snapshot of a project's completed results.
    pub fn results(&self, project_id: ProjectId) -> Result<Vec<(JobId, Value)>> {
        self.projects
            .get(&project_id)
            .map(Project::results_snapshot)
            .ok_or(MapswarmError::ProjectNotFound(project_id))
    }

    /// Tear a project down. Its workers are forgotten by the index; their
    /// connections simply receive nothing further for it.
    pub fn remove_project(&mut self, project_id: ProjectId) -> Result<()> {
        if self.projects.remove(&project_id).is_none() {
            return Err(MapswarmError::ProjectNotFound(project_id));
        }
        self.membership.retain(|_, pid| *pid != project_id);
        tracing::info!(project_id = %project_id, "Project removed");
        Ok(())
    }
}
