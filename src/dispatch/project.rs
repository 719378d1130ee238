use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::dispatch::job::{Job, JobId};
use crate::dispatch::timer::Timer;
use crate::dispatch::worker::{Worker, WorkerId};
use crate::dispatch::OutboundSink;
use crate::error::{MapswarmError, Result};
use crate::protocol::{ProjectSpec, ProjectSummary, ServerEvent};
use crate::registry::ProjectId;
use crate::transform::{self, MapSpec, ReduceSpec};

/// State machine for one distributed computation.
///
/// Owns the pending queue, the worker registry, and the per-job results;
/// detects completion with an explicit accepted-result counter and runs the
/// reduction exactly once. Every externally visible mutation is one of the
/// event handlers below, processed to completion before the next. Callers
/// serialize events (the gateway holds one lock across the registry).
///
/// Invariant at every observable point:
/// `completed_count + pending.len() + sum(worker.in_flight.len()) == total`.
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    map: MapSpec,
    reduce: ReduceSpec,
    /// All jobs, indexed by `JobId` (= dataset position). Never shrinks;
    /// completed results stay addressable here for the project's lifetime.
    jobs: Vec<Job>,
    /// Job ids awaiting assignment, front = next to dispatch.
    pending: VecDeque<JobId>,
    workers: HashMap<WorkerId, Worker>,
    /// Accepted results. Counted explicitly, never inferred from any
    /// container's length.
    completed_count: usize,
    complete: bool,
    final_result: Option<Value>,
    timer: Timer,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Project {
    /// Materialize a project from a spec. Rejects empty datasets and unknown
    /// or ill-parameterized transforms before any job is created.
    pub fn new(id: ProjectId, spec: ProjectSpec) -> Result<Self> {
        if spec.dataset.is_empty() {
            return Err(MapswarmError::MalformedSpec(
                "dataset must not be empty".to_string(),
            ));
        }
        spec.map.validate()?;
        spec.reduce.validate()?;

        let jobs: Vec<Job> = spec
            .dataset
            .into_iter()
            .enumerate()
            .map(|(index, payload)| Job::new(JobId(index), payload))
            .collect();
        let pending: VecDeque<JobId> = jobs.iter().map(|job| job.id).collect();
        let total = jobs.len();

        tracing::info!(project_id = %id, title = %spec.title, total, "Project created");

        Ok(Self {
            id,
            title: spec.title,
            map: spec.map,
            reduce: spec.reduce,
            jobs,
            pending,
            workers: HashMap::new(),
            completed_count: 0,
            complete: false,
            final_result: None,
            timer: Timer::new(),
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    pub fn total(&self) -> usize {
        self.jobs.len()
    }

    pub fn completed_count(&self) -> usize {
        self.completed_count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_total(&self) -> usize {
        self.workers.values().map(|w| w.in_flight.len()).sum()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn final_result(&self) -> Option<&Value> {
        self.final_result.as_ref()
    }

    pub fn elapsed(&self) -> Duration {
        self.timer.elapsed()
    }

    pub fn has_worker(&self, worker_id: WorkerId) -> bool {
        self.workers.contains_key(&worker_id)
    }

    pub fn job(&self, job_id: JobId) -> Option<&Job> {
        self.jobs.get(job_id.0)
    }

    /// Live worker ids in a stable order.
    pub fn worker_ids(&self) -> Vec<WorkerId> {
        let mut ids: Vec<WorkerId> = self.workers.keys().copied().collect();
        ids.sort_by_key(|id| id.0);
        ids
    }

    /// Completed results keyed by job id, ordered by id.
    pub fn results_snapshot(&self) -> Vec<(JobId, Value)> {
        self.jobs
            .iter()
            .filter_map(|job| job.result.clone().map(|result| (job.id, result)))
            .collect()
    }

    pub fn summary(&self) -> ProjectSummary {
        ProjectSummary {
            project_id: self.id,
            title: self.title.clone(),
            total: self.total(),
            completed: self.completed_count,
            workers: self.workers.len(),
            complete: self.complete,
            elapsed_ms: self.timer.elapsed().as_millis() as u64,
            created_at: self.created_at,
        }
    }

    /// Register a worker and immediately fill its capacity from the queue,
    /// then broadcast the updated worker list and send the newcomer a
    /// catch-up snapshot of completed results.
    pub fn connect_worker(&mut self, worker_id: WorkerId, capacity: usize, sink: &dyn OutboundSink) {
        if self.workers.contains_key(&worker_id) {
            tracing::warn!(project_id = %self.id, worker_id = %worker_id, "Duplicate worker registration ignored");
            return;
        }

        self.workers.insert(worker_id, Worker::new(worker_id, capacity));
        tracing::info!(project_id = %self.id, worker_id = %worker_id, capacity, "Worker registered");

        for _ in 0..capacity {
            if !self.assign(worker_id, sink) {
                break;
            }
        }

        self.broadcast_worker_list(sink);
        sink.send(
            worker_id,
            ServerEvent::ResultsSnapshot {
                results: self.results_snapshot(),
            },
        );
        if self.complete {
            // Late joiner on a finished project still gets the final value.
            sink.send(
                worker_id,
                ServerEvent::ProjectComplete {
                    final_result: self.final_result.clone().unwrap_or(Value::Null),
                },
            );
        }
    }

    /// Requeue the worker's in-flight jobs, drop it from the registry, pause
    /// the timer if it was the last worker, and broadcast the new list.
    pub fn disconnect_worker(&mut self, worker_id: WorkerId, sink: &dyn OutboundSink) {
        if !self.workers.contains_key(&worker_id) {
            tracing::warn!(project_id = %self.id, worker_id = %worker_id, "Disconnect for unknown worker ignored");
            return;
        }

        self.reassign(worker_id);
        self.workers.remove(&worker_id);
        tracing::info!(project_id = %self.id, worker_id = %worker_id, "Worker removed");

        if self.workers.is_empty() {
            self.timer.stop();
        }

        self.broadcast_worker_list(sink);
    }

    /// Accept one job result.
    ///
    /// Rejects anything that does not correlate to a live assignment: an
    /// unregistered worker, an out-of-range job id, or a job not currently
    /// in that worker's in-flight set (duplicate delivery, late retry, or
    /// misattribution). A rejected event mutates nothing.
    pub fn record_result(
        &mut self,
        job_id: JobId,
        worker_id: WorkerId,
        result: Value,
        sink: &dyn OutboundSink,
    ) -> Result<()> {
        if self.complete {
            return Err(MapswarmError::AlreadyComplete(self.id));
        }
        let worker = self
            .workers
            .get_mut(&worker_id)
            .ok_or(MapswarmError::WorkerNotFound(worker_id))?;
        if job_id.0 >= self.jobs.len() {
            return Err(MapswarmError::JobOutOfRange {
                job: job_id,
                total: self.jobs.len(),
            });
        }
        if !worker.in_flight.remove(&job_id) {
            return Err(MapswarmError::StaleResult {
                job: job_id,
                worker: worker_id,
            });
        }

        let job = &mut self.jobs[job_id.0];
        job.assigned_worker = None;
        job.result = Some(result);
        self.completed_count += 1;
        tracing::debug!(
            project_id = %self.id,
            job_id = %job_id,
            worker_id = %worker_id,
            completed = self.completed_count,
            total = self.jobs.len(),
            "Result recorded"
        );

        if self.completed_count == self.jobs.len() {
            self.finish(sink);
        } else {
            // Keep the freed capacity busy.
            self.assign(worker_id, sink);
        }
        Ok(())
    }

    /// Dispatch the head of the queue to the given worker if it has spare
    /// capacity. Returns whether a job went out. Non-fatal no-op otherwise.
    fn assign(&mut self, worker_id: WorkerId, sink: &dyn OutboundSink) -> bool {
        if self.complete {
            tracing::warn!(project_id = %self.id, "Assignment attempted on a complete project");
            return false;
        }
        match self.workers.get(&worker_id) {
            Some(worker) if worker.has_capacity() => {}
            Some(_) => return false,
            None => {
                tracing::warn!(project_id = %self.id, worker_id = %worker_id, "Assignment for unknown worker ignored");
                return false;
            }
        }
        let Some(job_id) = self.pending.pop_front() else {
            return false;
        };

        if let Some(worker) = self.workers.get_mut(&worker_id) {
            worker.in_flight.insert(job_id);
        }
        let job = &mut self.jobs[job_id.0];
        job.assigned_worker = Some(worker_id);

        // First assignment of the computation, or resumption after an idle
        // gap with no workers.
        self.timer.start();

        tracing::debug!(project_id = %self.id, job_id = %job_id, worker_id = %worker_id, "Job dispatched");
        sink.send(
            worker_id,
            ServerEvent::JobDispatched {
                job_id,
                payload: job.payload.clone(),
                map: self.map.clone(),
            },
        );
        true
    }

    /// Return every in-flight job of the worker to the *front* of the queue
    /// with its assignment cleared, so interrupted work is retried before
    /// fresh work. No ordering is guaranteed across the requeued set.
    fn reassign(&mut self, worker_id: WorkerId) {
        let Some(worker) = self.workers.get_mut(&worker_id) else {
            tracing::warn!(project_id = %self.id, worker_id = %worker_id, "Reassign for unknown worker ignored");
            return;
        };

        let in_flight = std::mem::take(&mut worker.in_flight);
        let count = in_flight.len();
        for job_id in in_flight {
            self.jobs[job_id.0].assigned_worker = None;
            self.pending.push_front(job_id);
        }
        if count > 0 {
            tracing::info!(project_id = %self.id, worker_id = %worker_id, count, "Jobs requeued");
        }
    }

    /// Runs exactly once, on the `completed_count == total` transition:
    /// freeze the timer, reduce the positionally ordered results, and
    /// broadcast the final value.
    fn finish(&mut self, sink: &dyn OutboundSink) {
        if self.complete {
            tracing::warn!(project_id = %self.id, "Completion triggered twice, ignoring");
            return;
        }

        self.timer.stop();
        self.completed_at = Some(Utc::now());

        // Ordered by job id (0..total), independent of completion order.
        let ordered: Vec<Value> = self
            .jobs
            .iter()
            .map(|job| job.result.clone().unwrap_or(Value::Null))
            .collect();

        let final_result = match transform::apply_reduce(&self.reduce, &ordered) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(project_id = %self.id, error = %e, "Reduction failed");
                Value::Null
            }
        };

        self.final_result = Some(final_result.clone());
        self.complete = true;
        tracing::info!(
            project_id = %self.id,
            elapsed_ms = self.timer.elapsed().as_millis() as u64,
            total = self.jobs.len(),
            "Project complete"
        );

        for worker_id in self.worker_ids() {
            sink.send(
                worker_id,
                ServerEvent::ProjectComplete {
                    final_result: final_result.clone(),
                },
            );
        }
    }

    fn broadcast_worker_list(&self, sink: &dyn OutboundSink) {
        let workers = self.worker_ids();
        for worker_id in &workers {
            sink.send(
                *worker_id,
                ServerEvent::WorkerList {
                    workers: workers.clone(),
                },
            );
        }
    }
}
