use std::sync::Mutex;

use serde_json::{json, Value};

use mapswarm::config::ProjectLimits;
use mapswarm::dispatch::job::JobId;
use mapswarm::dispatch::worker::WorkerId;
use mapswarm::dispatch::OutboundSink;
use mapswarm::error::MapswarmError;
use mapswarm::protocol::{ProjectSpec, ServerEvent};
use mapswarm::registry::{ProjectId, ProjectRegistry};
use mapswarm::transform::{MapSpec, ReduceSpec};

#[derive(Default)]
struct RecordingSink {
    events: Mutex<Vec<(WorkerId, ServerEvent)>>,
}

impl RecordingSink {
    fn new() -> Self {
        Self::default()
    }

    fn dispatch_count(&self, worker: WorkerId) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, event)| {
                *id == worker && matches!(event, ServerEvent::JobDispatched { .. })
            })
            .count()
    }
}

impl OutboundSink for RecordingSink {
    fn send(&self, worker: WorkerId, event: ServerEvent) {
        self.events.lock().unwrap().push((worker, event));
    }
}

fn spec(title: &str, dataset: Vec<Value>) -> ProjectSpec {
    ProjectSpec {
        title: title.to_string(),
        dataset,
        map: MapSpec::named("double"),
        reduce: ReduceSpec::named("sum"),
    }
}

fn registry() -> ProjectRegistry {
    ProjectRegistry::new(ProjectLimits::default())
}

#[test]
fn test_create_and_lookup() {
    let mut registry = registry();
    let id = registry
        .create_project(spec("first", vec![json!(1), json!(2)]))
        .unwrap();

    let project = registry.project(id).unwrap();
    assert_eq!(project.title, "first");
    assert_eq!(project.total(), 2);
    assert_eq!(registry.project_count(), 1);
}

#[test]
fn test_create_rejects_malformed_specs() {
    let mut registry = registry();

    let err = registry.create_project(spec("empty", vec![]));
    assert!(matches!(err, Err(MapswarmError::MalformedSpec(_))));

    let err = registry.create_project(ProjectSpec {
        title: "bad".to_string(),
        dataset: vec![json!(1)],
        map: MapSpec::named("no_such_transform"),
        reduce: ReduceSpec::named("sum"),
    });
    assert!(matches!(err, Err(MapswarmError::MalformedSpec(_))));

    // Nothing was registered
    assert_eq!(registry.project_count(), 0);
}

#[test]
fn test_create_enforces_dataset_limit() {
    let limits = ProjectLimits {
        max_dataset_len: 2,
        max_worker_capacity: 64,
    };
    let mut registry = ProjectRegistry::new(limits);

    let err = registry.create_project(spec("big", vec![json!(1), json!(2), json!(3)]));
    assert!(matches!(err, Err(MapswarmError::MalformedSpec(_))));
}

#[test]
fn test_join_unknown_project() {
    let mut registry = registry();
    let sink = RecordingSink::new();

    let err = registry.join(WorkerId::new(), ProjectId::new(), 2, &sink);
    assert!(matches!(err, Err(MapswarmError::ProjectNotFound(_))));
}

#[test]
fn test_join_rejects_zero_capacity() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    let id = registry
        .create_project(spec("p", vec![json!(1)]))
        .unwrap();

    let err = registry.join(WorkerId::new(), id, 0, &sink);
    assert!(matches!(err, Err(MapswarmError::MalformedSpec(_))));
    assert_eq!(registry.project(id).unwrap().in_flight_total(), 0);
}

#[test]
fn test_requested_capacity_is_clamped() {
    let limits = ProjectLimits {
        max_dataset_len: 100,
        max_worker_capacity: 2,
    };
    let mut registry = ProjectRegistry::new(limits);
    let sink = RecordingSink::new();
    let id = registry
        .create_project(spec("p", (0..5).map(|n| json!(n)).collect()))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, id, 10, &sink).unwrap();

    // Only the clamped capacity's worth of jobs went out
    assert_eq!(sink.dispatch_count(worker), 2);
    assert_eq!(registry.project(id).unwrap().in_flight_total(), 2);
}

#[test]
fn test_events_routed_to_owning_project() {
    let mut registry = registry();
    let sink = RecordingSink::new();

    let first = registry
        .create_project(spec("first", vec![json!(1)]))
        .unwrap();
    let second = registry
        .create_project(spec("second", vec![json!(2)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, first, 1, &sink).unwrap();
    registry
        .record_result(worker, JobId(0), json!(2), &sink)
        .unwrap();

    // Only the joined project advanced
    assert!(registry.project(first).unwrap().is_complete());
    assert!(!registry.project(second).unwrap().is_complete());
    assert_eq!(registry.project(second).unwrap().pending_len(), 1);
}

#[test]
fn test_result_from_unjoined_worker_rejected() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    registry
        .create_project(spec("p", vec![json!(1)]))
        .unwrap();

    let err = registry.record_result(WorkerId::new(), JobId(0), json!(2), &sink);
    assert!(matches!(err, Err(MapswarmError::WorkerNotFound(_))));
}

/// A transport disconnect only carries the connection id; the index must
/// route it to the right project and requeue the worker's jobs there.
#[test]
fn test_leave_routes_by_worker_id() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    let id = registry
        .create_project(spec("p", vec![json!(1), json!(2)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, id, 2, &sink).unwrap();
    assert_eq!(registry.project(id).unwrap().in_flight_total(), 2);

    registry.leave(worker, &sink);
    let project = registry.project(id).unwrap();
    assert_eq!(project.in_flight_total(), 0);
    assert_eq!(project.pending_len(), 2);
    assert!(!project.has_worker(worker));
}

#[test]
fn test_leave_without_membership_is_noop() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    registry.leave(WorkerId::new(), &sink);
}

/// Joining a second project implicitly leaves the first, requeueing its
/// in-flight jobs there.
#[test]
fn test_join_switches_projects() {
    let mut registry = registry();
    let sink = RecordingSink::new();

    let first = registry
        .create_project(spec("first", vec![json!(1), json!(2)]))
        .unwrap();
    let second = registry
        .create_project(spec("second", vec![json!(3)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, first, 2, &sink).unwrap();
    registry.join(worker, second, 1, &sink).unwrap();

    let old = registry.project(first).unwrap();
    assert!(!old.has_worker(worker));
    assert_eq!(old.pending_len(), 2);

    let new = registry.project(second).unwrap();
    assert!(new.has_worker(worker));
    assert_eq!(new.in_flight_total(), 1);
}

#[test]
fn test_duplicate_join_is_ignored() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    let id = registry
        .create_project(spec("p", vec![json!(1), json!(2), json!(3)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, id, 1, &sink).unwrap();
    registry.join(worker, id, 1, &sink).unwrap();

    assert_eq!(sink.dispatch_count(worker), 1);
    assert_eq!(registry.project(id).unwrap().worker_ids(), vec![worker]);
}

#[test]
fn test_results_snapshot_is_read_only() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    let id = registry
        .create_project(spec("p", vec![json!(1), json!(2)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, id, 1, &sink).unwrap();
    registry
        .record_result(worker, JobId(0), json!(2), &sink)
        .unwrap();

    let results = registry.results(id).unwrap();
    assert_eq!(results, vec![(JobId(0), json!(2))]);

    // Unknown project
    let err = registry.results(ProjectId::new());
    assert!(matches!(err, Err(MapswarmError::ProjectNotFound(_))));
}

#[test]
fn test_remove_project_tears_down() {
    let mut registry = registry();
    let sink = RecordingSink::new();
    let id = registry
        .create_project(spec("p", vec![json!(1)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, id, 1, &sink).unwrap();

    registry.remove_project(id).unwrap();
    assert!(registry.project(id).is_none());
    assert_eq!(registry.project_count(), 0);

    // Membership was purged; a late disconnect is harmless
    registry.leave(worker, &sink);

    let err = registry.remove_project(id);
    assert!(matches!(err, Err(MapswarmError::ProjectNotFound(_))));
}

#[test]
fn test_summaries_reflect_registry() {
    let mut registry = registry();
    let sink = RecordingSink::new();

    let first = registry
        .create_project(spec("first", vec![json!(1)]))
        .unwrap();
    registry
        .create_project(spec("second", vec![json!(1), json!(2)]))
        .unwrap();

    let worker = WorkerId::new();
    registry.join(worker, first, 1, &sink).unwrap();
    registry
        .record_result(worker, JobId(0), json!(2), &sink)
        .unwrap();

    let summaries = registry.summaries();
    assert_eq!(summaries.len(), 2);

    let first_summary = summaries
        .iter()
        .find(|s| s.project_id == first)
        .unwrap();
    assert_eq!(first_summary.title, "first");
    assert_eq!(first_summary.total, 1);
    assert_eq!(first_summary.completed, 1);
    assert!(first_summary.complete);

    let second_summary = summaries
        .iter()
        .find(|s| s.project_id != first)
        .unwrap();
    assert_eq!(second_summary.completed, 0);
    assert!(!second_summary.complete);
}
