//! The project dispatcher core: job partitioning, worker-capacity
//! assignment, disconnect requeue, completion detection, and the final
//! reduction. Transport and presentation are collaborators reached only
//! through [`OutboundSink`].

pub mod job;
pub mod project;
pub mod timer;
pub mod worker;

pub use job::{Job, JobId, JobState};
pub use project::Project;
pub use timer::Timer;
pub use worker::{Worker, WorkerId};

use crate::protocol::ServerEvent;

/// Transport capability injected into the dispatcher.
///
/// Dispatch is fire-and-forget: the core addresses an event to a worker id
/// and moves on. Delivery, buffering, and redelivery are the transport's
/// concern, so the sink is infallible from the core's perspective.
pub trait OutboundSink {
    fn send(&self, worker: WorkerId, event: ServerEvent);
}
