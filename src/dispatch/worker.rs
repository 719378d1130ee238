use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::dispatch::job::JobId;

/// Opaque worker identity, minted by the transport layer per live connection.
/// The dispatcher never holds the connection itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkerId(pub Uuid);

impl WorkerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WorkerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A remote agent's registered identity and current load.
#[derive(Debug, Clone)]
pub struct Worker {
    pub id: WorkerId,
    /// Maximum concurrent jobs, fixed at registration.
    pub capacity: usize,
    /// Jobs currently dispatched to this worker and awaiting results.
    pub in_flight: HashSet<JobId>,
}

impl Worker {
    pub fn new(id: WorkerId, capacity: usize) -> Self {
        Self {
            id,
            capacity,
            in_flight: HashSet::new(),
        }
    }

    pub fn has_capacity(&self) -> bool {
        self.in_flight.len() < self.capacity
    }
}
