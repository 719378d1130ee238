use std::net::SocketAddr;

/// Limits applied to every project the gateway accepts.
#[derive(Debug, Clone)]
pub struct ProjectLimits {
    /// Maximum number of items in a submitted dataset.
    pub max_dataset_len: usize,
    /// Upper bound on the concurrent-job capacity a worker may request.
    pub max_worker_capacity: usize,
}

impl Default for ProjectLimits {
    fn default() -> Self {
        Self {
            max_dataset_len: 100_000,
            max_worker_capacity: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    pub limits: ProjectLimits,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:8000"
                .parse()
                .expect("default listen address is valid"),
            limits: ProjectLimits::default(),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }
}

/// Configuration for a worker agent process.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// WebSocket URL of the gateway (e.g. "ws://127.0.0.1:8000/ws").
    pub server_url: String,
    /// Project to join.
    pub project_id: String,
    /// How many jobs this agent is willing to hold in flight at once.
    pub capacity: usize,
}
