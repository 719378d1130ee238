//! Worker agent: the remote counterpart of the dispatcher.
//!
//! Connects to a gateway over WebSocket, joins a project with a requested
//! capacity, applies the named map transform to each dispatched payload, and
//! returns results until the project completes.

pub mod agent;

pub use agent::run_worker;
