pub mod config;
pub mod merge;
pub mod metrics_server;
pub mod observability;
pub mod pipeline;
pub mod retry;
pub mod sinks;
pub mod sources;
pub mod transform;
pub mod validate;

pub use pipeline::{Orchestrator, RunMode, RunState, RunSummary};
