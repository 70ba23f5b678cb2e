mod coverage;
mod error;
pub mod keys;
mod service;

pub use coverage::coverage_snapshot;
pub use error::{Error, Result};
pub use service::{
    estimate_cost_cents_x100, generate_agent_id, AgentCompleteRequest, AgentStartRequest,
    MetricsService, WarmOutcome,
};
