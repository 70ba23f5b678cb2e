mod agents;
mod coverage;
mod db;
mod error;
mod events;
mod handoff;
mod metrics;
mod relations;
mod retention;
mod schema;
mod sessions;
mod sync;

pub use coverage::HookTypeStats;
pub use db::Database;
pub use error::{Error, Result};
pub use metrics::{
    day_key, day_start, hour_key, hour_start, AgentTypeBreakdown, CurrentMetrics, DistributionRow,
    TimelineBucket, ToolUsageRow,
};
pub use retention::SweepReport;
pub use sync::SyncQueueStats;
