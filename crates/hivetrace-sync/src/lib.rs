mod worker;

pub use worker::{BatchOutcome, SyncWorker, SyncWorkerConfig};
