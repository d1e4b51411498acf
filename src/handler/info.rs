use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::handler::job::HandlerState;

/// Snapshot of a handler's counters and state for the host's reporting
/// surface. Safe to read while the handler is running.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerInfo {
    pub handler_id: Uuid,
    pub package_name: String,
    pub handler_name: String,
    pub job_name: String,
    pub full_name: String,
    pub state: HandlerState,
    pub available_jobs: usize,
    pub pending_jobs: usize,
    pub finished_jobs: usize,
    pub processed_jobs: u64,
    pub failed_jobs: u64,
    /// Expected job total as reported by the generator; negative = unknown.
    pub total_jobs: i64,
    pub last_start_time: Option<DateTime<Utc>>,
    pub next_start_time: Option<DateTime<Utc>>,
}

/// What a deploying worker client needs to fetch before executing jobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandlerJobInfo {
    pub full_name: String,
    pub artifact_file: String,
    pub worker_dependencies: Vec<String>,
}
