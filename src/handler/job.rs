use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HandlerState {
    Stopped,
    Running,
    Finished,
}

impl HandlerState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            HandlerState::Stopped => 0,
            HandlerState::Running => 1,
            HandlerState::Finished => 2,
        }
    }

    pub(crate) fn from_u8(raw: u8) -> Self {
        match raw {
            1 => HandlerState::Running,
            2 => HandlerState::Finished,
            _ => HandlerState::Stopped,
        }
    }
}

impl std::fmt::Display for HandlerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HandlerState::Stopped => write!(f, "stopped"),
            HandlerState::Running => write!(f, "running"),
            HandlerState::Finished => write!(f, "finished"),
        }
    }
}

/// Bookkeeping record the handler keeps around one unit of work.
#[derive(Debug, Clone)]
pub(crate) struct JobWrapper {
    pub job_id: Uuid,
    pub handler_id: Uuid,
    pub input: String,
    pub additional_data: Option<String>,
    pub enqueue_time: DateTime<Utc>,
    pub assigned_time: Option<DateTime<Utc>>,
    pub assigned_client_id: Option<Uuid>,
    pub result_time: Option<DateTime<Utc>>,
    pub result_payload: Option<String>,
    pub retry_count: u32,
}

impl JobWrapper {
    pub fn new(handler_id: Uuid, input: String, additional_data: Option<String>) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            handler_id,
            input,
            additional_data,
            enqueue_time: Utc::now(),
            assigned_time: None,
            assigned_client_id: None,
            result_time: None,
            result_payload: None,
            retry_count: 0,
        }
    }

    /// Clear the assignment fields so the wrapper can be leased again.
    pub fn reset(&mut self) {
        self.assigned_time = None;
        self.assigned_client_id = None;
    }

    pub fn projection(&self) -> Job {
        Job {
            job_id: self.job_id,
            handler_id: self.handler_id,
            input: self.input.clone(),
            additional_data: self.additional_data.clone(),
        }
    }
}

/// What a worker client sees when it leases a job. No wrapper internals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub job_id: Uuid,
    pub handler_id: Uuid,
    pub input: String,
    pub additional_data: Option<String>,
}

/// Outcome a worker client reports for a leased job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub job_id: Uuid,
    pub client_id: Uuid,
    pub payload: Option<String>,
    pub error: Option<String>,
}

impl JobResult {
    pub fn success(job_id: Uuid, client_id: Uuid, payload: impl Into<String>) -> Self {
        Self {
            job_id,
            client_id,
            payload: Some(payload.into()),
            error: None,
        }
    }

    pub fn failure(job_id: Uuid, client_id: Uuid, error: impl Into<String>) -> Self {
        Self {
            job_id,
            client_id,
            payload: None,
            error: Some(error.into()),
        }
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
