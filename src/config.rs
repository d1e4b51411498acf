use serde::{Deserialize, Serialize};

/// Per-handler options supplied by the plugin's initializer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HandlerSettings {
    /// Name of the generator type inside the package. Required.
    pub handler_name: String,
    /// Cosmetic identifier for the job stream. Required.
    pub job_name: String,
    /// Cron expression. Empty disables the start scheduler.
    pub schedule: String,
    /// Seconds a leased job may stay pending before it is recycled.
    /// Zero or negative disables the timeout sweep.
    pub job_timeout_secs: i64,
    /// When true, `initialize` starts the handler before returning.
    pub auto_start: bool,
    /// Maximum failed-result retries per job. Zero means unlimited.
    pub max_retries: u32,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            handler_name: String::new(),
            job_name: String::new(),
            schedule: String::new(),
            job_timeout_secs: 0,
            auto_start: false,
            max_retries: 0,
        }
    }
}

impl HandlerSettings {
    pub fn new(handler_name: impl Into<String>, job_name: impl Into<String>) -> Self {
        Self {
            handler_name: handler_name.into(),
            job_name: job_name.into(),
            ..Default::default()
        }
    }

    pub fn with_schedule(mut self, schedule: impl Into<String>) -> Self {
        self.schedule = schedule.into();
        self
    }

    pub fn with_job_timeout(mut self, secs: i64) -> Self {
        self.job_timeout_secs = secs;
        self
    }

    pub fn with_auto_start(mut self) -> Self {
        self.auto_start = true;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub(crate) fn validate(&self) -> Result<(), String> {
        if self.handler_name.trim().is_empty() {
            return Err("handler_name must not be empty".to_string());
        }
        if self.job_name.trim().is_empty() {
            return Err("job_name must not be empty".to_string());
        }
        Ok(())
    }
}
