//! The adapter seam between the handler core and user plugin code.
//!
//! A package exposes one [`GeneratorInit`] describing the handler to run and
//! any number of named [`JobGenerator`] implementations. The core binds the
//! selected generator once at initialization, handing it an [`EnqueueHandle`]
//! so user code can push work into the available queue without ever holding
//! a strong reference back into the handler.

use std::sync::Weak;

use async_trait::async_trait;
use uuid::Uuid;

use crate::config::HandlerSettings;
use crate::error::GeneratorError;
use crate::handler::job::JobWrapper;
use crate::handler::queues::JobQueues;

/// Plugin-side initializer: describes which generator to run and with what
/// settings.
pub trait GeneratorInit: Send + Sync {
    fn handler_settings(&self) -> HandlerSettings;

    /// Opaque settings payload forwarded to the generator's `bind`.
    fn custom_settings(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Everything a generator receives when the core wires it up.
#[derive(Debug, Clone)]
pub struct GeneratorContext {
    pub enqueue: EnqueueHandle,
    pub custom_settings: Option<serde_json::Value>,
}

/// User-supplied logic object that produces jobs and consumes results.
///
/// Callback discipline: `bind` runs once before the generator is shared;
/// `on_start`, `on_stop` and `on_finished` fire exactly once per matching
/// state transition; `create_more_jobs` and `process_result` are only ever
/// invoked from the control loop, so they never race each other.
#[async_trait]
pub trait JobGenerator: Send + Sync + 'static {
    /// Receive the enqueue handle and custom settings. Runs before any
    /// other callback; a failure here aborts initialization.
    fn bind(&mut self, ctx: GeneratorContext) -> Result<(), GeneratorError>;

    async fn on_start(&self) {}

    async fn on_stop(&self) {}

    async fn on_finished(&self) {}

    /// Populate the available queue through the bound [`EnqueueHandle`].
    /// May produce zero or more jobs; may block.
    async fn create_more_jobs(&self) -> Result<(), GeneratorError>;

    /// Consume one finished job. Called in finished-queue insertion order,
    /// never concurrently with itself.
    async fn process_result(&self, input: &str, result: &str) -> Result<(), GeneratorError>;

    /// Polled after each control-loop iteration; `true` moves the handler
    /// to the finished state.
    fn is_finished(&self) -> bool;

    /// Expected number of jobs for reporting. Negative means unknown.
    fn total_job_count(&self) -> i64 {
        -1
    }
}

/// Back-edge from plugin code into the handler's available queue.
///
/// Holds only a weak reference: once the handler is gone, `enqueue` becomes
/// a no-op returning `None`.
#[derive(Debug, Clone)]
pub struct EnqueueHandle {
    handler_id: Uuid,
    queues: Weak<JobQueues>,
}

impl EnqueueHandle {
    pub(crate) fn new(handler_id: Uuid, queues: Weak<JobQueues>) -> Self {
        Self { handler_id, queues }
    }

    /// Insert a new job into the available queue and return its id.
    pub fn enqueue(
        &self,
        input: impl Into<String>,
        additional_data: Option<String>,
    ) -> Option<Uuid> {
        let queues = self.queues.upgrade()?;
        let wrapper = JobWrapper::new(self.handler_id, input.into(), additional_data);
        let job_id = wrapper.job_id;
        queues.push_available(wrapper);
        Some(job_id)
    }
}
