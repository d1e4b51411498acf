use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{HandlerError, Result};
use crate::handler::job::HandlerState;
use crate::handler::HandlerCore;

/// Upper bound on one idle wait between control-loop iterations. The drained
/// and result signals cut the wait short whenever there is work to do.
pub(crate) const IDLE_WAIT: Duration = Duration::from_millis(5000);

/// One full run of a handler: drives the generator from `on_start` until
/// cancellation or until the generator reports it is finished.
///
/// An `Err` return means a generator callback failed; the spawning wrapper
/// logs it and stops the handler.
pub(crate) async fn run(core: Arc<HandlerCore>, cancel: CancellationToken) -> Result<()> {
    core.generator.on_start().await;
    tracing::info!(handler = %core.full_name, "control loop started");

    loop {
        // Finished results first, in insertion order.
        while let Some(wrapper) = core.queues.pop_finished() {
            let result = wrapper.result_payload.unwrap_or_default();
            core.generator
                .process_result(&wrapper.input, &result)
                .await
                .map_err(HandlerError::Generator)?;
        }

        let timeout_secs = core.settings.job_timeout_secs;
        if timeout_secs > 0 {
            for job_id in core
                .queues
                .recycle_expired(chrono::Duration::seconds(timeout_secs))
            {
                tracing::warn!(
                    handler = %core.full_name,
                    job_id = %job_id,
                    timeout_secs,
                    "pending job timed out, re-queued"
                );
            }
        }

        if core.queues.available_is_empty() {
            core.generator
                .create_more_jobs()
                .await
                .map_err(HandlerError::Generator)?;
        }

        if core.generator.is_finished() {
            let mut lifecycle = core.lifecycle.lock().await;
            if cancel.is_cancelled() || lifecycle.control.is_none() {
                // A stop won the race; it owns the state transition.
                return Ok(());
            }
            core.generator.on_finished().await;
            core.set_state(&mut lifecycle, HandlerState::Finished);
            lifecycle.control = None;
            tracing::info!(handler = %core.full_name, "generator finished");
            return Ok(());
        }

        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = core.queues.available_drained.notified() => {}
            _ = core.queues.result_ready.notified() => {}
            _ = tokio::time::sleep(IDLE_WAIT) => {}
        }
    }
}
