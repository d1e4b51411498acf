use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use cron::Schedule;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::handler::job::HandlerState;
use crate::handler::HandlerCore;

/// How often the scheduler checks whether a start is due. Coarse polling is
/// enough at one-minute cron resolution.
pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Parse a cron expression. Classic five-field expressions get a seconds
/// column prepended; the parser otherwise requires one.
pub(crate) fn parse_schedule(expr: &str) -> Result<Schedule, cron::error::Error> {
    if expr.split_whitespace().count() == 5 {
        Schedule::from_str(&format!("0 {expr}"))
    } else {
        Schedule::from_str(expr)
    }
}

/// Background task that starts the handler whenever the schedule comes due.
/// Runs for the handler's whole lifetime and shares its state lock, so a
/// cron start never races a manual start or stop.
pub(crate) fn spawn(
    core: Arc<HandlerCore>,
    schedule: Schedule,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }

            let now = Utc::now();
            let mut lifecycle = core.lifecycle.lock().await;
            let Some(next) = lifecycle.next_start_time else {
                break;
            };
            if next < now && lifecycle.state != HandlerState::Running {
                tracing::info!(
                    handler = %core.full_name,
                    scheduled = %next,
                    "cron schedule due, starting handler"
                );
                HandlerCore::start_locked(&core, &mut lifecycle);
                lifecycle.next_start_time = schedule.after(&now).next();
            }
        }
    })
}
