//! The handler engine: owns one job stream's queues, generator, timers and
//! state machine, and serves the client-facing dispatch API.

mod control;
mod cron;
pub mod info;
pub mod job;
pub(crate) mod queues;

pub use info::{HandlerInfo, HandlerJobInfo};
pub use job::{HandlerState, Job, JobResult};

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::HandlerSettings;
use crate::error::{HandlerError, Result};
use crate::generator::{EnqueueHandle, GeneratorContext, JobGenerator};
use crate::package::{self, JobScriptDescriptor, PackageLoader};
use crate::handler::queues::{JobQueues, Settlement};

/// The running control task and its cancellation token.
pub(crate) struct ControlTask {
    handle: JoinHandle<()>,
    cancel: CancellationToken,
}

/// Everything guarded by the state lock.
pub(crate) struct Lifecycle {
    pub(crate) state: HandlerState,
    pub(crate) last_start_time: Option<DateTime<Utc>>,
    pub(crate) next_start_time: Option<DateTime<Utc>>,
    pub(crate) control: Option<ControlTask>,
}

/// Shared innards of a handler, referenced by the control loop and the cron
/// task.
pub(crate) struct HandlerCore {
    pub(crate) id: Uuid,
    pub(crate) full_name: String,
    pub(crate) settings: HandlerSettings,
    package_name: String,
    package_folder: PathBuf,
    artifact_file: String,
    worker_dependencies: Vec<String>,
    pub(crate) generator: Arc<dyn JobGenerator>,
    pub(crate) queues: Arc<JobQueues>,
    processed_jobs: AtomicU64,
    failed_jobs: AtomicU64,
    /// Mirror of `Lifecycle::state` for lock-free reads on the dispatch path.
    state: AtomicU8,
    pub(crate) lifecycle: Mutex<Lifecycle>,
}

impl HandlerCore {
    pub(crate) fn state(&self) -> HandlerState {
        HandlerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, lifecycle: &mut Lifecycle, state: HandlerState) {
        lifecycle.state = state;
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// Spawn the control task if none is running. Callers hold the state
    /// lock, which is what makes `start` idempotent under concurrency.
    pub(crate) fn start_locked(core: &Arc<Self>, lifecycle: &mut Lifecycle) {
        if lifecycle.control.is_some() {
            return;
        }
        core.set_state(lifecycle, HandlerState::Running);
        lifecycle.last_start_time = Some(Utc::now());

        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task_core = core.clone();
        // The control loop runs in its own task so this continuation can
        // observe both error returns and panics from generator callbacks.
        let handle = tokio::spawn(async move {
            let outcome = tokio::spawn(control::run(task_core.clone(), token)).await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(error)) => {
                    tracing::error!(
                        handler = %task_core.full_name,
                        error = %error,
                        "control loop fault, stopping handler"
                    );
                    task_core.stop_inner(false).await;
                }
                Err(join_error) if join_error.is_panic() => {
                    tracing::error!(
                        handler = %task_core.full_name,
                        "control loop panicked, stopping handler"
                    );
                    task_core.stop_inner(false).await;
                }
                Err(_) => {}
            }
        });
        lifecycle.control = Some(ControlTask { handle, cancel });
        tracing::info!(handler = %core.full_name, "handler started");
    }

    /// Cancel the control task, wipe run state and notify the generator.
    /// Returns false when there was no control task to stop. `join` is
    /// false on the fault path, where the control task stops itself.
    pub(crate) async fn stop_inner(&self, join: bool) -> bool {
        let control = {
            let mut lifecycle = self.lifecycle.lock().await;
            let Some(control) = lifecycle.control.take() else {
                return false;
            };
            self.set_state(&mut lifecycle, HandlerState::Stopped);
            control
        };

        control.cancel.cancel();
        if join {
            if let Err(error) = control.handle.await {
                if error.is_panic() {
                    tracing::error!(handler = %self.full_name, "control task panicked");
                }
            }
        }

        self.queues.wipe();
        self.processed_jobs.store(0, Ordering::Relaxed);
        self.failed_jobs.store(0, Ordering::Relaxed);
        self.generator.on_stop().await;
        tracing::info!(handler = %self.full_name, "handler stopped");
        true
    }
}

/// Cron scheduler task handle, live for the handler's whole lifetime.
struct CronTask {
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// The engine owning one job stream. Hosts keep one per loaded package
/// handler and route client dispatch calls to it.
pub struct Handler {
    core: Arc<HandlerCore>,
    cron: Option<CronTask>,
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handler")
            .field("id", &self.core.id)
            .field("full_name", &self.core.full_name)
            .finish()
    }
}

impl Handler {
    /// Compile the descriptor through the loader, resolve the plugin's
    /// initializer and generator, wire the enqueue back-edge and spawn the
    /// cron scheduler when one is configured.
    ///
    /// Failures carry the structured reason: [`HandlerError::CompilationFailed`],
    /// [`HandlerError::JobInitializerMissing`], [`HandlerError::TypeException`]
    /// or [`HandlerError::JobHandlerMissing`].
    pub async fn initialize(
        descriptor: JobScriptDescriptor,
        base_folder: impl Into<PathBuf>,
        loader: &dyn PackageLoader,
    ) -> Result<Handler> {
        let base_folder = base_folder.into();
        let compiled = loader
            .compile(&descriptor, &base_folder)
            .map_err(|error| HandlerError::CompilationFailed(error.to_string()))?;

        let initializer = compiled
            .initializer
            .ok_or(HandlerError::JobInitializerMissing)?;
        let settings = initializer.handler_settings();
        settings.validate().map_err(HandlerError::TypeException)?;

        let mut generators = compiled.generators;
        let mut generator = generators
            .remove(&settings.handler_name)
            .ok_or_else(|| HandlerError::JobHandlerMissing(settings.handler_name.clone()))?;

        let id = Uuid::new_v4();
        let full_name = format!(
            "{}/{}/{}",
            descriptor.package_name, settings.handler_name, settings.job_name
        );

        let queues = Arc::new(JobQueues::new());
        let context = GeneratorContext {
            enqueue: EnqueueHandle::new(id, Arc::downgrade(&queues)),
            custom_settings: initializer.custom_settings(),
        };
        generator
            .bind(context)
            .map_err(|error| HandlerError::TypeException(error.to_string()))?;

        let schedule = if settings.schedule.is_empty() {
            None
        } else {
            match cron::parse_schedule(&settings.schedule) {
                Ok(schedule) => Some(schedule),
                Err(error) => {
                    tracing::warn!(
                        handler = %full_name,
                        schedule = %settings.schedule,
                        error = %error,
                        "cron expression failed to parse, scheduler disabled"
                    );
                    None
                }
            }
        };
        let next_start_time = schedule.as_ref().and_then(|s| s.after(&Utc::now()).next());

        let auto_start = settings.auto_start;
        let core = Arc::new(HandlerCore {
            id,
            full_name: full_name.clone(),
            settings,
            package_name: descriptor.package_name,
            package_folder: compiled.package_folder,
            artifact_file: compiled.artifact_file,
            worker_dependencies: descriptor.worker_dependencies,
            generator: Arc::from(generator),
            queues,
            processed_jobs: AtomicU64::new(0),
            failed_jobs: AtomicU64::new(0),
            state: AtomicU8::new(HandlerState::Stopped.as_u8()),
            lifecycle: Mutex::new(Lifecycle {
                state: HandlerState::Stopped,
                last_start_time: None,
                next_start_time,
                control: None,
            }),
        });

        let cron = schedule.map(|schedule| {
            let cancel = CancellationToken::new();
            let handle = cron::spawn(core.clone(), schedule, cancel.clone());
            CronTask {
                cancel,
                handle: Mutex::new(Some(handle)),
            }
        });

        tracing::info!(
            handler_id = %id,
            handler = %full_name,
            artifact = %core.artifact_file,
            "handler initialized"
        );

        let handler = Handler { core, cron };
        if auto_start {
            handler.start().await;
        }
        Ok(handler)
    }

    pub fn id(&self) -> Uuid {
        self.core.id
    }

    /// `"Package/Handler/Job"`.
    pub fn full_name(&self) -> &str {
        &self.core.full_name
    }

    pub fn state(&self) -> HandlerState {
        self.core.state()
    }

    pub fn artifact_path(&self) -> PathBuf {
        self.core.package_folder.join(&self.core.artifact_file)
    }

    /// Begin a run. Idempotent: a handler with a live control task is left
    /// alone.
    pub async fn start(&self) {
        let mut lifecycle = self.core.lifecycle.lock().await;
        HandlerCore::start_locked(&self.core, &mut lifecycle);
    }

    /// End the current run: cancel the control task, wait for it, empty all
    /// queues, zero the counters and invoke the generator's stop hook.
    /// Returns false when the handler was not running.
    pub async fn stop(&self) -> bool {
        self.core.stop_inner(true).await
    }

    /// Dispose of the handler's background machinery. Cancels the cron
    /// scheduler and waits for it; a running handler must be stopped
    /// explicitly first.
    pub async fn shutdown(&self) {
        if let Some(cron) = &self.cron {
            cron.cancel.cancel();
            if let Some(handle) = cron.handle.lock().await.take() {
                let _ = handle.await;
            }
        }
    }

    /// Lease the oldest available job to `client_id`, or `None` when there
    /// is nothing to hand out.
    pub fn get_next_job(&self, client_id: Uuid) -> Option<Job> {
        let job = self.core.queues.lease(client_id)?;
        tracing::debug!(
            handler = %self.core.full_name,
            job_id = %job.job_id,
            client_id = %client_id,
            "job leased"
        );
        Some(job)
    }

    /// Accept or reject a worker's result. True only when the result was a
    /// success accepted from the assigned client.
    pub fn submit_result(&self, result: &JobResult) -> bool {
        let core = &self.core;
        if core.state() == HandlerState::Stopped {
            tracing::warn!(
                handler = %core.full_name,
                job_id = %result.job_id,
                client_id = %result.client_id,
                "result for stopped handler rejected"
            );
            return false;
        }

        match core.queues.settle(result, core.settings.max_retries) {
            Settlement::Completed => {
                core.processed_jobs.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(
                    handler = %core.full_name,
                    job_id = %result.job_id,
                    client_id = %result.client_id,
                    "job result accepted"
                );
                true
            }
            Settlement::Retried { retry_count } => {
                core.failed_jobs.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    handler = %core.full_name,
                    job_id = %result.job_id,
                    client_id = %result.client_id,
                    retry_count,
                    error = result.error.as_deref().unwrap_or(""),
                    "job failed, re-queued"
                );
                false
            }
            Settlement::DeadLettered { retry_count } => {
                core.failed_jobs.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    handler = %core.full_name,
                    job_id = %result.job_id,
                    client_id = %result.client_id,
                    retry_count,
                    error = result.error.as_deref().unwrap_or(""),
                    "job exhausted its retries, dropping"
                );
                false
            }
            Settlement::ClientMismatch { assigned } => {
                tracing::warn!(
                    handler = %core.full_name,
                    job_id = %result.job_id,
                    submitted_by = %result.client_id,
                    assigned_to = ?assigned,
                    "result from non-assigned client rejected"
                );
                false
            }
            Settlement::Unknown => {
                if core.state() == HandlerState::Stopped {
                    tracing::warn!(
                        handler = %core.full_name,
                        job_id = %result.job_id,
                        "result for stopped handler rejected"
                    );
                } else {
                    tracing::warn!(
                        handler = %core.full_name,
                        job_id = %result.job_id,
                        client_id = %result.client_id,
                        "result for unknown job rejected"
                    );
                }
                false
            }
        }
    }

    /// Counters, state and schedule times as one consistent-enough snapshot.
    pub async fn info(&self) -> HandlerInfo {
        let core = &self.core;
        let lifecycle = core.lifecycle.lock().await;
        HandlerInfo {
            handler_id: core.id,
            package_name: core.package_name.clone(),
            handler_name: core.settings.handler_name.clone(),
            job_name: core.settings.job_name.clone(),
            full_name: core.full_name.clone(),
            state: lifecycle.state,
            available_jobs: core.queues.available_len(),
            pending_jobs: core.queues.pending_len(),
            finished_jobs: core.queues.finished_len(),
            processed_jobs: core.processed_jobs.load(Ordering::Relaxed),
            failed_jobs: core.failed_jobs.load(Ordering::Relaxed),
            total_jobs: core.generator.total_job_count(),
            last_start_time: lifecycle.last_start_time,
            next_start_time: lifecycle.next_start_time,
        }
    }

    /// What a deploying worker needs to fetch before it can execute jobs.
    pub fn job_info(&self) -> HandlerJobInfo {
        HandlerJobInfo {
            full_name: self.core.full_name.clone(),
            artifact_file: self.core.artifact_file.clone(),
            worker_dependencies: self.core.worker_dependencies.clone(),
        }
    }

    /// Serve a file out of the package folder to a deploying worker.
    /// `None` for missing files and for any path pointing outside the
    /// package folder.
    pub async fn read_file(&self, name: &str) -> Option<Vec<u8>> {
        let Some(path) = package::resolve_package_file(&self.core.package_folder, name) else {
            tracing::warn!(
                handler = %self.core.full_name,
                file = name,
                "file request outside package folder rejected"
            );
            return None;
        };
        tokio::fs::read(path).await.ok()
    }
}
