//! Minimal host walkthrough: load a package, run its handler and play the
//! worker client against the dispatch API from the same process.
//!
//! Run with `cargo run --example host`. A real host supplies its own
//! `PackageLoader` and exposes the dispatch API over its transport of
//! choice.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use jobgrid::shutdown::install_shutdown_handler;
use jobgrid::{
    CompileError, CompiledPackage, GeneratorContext, GeneratorError, GeneratorInit, Handler,
    HandlerSettings, HandlerState, JobGenerator, JobResult, JobScriptDescriptor, PackageLoader,
};

/// Generates one batch of squaring jobs and prints their results.
struct SquaresGenerator {
    ctx: Mutex<Option<GeneratorContext>>,
    produced: AtomicUsize,
    processed: AtomicUsize,
    batch: usize,
}

#[async_trait]
impl JobGenerator for SquaresGenerator {
    fn bind(&mut self, ctx: GeneratorContext) -> Result<(), GeneratorError> {
        *self.ctx.lock().unwrap() = Some(ctx);
        Ok(())
    }

    async fn create_more_jobs(&self) -> Result<(), GeneratorError> {
        if self.produced.load(Ordering::SeqCst) >= self.batch {
            return Ok(());
        }
        let ctx = self.ctx.lock().unwrap().clone().expect("not bound");
        for n in 0..self.batch {
            let _ = ctx.enqueue.enqueue(n.to_string(), None);
        }
        self.produced.store(self.batch, Ordering::SeqCst);
        Ok(())
    }

    async fn process_result(&self, input: &str, result: &str) -> Result<(), GeneratorError> {
        tracing::info!(input, result, "square computed");
        self.processed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn is_finished(&self) -> bool {
        self.processed.load(Ordering::SeqCst) >= self.batch
    }

    fn total_job_count(&self) -> i64 {
        self.batch as i64
    }
}

struct SquaresInit;

impl GeneratorInit for SquaresInit {
    fn handler_settings(&self) -> HandlerSettings {
        HandlerSettings::new("Squares", "demo").with_auto_start()
    }
}

/// Stand-in for the host's real compiler.
struct DemoLoader;

impl PackageLoader for DemoLoader {
    fn compile(
        &self,
        descriptor: &JobScriptDescriptor,
        base_folder: &Path,
    ) -> Result<CompiledPackage, CompileError> {
        let mut generators: HashMap<String, Box<dyn JobGenerator>> = HashMap::new();
        generators.insert(
            "Squares".to_string(),
            Box::new(SquaresGenerator {
                ctx: Mutex::new(None),
                produced: AtomicUsize::new(0),
                processed: AtomicUsize::new(0),
                batch: 8,
            }),
        );
        Ok(CompiledPackage {
            package_folder: base_folder.join(&descriptor.package_name),
            artifact_file: format!("{}.wasm", descriptor.package_name),
            initializer: Some(Box::new(SquaresInit)),
            generators,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let shutdown = install_shutdown_handler();

    let descriptor = JobScriptDescriptor::new("squares-pack", "-- job script --");
    let handler = Handler::initialize(descriptor, std::env::temp_dir(), &DemoLoader).await?;
    tracing::info!(handler = handler.full_name(), "handler running");

    // Play the worker client: lease everything, compute, report back. A
    // signal interrupts the run the way a host would, stopping the handler
    // instead of waiting for the stream to finish.
    let client_id = Uuid::new_v4();
    while handler.state() != HandlerState::Finished && !shutdown.is_cancelled() {
        match handler.get_next_job(client_id) {
            Some(job) => {
                let n: u64 = job.input.parse()?;
                let result = JobResult::success(job.job_id, client_id, (n * n).to_string());
                handler.submit_result(&result);
            }
            None => {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    _ = tokio::time::sleep(Duration::from_millis(50)) => {}
                }
            }
        }
    }

    if shutdown.is_cancelled() {
        handler.stop().await;
    }

    let info = handler.info().await;
    tracing::info!(
        state = %info.state,
        processed = info.processed_jobs,
        "run complete"
    );
    handler.shutdown().await;
    Ok(())
}
