//! Initialization and package-surface tests: structured failure reasons,
//! autostart, reporting snapshots and file serving.


use std::time::Duration;

use test_harness::{
    assert_eventually, GeneratorProbe, ScriptedGenerator, StaticLoader, test_descriptor,
};

use jobgrid::{Handler, HandlerError, HandlerSettings, HandlerState, JobScriptDescriptor};

fn scripted(probe: &std::sync::Arc<GeneratorProbe>) -> Box<ScriptedGenerator> {
    Box::new(ScriptedGenerator {
        probe: probe.clone(),
    })
}

#[tokio::test]
async fn initialize_resolves_names_and_reports_identity() {
    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", "nightly"), scripted(&probe));

    let handler = Handler::initialize(test_descriptor(), std::env::temp_dir(), &loader)
        .await
        .unwrap();

    assert_eq!(handler.full_name(), "demo-pack/Primes/nightly");
    assert_eq!(handler.state(), HandlerState::Stopped);
    assert!(handler.artifact_path().ends_with("demo-pack/demo-pack.wasm"));

    let info = handler.info().await;
    assert_eq!(info.handler_id, handler.id());
    assert_eq!(info.package_name, "demo-pack");
    assert_eq!(info.handler_name, "Primes");
    assert_eq!(info.job_name, "nightly");
    assert_eq!(info.total_jobs, -1);
}

#[tokio::test]
async fn compile_failure_is_surfaced() {
    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", "nightly"), scripted(&probe))
        .failing_with("script line 3: unexpected token");

    let error = Handler::initialize(test_descriptor(), std::env::temp_dir(), &loader)
        .await
        .unwrap_err();
    match error {
        HandlerError::CompilationFailed(message) => {
            assert!(message.contains("unexpected token"))
        }
        other => panic!("expected CompilationFailed, got {other:?}"),
    }
}

#[tokio::test]
async fn missing_initializer_is_surfaced() {
    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", "nightly"), scripted(&probe))
        .without_initializer();

    let error = Handler::initialize(test_descriptor(), std::env::temp_dir(), &loader)
        .await
        .unwrap_err();
    assert!(matches!(error, HandlerError::JobInitializerMissing));
}

#[tokio::test]
async fn missing_handler_type_is_surfaced() {
    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", "nightly"), scripted(&probe))
        .registered_as("SomethingElse");

    let error = Handler::initialize(test_descriptor(), std::env::temp_dir(), &loader)
        .await
        .unwrap_err();
    match error {
        HandlerError::JobHandlerMissing(name) => assert_eq!(name, "Primes"),
        other => panic!("expected JobHandlerMissing, got {other:?}"),
    }
}

#[tokio::test]
async fn invalid_settings_are_a_type_error() {
    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", ""), scripted(&probe));

    let error = Handler::initialize(test_descriptor(), std::env::temp_dir(), &loader)
        .await
        .unwrap_err();
    assert!(matches!(error, HandlerError::TypeException(_)));
}

#[tokio::test]
async fn auto_start_runs_the_handler_before_returning() {
    let probe = GeneratorProbe::new(&["eager"], None);
    let loader = StaticLoader::new(
        HandlerSettings::new("Primes", "nightly").with_auto_start(),
        scripted(&probe),
    );

    let handler = Handler::initialize(test_descriptor(), std::env::temp_dir(), &loader)
        .await
        .unwrap();
    assert_eq!(handler.state(), HandlerState::Running);
    assert!(handler.info().await.last_start_time.is_some());

    assert_eventually(
        || async { handler.info().await.available_jobs == 1 },
        Duration::from_secs(5),
        "autostarted handler never produced its job",
    )
    .await;

    handler.stop().await;
}

#[tokio::test]
async fn job_info_lists_what_workers_must_fetch() {
    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", "nightly"), scripted(&probe));

    let mut descriptor = test_descriptor();
    descriptor.worker_dependencies = vec!["numerics.wasm".to_string(), "tables.bin".to_string()];

    let handler = Handler::initialize(descriptor, std::env::temp_dir(), &loader)
        .await
        .unwrap();

    let job_info = handler.job_info();
    assert_eq!(job_info.full_name, "demo-pack/Primes/nightly");
    assert_eq!(job_info.artifact_file, "demo-pack.wasm");
    assert_eq!(
        job_info.worker_dependencies,
        vec!["numerics.wasm".to_string(), "tables.bin".to_string()]
    );
}

#[tokio::test]
async fn read_file_serves_only_the_package_folder() {
    let base = tempfile::tempdir().unwrap();
    let package_folder = base.path().join("demo-pack");
    std::fs::create_dir_all(&package_folder).unwrap();
    std::fs::write(package_folder.join("demo-pack.wasm"), b"\0asm").unwrap();
    std::fs::write(base.path().join("outside.txt"), b"secret").unwrap();

    let probe = GeneratorProbe::new(&[], None);
    let loader = StaticLoader::new(HandlerSettings::new("Primes", "nightly"), scripted(&probe));
    let handler = Handler::initialize(
        JobScriptDescriptor::new("demo-pack", "-- job script --"),
        base.path(),
        &loader,
    )
    .await
    .unwrap();

    assert_eq!(
        handler.read_file("demo-pack.wasm").await,
        Some(b"\0asm".to_vec())
    );
    assert!(handler.read_file("missing.bin").await.is_none());
    assert!(handler.read_file("../outside.txt").await.is_none());
    assert!(handler.read_file("/etc/hostname").await.is_none());
}
