use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancellation token that trips on SIGTERM or SIGINT.
///
/// A host embedding handlers watches the returned token, stops each running
/// handler and disposes of it before exiting. If the signal streams cannot
/// be installed the token never trips and the host keeps running; the error
/// is logged.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let trip = token.clone();

    tokio::spawn(async move {
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGTERM handler");
                return;
            }
        };
        let mut sigint = match signal(SignalKind::interrupt()) {
            Ok(stream) => stream,
            Err(error) => {
                tracing::error!(error = %error, "failed to install SIGINT handler");
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("SIGTERM received, stopping handlers");
            }
            _ = sigint.recv() => {
                tracing::info!("SIGINT received, stopping handlers");
            }
        }

        trip.cancel();
    });

    token
}
