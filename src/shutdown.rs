use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Cancel the returned token on the first SIGTERM or SIGINT.
///
/// Both the orchestrator and the agent watch this token: the orchestrator
/// stops serving, the agent finishes its current expression and deregisters.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => tracing::info!("Received SIGTERM, shutting down"),
            _ = sigint.recv() => tracing::info!("Received SIGINT, shutting down"),
        }
        trigger.cancel();
    });

    Ok(token)
}
