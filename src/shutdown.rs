use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

/// Arm SIGTERM/SIGINT handling for graceful drain.
///
/// The returned token is cancelled on the first signal. Cancellation stops
/// the HTTP listener and switches the dispatcher into drain: queued and
/// in-flight renders finish, new submissions are refused, then sessions are
/// disposed.
pub fn install_shutdown_handler() -> CancellationToken {
    let drain = CancellationToken::new();
    let trigger = drain.clone();

    tokio::spawn(async move {
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("failed to install SIGINT handler");

        let name = tokio::select! {
            _ = sigterm.recv() => "SIGTERM",
            _ = sigint.recv() => "SIGINT",
        };
        tracing::info!(signal = name, "draining render pool");
        trigger.cancel();
    });

    drain
}
