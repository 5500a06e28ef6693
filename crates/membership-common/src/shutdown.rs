/// Resolves once SIGINT or SIGTERM (or Ctrl+C on non-Unix) is received.
pub async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt()).expect("install SIGINT handler");
        let mut sigterm = signal(SignalKind::terminate()).expect("install SIGTERM handler");

        tokio::select! {
            _ = sigint.recv()  => tracing::warn!("received SIGINT"),
            _ = sigterm.recv() => tracing::warn!("received SIGTERM"),
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .expect("install Ctrl+C handler");
        tracing::warn!("received Ctrl+C");
    }
}
