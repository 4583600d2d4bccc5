use tokio_util::sync::CancellationToken;

/// Returns a token that is cancelled on Ctrl-C. The election loop, the duty
/// scheduler and the ingest listener all watch it.
pub fn install_shutdown_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => log::info!("Received Ctrl-C, initiating graceful shutdown"),
            Err(e) => log::error!("Failed to listen for Ctrl-C: {e}"),
        }
        token_clone.cancel();
    });

    token
}
