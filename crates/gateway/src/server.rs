use std::net::SocketAddr;

use {
    axum::Router,
    tokio::net::TcpListener,
    tokio_util::sync::CancellationToken,
    tracing::info,
};

use crate::error::{Context, Result};

/// Bind the operator API address.
pub async fn bind(addr: &str) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind operator api on {addr}"))?;
    Ok(listener)
}

/// Serve `router` until `shutdown` is cancelled.
pub async fn serve(listener: TcpListener, router: Router, shutdown: CancellationToken) -> Result<()> {
    let addr: Option<SocketAddr> = listener.local_addr().ok();
    info!(addr = ?addr, "operator api listening");
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    info!("operator api stopped");
    Ok(())
}
