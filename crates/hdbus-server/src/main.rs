//! hdbus dispatch server.
//!
//! - Config from `$HDBUS_CONFIG` (default `hdbus.yaml`)
//! - Router transport on `server.listen`
//! - Optional introspection HTTP on `http.listen`
//! - Ctrl-C: drain, stop every running process, exit

use tracing_subscriber::{fmt, EnvFilter};

use hdbus_core::error::{HdbusError, Result};
use hdbus_server::transport::TcpRouter;
use hdbus_server::{config, router, AppState, DispatchServer};

#[tokio::main]
async fn main() -> Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    let path = config::config_path();
    let cfg = config::load_from_file(&path)?;
    let listen = cfg.server.listen_addr()?;
    let http_listen = cfg.http.as_ref().map(|h| h.listen_addr()).transpose()?;

    let state = AppState::new(cfg)?;
    tracing::info!(config = %path, "hardware device address tree:");
    state.registry().log_tree();

    if let Some(addr) = http_listen {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| HdbusError::Transport(format!("bind {addr} failed: {e}")))?;
        let app = router::build_router(state.clone());
        tracing::info!(%addr, "introspection http listening");
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                tracing::warn!(error = %e, "introspection http stopped");
            }
        });
    }

    let transport =
        TcpRouter::bind(listen, state.cfg().server.max_frame_bytes, state.metrics()).await?;
    tracing::info!(listen = %transport.local_addr(), identity = %state.cfg().server.identity, "hdbus-server starting");

    let mut server = DispatchServer::new(
        transport,
        state.dispatcher(),
        state.metrics(),
        &state.cfg().server,
    );
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "ctrl-c handler failed; running until killed");
                std::future::pending::<()>().await;
            }
        })
        .await;

    state.set_draining();
    state.supervisor().shutdown().await;
    tracing::info!("hdbus-server stopped");
    Ok(())
}
