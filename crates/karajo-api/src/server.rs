use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use karajo_core::{Env, Error, Manager, Result};
use tracing::info;

use crate::routes::create_router;
use crate::state::AppState;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub async fn run(env: Env, manager: Manager) -> Result<()> {
    let addr: SocketAddr = env
        .listen_address
        .parse()
        .map_err(|e| Error::config(format!("invalid listen_address: {e}")))?;

    manager.start()?;
    let manager = Arc::new(manager);
    let app_state = AppState::new(Arc::new(env), Arc::clone(&manager));

    let app = create_router(app_state);

    info!("karajo listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await.map_err(Error::from)?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(Error::from)?;

    tokio::time::timeout(SHUTDOWN_GRACE, manager.stop()).await.ok();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // No config-reload-on-SIGHUP path exists, so SIGHUP triggers the same
    // graceful stop as SIGINT/SIGTERM rather than being ignored.
    #[cfg(unix)]
    let hangup = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup())
            .expect("failed to install SIGHUP handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();
    #[cfg(not(unix))]
    let hangup = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
        _ = hangup => {}
    }
}
