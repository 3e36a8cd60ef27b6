/// HTTP server setup and routing
use crate::{
    api::{
        self,
        middleware::{handle_panic, translate_errors},
    },
    context::AppContext,
    error::{PadlockError, PadlockResult},
    jobs::tasks::{auth_request_cleaner, AUTH_REQUEST_SWEEP_INTERVAL},
    rate_limit::throttle_middleware,
};
use axum::{middleware, Router};
use axum_server::{tls_rustls::RustlsConfig, Handle};
use std::{net::SocketAddr, time::Duration};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Build the main application router
/// Returns Router<()> because every endpoint carries its own state
pub fn build_router(ctx: AppContext) -> Router {
    api::routes(&ctx)
        .fallback(not_found)
        // Panics become server errors before error translation sees them
        .layer(CatchPanicLayer::custom(handle_panic))
        .layer(middleware::from_fn_with_state(ctx.clone(), translate_errors))
        .layer(middleware::from_fn_with_state(ctx, throttle_middleware))
        .layer(TraceLayer::new_for_http())
}

/// 404 handler
async fn not_found() -> PadlockError {
    PadlockError::NotFound("endpoint".to_string())
}

/// Start the HTTP server and block until it has shut down.
///
/// Runs the auth request cleaner alongside the server. On SIGINT/SIGTERM
/// in-flight requests get the configured grace period, then the cleaner is
/// stopped and the store closed.
pub async fn serve(ctx: AppContext) -> PadlockResult<()> {
    let config = ctx.config.clone();
    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));

    if config.server.host.is_none() {
        warn!(
            "No public host configured. Links in emails will be built from the \
             request's Host header, which clients can spoof"
        );
    }

    let cleaner = auth_request_cleaner(ctx.store().clone());
    cleaner.start(AUTH_REQUEST_SWEEP_INTERVAL);

    let handle = Handle::new();
    let grace = Duration::from_secs(config.server.shutdown_grace_secs);
    tokio::spawn(shutdown_on_signal(handle.clone(), grace));

    let app = build_router(ctx.clone()).into_make_service_with_connect_info::<SocketAddr>();

    let result = match (&config.server.tls_cert, &config.server.tls_key) {
        (Some(cert), Some(key)) => match RustlsConfig::from_pem_file(cert, key).await {
            Ok(tls) => {
                info!("Padlock Cloud listening on https://{}", addr);
                axum_server::bind_rustls(addr, tls)
                    .handle(handle)
                    .serve(app)
                    .await
            }
            Err(e) => Err(e),
        },
        _ => {
            info!("Padlock Cloud listening on http://{}", addr);
            axum_server::bind(addr).handle(handle).serve(app).await
        }
    };

    cleaner.stop().await;
    ctx.store().close().await?;
    info!("Server stopped");

    result.map_err(|e| PadlockError::Server(format!("Server error: {}", e)))
}

async fn shutdown_on_signal(handle: Handle, grace: Duration) {
    shutdown_signal().await;
    info!(
        "Shutdown requested, waiting up to {}s for open requests",
        grace.as_secs()
    );
    handle.graceful_shutdown(Some(grace));
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
