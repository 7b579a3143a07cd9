#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod logging;

use args::Args;
use clap::Parser;
use switchboard_config::Config;
use switchboard_server::Server;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // A bad config is a startup failure: bail with a non-zero exit
    let config = Config::load(&args.config)?;

    logging::init(&config.settings.log_level, config.settings.log_file_path.as_deref())?;

    tracing::info!(
        config_path = %args.config.display(),
        providers = config.providers.len(),
        routes = config.model_routes.len(),
        "starting switchboard"
    );

    let server = Server::new(config).await?;

    let shutdown = CancellationToken::new();
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        shutdown_signal().await;
        shutdown_clone.cancel();
    });

    spawn_reload_on_sighup(server.state().clone(), args.config.clone());

    server.serve(shutdown).await?;

    tracing::info!("switchboard stopped");
    Ok(())
}

/// Swap in a fresh configuration snapshot on `SIGHUP`
///
/// In-flight requests keep the snapshot they started with; a reload that
/// fails to parse or validate leaves the current snapshot in place.
#[cfg(unix)]
fn spawn_reload_on_sighup(state: switchboard_proxy::ProxyState, config_path: std::path::PathBuf) {
    tokio::spawn(async move {
        let Ok(mut hangup) = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) else {
            tracing::warn!("could not install SIGHUP handler, hot reload disabled");
            return;
        };

        while hangup.recv().await.is_some() {
            match Config::load(&config_path) {
                Ok(config) => match state.reload(config) {
                    Ok(()) => tracing::info!(path = %config_path.display(), "configuration reloaded"),
                    Err(e) => tracing::error!(error = %e, "reload failed, keeping current configuration"),
                },
                Err(e) => tracing::error!(error = %e, "config file invalid, keeping current configuration"),
            }
        }
    });
}

#[cfg(not(unix))]
fn spawn_reload_on_sighup(_state: switchboard_proxy::ProxyState, _config_path: std::path::PathBuf) {}

/// Wait for a shutdown signal (`SIGINT` or `SIGTERM`)
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

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }

    tracing::info!("shutdown signal received");
}
