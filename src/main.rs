use activesync_router::utils::logger;
use activesync_router::{build_router, CliConfig, ProxyState};
use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = CliConfig::parse();

    logger::init_logger(config.verbose, config.json_logs);

    tracing::info!("Starting activesync-router");
    if config.verbose {
        tracing::debug!("CLI config: {:?}", config);
    }

    // 配置錯誤時不可啟動
    let settings = match config.load_settings() {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(
                "❌ Configuration invalid: {} (Category: {:?})",
                e,
                e.category()
            );
            eprintln!("❌ {}", e);
            std::process::exit(1);
        }
    };

    tracing::info!(
        clusters = settings.topology.len(),
        profile_api = %settings.profile_api_url,
        "topology loaded"
    );

    let state = ProxyState::from_settings(&settings).context("failed to build HTTP client")?;
    let app = build_router(state);

    let bind_addr = SocketAddr::from(([0, 0, 0, 0], settings.port));
    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind to {}", bind_addr))?;

    tracing::info!(address = %bind_addr, "activesync-router listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %err, "unable to install Ctrl+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "unable to install SIGTERM handler");
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
    tracing::info!("shutdown signal received");
}
