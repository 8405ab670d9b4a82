use maison_api::{
    build_rate_limit_layer,
    config::{init_tracing, load_config},
    create_router, db, events, rate_limiter, AppState,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(load_config()?);
    init_tracing(&config.log_level, config.log_json);

    let db = Arc::new(db::establish_connection_from_app_config(&config).await?);
    if config.auto_migrate {
        db::run_migrations(&db).await?;
    }

    let (event_sender, event_rx) = events::channel(1024);
    tokio::spawn(events::process_events(event_rx));

    let state = AppState::new(db, config.clone(), event_sender);

    let rate_limit = build_rate_limit_layer(&config, state.auth_service.clone());
    tokio::spawn(rate_limiter::start_cleanup_task(
        rate_limit.limiter(),
        Duration::from_secs(config.rate_limit_cleanup_interval_secs),
    ));

    // Daily sweep of webhook ledger rows past retention.
    {
        let ledger = state.webhook_ledger.clone();
        let retention_days = config.webhook_retention_days;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(24 * 3600));
            loop {
                interval.tick().await;
                if let Err(e) = ledger.cleanup_expired(retention_days).await {
                    error!(error = %e, "Webhook ledger retention sweep failed");
                }
            }
        });
    }

    let app = create_router(state, rate_limit);

    let addr = format!("{}:{}", config.host, config.port);
    let listener = TcpListener::bind(&addr).await?;
    info!(%addr, environment = %config.environment, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
