use colloquy_conversation::{DurableStore, MemoryStore, SessionLifecycleController};
use colloquy_server::{
    config::ServerConfig, create_router, cors_layer, db::PgSessionStore, error::StartupError,
    generator::build_generator, state::AppState,
};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(report) = run().await {
        tracing::error!("{report}");
        std::process::exit(1);
    }
}

async fn run() -> colloquy_core::Result<(), StartupError> {
    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Config {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    let store: Arc<dyn DurableStore> = match &config.database_url {
        Some(database_url) => {
            let db_pool = PgPoolOptions::new()
                .max_connections(config.database_max_connections)
                .connect(database_url)
                .await
                .map_err(|e| StartupError::Database {
                    details: e.to_string(),
                })?;

            tracing::info!("Running database migrations...");
            sqlx::migrate!("./migrations")
                .run(&db_pool)
                .await
                .map_err(|e| StartupError::Migration {
                    details: e.to_string(),
                })?;

            Arc::new(PgSessionStore::new(db_pool))
        }
        None => {
            tracing::warn!("No DATABASE_URL configured, histories will not survive a restart");
            Arc::new(MemoryStore::new())
        }
    };

    let generator = build_generator(&config.generator).map_err(|e| StartupError::Generator {
        details: e.to_string(),
    })?;

    let origins = config.origins();
    let grace = config.shutdown_grace();
    let controller = Arc::new(SessionLifecycleController::new(store, config.lifecycle));
    let state = AppState::new(controller.clone(), generator);
    let app = create_router(state.clone()).layer(cors_layer(origins));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .map_err(|e| StartupError::Bind {
            addr: config.bind_addr.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown({
            let shutdown = state.shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        })
        .await
        .map_err(|e| StartupError::Serve {
            details: e.to_string(),
        })?;

    // Sockets flush their own sessions on the way out; anything left
    // after that is still only in memory.
    state.drain_sockets(grace).await;
    let report = controller.flush_all().await;
    if report.failed > 0 {
        tracing::warn!(
            failed = report.failed,
            "Some sessions could not be flushed before shutdown"
        );
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %e, "Failed to listen for Ctrl+C");
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
                tracing::warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutting down");
}
