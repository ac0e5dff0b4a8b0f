#![forbid(clippy::unwrap_used)]
#![forbid(unsafe_code)]
#![forbid(clippy::expect_used)]
#![forbid(clippy::panic)]

mod config;

use axum::http::{HeaderName, HeaderValue, Method, header};
use config::{AppConfig, DatabaseBackend};
use framework::sqlx::DatabaseProcessor;
use ordering::entities::Database;
use ordering::entities::memory::MemoryDatabase;
use ordering::services::DispatchServices;
use ordering::services::scheduler::run_assignment_sweeps;
use ordering::utils::actor::{USER_ID_HEADER, USER_ROLE_HEADER};
use tokio::net::TcpListener;
use tokio::signal::ctrl_c;
use tokio::sync::watch;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let config = AppConfig::load()?;
    let db = connect(&config).await?;
    let services = DispatchServices::new(db, config.dispatch.clone())?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps = tokio::spawn(run_assignment_sweeps(
        services.assignment.clone(),
        shutdown_rx,
    ));

    let app = ordering::rest::router(services).layer(cors(&config.server.allowed_origins)?);
    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&address).await?;
    info!("Listening on {address}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    if let Err(e) = sweeps.await {
        warn!("Scheduler task ended abnormally: {e}");
    }
    info!("Server stopped");
    Ok(())
}

async fn connect(config: &AppConfig) -> anyhow::Result<Database> {
    match config.database.backend {
        DatabaseBackend::Memory => {
            warn!("Using the in-memory backend, data is lost on restart");
            Ok(MemoryDatabase::new().into())
        }
        DatabaseBackend::Postgres => {
            let url = config
                .database
                .url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("database.url or DATABASE_URL is required"))?;
            let db = DatabaseProcessor::connect(url, config.database.max_connections).await?;
            if config.database.run_migrations {
                sqlx::migrate!("../../migrations").run(db.db()).await?;
                info!("Migrations applied");
            }
            Ok(db.into())
        }
    }
}

fn cors(allowed_origins: &[String]) -> anyhow::Result<CorsLayer> {
    let allow_origin = if allowed_origins.is_empty() {
        AllowOrigin::any()
    } else {
        let origins = allowed_origins
            .iter()
            .map(|origin| HeaderValue::from_str(origin))
            .collect::<Result<Vec<_>, _>>()?;
        AllowOrigin::list(origins)
    };
    Ok(CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::CONTENT_TYPE,
            HeaderName::from_static(USER_ID_HEADER),
            HeaderName::from_static(USER_ROLE_HEADER),
        ]))
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = ctrl_c().await {
            warn!("Failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
        info!("Received Ctrl+C, shutting down");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                warn!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => {},
        _ = terminate => {},
    }
}
