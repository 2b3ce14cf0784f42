mod api;
#[cfg(test)]
mod test_support;

use std::{env, future::IntoFuture, net::SocketAddr, sync::Arc, time::Duration};

use alertrules_core::{
    AuthorizationRepository, AuthorizationService, Collaborators, Config, Database,
    RuleOrchestrator, init_telemetry, migrations,
};
use axum::{Json, Router, extract::State, http::StatusCode, routing::get};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub rules: RuleOrchestrator,
    pub auth: Arc<dyn AuthorizationService>,
}

impl AppState {
    pub fn new(db: Database, config: &Config) -> Self {
        Self {
            rules: RuleOrchestrator::new(Collaborators::sql(&db), config.api.clone()),
            auth: Arc::new(AuthorizationRepository::new(db.clone())),
            db,
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = Config::load(&config_path)?;

    let _guard = init_telemetry(&config.app, &config.telemetry)?;

    let db = Database::new(&config.paths.database).await?;
    migrations::run_migrations(&db).await?;

    let state = AppState::new(db, &config);
    let app = router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.app.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("alertrules listening on {}", listener.local_addr()?);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let server = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.clone().cancelled_owned())
        .into_future();
    tokio::select! {
        result = server => result?,
        _ = drain_deadline(shutdown, SHUTDOWN_GRACE) => {
            warn!(grace_secs = SHUTDOWN_GRACE.as_secs(), "in-flight requests did not drain, exiting");
        }
    }

    info!("server stopped");
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .nest("/api/v2", api::router(state.clone()))
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    database: &'static str,
}

async fn healthz(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let (status, health, database) = match state.db.health_check().await {
        Ok(()) => (StatusCode::OK, "healthy", "ok"),
        Err(err) => {
            warn!(error = %err, "database health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy", "unhealthy")
        }
    };

    (
        status,
        Json(HealthResponse {
            status: health,
            version: env!("CARGO_PKG_VERSION"),
            database,
        }),
    )
}

async fn shutdown_signal(shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "failed to install ctrl+c handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("received ctrl+c, shutting down");
        }
        _ = terminate => {
            warn!("received terminate signal, shutting down");
        }
    }

    shutdown.cancel();
}

/// Resolves once `grace` has passed after shutdown began.
async fn drain_deadline(shutdown: CancellationToken, grace: Duration) {
    shutdown.cancelled().await;
    tokio::time::sleep(grace).await;
}
