//! Web layer module
//!
//! HTTP interface of the job service. Everything except `/health` lives under
//! `/sites/:site` and requires an authorized caller. Handlers are thin and
//! delegate to the lifecycle manager, the health evaluator and the record
//! store.

use anyhow::Result;
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::{Config, TenantConfig},
    database::Database,
    errors::{AppError, AppResult},
    services::{HealthStateEvaluator, JobLifecycleManager},
};

pub mod api;
pub mod auth;
pub mod responses;

pub use responses::{handle_error, handle_result, ApiResponse};

/// Web server configuration and setup
pub struct WebServer {
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub fn new(state: AppState) -> Result<Self> {
        let addr: SocketAddr = format!("{}:{}", state.config.web.host, state.config.web.port).parse()?;
        let app = create_router(state);
        Ok(Self { app, addr })
    }

    /// Serve until `shutdown` is cancelled, then drain open connections
    pub async fn serve(self, shutdown: CancellationToken) -> Result<()> {
        let listener = tokio::net::TcpListener::bind(&self.addr).await?;
        info!("Web server listening on {}", self.addr);
        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
        info!("Web server stopped");
        Ok(())
    }

    pub fn host(&self) -> String {
        self.addr.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }
}

/// Create the router with all routes and middleware
pub fn create_router(state: AppState) -> Router {
    let site_routes = Router::new()
        // Health state of jobs
        .route("/jobState/list", get(api::list_job_states))
        .route("/jobState/:component/:job", get(api::get_job_state))
        // Execution history
        .route("/jobRecords", get(api::list_job_records))
        .route("/jobRecords/filters", get(api::job_record_filters))
        // Job administration
        .route("/jobs", get(api::list_jobs).post(api::create_job))
        .route(
            "/jobs/:job",
            get(api::get_job).put(api::update_job).delete(api::delete_job),
        )
        .route("/jobs/:job/schedule", post(api::schedule_job))
        .route("/jobs/:job/unschedule", post(api::unschedule_job))
        .route("/jobs/:job/run", post(api::run_job))
        .route("/jobs/:job/interrupt", post(api::interrupt_job))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_authorization,
        ));

    Router::new()
        .route("/health", get(api::health_check))
        .nest("/sites/:site", site_routes)
        // Middleware (applied in reverse order)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub database: Database,
    pub lifecycle: Arc<JobLifecycleManager>,
    pub health: Arc<HealthStateEvaluator>,
}

impl AppState {
    /// Active tenant named in the request path
    pub fn tenant(&self, site: &str) -> AppResult<&TenantConfig> {
        self.config
            .tenant(site)
            .filter(|tenant| tenant.active)
            .ok_or_else(|| AppError::not_found("site", site))
    }
}
