//! HTTP server setup and configuration.

use axum::{
    extract::Request,
    middleware::{self, Next},
    response::Response,
    routing::get,
    Router,
};
use reqwest::Client;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use super::executor::HttpExecutor;
use super::handlers;
use crate::config::Config;
use crate::retry::RetryOrchestrator;
use crate::upstream::{MemoryRegistry, StrategyBalancer};

/// Correlation id attached to every request.
#[derive(Debug, Clone, Copy)]
pub struct RequestId(pub Uuid);

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<MemoryRegistry>,
    pub balancer: Arc<StrategyBalancer>,
    pub orchestrator: Arc<RetryOrchestrator<HttpExecutor>>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wire registry, balancer and executor from configuration.
    pub fn from_config(config: Config, http_client: Client) -> Self {
        let registry = Arc::new(MemoryRegistry::from_groups(&config.upstreams));
        let balancer = Arc::new(StrategyBalancer::new());

        let mut executor = HttpExecutor::new(http_client);
        for group in &config.upstreams {
            if let Some(key) = &group.api_key {
                executor = executor.with_api_key(group.id.clone(), key.clone());
            }
        }

        let orchestrator = RetryOrchestrator::new(
            registry.clone(),
            balancer.clone(),
            executor,
            config.retry.policy(),
        );

        Self {
            registry,
            balancer,
            orchestrator: Arc::new(orchestrator),
            config: Arc::new(config),
        }
    }
}

async fn inject_request_id(mut request: Request, next: Next) -> Response {
    request
        .extensions_mut()
        .insert(RequestId(Uuid::new_v4()));
    next.run(request).await
}

/// Create the axum router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/upstreams", get(handlers::list_upstreams))
        // Everything else is proxied
        .fallback(handlers::proxy)
        .with_state(state)
        .layer(middleware::from_fn(inject_request_id))
        .layer(TraceLayer::new_for_http())
}

/// Build the HTTP client used for upstream calls.
///
/// No overall client timeout: each attempt is bounded by its group's timeout.
pub fn build_http_client() -> anyhow::Result<Client> {
    Ok(Client::builder()
        .connect_timeout(Duration::from_secs(10))
        .pool_idle_timeout(Duration::from_secs(90))
        .build()?)
}

/// Run the HTTP server.
pub async fn run_server(config: Config) -> anyhow::Result<()> {
    let listen_addr = config.server.listen.clone();
    let state = AppState::from_config(config, build_http_client()?);

    for group in &state.config.upstreams {
        tracing::info!(
            group = %group.id,
            prefix = %group.prefix,
            endpoints = group.endpoints.len(),
            retry_strategy = %group.retry_strategy,
            retry = group.retry,
            "Registered upstream group"
        );
    }

    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(address = %listen_addr, "Starting retrygate gateway");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
