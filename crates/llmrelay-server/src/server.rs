//! Axum HTTP surface (C10): builds the router, wires `llmrelay-router`'s
//! `RouterState` and `llmrelay-accounts`' store behind shared `AppState`,
//! and binds/serves with graceful shutdown.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::{get, post};
use llmrelay_accounts::AccountStore;
use llmrelay_config::AppConfig;
use llmrelay_router::RouterState;
use tokio::net::TcpListener;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::compression::CompressionLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tracing::{info, instrument};

use crate::shutdown::ShutdownCoordinator;
use crate::{admin, health, routes};

/// Generates UUIDv7 request IDs, propagated as `x-request-id`.
#[derive(Clone)]
struct UuidV7RequestId;

impl MakeRequestId for UuidV7RequestId {
    fn make_request_id<B>(&mut self, _request: &axum::http::Request<B>) -> Option<RequestId> {
        let id = uuid::Uuid::now_v7().to_string();
        axum::http::HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Shared state accessible from every Axum handler.
#[derive(Clone)]
pub struct AppState {
    /// Every dependency the router (C8) needs to dispatch a request.
    pub router: Arc<RouterState>,
    /// Shutdown coordinator for the background token-refresh/sweep tasks.
    pub shutdown: Arc<ShutdownCoordinator>,
    /// `API_KEY` env value, if set — required as `x-api-key` on `/v1/*`.
    pub api_key: Option<String>,
    /// Shared-secret compared against `X-Session-Token` on `/v2/*`. The
    /// full login/session/2FA subsystem is out of scope (§1); this is the
    /// minimal stand-in that still enforces *some* admin boundary.
    pub admin_token: Option<String>,
}

/// The proxy's HTTP server.
pub struct ProxyServer {
    state: AppState,
    host: String,
    port: u16,
}

impl ProxyServer {
    /// Build a server from an already-loaded config and the store/router
    /// dependencies startup has assembled.
    #[must_use]
    pub fn new(config: &AppConfig, router: RouterState, admin_token: Option<String>) -> Self {
        let state = AppState {
            router: Arc::new(router),
            shutdown: Arc::new(ShutdownCoordinator::new()),
            api_key: config.api_key.clone(),
            admin_token,
        };
        Self { state, host: config.host.clone(), port: config.port }
    }

    /// Account store handle, for startup tasks (migrations, background
    /// refresh scheduling) that run alongside the HTTP listener.
    #[must_use]
    pub fn store(&self) -> &AccountStore {
        &self.state.router.store
    }

    /// Shutdown coordinator, for wiring background tasks started outside
    /// this server (token refresh, cache/cooldown sweeps) into the same
    /// `CancellationToken`.
    #[must_use]
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.state.shutdown
    }

    /// Build the Axum router with every route and middleware layer.
    #[must_use]
    pub fn router(&self) -> Router {
        let client_routes = Router::new()
            .route("/v1/messages", post(routes::messages::messages))
            .route("/v1/gemini/messages", post(routes::messages::gemini_messages))
            .route("/v1/custom_api/messages", post(routes::messages::custom_api_messages))
            .route("/v1/models", get(routes::models::list_models))
            .layer(axum::middleware::from_fn_with_state(self.state.clone(), routes::messages::require_api_key));

        let admin_routes = Router::new()
            .route("/v2/accounts", get(admin::accounts::list).post(admin::accounts::create))
            .route(
                "/v2/accounts/{id}",
                get(admin::accounts::get).patch(admin::accounts::update).delete(admin::accounts::delete),
            )
            .route("/v2/accounts/{id}/refresh", post(admin::accounts::refresh))
            .route("/v2/accounts/refresh-all", post(admin::accounts::refresh_all))
            .route("/v2/accounts/{id}/test", post(admin::accounts::test))
            .route("/v2/accounts/{id}/stats", get(admin::accounts::stats))
            .route("/v2/accounts/{id}/quota", get(admin::accounts::quota))
            .route("/v2/config", get(admin::config::get).put(admin::config::put))
            .layer(axum::middleware::from_fn_with_state(self.state.clone(), admin::auth::require_session_token));

        Router::new()
            .route("/health", get(health::handler))
            .merge(client_routes)
            .merge(admin_routes)
            .with_state(self.state.clone())
            // Outermost layers execute first on request, last on response.
            .layer(CatchPanicLayer::new())
            .layer(CompressionLayer::new())
            .layer(RequestBodyLimitLayer::new(10 * 1024 * 1024)) // 10 MB
            .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, Duration::from_secs(300)))
            .layer(SetRequestIdLayer::x_request_id(UuidV7RequestId))
            .layer(PropagateRequestIdLayer::x_request_id())
    }

    /// Bind to a TCP port and start serving. Returns the bound address and
    /// a join handle for the server task.
    #[instrument(skip_all, fields(host = %self.host, port = self.port))]
    pub async fn listen(&self) -> Result<(SocketAddr, tokio::task::JoinHandle<()>), std::io::Error> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = TcpListener::bind(&addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "server started");

        let router = self.router();
        let shutdown_token = self.state.shutdown.token();

        let handle = tokio::spawn(async move {
            let _ = axum::serve(listener, router)
                .with_graceful_shutdown(async move {
                    shutdown_token.cancelled().await;
                    info!("server shutdown initiated");
                })
                .await;
            info!("server shutdown complete");
        });

        Ok((bound_addr, handle))
    }
}
