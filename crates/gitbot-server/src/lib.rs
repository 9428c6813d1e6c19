pub mod api;
pub mod auth;
pub mod commands;
pub mod config;
pub mod error;
pub mod registry;
pub mod sink;
pub mod state;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::http::StatusCode;
use axum::middleware;
use tower::ServiceBuilder;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use gitbot_core::collab::NotificationSink;
use gitbot_github::Poller;

use config::BotConfig;
use state::AppState;

/// Build the Axum router and application state from a config.
pub async fn build_app(config: BotConfig) -> anyhow::Result<(Router<()>, AppState)> {
    let request_timeout = Duration::from_secs(config.request_timeout_secs);
    let state = AppState::new(config).await?;

    let api_routes = Router::new()
        .route("/commands", axum::routing::post(api::post_command))
        .route("/status", axum::routing::get(api::get_status))
        .route("/resources", axum::routing::get(api::get_resources))
        .route(
            "/resources/{owner}/{name}",
            axum::routing::get(api::get_resource),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            bearer_auth_layer,
        ));

    let app = Router::new()
        .nest("/api/v1", api_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::REQUEST_TIMEOUT,
                    request_timeout,
                )),
        )
        .with_state(state.clone());

    Ok((app, state))
}

/// Start the poll loop in the background. Each finished tick is published
/// on `state.ticks`.
pub fn spawn_poller(
    state: &AppState,
    sink: Arc<dyn NotificationSink>,
) -> tokio::task::JoinHandle<()> {
    let poller = Poller::new(
        state.config.poller_config(),
        Arc::clone(&state.fetcher),
        Arc::clone(&state.registry) as Arc<dyn gitbot_core::ResourceRegistry>,
        sink,
    );
    let ticks = Arc::clone(&state.ticks);
    tokio::spawn(async move {
        poller
            .run(move |report| {
                ticks.send_replace(report);
            })
            .await;
    })
}

/// Middleware wrapper that injects AuthConfig into request extensions for the
/// bearer auth middleware.
async fn bearer_auth_layer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut request: axum::extract::Request,
    next: middleware::Next,
) -> Result<axum::response::Response, axum::http::StatusCode> {
    request.extensions_mut().insert(state.auth.clone());
    auth::bearer_auth_middleware(request, next).await
}
