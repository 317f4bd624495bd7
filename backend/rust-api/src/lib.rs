use axum::{
    extract::Request,
    http::{header, HeaderValue, Method},
    middleware::{self, Next},
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

/// Adds a restrictive Content-Security-Policy to every response.
async fn csp_middleware(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    response.headers_mut().insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );
    response
}

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest(
            "/api/v1",
            api_routes()
                .layer(middleware::from_fn_with_state(
                    app_state.clone(),
                    middlewares::auth::auth_middleware,
                ))
                .layer(cors),
        )
        .with_state(app_state)
        .layer(middleware::from_fn(csp_middleware))
        .layer(middleware::from_fn(middlewares::metrics::metrics_middleware))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Case simulations
        .route("/cases", get(handlers::cases::list_cases))
        .route("/cases/{case_id}/attempts", post(handlers::cases::start_case))
        .route(
            "/attempts/{attempt_id}",
            get(handlers::cases::get_current_step),
        )
        .route(
            "/attempts/{attempt_id}/choices",
            post(handlers::cases::submit_choice),
        )
        .route(
            "/attempts/{attempt_id}/summary",
            get(handlers::cases::get_completion_summary),
        )
        // Learner profile
        .route("/profile", get(handlers::profile::get_profile))
        .route(
            "/profile/achievements",
            get(handlers::profile::list_achievements),
        )
        .route(
            "/profile/activities",
            get(handlers::profile::list_activities),
        )
        .route("/leaderboard", get(handlers::profile::leaderboard))
}
