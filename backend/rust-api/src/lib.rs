use axum::{
    http::{header, HeaderName, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod client;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use error::LiveQuizError;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static(middlewares::trace::TRACE_ID_HEADER),
        ])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        .nest("/api/v1", api_routes(app_state.clone()))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(middleware::from_fn(
            middlewares::trace::trace_context_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn api_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public = Router::new()
        .route("/live-quizzes", get(handlers::live_quizzes::list_live_quizzes))
        .route("/live-quizzes/{id}", get(handlers::live_quizzes::get_live_quiz))
        .route(
            "/live-quizzes/{id}/roster",
            get(handlers::live_quizzes::get_roster),
        )
        .route(
            "/live-quiz-answers/submit-multiple-guest",
            post(handlers::answers::submit_guest_answers),
        )
        .route("/realtime", get(handlers::realtime::realtime_socket));

    let authenticated = Router::new()
        .route(
            "/live-quiz-answers/submit-multiple",
            post(handlers::answers::submit_answers),
        )
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            middlewares::auth::auth_middleware,
        ));

    public
        .merge(authenticated)
        .merge(admin_routes(app_state))
}

fn admin_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/live-quizzes",
            post(handlers::live_quizzes::create_live_quiz),
        )
        .route(
            "/live-quizzes/{id}/start",
            post(handlers::live_quizzes::start_live_quiz),
        )
        .route(
            "/live-quizzes/{id}/end",
            post(handlers::live_quizzes::end_live_quiz),
        )
        .route(
            "/live-quizzes/{id}/schedule",
            post(handlers::live_quizzes::schedule_live_quiz),
        )
        .route(
            "/live-quizzes/{id}/cancel-schedule",
            post(handlers::live_quizzes::cancel_schedule),
        )
        .route(
            "/live-quizzes/{id}/submissions",
            get(handlers::live_quizzes::list_submissions),
        )
        .route_layer(middleware::from_fn(
            middlewares::auth::admin_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ))
}
