pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::interview::handlers;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Sessions
        .route("/api/v1/sessions", post(handlers::handle_create_session))
        .route(
            "/api/v1/sessions/:id",
            get(handlers::handle_get_session).delete(handlers::handle_delete_session),
        )
        .route(
            "/api/v1/sessions/:id/credential",
            put(handlers::handle_set_credential).delete(handlers::handle_clear_credential),
        )
        // Interview flow
        .route("/api/v1/sessions/:id/start", post(handlers::handle_start))
        .route(
            "/api/v1/sessions/:id/answers",
            post(handlers::handle_submit_answer),
        )
        .route(
            "/api/v1/sessions/:id/feedback/stream",
            get(handlers::handle_feedback_stream),
        )
        .route("/api/v1/sessions/:id/advance", post(handlers::handle_advance))
        .route("/api/v1/sessions/:id/restart", post(handlers::handle_restart))
        .with_state(state)
}
