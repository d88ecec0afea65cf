//! Route definitions for the public submission endpoints.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::open;
use crate::state::AppState;

/// Routes mounted at `/open`.
///
/// ```text
/// GET    /services                  -> services
/// POST   /submit                    -> submit
/// GET    /envs/{id}/slots           -> env_slots
/// POST   /quota/check               -> check_quota
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/services", get(open::services))
        .route("/submit", post(open::submit))
        .route("/envs/{id}/slots", get(open::env_slots))
        .route("/quota/check", post(open::check_quota))
}
