use axum::routing::post;
use axum::Router;

use crate::handlers::plugins;
use crate::state::AppState;

/// Routes mounted at `/plugins`.
///
/// ```text
/// POST   /test                      -> test_plugin
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/test", post(plugins::test_plugin))
}
