pub mod health;
pub mod open;
pub mod plugins;

use axum::Router;

use crate::config::ServerConfig;
use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /open/services               enabled environments with free slots (GET)
/// /open/submit                 submit a value (POST)
/// /open/envs/{id}/slots        live slot usage (GET)
/// /open/quota/check            quota key check (POST)
///
/// /plugins/test                run a script against a sample (POST)
/// ```
///
/// `/plugins` is only mounted when `plugin_test_enabled` is set.
pub fn api_routes(config: &ServerConfig) -> Router<AppState> {
    let routes = Router::new().nest("/open", open::router());
    if config.plugin_test_enabled {
        routes.nest("/plugins", plugins::router())
    } else {
        routes
    }
}
