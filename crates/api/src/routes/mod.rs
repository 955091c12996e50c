pub mod health;

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::scans;
use crate::state::AppState;

/// Routes nested under `/v1`. All of them require a bearer token.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/scans", post(scans::create_scan).get(scans::list_scans))
        .route(
            "/scans/{id}",
            get(scans::get_scan).delete(scans::delete_scan),
        )
}
