//! Defines the browsable directory tree.
//!
//! ## Structure
//! - `GET /healthz` liveness, outside rate limiting
//! - `GET /` every source merged into one listing
//! - `GET /{source}/` containers of one source
//! - `GET /{source}/{id}/` files of one container
//! - `GET /{source}/{id}/{file_id}[/{*name}]` 302 to a download link
//!
//! Directory paths without their trailing slash redirect to it. HEAD is
//! answered by every GET route.

use crate::{
    handlers::{
        health_handlers::healthz,
        listing_handlers::{
            download_file, list_container, list_root, list_source, not_found,
            redirect_container, redirect_source,
        },
        rate_limit::rate_limit,
    },
    state::AppState,
};
use axum::{Router, middleware, routing::get};
use std::time::Duration;
use tower_http::{classify::ServerErrorsFailureClass, trace::TraceLayer};
use tracing::Span;

/// Build the full application router around `state`.
pub fn routes(state: AppState) -> Router {
    let listings = Router::new()
        .route("/", get(list_root))
        .route("/{source}", get(redirect_source))
        .route("/{source}/", get(list_source))
        .route("/{source}/{id}", get(redirect_container))
        .route("/{source}/{id}/", get(list_container))
        .route("/{source}/{id}/{file_id}", get(download_file))
        .route("/{source}/{id}/{file_id}/{*name}", get(download_file))
        .fallback(not_found)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit));

    Router::new()
        .route("/healthz", get(healthz))
        .merge(listings)
        .layer(TraceLayer::new_for_http().on_failure(
            |error: ServerErrorsFailureClass, latency: Duration, _span: &Span| {
                tracing::error!(?latency, "server error: {error}");
            },
        ))
        .with_state(state)
}
