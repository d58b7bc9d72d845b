//! Routes for media delivery.
//!
//! ## Structure
//! - `GET     /{*path}` — fetch an object (full or ranged)
//! - `OPTIONS /{*path}` — CORS preflight
//! - anything else      — 405
//!
//! The wildcard `*path` carries nested keys like `videos/2025/intro.mp4`.
//! Method gating happens inside the handler so every path answers the same
//! way, including `/`.

use crate::{errors::AppError, handlers::media_handlers::serve_media, services::media_service::MediaService};
use axum::{
    Router,
    response::{IntoResponse, Response},
    routing::any,
};
use std::any::Any;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};

/// Build the router. State (`MediaService`) is supplied by the caller.
pub fn routes() -> Router<MediaService> {
    Router::new()
        .route("/", any(serve_media))
        .route("/{*path}", any(serve_media))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::custom(panic_response))
}

/// Converts a handler panic into the generic 500.
fn panic_response(panic: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    tracing::error!(panic = detail, "handler panicked");
    AppError::internal().into_response()
}
