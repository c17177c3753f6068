use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post},
};

/// Public Router Module
///
/// Defines endpoints that are **unauthenticated** and accessible to any client
/// (anonymous or logged-in): the public marker feed, public profiles, and
/// registration.
///
/// Security Mandate:
/// The feed handler must only ever return markers that are 'active' AND
/// unexpired; the filter lives in the Repository query so an anonymous client
/// can never observe a stale-active or hidden marker.
pub fn public_routes() -> Router<AppState> {
    Router::new()
        // GET /health
        // A simple, unauthenticated endpoint used for monitoring and load
        // balancer checks. Returns "ok" immediately.
        .route("/health", get(|| async { "ok" }))
        // POST /register
        // Creates the local user row. Credential issuance is handled by the
        // external identity provider.
        .route("/register", post(handlers::register_user))
        // GET /markers
        // The public feed: active, unexpired markers, newest first, with the
        // owner's display name joined in.
        .route("/markers", get(handlers::get_markers))
        // GET /users/{username}
        // A user's public profile. Private fields (email, contact, role) are
        // stripped in the handler.
        .route("/users/{username}", get(handlers::get_user_profile))
}
