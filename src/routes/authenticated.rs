use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{get, post, put},
};

/// Authenticated Router Module
///
/// Defines the routes accessible to any user who has successfully passed the
/// authentication layer: marker submission and self-management, plus the
/// user's own profile.
///
/// Access Control Strategy:
/// Every handler in this module relies on the `AuthUser` extractor middleware
/// being present on the router layer above this module. This guarantees that
/// all handlers receive a validated `AuthUser` struct containing the username
/// and role, which is then used for all Owner-Only authorization checks
/// (e.g., in `create_marker` and `update_marker_status`).
pub fn authenticated_routes() -> Router<AppState> {
    Router::<AppState>::new()
        // GET /me
        // Retrieves the currently authenticated user's full record.
        .route("/me", get(handlers::get_me))
        // PUT /profile
        // Partial update of the requester's own profile fields.
        .route("/profile", put(handlers::update_profile))
        // --- Marker Submission & Management ---
        // POST /markers
        // Submits a new marker. The lifecycle core enforces the owner match,
        // the 3-active quota and the computed expiration.
        .route("/markers", post(handlers::create_marker))
        // GET /markers/user/{username}
        // The owner view: every marker of that user, any status, for
        // self-management. Strict requester == owner check in the core.
        .route("/markers/user/{username}", get(handlers::get_my_markers))
        // PUT /markers/{id}/status
        // Flips a marker between 'active' and 'inactive'. Owner or admin
        // only; reactivation never extends the expiration.
        .route("/markers/{id}/status", put(handlers::update_marker_status))
}
