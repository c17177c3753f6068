use crate::{AppState, handlers};
use axum::{
    Router,
    routing::{delete, get, put},
};

/// Admin Router Module
///
/// Defines the routes exclusively accessible to users with the 'admin' role:
/// moderation of any marker and management of user accounts.
///
/// Access Control:
/// Handlers here resolve the `AuthUser` extractor themselves and then
/// explicitly check for `role='admin'` before touching any data. An
/// authenticated non-admin gets a 403 with a typed error body.
pub fn admin_routes() -> Router<AppState> {
    Router::new()
        // GET /admin/markers
        // Lists ALL markers unconditionally (any status, any expiration).
        // This is the moderation queue.
        .route("/markers", get(handlers::get_admin_markers))
        // PUT/DELETE /admin/markers/{id}
        // Moderation edit of any marker's content/status, or force deletion.
        // No ownership check applies to admins.
        .route(
            "/markers/{id}",
            put(handlers::admin_update_marker).delete(handlers::admin_delete_marker),
        )
        // GET /admin/users
        // Lists every registered account.
        .route("/users", get(handlers::get_admin_users))
        // PUT/DELETE /admin/users/{id}
        // Account management. Deletion cascades to the user's markers;
        // self-deletion and demoting the last admin are refused.
        .route(
            "/users/{id}",
            put(handlers::admin_update_user).delete(handlers::admin_delete_user),
        )
}
