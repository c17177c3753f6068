use crate::{
    AppState,
    auth::{AuthUser, ROLE_ADMIN, ROLE_USER},
    error::{ErrorBody, MarkerError},
    models::{
        AdminUpdateMarkerRequest, AdminUpdateUserRequest, CreateMarkerRequest,
        CreatedMarkerResponse, Marker, MarkerView, PublicProfile, RegisterUserRequest,
        UpdateProfileRequest, UpdateStatusRequest, User,
    },
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use uuid::Uuid;

// --- Public Handlers ---

/// get_markers
///
/// [Public Route] The public feed: markers that are 'active' AND not yet
/// expired as of the current clock instant, newest first, with the owner's
/// display name attached.
///
/// *Freshness*: The expiration filter is applied in the query itself, so an
/// expired marker never appears here even if the background sweep has not run
/// since it lapsed.
#[utoipa::path(
    get,
    path = "/markers",
    responses((status = 200, description = "Active markers", body = [MarkerView]))
)]
pub async fn get_markers(State(state): State<AppState>) -> Result<Json<Vec<MarkerView>>, MarkerError> {
    Ok(Json(state.markers.public_feed().await?))
}

/// register_user
///
/// [Public Route] Creates the local user row. Credential issuance lives with
/// the external identity provider, so no password ever reaches this service.
///
/// *Conflicts*: Username and email are unique; a duplicate registration is
/// reported as 409 rather than surfacing the raw database error.
#[utoipa::path(
    post,
    path = "/register",
    request_body = RegisterUserRequest,
    responses(
        (status = 201, description = "Registered", body = User),
        (status = 409, description = "Username or email taken", body = ErrorBody)
    )
)]
pub async fn register_user(
    State(state): State<AppState>,
    Json(payload): Json<RegisterUserRequest>,
) -> Response {
    if payload.username.trim().is_empty() {
        return MarkerError::Validation("username").into_response();
    }
    if payload.email.trim().is_empty() {
        return MarkerError::Validation("email").into_response();
    }

    let user = User {
        id: Uuid::new_v4(),
        username: payload.username,
        email: payload.email,
        name: String::new(),
        contact: String::new(),
        bio: String::new(),
        gender: "secret".to_string(),
        age: None,
        role: ROLE_USER.to_string(),
        created_at: state.clock.now(),
    };

    match state.repo.insert_user(&user).await {
        Ok(()) => (StatusCode::CREATED, Json(user)).into_response(),
        Err(e) if e.as_database_error().is_some_and(|db| db.is_unique_violation()) => (
            StatusCode::CONFLICT,
            Json(ErrorBody {
                error: "username or email already exists".to_string(),
            }),
        )
            .into_response(),
        Err(e) => MarkerError::from(e).into_response(),
    }
}

/// get_user_profile
///
/// [Public Route] A user's public profile. Email, contact details and role
/// are stripped before the payload leaves the service.
#[utoipa::path(
    get,
    path = "/users/{username}",
    params(("username" = String, Path, description = "Username")),
    responses(
        (status = 200, description = "Profile", body = PublicProfile),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn get_user_profile(
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<PublicProfile>, MarkerError> {
    let user = state
        .repo
        .get_user_by_username(&username)
        .await?
        .ok_or(MarkerError::NotFound)?;
    Ok(Json(PublicProfile::from(user)))
}

// --- Authenticated Handlers ---

/// get_me
///
/// [Authenticated Route] The authenticated user's own record.
#[utoipa::path(
    get,
    path = "/me",
    responses((status = 200, description = "Profile", body = User))
)]
pub async fn get_me(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<User>, MarkerError> {
    let user = state
        .repo
        .get_user_by_username(&username)
        .await?
        .ok_or(MarkerError::NotFound)?;
    Ok(Json(user))
}

/// get_my_markers
///
/// [Authenticated Route] The owner view: every marker of the path's user,
/// any status or expiration, for self-management. The requester must be that
/// user; the lifecycle core rejects anyone else.
#[utoipa::path(
    get,
    path = "/markers/user/{username}",
    params(("username" = String, Path, description = "Owner username")),
    responses(
        (status = 200, description = "Markers of the owner", body = [MarkerView]),
        (status = 403, description = "Not your markers", body = ErrorBody)
    )
)]
pub async fn get_my_markers(
    AuthUser { username: requester, .. }: AuthUser,
    State(state): State<AppState>,
    Path(username): Path<String>,
) -> Result<Json<Vec<MarkerView>>, MarkerError> {
    Ok(Json(state.markers.owner_markers(&username, &requester).await?))
}

/// create_marker
///
/// [Authenticated Route] Posts a new marker. The lifecycle core validates the
/// payload, checks the stated owner against the authenticated requester,
/// enforces the 3-active-markers quota and computes the expiration; the
/// response carries the generated id and that expiration.
#[utoipa::path(
    post,
    path = "/markers",
    request_body = CreateMarkerRequest,
    responses(
        (status = 201, description = "Created", body = CreatedMarkerResponse),
        (status = 400, description = "Invalid payload", body = ErrorBody),
        (status = 403, description = "Quota reached or wrong owner", body = ErrorBody)
    )
)]
pub async fn create_marker(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<CreateMarkerRequest>,
) -> Result<(StatusCode, Json<CreatedMarkerResponse>), MarkerError> {
    let marker = state.markers.create_marker(payload, &username).await?;
    Ok((
        StatusCode::CREATED,
        Json(CreatedMarkerResponse {
            id: marker.id,
            expires_at: marker.expires_at,
        }),
    ))
}

/// update_marker_status
///
/// [Authenticated Route] Flips a marker between 'active' and 'inactive'.
/// Owner or admin only; any other target value is rejected. Reactivation does
/// not extend the expiration, so an expired marker set back to 'active' is
/// deactivated again by the next sweep.
#[utoipa::path(
    put,
    path = "/markers/{id}/status",
    params(("id" = Uuid, Path, description = "Marker ID")),
    request_body = UpdateStatusRequest,
    responses(
        (status = 200, description = "Updated"),
        (status = 400, description = "Invalid status value", body = ErrorBody),
        (status = 403, description = "Not owner or admin", body = ErrorBody),
        (status = 404, description = "No such marker", body = ErrorBody)
    )
)]
pub async fn update_marker_status(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateStatusRequest>,
) -> Result<StatusCode, MarkerError> {
    state
        .markers
        .set_status(id, &payload.status, &auth.username, auth.is_admin())
        .await?;
    Ok(StatusCode::OK)
}

/// update_profile
///
/// [Authenticated Route] Partial update of the requester's own profile. The
/// username in the path of trust is the authenticated identity itself, so no
/// separate ownership check is needed.
#[utoipa::path(
    put,
    path = "/profile",
    request_body = UpdateProfileRequest,
    responses(
        (status = 200, description = "Updated"),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn update_profile(
    AuthUser { username, .. }: AuthUser,
    State(state): State<AppState>,
    Json(payload): Json<UpdateProfileRequest>,
) -> Result<StatusCode, MarkerError> {
    if !state.repo.update_profile(&username, &payload).await? {
        return Err(MarkerError::NotFound);
    }
    Ok(StatusCode::OK)
}

// --- Admin Handlers ---

/// get_admin_markers
///
/// [Admin Route] Every marker in the system, regardless of status or
/// expiration. Used for the moderation queue.
///
/// *Authorization*: Explicitly checks that the resolved role is 'admin'.
#[utoipa::path(
    get,
    path = "/admin/markers",
    responses((status = 200, description = "All markers", body = [MarkerView]))
)]
pub async fn get_admin_markers(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<MarkerView>>, MarkerError> {
    if !auth.is_admin() {
        return Err(MarkerError::Forbidden);
    }
    Ok(Json(state.markers.all_markers().await?))
}

/// admin_update_marker
///
/// [Admin Route] Moderation edit of any marker's content fields and status.
/// Expiration and coordinates are immutable here.
#[utoipa::path(
    put,
    path = "/admin/markers/{id}",
    params(("id" = Uuid, Path, description = "Marker ID")),
    request_body = AdminUpdateMarkerRequest,
    responses(
        (status = 200, description = "Updated", body = Marker),
        (status = 404, description = "No such marker", body = ErrorBody)
    )
)]
pub async fn admin_update_marker(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdminUpdateMarkerRequest>,
) -> Result<Json<Marker>, MarkerError> {
    if !auth.is_admin() {
        return Err(MarkerError::Forbidden);
    }
    Ok(Json(state.markers.moderate_marker(id, payload).await?))
}

/// admin_delete_marker
///
/// [Admin Route] Force-removes any marker, no ownership check.
#[utoipa::path(
    delete,
    path = "/admin/markers/{id}",
    params(("id" = Uuid, Path, description = "Marker ID")),
    responses(
        (status = 204, description = "Deleted"),
        (status = 404, description = "No such marker", body = ErrorBody)
    )
)]
pub async fn admin_delete_marker(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, MarkerError> {
    if !auth.is_admin() {
        return Err(MarkerError::Forbidden);
    }
    state.markers.delete_marker(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// get_admin_users
///
/// [Admin Route] Every user account, newest first.
#[utoipa::path(
    get,
    path = "/admin/users",
    responses((status = 200, description = "All users", body = [User]))
)]
pub async fn get_admin_users(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<Vec<User>>, MarkerError> {
    if !auth.is_admin() {
        return Err(MarkerError::Forbidden);
    }
    Ok(Json(state.repo.list_users().await?))
}

/// admin_update_user
///
/// [Admin Route] Edits an account's name, contact and role.
///
/// *Lock-out guard*: An admin demoting their own account is refused when no
/// other admin would remain.
#[utoipa::path(
    put,
    path = "/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    request_body = AdminUpdateUserRequest,
    responses(
        (status = 200, description = "Updated", body = User),
        (status = 403, description = "Would demote the last admin", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn admin_update_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AdminUpdateUserRequest>,
) -> Result<Json<User>, MarkerError> {
    if !auth.is_admin() {
        return Err(MarkerError::Forbidden);
    }

    if let Some(role) = &payload.role {
        if role != ROLE_USER && role != ROLE_ADMIN {
            return Err(MarkerError::Validation("role"));
        }
    }

    let target = state.repo.get_user(id).await?.ok_or(MarkerError::NotFound)?;

    // Refuse a self-demotion that would leave the system without any admin.
    if payload.role.as_deref().is_some_and(|role| role != ROLE_ADMIN)
        && target.username == auth.username
        && state.repo.count_admins_excluding(id).await? == 0
    {
        return Err(MarkerError::Forbidden);
    }

    let updated = state
        .repo
        .update_user(id, &payload)
        .await?
        .ok_or(MarkerError::NotFound)?;
    Ok(Json(updated))
}

/// admin_delete_user
///
/// [Admin Route] Deletes an account and cascades to every marker it owns, so
/// no orphaned markers survive their author. Self-deletion is refused.
#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    params(("id" = Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "Deleted, markers cascaded"),
        (status = 403, description = "Cannot delete yourself", body = ErrorBody),
        (status = 404, description = "No such user", body = ErrorBody)
    )
)]
pub async fn admin_delete_user(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, MarkerError> {
    if !auth.is_admin() {
        return Err(MarkerError::Forbidden);
    }

    let target = state.repo.get_user(id).await?.ok_or(MarkerError::NotFound)?;
    if target.username == auth.username {
        return Err(MarkerError::Forbidden);
    }

    // Markers first, then the account: a failure in between leaves a user
    // with no markers rather than markers with no user.
    state.markers.purge_owner(&target.username).await?;
    if !state.repo.delete_user(id).await? {
        return Err(MarkerError::NotFound);
    }
    Ok(StatusCode::NO_CONTENT)
}
