use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use ts_rs::TS;
use utoipa::ToSchema;
use uuid::Uuid;

// --- Core Application Schemas (Mapped to Database) ---

/// User
///
/// Represents a user's canonical identity record stored in the `users` table.
/// Credentials are never stored here; token issuance is handled by an external
/// identity provider, so this row only carries profile data and the role.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct User {
    pub id: Uuid,
    /// Unique handle. Markers reference their owner by this value.
    pub username: String,
    pub email: String,
    pub name: String,
    pub contact: String,
    pub bio: String,
    pub gender: String,
    pub age: Option<i32>,
    // The RBAC field: 'user' or 'admin'.
    pub role: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

/// Marker
///
/// A user-submitted geotagged post with a bounded lifetime, from the `markers`
/// table. This is the primary data structure for the core business logic.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct Marker {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    // Optional reachability info, stored as an empty string when omitted.
    pub contact: String,
    pub marker_type: String,
    /// The visibility class chosen at creation ('today', 'three_days', or a
    /// legacy value). Drives `expires_at`; stored verbatim for display.
    pub visibility: String,
    pub lat: f64,
    pub lng: f64,
    // FK to users.username (Owner).
    pub user_username: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    /// Computed from (visibility, created_at) at creation time. Never
    /// user-supplied and never recomputed on status changes.
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    // Lifecycle state: 'active' or 'inactive'.
    pub status: String,
}

/// MarkerView
///
/// A marker row joined with the owner's display name. This is the shape the
/// listing endpoints return (public feed, owner view, admin view); the join
/// keeps private owner fields out of the payload.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, FromRow, Default)]
#[ts(export)]
pub struct MarkerView {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub contact: String,
    pub marker_type: String,
    pub visibility: String,
    pub lat: f64,
    pub lng: f64,
    pub user_username: String,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
    pub status: String,
    /// Display name of the owner, loaded via a JOIN on `users`.
    pub user_name: String,
}

// --- Domain Enums ---

/// MarkerStatus
///
/// The two lifecycle states a marker can be in. Stored as TEXT; parsing is
/// strict because the status transition endpoint must reject anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerStatus {
    Active,
    Inactive,
}

impl MarkerStatus {
    pub const ACTIVE: &'static str = "active";
    pub const INACTIVE: &'static str = "inactive";

    /// Strict parse. Returns None for anything outside the allowed set so the
    /// caller can surface an InvalidStatus error instead of persisting junk.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            Self::ACTIVE => Some(Self::Active),
            Self::INACTIVE => Some(Self::Inactive),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => Self::ACTIVE,
            Self::Inactive => Self::INACTIVE,
        }
    }
}

/// Visibility
///
/// User-chosen category controlling how long a marker stays active. Unknown
/// values are accepted and fall back to the long-lived default, matching the
/// lenient intake of legacy marker types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Expires at the end of the creation day (UTC).
    Today,
    /// Expires exactly 72 hours after creation.
    ThreeDays,
    /// Fallback: expires 365 days after creation.
    Other,
}

impl Visibility {
    pub fn parse(value: &str) -> Self {
        match value {
            "today" => Self::Today,
            "three_days" => Self::ThreeDays,
            _ => Self::Other,
        }
    }
}

/// --- Request Payloads (Input Schemas) ---

fn default_visibility() -> String {
    "today".to_string()
}

/// CreateMarkerRequest
///
/// Input payload for posting a new marker (POST /markers).
/// `user_username` must equal the authenticated requester; the lifecycle core
/// rejects a mismatch before any persistence happens.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreateMarkerRequest {
    pub title: String,
    pub description: String,
    /// Defaults to an empty string when the client omits it.
    #[serde(default)]
    pub contact: String,
    pub marker_type: String,
    /// Defaults to 'today' when the client omits it.
    #[serde(default = "default_visibility")]
    pub visibility: String,
    pub lat: f64,
    pub lng: f64,
    pub user_username: String,
}

/// UpdateStatusRequest
///
/// Input payload for the owner/admin status transition endpoint
/// (PUT /markers/{id}/status). The value is validated against the allowed
/// set in the lifecycle core, not here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateStatusRequest {
    pub status: String,
}

/// RegisterUserRequest
///
/// Input payload for the public registration endpoint (POST /register).
/// Credentials are handled by the external identity provider; this only
/// creates the local profile row.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
}

/// UpdateProfileRequest
///
/// Partial update payload for the authenticated user's own profile
/// (PUT /profile). Uses `Option<T>` so only provided fields are written.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct UpdateProfileRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub age: Option<i32>,
}

/// AdminUpdateMarkerRequest
///
/// Partial update payload for the admin moderation endpoint
/// (PUT /admin/markers/{id}). Deliberately excludes `expires_at` and the
/// coordinates; expiration is derived data and moderation never moves a pin.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminUpdateMarkerRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker_type: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub visibility: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

/// AdminUpdateUserRequest
///
/// Partial update payload for admin account management
/// (PUT /admin/users/{id}). Email and username are immutable here.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct AdminUpdateUserRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

/// --- Output Schemas ---

/// PublicProfile
///
/// The subset of a user row exposed to anonymous viewers
/// (GET /users/{username}). Email, contact and role stay private.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct PublicProfile {
    pub username: String,
    pub name: String,
    pub bio: String,
    pub gender: String,
    pub age: Option<i32>,
    #[ts(type = "string")]
    pub created_at: DateTime<Utc>,
}

impl From<User> for PublicProfile {
    fn from(user: User) -> Self {
        Self {
            username: user.username,
            name: user.name,
            bio: user.bio,
            gender: user.gender,
            age: user.age,
            created_at: user.created_at,
        }
    }
}

/// CreatedMarkerResponse
///
/// Minimal acknowledgement for a successful marker creation, carrying the
/// new identifier and the computed expiration so clients can render the
/// countdown without a follow-up fetch.
#[derive(Debug, Clone, Serialize, Deserialize, TS, ToSchema, Default)]
#[ts(export)]
pub struct CreatedMarkerResponse {
    pub id: Uuid,
    #[ts(type = "string")]
    pub expires_at: DateTime<Utc>,
}
