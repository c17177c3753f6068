use crate::models::{
    AdminUpdateMarkerRequest, AdminUpdateUserRequest, Marker, MarkerStatus, MarkerView,
    UpdateProfileRequest, User,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

/// Repository Trait
///
/// Defines the abstract contract for all persistence operations. The lifecycle
/// core and the handlers interact with the data layer exclusively through this
/// trait, so the concrete implementation (Postgres, in-memory test double) can
/// be swapped without touching business logic.
///
/// Every method returns `Result<_, sqlx::Error>`: persistence failures are
/// propagated to the caller (where they surface as `MarkerError::Storage`),
/// never logged-and-defaulted away.
///
/// **Send + Sync + async_trait** are required to make the trait object
/// (`Arc<dyn Repository>`) safely shareable across Axum's task boundaries.
#[async_trait]
pub trait Repository: Send + Sync {
    // --- Markers ---

    /// Persists a fully-formed marker row. The caller (the lifecycle core) has
    /// already computed id, timestamps and expiration.
    async fn insert_marker(&self, marker: &Marker) -> Result<(), sqlx::Error>;

    /// Counts the owner's markers currently in status 'active'. Used by the
    /// quota check; callers serialize this with the subsequent insert.
    async fn count_active_markers(&self, username: &str) -> Result<i64, sqlx::Error>;

    /// One atomic batch update: every marker still 'active' whose expiration
    /// is at or before `now` becomes 'inactive'. Returns the number of rows
    /// transitioned. There is no read-then-write gap, so overlapping sweeps
    /// cannot race each other.
    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error>;

    async fn get_marker(&self, id: Uuid) -> Result<Option<Marker>, sqlx::Error>;

    /// Updates a single marker's status. Returns false if no such marker.
    /// Authorization is the caller's job.
    async fn set_marker_status(&self, id: Uuid, status: &str) -> Result<bool, sqlx::Error>;

    /// Public feed query: status 'active' AND not yet expired as of `now`,
    /// newest first, joined with the owner's display name. The expiration
    /// predicate is applied here regardless of sweep timing.
    async fn list_active_markers(&self, now: DateTime<Utc>) -> Result<Vec<MarkerView>, sqlx::Error>;

    /// Owner view: all of one user's markers, any status or expiration,
    /// newest first.
    async fn list_markers_by_owner(&self, username: &str) -> Result<Vec<MarkerView>, sqlx::Error>;

    /// Admin view: all markers unconditionally, newest first.
    async fn list_all_markers(&self) -> Result<Vec<MarkerView>, sqlx::Error>;

    /// Admin moderation edit. Uses COALESCE semantics for partial updates;
    /// returns the updated row, or None if the marker does not exist.
    async fn update_marker(
        &self,
        id: Uuid,
        req: &AdminUpdateMarkerRequest,
    ) -> Result<Option<Marker>, sqlx::Error>;

    /// Deletes a single marker. Returns false if no such marker.
    async fn delete_marker(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    /// Cascade helper: removes every marker owned by `username`, returning
    /// how many were deleted.
    async fn delete_markers_by_owner(&self, username: &str) -> Result<u64, sqlx::Error>;

    // --- Users ---

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error>;

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error>;

    /// Inserts a new user row. Unique violations (username/email taken)
    /// surface as database errors for the handler to map to 409.
    async fn insert_user(&self, user: &User) -> Result<(), sqlx::Error>;

    /// Self-service profile update. Returns false if the user is unknown.
    async fn update_profile(
        &self,
        username: &str,
        req: &UpdateProfileRequest,
    ) -> Result<bool, sqlx::Error>;

    async fn list_users(&self) -> Result<Vec<User>, sqlx::Error>;

    /// Admin account edit (name, contact, role). Returns the updated row,
    /// or None if the user does not exist.
    async fn update_user(
        &self,
        id: Uuid,
        req: &AdminUpdateUserRequest,
    ) -> Result<Option<User>, sqlx::Error>;

    /// Deletes the user row only. Marker cascade is orchestrated above this
    /// layer so it also holds for test doubles.
    async fn delete_user(&self, id: Uuid) -> Result<bool, sqlx::Error>;

    /// Counts admins other than the given user. Guards against demoting or
    /// deleting the last admin.
    async fn count_admins_excluding(&self, id: Uuid) -> Result<i64, sqlx::Error>;
}

/// RepositoryState
///
/// The concrete type used to share the persistence layer access across the
/// application state.
pub type RepositoryState = Arc<dyn Repository>;

// Shared SELECT base for the listing queries: marker columns plus the owner's
// display name.
const MARKER_VIEW_SELECT: &str = r#"
    SELECT m.id, m.title, m.description, m.contact, m.marker_type, m.visibility,
           m.lat, m.lng, m.user_username, m.created_at, m.expires_at, m.status,
           u.name AS user_name
    FROM markers m
    JOIN users u ON m.user_username = u.username
"#;

const USER_COLUMNS: &str =
    "id, username, email, name, contact, bio, gender, age, role, created_at";

/// PostgresRepository
///
/// The concrete implementation of the `Repository` trait, backed by the
/// PostgreSQL database.
pub struct PostgresRepository {
    pool: PgPool,
}

impl PostgresRepository {
    /// Creates a new repository instance using the initialized connection pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Repository for PostgresRepository {
    async fn insert_marker(&self, marker: &Marker) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO markers
                (id, title, description, contact, marker_type, visibility,
                 lat, lng, user_username, created_at, expires_at, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(marker.id)
        .bind(&marker.title)
        .bind(&marker.description)
        .bind(&marker.contact)
        .bind(&marker.marker_type)
        .bind(&marker.visibility)
        .bind(marker.lat)
        .bind(marker.lng)
        .bind(&marker.user_username)
        .bind(marker.created_at)
        .bind(marker.expires_at)
        .bind(&marker.status)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn count_active_markers(&self, username: &str) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM markers WHERE user_username = $1 AND status = $2",
        )
        .bind(username)
        .bind(MarkerStatus::ACTIVE)
        .fetch_one(&self.pool)
        .await
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE markers SET status = $1 WHERE status = $2 AND expires_at <= $3",
        )
        .bind(MarkerStatus::INACTIVE)
        .bind(MarkerStatus::ACTIVE)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn get_marker(&self, id: Uuid) -> Result<Option<Marker>, sqlx::Error> {
        sqlx::query_as::<_, Marker>(
            r#"
            SELECT id, title, description, contact, marker_type, visibility,
                   lat, lng, user_username, created_at, expires_at, status
            FROM markers
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
    }

    async fn set_marker_status(&self, id: Uuid, status: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE markers SET status = $1 WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_active_markers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarkerView>, sqlx::Error> {
        let query = format!(
            "{MARKER_VIEW_SELECT} WHERE m.status = $1 AND m.expires_at > $2 \
             ORDER BY m.created_at DESC"
        );
        sqlx::query_as::<_, MarkerView>(&query)
            .bind(MarkerStatus::ACTIVE)
            .bind(now)
            .fetch_all(&self.pool)
            .await
    }

    async fn list_markers_by_owner(
        &self,
        username: &str,
    ) -> Result<Vec<MarkerView>, sqlx::Error> {
        let query =
            format!("{MARKER_VIEW_SELECT} WHERE m.user_username = $1 ORDER BY m.created_at DESC");
        sqlx::query_as::<_, MarkerView>(&query)
            .bind(username)
            .fetch_all(&self.pool)
            .await
    }

    async fn list_all_markers(&self) -> Result<Vec<MarkerView>, sqlx::Error> {
        let query = format!("{MARKER_VIEW_SELECT} ORDER BY m.created_at DESC");
        sqlx::query_as::<_, MarkerView>(&query)
            .fetch_all(&self.pool)
            .await
    }

    async fn update_marker(
        &self,
        id: Uuid,
        req: &AdminUpdateMarkerRequest,
    ) -> Result<Option<Marker>, sqlx::Error> {
        // COALESCE keeps the stored value wherever the payload field is None.
        sqlx::query_as::<_, Marker>(
            r#"
            UPDATE markers
            SET title = COALESCE($2, title),
                description = COALESCE($3, description),
                contact = COALESCE($4, contact),
                marker_type = COALESCE($5, marker_type),
                visibility = COALESCE($6, visibility),
                status = COALESCE($7, status)
            WHERE id = $1
            RETURNING id, title, description, contact, marker_type, visibility,
                      lat, lng, user_username, created_at, expires_at, status
            "#,
        )
        .bind(id)
        .bind(&req.title)
        .bind(&req.description)
        .bind(&req.contact)
        .bind(&req.marker_type)
        .bind(&req.visibility)
        .bind(&req.status)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_marker(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM markers WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_markers_by_owner(&self, username: &str) -> Result<u64, sqlx::Error> {
        let result = sqlx::query("DELETE FROM markers WHERE user_username = $1")
            .bind(username)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE username = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(username)
            .fetch_optional(&self.pool)
            .await
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        sqlx::query_as::<_, User>(&query)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    async fn insert_user(&self, user: &User) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO users
                (id, username, email, name, contact, bio, gender, age, role, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(user.id)
        .bind(&user.username)
        .bind(&user.email)
        .bind(&user.name)
        .bind(&user.contact)
        .bind(&user.bio)
        .bind(&user.gender)
        .bind(user.age)
        .bind(&user.role)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_profile(
        &self,
        username: &str,
        req: &UpdateProfileRequest,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                contact = COALESCE($3, contact),
                bio = COALESCE($4, bio),
                gender = COALESCE($5, gender),
                age = COALESCE($6, age)
            WHERE username = $1
            "#,
        )
        .bind(username)
        .bind(&req.name)
        .bind(&req.contact)
        .bind(&req.bio)
        .bind(&req.gender)
        .bind(req.age)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_users(&self) -> Result<Vec<User>, sqlx::Error> {
        let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY created_at DESC");
        sqlx::query_as::<_, User>(&query).fetch_all(&self.pool).await
    }

    async fn update_user(
        &self,
        id: Uuid,
        req: &AdminUpdateUserRequest,
    ) -> Result<Option<User>, sqlx::Error> {
        sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET name = COALESCE($2, name),
                contact = COALESCE($3, contact),
                role = COALESCE($4, role)
            WHERE id = $1
            RETURNING id, username, email, name, contact, bio, gender, age, role, created_at
            "#,
        )
        .bind(id)
        .bind(&req.name)
        .bind(&req.contact)
        .bind(&req.role)
        .fetch_optional(&self.pool)
        .await
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM users WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count_admins_excluding(&self, id: Uuid) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM users WHERE role = $1 AND id != $2",
        )
        .bind(crate::auth::ROLE_ADMIN)
        .bind(id)
        .fetch_one(&self.pool)
        .await
    }
}
