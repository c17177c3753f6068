use crate::{
    clock::ClockState,
    error::MarkerError,
    models::{
        AdminUpdateMarkerRequest, CreateMarkerRequest, Marker, MarkerStatus, MarkerView,
        Visibility,
    },
    repository::RepositoryState,
};
use chrono::{DateTime, Duration, NaiveTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Maximum number of concurrently active markers permitted per owner.
pub const ACTIVE_MARKER_LIMIT: i64 = 3;

/// compute_expiration
///
/// Pure function of the visibility class and the creation instant, both UTC.
/// Deterministic: the same inputs always yield the same expiration, so a
/// marker's lifetime is fixed the moment it is created.
///
/// - `today`: 23:59:59.999999 of the creation day.
/// - `three_days`: creation instant + 72 hours.
/// - anything else: creation instant + 365 days.
pub fn compute_expiration(visibility: Visibility, created_at: DateTime<Utc>) -> DateTime<Utc> {
    match visibility {
        Visibility::Today => {
            let end_of_day =
                NaiveTime::from_hms_micro_opt(23, 59, 59, 999_999).expect("valid constant time");
            created_at.date_naive().and_time(end_of_day).and_utc()
        }
        Visibility::ThreeDays => created_at + Duration::hours(72),
        Visibility::Other => created_at + Duration::days(365),
    }
}

/// MarkerLifecycle
///
/// The marker lifecycle core: computes expirations, enforces the per-owner
/// active quota, transitions status, and serves the three listing views. It
/// owns its collaborators (persistence and clock) as injected trait objects
/// and carries no other state besides the per-owner create locks.
pub struct MarkerLifecycle {
    repo: RepositoryState,
    clock: ClockState,
    /// One async mutex per owner, held across the quota check and the insert.
    /// Two concurrent creates by the same owner serialize here, so both can
    /// never pass the count with only one slot left. Owners are independent.
    create_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MarkerLifecycle {
    pub fn new(repo: RepositoryState, clock: ClockState) -> Self {
        Self {
            repo,
            clock,
            create_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn owner_lock(&self, owner: &str) -> Arc<Mutex<()>> {
        let mut locks = self.create_locks.lock().await;
        locks.entry(owner.to_string()).or_default().clone()
    }

    /// create_marker
    ///
    /// Validates the payload, verifies the stated owner is the authenticated
    /// requester, enforces the active quota and persists the new marker with
    /// status 'active'. Expiration is computed here from the clock's current
    /// instant; the client has no say in it.
    pub async fn create_marker(
        &self,
        req: CreateMarkerRequest,
        requester: &str,
    ) -> Result<Marker, MarkerError> {
        if req.title.trim().is_empty() {
            return Err(MarkerError::Validation("title"));
        }
        if req.description.trim().is_empty() {
            return Err(MarkerError::Validation("description"));
        }
        if req.marker_type.trim().is_empty() {
            return Err(MarkerError::Validation("marker_type"));
        }
        if req.user_username.trim().is_empty() {
            return Err(MarkerError::Validation("user_username"));
        }
        if !(-90.0..=90.0).contains(&req.lat) {
            return Err(MarkerError::Validation("lat"));
        }
        if !(-180.0..=180.0).contains(&req.lng) {
            return Err(MarkerError::Validation("lng"));
        }
        // Owner field must equal the authenticated requester; nobody posts on
        // someone else's behalf.
        if req.user_username != requester {
            return Err(MarkerError::Forbidden);
        }

        let lock = self.owner_lock(&req.user_username).await;
        let _guard = lock.lock().await;

        let active = self.repo.count_active_markers(&req.user_username).await?;
        if active >= ACTIVE_MARKER_LIMIT {
            return Err(MarkerError::QuotaExceeded);
        }

        let now = self.clock.now();
        let marker = Marker {
            id: Uuid::new_v4(),
            title: req.title,
            description: req.description,
            contact: req.contact,
            marker_type: req.marker_type,
            expires_at: compute_expiration(Visibility::parse(&req.visibility), now),
            visibility: req.visibility,
            lat: req.lat,
            lng: req.lng,
            user_username: req.user_username,
            created_at: now,
            status: MarkerStatus::Active.as_str().to_string(),
        };
        self.repo.insert_marker(&marker).await?;

        tracing::debug!(marker_id = %marker.id, owner = %marker.user_username, "marker created");
        Ok(marker)
    }

    /// sweep_expired
    ///
    /// Transitions every expired active marker to 'inactive' in one atomic
    /// batch update and reports how many changed. Idempotent: a second run
    /// against the same clock instant finds nothing left to transition.
    pub async fn sweep_expired(&self) -> Result<u64, MarkerError> {
        let now = self.clock.now();
        let count = self.repo.deactivate_expired(now).await?;
        if count > 0 {
            tracing::info!(count, "swept expired markers to inactive");
        }
        Ok(count)
    }

    /// set_status
    ///
    /// Explicit owner/admin status transition. The target must parse as one
    /// of the two allowed values. Reactivating a marker does not recompute or
    /// extend its expiration: an already-expired marker flipped back to
    /// 'active' is picked up again by the next sweep.
    pub async fn set_status(
        &self,
        id: Uuid,
        target: &str,
        requester: &str,
        is_admin: bool,
    ) -> Result<(), MarkerError> {
        let status = MarkerStatus::parse(target)
            .ok_or_else(|| MarkerError::InvalidStatus(target.to_string()))?;

        let marker = self.repo.get_marker(id).await?.ok_or(MarkerError::NotFound)?;
        if marker.user_username != requester && !is_admin {
            return Err(MarkerError::Forbidden);
        }

        if !self.repo.set_marker_status(id, status.as_str()).await? {
            // The marker vanished between the ownership read and the write.
            return Err(MarkerError::NotFound);
        }
        Ok(())
    }

    /// public_feed
    ///
    /// Active, unexpired markers, newest first. The expiration filter is
    /// evaluated against the clock at read time, so a marker past its
    /// expiration never appears here even if the background sweep has not
    /// caught up with it yet.
    pub async fn public_feed(&self) -> Result<Vec<MarkerView>, MarkerError> {
        let now = self.clock.now();
        Ok(self.repo.list_active_markers(now).await?)
    }

    /// owner_markers
    ///
    /// Self-management view: all of the owner's markers, any status or
    /// expiration. Only the owner may see it.
    pub async fn owner_markers(
        &self,
        owner: &str,
        requester: &str,
    ) -> Result<Vec<MarkerView>, MarkerError> {
        if owner != requester {
            return Err(MarkerError::Forbidden);
        }
        Ok(self.repo.list_markers_by_owner(owner).await?)
    }

    /// all_markers
    ///
    /// Admin view: every marker, no filtering. The role check happens at the
    /// HTTP layer before this is called.
    pub async fn all_markers(&self) -> Result<Vec<MarkerView>, MarkerError> {
        Ok(self.repo.list_all_markers().await?)
    }

    /// moderate_marker
    ///
    /// Admin moderation edit. Partial update of the content fields; a status
    /// value, if supplied, must be in the allowed set. Expiration is never
    /// touched, even when the visibility label is corrected.
    pub async fn moderate_marker(
        &self,
        id: Uuid,
        req: AdminUpdateMarkerRequest,
    ) -> Result<Marker, MarkerError> {
        if let Some(status) = &req.status {
            if MarkerStatus::parse(status).is_none() {
                return Err(MarkerError::InvalidStatus(status.clone()));
            }
        }
        self.repo
            .update_marker(id, &req)
            .await?
            .ok_or(MarkerError::NotFound)
    }

    /// delete_marker
    ///
    /// Admin-only removal of a single marker.
    pub async fn delete_marker(&self, id: Uuid) -> Result<(), MarkerError> {
        if !self.repo.delete_marker(id).await? {
            return Err(MarkerError::NotFound);
        }
        Ok(())
    }

    /// purge_owner
    ///
    /// Cascade used when an account is deleted: removes every marker the user
    /// owns and reports the count.
    pub async fn purge_owner(&self, username: &str) -> Result<u64, MarkerError> {
        let count = self.repo.delete_markers_by_owner(username).await?;
        if count > 0 {
            tracing::info!(count, owner = %username, "purged markers of deleted user");
        }
        Ok(count)
    }
}

/// LifecycleState
///
/// The concrete type used to share the lifecycle core across the application
/// state.
pub type LifecycleState = Arc<MarkerLifecycle>;
