use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use mapconnect::{
    clock::{Clock, ClockState},
    error::MarkerError,
    lifecycle::{ACTIVE_MARKER_LIMIT, MarkerLifecycle, compute_expiration},
    models::{
        AdminUpdateMarkerRequest, AdminUpdateUserRequest, CreateMarkerRequest, Marker,
        MarkerStatus, MarkerView, UpdateProfileRequest, User, Visibility,
    },
    repository::{Repository, RepositoryState},
};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// --- Test Doubles ---

/// Manually-advanced clock so expiration math can be pinned to known instants.
struct ManualClock(Mutex<DateTime<Utc>>);

impl ManualClock {
    fn at(instant: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self(Mutex::new(instant)))
    }

    fn set(&self, instant: DateTime<Utc>) {
        *self.0.lock().unwrap() = instant;
    }

    fn advance(&self, delta: Duration) {
        let mut now = self.0.lock().unwrap();
        *now += delta;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// In-memory Repository implementation mirroring the Postgres semantics:
/// plain vectors behind a mutex, inner-join listing, newest-first ordering.
#[derive(Default)]
struct InMemoryRepository {
    markers: Mutex<Vec<Marker>>,
    users: Mutex<Vec<User>>,
}

impl InMemoryRepository {
    fn seed_user(&self, username: &str, role: &str) {
        self.users.lock().unwrap().push(User {
            id: Uuid::new_v4(),
            username: username.to_string(),
            email: format!("{username}@example.com"),
            name: format!("{username} display"),
            role: role.to_string(),
            gender: "secret".to_string(),
            ..User::default()
        });
    }

    fn view(&self, marker: &Marker) -> Option<MarkerView> {
        let users = self.users.lock().unwrap();
        let owner = users.iter().find(|u| u.username == marker.user_username)?;
        Some(MarkerView {
            id: marker.id,
            title: marker.title.clone(),
            description: marker.description.clone(),
            contact: marker.contact.clone(),
            marker_type: marker.marker_type.clone(),
            visibility: marker.visibility.clone(),
            lat: marker.lat,
            lng: marker.lng,
            user_username: marker.user_username.clone(),
            created_at: marker.created_at,
            expires_at: marker.expires_at,
            status: marker.status.clone(),
            user_name: owner.name.clone(),
        })
    }

    fn sorted_views(&self, rows: Vec<Marker>) -> Vec<MarkerView> {
        let mut rows = rows;
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.iter().filter_map(|m| self.view(m)).collect()
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn insert_marker(&self, marker: &Marker) -> Result<(), sqlx::Error> {
        self.markers.lock().unwrap().push(marker.clone());
        Ok(())
    }

    async fn count_active_markers(&self, username: &str) -> Result<i64, sqlx::Error> {
        let count = self
            .markers
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_username == username && m.status == MarkerStatus::ACTIVE)
            .count();
        Ok(count as i64)
    }

    async fn deactivate_expired(&self, now: DateTime<Utc>) -> Result<u64, sqlx::Error> {
        let mut markers = self.markers.lock().unwrap();
        let mut transitioned = 0;
        for marker in markers.iter_mut() {
            if marker.status == MarkerStatus::ACTIVE && marker.expires_at <= now {
                marker.status = MarkerStatus::INACTIVE.to_string();
                transitioned += 1;
            }
        }
        Ok(transitioned)
    }

    async fn get_marker(&self, id: Uuid) -> Result<Option<Marker>, sqlx::Error> {
        Ok(self
            .markers
            .lock()
            .unwrap()
            .iter()
            .find(|m| m.id == id)
            .cloned())
    }

    async fn set_marker_status(&self, id: Uuid, status: &str) -> Result<bool, sqlx::Error> {
        let mut markers = self.markers.lock().unwrap();
        match markers.iter_mut().find(|m| m.id == id) {
            Some(marker) => {
                marker.status = status.to_string();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_active_markers(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<MarkerView>, sqlx::Error> {
        let rows: Vec<Marker> = self
            .markers
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.status == MarkerStatus::ACTIVE && m.expires_at > now)
            .cloned()
            .collect();
        Ok(self.sorted_views(rows))
    }

    async fn list_markers_by_owner(
        &self,
        username: &str,
    ) -> Result<Vec<MarkerView>, sqlx::Error> {
        let rows: Vec<Marker> = self
            .markers
            .lock()
            .unwrap()
            .iter()
            .filter(|m| m.user_username == username)
            .cloned()
            .collect();
        Ok(self.sorted_views(rows))
    }

    async fn list_all_markers(&self) -> Result<Vec<MarkerView>, sqlx::Error> {
        let rows: Vec<Marker> = self.markers.lock().unwrap().clone();
        Ok(self.sorted_views(rows))
    }

    async fn update_marker(
        &self,
        id: Uuid,
        req: &AdminUpdateMarkerRequest,
    ) -> Result<Option<Marker>, sqlx::Error> {
        let mut markers = self.markers.lock().unwrap();
        let Some(marker) = markers.iter_mut().find(|m| m.id == id) else {
            return Ok(None);
        };
        if let Some(title) = &req.title {
            marker.title = title.clone();
        }
        if let Some(description) = &req.description {
            marker.description = description.clone();
        }
        if let Some(contact) = &req.contact {
            marker.contact = contact.clone();
        }
        if let Some(marker_type) = &req.marker_type {
            marker.marker_type = marker_type.clone();
        }
        if let Some(visibility) = &req.visibility {
            marker.visibility = visibility.clone();
        }
        if let Some(status) = &req.status {
            marker.status = status.clone();
        }
        Ok(Some(marker.clone()))
    }

    async fn delete_marker(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut markers = self.markers.lock().unwrap();
        let before = markers.len();
        markers.retain(|m| m.id != id);
        Ok(markers.len() < before)
    }

    async fn delete_markers_by_owner(&self, username: &str) -> Result<u64, sqlx::Error> {
        let mut markers = self.markers.lock().unwrap();
        let before = markers.len();
        markers.retain(|m| m.user_username != username);
        Ok((before - markers.len()) as u64)
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<User>, sqlx::Error> {
        Ok(self
            .users
            .lock()
            .unwrap()
            .iter()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user(&self, id: Uuid) -> Result<Option<User>, sqlx::Error> {
        Ok(self.users.lock().unwrap().iter().find(|u| u.id == id).cloned())
    }

    async fn insert_user(&self, user: &User) -> Result<(), sqlx::Error> {
        self.users.lock().unwrap().push(user.clone());
        Ok(())
    }

    async fn update_profile(
        &self,
        username: &str,
        req: &UpdateProfileRequest,
    ) -> Result<bool, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.iter_mut().find(|u| u.username == username) else {
            return Ok(false);
        };
        if let Some(name) = &req.name {
            user.name = name.clone();
        }
        if let Some(contact) = &req.contact {
            user.contact = contact.clone();
        }
        if let Some(bio) = &req.bio {
            user.bio = bio.clone();
        }
        if let Some(gender) = &req.gender {
            user.gender = gender.clone();
        }
        if let Some(age) = req.age {
            user.age = Some(age);
        }
        Ok(true)
    }

    async fn list_users(&self) -> Result<Vec<User>, sqlx::Error> {
        Ok(self.users.lock().unwrap().clone())
    }

    async fn update_user(
        &self,
        id: Uuid,
        req: &AdminUpdateUserRequest,
    ) -> Result<Option<User>, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let Some(user) = users.iter_mut().find(|u| u.id == id) else {
            return Ok(None);
        };
        if let Some(name) = &req.name {
            user.name = name.clone();
        }
        if let Some(contact) = &req.contact {
            user.contact = contact.clone();
        }
        if let Some(role) = &req.role {
            user.role = role.clone();
        }
        Ok(Some(user.clone()))
    }

    async fn delete_user(&self, id: Uuid) -> Result<bool, sqlx::Error> {
        let mut users = self.users.lock().unwrap();
        let before = users.len();
        users.retain(|u| u.id != id);
        Ok(users.len() < before)
    }

    async fn count_admins_excluding(&self, id: Uuid) -> Result<i64, sqlx::Error> {
        let count = self
            .users
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.role == "admin" && u.id != id)
            .count();
        Ok(count as i64)
    }
}

// --- Harness ---

fn june_15_morning() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 15, 10, 30, 0).unwrap()
}

fn setup(
    start: DateTime<Utc>,
) -> (Arc<MarkerLifecycle>, Arc<InMemoryRepository>, Arc<ManualClock>) {
    let repo = Arc::new(InMemoryRepository::default());
    repo.seed_user("alice", "user");
    repo.seed_user("bob", "user");
    let clock = ManualClock::at(start);
    let lifecycle = Arc::new(MarkerLifecycle::new(
        repo.clone() as RepositoryState,
        clock.clone() as ClockState,
    ));
    (lifecycle, repo, clock)
}

fn marker_request(owner: &str, visibility: &str) -> CreateMarkerRequest {
    CreateMarkerRequest {
        title: "Free couch".to_string(),
        description: "Pick up before sunset".to_string(),
        contact: String::new(),
        marker_type: "giveaway".to_string(),
        visibility: visibility.to_string(),
        lat: 52.52,
        lng: 13.405,
        user_username: owner.to_string(),
    }
}

// --- Expiration Computation ---

#[test]
fn today_expires_at_end_of_creation_day_utc() {
    let end_of_day = NaiveDate::from_ymd_opt(2025, 6, 15)
        .unwrap()
        .and_hms_micro_opt(23, 59, 59, 999_999)
        .unwrap()
        .and_utc();

    // Regardless of creation time-of-day, the expiry lands on the same instant.
    for (hour, minute) in [(0, 0), (10, 30), (23, 59)] {
        let created = Utc.with_ymd_and_hms(2025, 6, 15, hour, minute, 0).unwrap();
        assert_eq!(compute_expiration(Visibility::Today, created), end_of_day);
    }
}

#[test]
fn three_days_is_exactly_72_hours() {
    let created = june_15_morning();
    let expires = compute_expiration(Visibility::ThreeDays, created);
    assert_eq!(expires - created, Duration::hours(72));
}

#[test]
fn unknown_visibility_falls_back_to_one_year() {
    let created = june_15_morning();
    let expires = compute_expiration(Visibility::parse("vintage"), created);
    assert_eq!(expires - created, Duration::days(365));
}

// --- Create & Quota ---

#[tokio::test]
async fn create_stamps_clock_time_and_active_status() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "three_days"), "alice")
        .await
        .unwrap();

    assert_eq!(marker.created_at, june_15_morning());
    assert_eq!(marker.expires_at, june_15_morning() + Duration::hours(72));
    assert_eq!(marker.status, MarkerStatus::ACTIVE);
}

#[tokio::test]
async fn fourth_create_hits_the_quota() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    for _ in 0..ACTIVE_MARKER_LIMIT {
        lifecycle
            .create_marker(marker_request("alice", "today"), "alice")
            .await
            .unwrap();
    }

    let err = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::QuotaExceeded));
}

#[tokio::test]
async fn quota_counts_only_active_markers() {
    let (lifecycle, repo, _clock) = setup(june_15_morning());

    let mut ids = Vec::new();
    for _ in 0..ACTIVE_MARKER_LIMIT {
        let marker = lifecycle
            .create_marker(marker_request("alice", "today"), "alice")
            .await
            .unwrap();
        ids.push(marker.id);
    }

    // Deactivating one frees a slot.
    lifecycle
        .set_status(ids[0], "inactive", "alice", false)
        .await
        .unwrap();
    lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    assert_eq!(repo.count_active_markers("alice").await.unwrap(), 3);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_creates_never_exceed_the_quota() {
    let (lifecycle, repo, _clock) = setup(june_15_morning());

    let mut handles = Vec::new();
    for _ in 0..5 {
        let lifecycle = lifecycle.clone();
        handles.push(tokio::spawn(async move {
            lifecycle
                .create_marker(marker_request("alice", "today"), "alice")
                .await
        }));
    }

    let mut successes = 0;
    let mut quota_failures = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(MarkerError::QuotaExceeded) => quota_failures += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(successes, 3);
    assert_eq!(quota_failures, 2);
    assert_eq!(repo.count_active_markers("alice").await.unwrap(), 3);
}

#[tokio::test]
async fn quota_is_per_owner() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    for _ in 0..ACTIVE_MARKER_LIMIT {
        lifecycle
            .create_marker(marker_request("alice", "today"), "alice")
            .await
            .unwrap();
    }

    // Alice being full does not block Bob.
    lifecycle
        .create_marker(marker_request("bob", "today"), "bob")
        .await
        .unwrap();
}

#[tokio::test]
async fn create_rejects_mismatched_owner() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let err = lifecycle
        .create_marker(marker_request("alice", "today"), "bob")
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::Forbidden));
}

#[tokio::test]
async fn create_validates_required_fields_and_ranges() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let mut blank_title = marker_request("alice", "today");
    blank_title.title = "   ".to_string();
    assert!(matches!(
        lifecycle.create_marker(blank_title, "alice").await,
        Err(MarkerError::Validation("title"))
    ));

    let mut bad_lat = marker_request("alice", "today");
    bad_lat.lat = 100.0;
    assert!(matches!(
        lifecycle.create_marker(bad_lat, "alice").await,
        Err(MarkerError::Validation("lat"))
    ));

    let mut bad_lng = marker_request("alice", "today");
    bad_lng.lng = -200.0;
    assert!(matches!(
        lifecycle.create_marker(bad_lng, "alice").await,
        Err(MarkerError::Validation("lng"))
    ));
}

// --- Sweep ---

#[tokio::test]
async fn sweep_deactivates_expired_markers_and_is_idempotent() {
    let (lifecycle, _repo, clock) = setup(june_15_morning());

    lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();
    lifecycle
        .create_marker(marker_request("alice", "three_days"), "alice")
        .await
        .unwrap();

    // Step past the end of the day: only the 'today' marker has lapsed.
    clock.advance(Duration::hours(14));
    assert_eq!(lifecycle.sweep_expired().await.unwrap(), 1);

    // Second run in immediate succession finds nothing left.
    assert_eq!(lifecycle.sweep_expired().await.unwrap(), 0);

    let feed = lifecycle.public_feed().await.unwrap();
    assert_eq!(feed.len(), 1);
    assert_eq!(feed[0].visibility, "three_days");
}

#[tokio::test]
async fn feed_excludes_expired_markers_even_before_a_sweep() {
    let (lifecycle, repo, clock) = setup(june_15_morning());

    lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    // One second past expiry, sweep not yet run: the stored status is still
    // 'active' but the feed must not show it.
    clock.set(
        NaiveDate::from_ymd_opt(2025, 6, 16)
            .unwrap()
            .and_hms_opt(0, 0, 1)
            .unwrap()
            .and_utc(),
    );
    assert!(lifecycle.public_feed().await.unwrap().is_empty());
    assert_eq!(repo.count_active_markers("alice").await.unwrap(), 1);

    // The sweep then converges the stored state.
    assert_eq!(lifecycle.sweep_expired().await.unwrap(), 1);
    assert_eq!(repo.count_active_markers("alice").await.unwrap(), 0);
}

#[tokio::test]
async fn owner_view_shows_inactive_and_expired_markers() {
    let (lifecycle, _repo, clock) = setup(june_15_morning());

    lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();
    clock.advance(Duration::days(2));
    lifecycle.sweep_expired().await.unwrap();

    let mine = lifecycle.owner_markers("alice", "alice").await.unwrap();
    assert_eq!(mine.len(), 1);
    assert_eq!(mine[0].status, MarkerStatus::INACTIVE);
}

// --- Status Transitions ---

#[tokio::test]
async fn non_owner_cannot_change_status() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    let err = lifecycle
        .set_status(marker.id, "inactive", "bob", false)
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::Forbidden));
}

#[tokio::test]
async fn admin_can_change_anyones_status() {
    let (lifecycle, repo, _clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    lifecycle
        .set_status(marker.id, "inactive", "root", true)
        .await
        .unwrap();
    let stored = repo.get_marker(marker.id).await.unwrap().unwrap();
    assert_eq!(stored.status, MarkerStatus::INACTIVE);
}

#[tokio::test]
async fn status_target_outside_allowed_set_is_rejected() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    let err = lifecycle
        .set_status(marker.id, "archived", "alice", false)
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::InvalidStatus(v) if v == "archived"));
}

#[tokio::test]
async fn status_change_on_unknown_marker_is_not_found() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let err = lifecycle
        .set_status(Uuid::new_v4(), "inactive", "alice", false)
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::NotFound));
}

#[tokio::test]
async fn reactivated_expired_marker_is_swept_again() {
    let (lifecycle, repo, clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    clock.advance(Duration::days(1));
    lifecycle.sweep_expired().await.unwrap();

    // Reactivation keeps the original expiration.
    lifecycle
        .set_status(marker.id, "active", "alice", false)
        .await
        .unwrap();
    let stored = repo.get_marker(marker.id).await.unwrap().unwrap();
    assert_eq!(stored.expires_at, marker.expires_at);

    // Still expired, so it never reaches the feed and the next sweep takes
    // it right back down.
    assert!(lifecycle.public_feed().await.unwrap().is_empty());
    assert_eq!(lifecycle.sweep_expired().await.unwrap(), 1);
}

// --- Moderation & Cascade ---

#[tokio::test]
async fn moderation_edit_never_touches_expiration() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    let updated = lifecycle
        .moderate_marker(
            marker.id,
            AdminUpdateMarkerRequest {
                title: Some("Cleaned-up title".to_string()),
                visibility: Some("three_days".to_string()),
                ..AdminUpdateMarkerRequest::default()
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.title, "Cleaned-up title");
    assert_eq!(updated.visibility, "three_days");
    assert_eq!(updated.expires_at, marker.expires_at);
}

#[tokio::test]
async fn moderation_rejects_invalid_status_value() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let marker = lifecycle
        .create_marker(marker_request("alice", "today"), "alice")
        .await
        .unwrap();

    let err = lifecycle
        .moderate_marker(
            marker.id,
            AdminUpdateMarkerRequest {
                status: Some("hidden".to_string()),
                ..AdminUpdateMarkerRequest::default()
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, MarkerError::InvalidStatus(_)));
}

#[tokio::test]
async fn deleting_a_user_cascades_to_their_markers() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    for _ in 0..2 {
        lifecycle
            .create_marker(marker_request("alice", "today"), "alice")
            .await
            .unwrap();
    }
    lifecycle
        .create_marker(marker_request("bob", "today"), "bob")
        .await
        .unwrap();

    assert_eq!(lifecycle.purge_owner("alice").await.unwrap(), 2);
    assert!(lifecycle.owner_markers("alice", "alice").await.unwrap().is_empty());

    // Bob's marker survives the cascade.
    assert_eq!(lifecycle.owner_markers("bob", "bob").await.unwrap().len(), 1);
}

#[tokio::test]
async fn delete_marker_reports_not_found_for_unknown_id() {
    let (lifecycle, _repo, _clock) = setup(june_15_morning());

    let err = lifecycle.delete_marker(Uuid::new_v4()).await.unwrap_err();
    assert!(matches!(err, MarkerError::NotFound));
}
