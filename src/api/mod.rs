//! HTTP API for the Boss Fight node.
//! Endpoints for devices to track fights and query boss health.

pub mod events;
pub mod websocket;

use axum::{
    extract::{Json, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::health::{fetch_boss_health, fighters};
use crate::storage::{BossDirectory, FightRecordStore, StorageError};
use crate::tracking::provider::ReportedPositionProvider;
use crate::tracking::{StartOutcome, StopOutcome, Tracker, TrackingError};
use crate::types::{BossHealthState, BossProfile, NewBoss, Position};
use events::EventLog;

/// Shared application state
pub type AppState = Arc<NodeState>;

pub struct NodeState {
    pub tracker: Arc<Tracker>,
    pub store: Arc<dyn FightRecordStore>,
    pub bosses: Arc<dyn BossDirectory>,
    /// Absent when positions are simulated
    pub positions: Option<Arc<ReportedPositionProvider>>,
    pub events: EventLog,
}

/// API response wrapper
#[derive(Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }
}

impl ApiResponse<()> {
    pub fn err(msg: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(msg.into()) }
    }
}

fn ok<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(ApiResponse::ok(data))).into_response()
}

fn fail(status: StatusCode, msg: impl Into<String>) -> Response {
    (status, Json(ApiResponse::<()>::err(msg))).into_response()
}

fn storage_failure(e: StorageError) -> Response {
    match e {
        StorageError::InvalidBoss(_) => fail(StatusCode::BAD_REQUEST, e.to_string()),
        StorageError::BossNotFound(_) => fail(StatusCode::NOT_FOUND, e.to_string()),
        _ => {
            error!("Storage failure: {}", e);
            fail(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

/// Create the API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        // Bosses
        .route("/bosses", get(list_bosses).post(create_boss))
        .route("/bosses/:id", get(get_boss))
        .route("/bosses/:id/fights", get(get_fights))
        .route("/bosses/:id/fighters", get(get_fighters))
        // Tracking session
        .route("/session", get(get_session))
        .route("/session/start", post(start_session))
        .route("/session/stop", post(stop_session))
        .route("/position", post(report_position))
        // Activity
        .route("/events", get(get_events))
        .route("/ws", get(websocket::ws_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint
async fn health_check() -> impl IntoResponse {
    Json(ApiResponse::ok("Boss fight node is alive"))
}

#[derive(Serialize)]
struct BossView {
    profile: BossProfile,
    health: BossHealthState,
}

async fn create_boss(State(state): State<AppState>, Json(boss): Json<NewBoss>) -> Response {
    match state.bosses.register(boss).await {
        Ok(profile) => (StatusCode::CREATED, Json(ApiResponse::ok(profile))).into_response(),
        Err(e) => storage_failure(e),
    }
}

async fn list_bosses(State(state): State<AppState>) -> Response {
    let profiles = match state.bosses.list().await {
        Ok(profiles) => profiles,
        Err(e) => return storage_failure(e),
    };

    let mut views = Vec::with_capacity(profiles.len());
    for profile in profiles {
        match fetch_boss_health(state.bosses.as_ref(), state.store.as_ref(), &profile.id).await {
            Ok(Some((profile, health))) => views.push(BossView { profile, health }),
            Ok(None) => {}
            Err(e) => return storage_failure(e),
        }
    }
    ok(views)
}

async fn get_boss(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match fetch_boss_health(state.bosses.as_ref(), state.store.as_ref(), &id).await {
        Ok(Some((profile, health))) => ok(BossView { profile, health }),
        Ok(None) => storage_failure(StorageError::BossNotFound(id)),
        Err(e) => storage_failure(e),
    }
}

async fn get_fights(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.bosses.profile(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return storage_failure(StorageError::BossNotFound(id)),
        Err(e) => return storage_failure(e),
    }

    match state.store.query(&id).await {
        Ok(mut records) => {
            records.sort_by(|a, b| b.occurred_at.cmp(&a.occurred_at));
            ok(records)
        }
        Err(e) => storage_failure(e),
    }
}

async fn get_fighters(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    match state.bosses.profile(&id).await {
        Ok(Some(_)) => {}
        Ok(None) => return storage_failure(StorageError::BossNotFound(id)),
        Err(e) => return storage_failure(e),
    }

    match state.store.query(&id).await {
        Ok(records) => ok(fighters(&id, &records)),
        Err(e) => storage_failure(e),
    }
}

async fn get_session(State(state): State<AppState>) -> Response {
    ok(state.tracker.snapshot())
}

#[derive(Deserialize)]
struct StartRequest {
    boss_id: String,
    account: String,
}

async fn start_session(State(state): State<AppState>, Json(req): Json<StartRequest>) -> Response {
    match state.tracker.start(&req.boss_id, &req.account).await {
        Ok(StartOutcome::Started) => ok(state.tracker.snapshot()),
        Ok(StartOutcome::AlreadyActive) => fail(StatusCode::CONFLICT, "A session is already active"),
        Err(e) => tracking_failure(e),
    }
}

async fn stop_session(State(state): State<AppState>) -> Response {
    #[derive(Serialize)]
    struct StopResponse {
        recorded: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        record: Option<crate::types::FightRecord>,
    }

    match state.tracker.stop().await {
        Ok(StopOutcome::Recorded(record)) => ok(StopResponse { recorded: true, record: Some(record) }),
        Ok(StopOutcome::NothingToRecord) => ok(StopResponse { recorded: false, record: None }),
        Ok(StopOutcome::NotTracking) => fail(StatusCode::CONFLICT, "No session is tracking"),
        Err(e) => tracking_failure(e),
    }
}

fn tracking_failure(e: TrackingError) -> Response {
    let status = match &e {
        TrackingError::InvalidAccount(_) => StatusCode::BAD_REQUEST,
        TrackingError::UnknownBoss(_) => StatusCode::NOT_FOUND,
        TrackingError::BossDefeated(_) => StatusCode::CONFLICT,
        TrackingError::Persistence(_) => StatusCode::SERVICE_UNAVAILABLE,
        TrackingError::Storage(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    fail(status, e.to_string())
}

#[derive(Deserialize)]
struct PositionReport {
    latitude: f64,
    longitude: f64,
}

async fn report_position(State(state): State<AppState>, Json(fix): Json<PositionReport>) -> Response {
    let Some(positions) = &state.positions else {
        return fail(StatusCode::CONFLICT, "Positions are simulated on this node");
    };

    match positions.report(Position::new(fix.latitude, fix.longitude)).await {
        Ok(()) => ok("Position accepted"),
        Err(e) => fail(StatusCode::BAD_REQUEST, e.to_string()),
    }
}

#[derive(Deserialize)]
struct EventsQuery {
    #[serde(default = "default_event_limit")]
    limit: usize,
    /// Only events after this instant, oldest first
    since: Option<DateTime<Utc>>,
}

fn default_event_limit() -> usize {
    50
}

async fn get_events(State(state): State<AppState>, Query(query): Query<EventsQuery>) -> Response {
    match query.since {
        Some(cursor) => ok(state.events.after(cursor, query.limit).await),
        None => ok(state.events.latest(query.limit).await),
    }
}

/// Start the API server
pub async fn start_server(state: AppState, addr: &str) -> anyhow::Result<()> {
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("🌐 API server listening on {}", addr);
    axum::serve(listener, router).await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::tracking::TrackingConfig;
    use std::time::Duration;

    async fn state() -> AppState {
        let store = Arc::new(MemoryStore::new());
        let positions = Arc::new(ReportedPositionProvider::new(Duration::from_secs(10)));
        let tracker = Arc::new(Tracker::new(
            TrackingConfig::default(),
            positions.clone(),
            store.clone(),
            store.clone(),
        ));
        Arc::new(NodeState {
            tracker,
            store: store.clone(),
            bosses: store,
            positions: Some(positions),
            events: EventLog::new(),
        })
    }

    fn new_boss() -> NewBoss {
        NewBoss {
            name: "Smog".into(),
            location: "Paris".into(),
            image: "one".into(),
            difficulty: None,
            health_grams: Some(1000.0),
        }
    }

    #[tokio::test]
    async fn test_unknown_boss_is_not_found() {
        let state = state().await;
        let resp = get_boss(State(state.clone()), Path("4".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = get_fights(State(state), Path("4".into())).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_create_and_read_boss() {
        let state = state().await;
        let resp = create_boss(State(state.clone()), Json(new_boss())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = get_boss(State(state.clone()), Path("0".into())).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let mut invalid = new_boss();
        invalid.image = "zero".into();
        let resp = create_boss(State(state), Json(invalid)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_session_errors_map_to_statuses() {
        let state = state().await;
        create_boss(State(state.clone()), Json(new_boss())).await;

        let bad_account = StartRequest { boss_id: "0".into(), account: "nope".into() };
        let resp = start_session(State(state.clone()), Json(bad_account)).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = stop_session(State(state.clone())).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = report_position(
            State(state),
            Json(PositionReport { latitude: 200.0, longitude: 0.0 }),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_events_since_cursor() {
        use crate::tracking::TrackerEvent;

        let state = state().await;
        let start = Utc::now();
        for i in 0..3 {
            state
                .events
                .push(TrackerEvent::SampleFailed {
                    timestamp: start + chrono::Duration::seconds(i),
                    reason: "Position signal lost".into(),
                })
                .await;
        }

        let query = EventsQuery { limit: 50, since: Some(start) };
        let resp = get_events(State(state.clone()), Query(query)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(state.events.after(start, 50).await.len(), 2);

        let query: EventsQuery = serde_json::from_str(r#"{"since":"2023-09-01T12:00:00Z"}"#).unwrap();
        assert_eq!(query.limit, 50);
        assert!(query.since.is_some());
    }
}
