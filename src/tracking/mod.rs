//! Movement tracking: turns periodic position fixes into damage against a
//! boss and records the finished fight.

pub mod provider;
pub mod sampler;
pub mod session;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::geo::{DistanceAccumulator, DistanceMode};
use crate::health;
use crate::storage::{BossDirectory, FightRecordStore, StorageError};
use crate::types::{normalize_account, FightRecord, CO2_G_PER_KM};
use provider::{GeolocationProvider, SamplingError};
use sampler::{GeoSampler, SamplerHandle};
use session::{FightTarget, SessionEvent, SessionSnapshot, SessionState, TrackingSession, Transition};

/// The finished fight could not be saved. The session is reset and the
/// distance is lost; the fighter has to track again.
#[derive(Error, Debug)]
#[error("Damage was not recorded: {0}")]
pub struct PersistenceError(#[from] pub StorageError);

#[derive(Error, Debug)]
pub enum TrackingError {
    #[error("Invalid account address: {0}")]
    InvalidAccount(String),
    #[error("Unknown boss: {0}")]
    UnknownBoss(String),
    #[error("Boss {0} is already defeated")]
    BossDefeated(String),
    #[error(transparent)]
    Persistence(#[from] PersistenceError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Configuration for movement tracking
#[derive(Debug, Clone)]
pub struct TrackingConfig {
    /// Position request interval in milliseconds
    pub sample_interval_ms: u64,
    /// CO2 grams credited per km travelled
    pub co2_grams_per_km: f64,
    pub distance_mode: DistanceMode,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            sample_interval_ms: 3000,
            co2_grams_per_km: CO2_G_PER_KM,
            distance_mode: DistanceMode::Haversine,
        }
    }
}

impl TrackingConfig {
    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms.max(1))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum StartOutcome {
    Started,
    /// A session is already running or finalizing; nothing changed
    AlreadyActive,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Recorded(FightRecord),
    /// Stopped without any distance, so no record was created
    NothingToRecord,
    /// No session was tracking; nothing changed
    NotTracking,
}

/// Session activity, broadcast to subscribers
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TrackerEvent {
    SessionStarted {
        timestamp: DateTime<Utc>,
        boss_id: String,
        account: String,
    },
    Sampled {
        timestamp: DateTime<Utc>,
        increment_km: f64,
        distance_km: f64,
        co2_grams: f64,
    },
    SampleFailed {
        timestamp: DateTime<Utc>,
        reason: String,
    },
    FightRecorded {
        timestamp: DateTime<Utc>,
        record: FightRecord,
    },
    FightNotRecorded {
        timestamp: DateTime<Utc>,
        boss_id: String,
        reason: String,
    },
    SessionDiscarded {
        timestamp: DateTime<Utc>,
        boss_id: String,
    },
}

impl TrackerEvent {
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            TrackerEvent::SessionStarted { timestamp, .. }
            | TrackerEvent::Sampled { timestamp, .. }
            | TrackerEvent::SampleFailed { timestamp, .. }
            | TrackerEvent::FightRecorded { timestamp, .. }
            | TrackerEvent::FightNotRecorded { timestamp, .. }
            | TrackerEvent::SessionDiscarded { timestamp, .. } => *timestamp,
        }
    }
}

/// Drives one [`TrackingSession`] with a sampler and a record store.
///
/// `start` and `stop` are serialized internally; samples are applied from
/// the sampler task as they arrive.
pub struct Tracker {
    config: TrackingConfig,
    sampler: GeoSampler,
    store: Arc<dyn FightRecordStore>,
    bosses: Arc<dyn BossDirectory>,
    session: Arc<Mutex<TrackingSession>>,
    handle: Mutex<Option<SamplerHandle>>,
    tickets: AtomicU64,
    op: tokio::sync::Mutex<()>,
    events: broadcast::Sender<TrackerEvent>,
}

impl Tracker {
    pub fn new(
        config: TrackingConfig,
        provider: Arc<dyn GeolocationProvider>,
        store: Arc<dyn FightRecordStore>,
        bosses: Arc<dyn BossDirectory>,
    ) -> Self {
        if let DistanceMode::Fixed { increment_km } = config.distance_mode {
            warn!("🧪 Dev distance mode: every sample counts as {} km", increment_km);
        }

        let session = TrackingSession::new(
            DistanceAccumulator::new(config.distance_mode),
            config.co2_grams_per_km,
        );
        let (events, _) = broadcast::channel(256);

        Self {
            config,
            sampler: GeoSampler::new(provider),
            store,
            bosses,
            session: Arc::new(Mutex::new(session)),
            handle: Mutex::new(None),
            tickets: AtomicU64::new(0),
            op: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        lock(&self.session).snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackerEvent> {
        self.events.subscribe()
    }

    /// Begin tracking `account` against `boss_id`. A no-op unless idle.
    pub async fn start(&self, boss_id: &str, account: &str) -> Result<StartOutcome, TrackingError> {
        let _op = self.op.lock().await;

        if lock(&self.session).state() != SessionState::Idle {
            debug!("Start ignored, session already active");
            return Ok(StartOutcome::AlreadyActive);
        }

        let account = normalize_account(account)
            .ok_or_else(|| TrackingError::InvalidAccount(account.to_string()))?;
        let max_health = self
            .bosses
            .max_health_grams(boss_id)
            .await?
            .ok_or_else(|| TrackingError::UnknownBoss(boss_id.to_string()))?;
        let records = self.store.query(boss_id).await?;
        if health::current_health_for(boss_id, max_health, &records) <= 0.0 {
            return Err(TrackingError::BossDefeated(boss_id.to_string()));
        }

        let ticket = self.tickets.fetch_add(1, Ordering::SeqCst) + 1;
        let target = FightTarget { boss_id: boss_id.to_string(), account: account.clone() };
        let transition = lock(&self.session).apply(SessionEvent::Start {
            target,
            ticket,
            at: Utc::now(),
        });
        if transition != Transition::Started {
            return Ok(StartOutcome::AlreadyActive);
        }

        let handle = self.spawn_sampler(ticket);
        if let Some(stale) = lock(&self.handle).replace(handle) {
            stale.cancel();
        }

        info!("🏃 Tracking started: {} vs boss {}", account, boss_id);
        self.emit(TrackerEvent::SessionStarted {
            timestamp: Utc::now(),
            boss_id: boss_id.to_string(),
            account,
        });
        Ok(StartOutcome::Started)
    }

    /// Stop tracking and record the fight. A no-op unless tracking.
    ///
    /// The session always ends in `Idle`, whether the save worked or not.
    pub async fn stop(&self) -> Result<StopOutcome, TrackingError> {
        let _op = self.op.lock().await;

        if lock(&self.session).state() != SessionState::Tracking {
            debug!("Stop ignored, not tracking");
            return Ok(StopOutcome::NotTracking);
        }

        // Close the gate first so no sample lands after finalization
        if let Some(handle) = lock(&self.handle).take() {
            handle.cancel();
        }

        let boss_id = lock(&self.session)
            .snapshot()
            .target
            .map(|t| t.boss_id)
            .unwrap_or_default();
        let transition = lock(&self.session).apply(SessionEvent::Stop { at: Utc::now() });

        let record = match transition {
            Transition::Finalizing(record) => record,
            Transition::Discarded => {
                info!("Tracking stopped for boss {} with no distance, nothing recorded", boss_id);
                self.emit(TrackerEvent::SessionDiscarded { timestamp: Utc::now(), boss_id });
                return Ok(StopOutcome::NothingToRecord);
            }
            _ => return Ok(StopOutcome::NotTracking),
        };

        match self.store.save(&record).await {
            Ok(()) => {
                lock(&self.session).apply(SessionEvent::SaveSucceeded);
                info!(
                    "⚔️ Fight recorded: {} km, {} g CO2 against boss {}",
                    record.distance_km, record.co2_grams, record.boss_id
                );
                self.emit(TrackerEvent::FightRecorded { timestamp: Utc::now(), record: record.clone() });
                Ok(StopOutcome::Recorded(record))
            }
            Err(e) => {
                lock(&self.session).apply(SessionEvent::SaveFailed);
                error!("❌ Failed to record fight against boss {}: {}", record.boss_id, e);
                self.emit(TrackerEvent::FightNotRecorded {
                    timestamp: Utc::now(),
                    boss_id: record.boss_id,
                    reason: e.to_string(),
                });
                Err(PersistenceError(e).into())
            }
        }
    }

    fn spawn_sampler(&self, ticket: u64) -> SamplerHandle {
        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let on_sample = move |position| {
            let transition = lock(&session).apply(SessionEvent::Sample { ticket, position });
            if let Transition::Sampled { increment_km, distance_km, co2_grams } = transition {
                debug!("📍 +{:.4} km (total {:.4} km)", increment_km, distance_km);
                let _ = events.send(TrackerEvent::Sampled {
                    timestamp: Utc::now(),
                    increment_km,
                    distance_km,
                    co2_grams,
                });
            }
        };

        let session = Arc::clone(&self.session);
        let events = self.events.clone();
        let on_error = move |error: SamplingError| {
            let transition = lock(&session).apply(SessionEvent::SampleError { ticket, error });
            if let Transition::SampleFailed(error) = transition {
                warn!("⚠️ Position sample failed: {}", error);
                let _ = events.send(TrackerEvent::SampleFailed {
                    timestamp: Utc::now(),
                    reason: error.to_string(),
                });
            }
        };

        self.sampler.start(self.config.sample_interval(), on_sample, on_error)
    }

    fn emit(&self, event: TrackerEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }
}

/// Lock a std mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{Difficulty, NewBoss, Position};
    use async_trait::async_trait;
    use std::collections::VecDeque;

    const ACCOUNT: &str = "0x00000000000000000000000000000000000000AA";

    /// Replays a fixed script of fixes, then keeps returning the last one.
    struct RouteProvider {
        script: tokio::sync::Mutex<VecDeque<Result<(f64, f64), SamplingError>>>,
        last: tokio::sync::Mutex<(f64, f64)>,
    }

    impl RouteProvider {
        fn new(script: Vec<Result<(f64, f64), SamplingError>>) -> Arc<Self> {
            Arc::new(Self {
                script: tokio::sync::Mutex::new(script.into()),
                last: tokio::sync::Mutex::new((0.0, 0.0)),
            })
        }
    }

    #[async_trait]
    impl GeolocationProvider for RouteProvider {
        async fn current_position(&self) -> Result<Position, SamplingError> {
            let mut last = self.last.lock().await;
            match self.script.lock().await.pop_front() {
                Some(Ok(fix)) => {
                    *last = fix;
                    Ok(Position::new(fix.0, fix.1))
                }
                Some(Err(e)) => Err(e),
                None => Ok(Position::new(last.0, last.1)),
            }
        }
    }

    /// Delegates to a memory store but refuses to save.
    struct BrokenStore(MemoryStore);

    #[async_trait]
    impl FightRecordStore for BrokenStore {
        async fn save(&self, _record: &FightRecord) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("network down".into()))
        }

        async fn query(&self, boss_id: &str) -> Result<Vec<FightRecord>, StorageError> {
            self.0.query(boss_id).await
        }
    }

    async fn directory(health_grams: Option<f64>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .register(NewBoss {
                name: "Smog".into(),
                location: "Paris".into(),
                image: "one".into(),
                difficulty: Some(Difficulty::Easy),
                health_grams,
            })
            .await
            .unwrap();
        store
    }

    fn config(distance_mode: DistanceMode) -> TrackingConfig {
        TrackingConfig { sample_interval_ms: 3000, distance_mode, ..Default::default() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_fight_is_recorded() {
        let store = directory(None).await;
        let provider = RouteProvider::new(vec![
            Ok((48.8566, 2.3522)),
            Ok((48.8570, 2.3530)),
            Ok((48.8580, 2.3550)),
        ]);
        let tracker = Tracker::new(config(DistanceMode::Haversine), provider, store.clone(), store.clone());

        assert_eq!(tracker.start("0", ACCOUNT).await.unwrap(), StartOutcome::Started);
        tokio::time::sleep(Duration::from_millis(9500)).await;

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.state, SessionState::Tracking);
        assert_eq!(snapshot.samples, 3);
        assert!(snapshot.distance_km > 0.0);

        let StopOutcome::Recorded(record) = tracker.stop().await.unwrap() else {
            panic!("expected a recorded fight");
        };
        assert_eq!(record.account, ACCOUNT.to_lowercase());
        assert_eq!(record.boss_id, "0");
        assert!(record.co2_grams > 0.0);

        assert_eq!(tracker.snapshot().state, SessionState::Idle);
        assert_eq!(tracker.snapshot().distance_km, 0.0);
        assert_eq!(store.query("0").await.unwrap(), vec![record]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_samples_after_stop() {
        let store = directory(None).await;
        let provider = RouteProvider::new(vec![Ok((0.0, 0.0)), Ok((0.0, 0.01))]);
        let tracker = Tracker::new(config(DistanceMode::Haversine), provider, store.clone(), store.clone());
        let mut events = tracker.subscribe();

        tracker.start("0", ACCOUNT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(6500)).await;
        tracker.stop().await.unwrap();

        tokio::time::sleep(Duration::from_millis(30_000)).await;
        assert_eq!(tracker.snapshot().samples, 0);

        let mut sampled = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, TrackerEvent::Sampled { .. }) {
                sampled += 1;
            }
        }
        assert_eq!(sampled, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sampling_error_is_not_fatal() {
        let store = directory(None).await;
        let provider = RouteProvider::new(vec![
            Ok((1.0, 1.0)),
            Err(SamplingError::SignalLost),
            Ok((1.0, 1.0)),
        ]);
        let tracker = Tracker::new(
            config(DistanceMode::Fixed { increment_km: 0.42 }),
            provider,
            store.clone(),
            store.clone(),
        );

        tracker.start("0", ACCOUNT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(6500)).await;
        let after_error = tracker.snapshot();
        assert_eq!(after_error.state, SessionState::Tracking);
        assert_eq!(after_error.sample_errors, 1);
        assert_eq!(after_error.distance_km, 0.0);

        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(tracker.snapshot().distance_km, 0.42);

        let StopOutcome::Recorded(record) = tracker.stop().await.unwrap() else {
            panic!("expected a recorded fight");
        };
        assert_eq!(record.distance_km, 0.42);
        assert_eq!(record.co2_grams, 80.64);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_distance_stop_records_nothing() {
        let store = directory(None).await;
        let provider = RouteProvider::new(vec![]);
        let tracker = Tracker::new(config(DistanceMode::Haversine), provider, store.clone(), store.clone());

        tracker.start("0", ACCOUNT).await.unwrap();
        assert_eq!(tracker.stop().await.unwrap(), StopOutcome::NothingToRecord);
        assert_eq!(store.len().await, 0);
        assert_eq!(tracker.snapshot().state, SessionState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_save_resets_session() {
        let bosses = directory(None).await;
        let store = Arc::new(BrokenStore(MemoryStore::new()));
        let provider = RouteProvider::new(vec![]);
        let tracker = Tracker::new(
            config(DistanceMode::Fixed { increment_km: 1.0 }),
            provider,
            store,
            bosses,
        );

        tracker.start("0", ACCOUNT).await.unwrap();
        tokio::time::sleep(Duration::from_millis(6500)).await;
        assert_eq!(tracker.snapshot().distance_km, 1.0);

        let err = tracker.stop().await.unwrap_err();
        assert!(matches!(err, TrackingError::Persistence(_)));
        assert!(err.to_string().contains("Damage was not recorded"));

        let snapshot = tracker.snapshot();
        assert_eq!(snapshot.state, SessionState::Idle);
        assert_eq!(snapshot.distance_km, 0.0);

        // A fresh session starts from zero
        tracker.start("0", ACCOUNT).await.unwrap();
        assert_eq!(tracker.snapshot().distance_km, 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_and_stop_are_guarded() {
        let store = directory(None).await;
        let tracker = Tracker::new(
            config(DistanceMode::Haversine),
            RouteProvider::new(vec![]),
            store.clone(),
            store.clone(),
        );

        assert_eq!(tracker.stop().await.unwrap(), StopOutcome::NotTracking);
        assert_eq!(tracker.start("0", ACCOUNT).await.unwrap(), StartOutcome::Started);
        assert_eq!(tracker.start("0", ACCOUNT).await.unwrap(), StartOutcome::AlreadyActive);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_validation() {
        let store = directory(Some(100.0)).await;
        let tracker = Tracker::new(
            config(DistanceMode::Haversine),
            RouteProvider::new(vec![]),
            store.clone(),
            store.clone(),
        );

        assert!(matches!(tracker.start("0", "0x123").await, Err(TrackingError::InvalidAccount(_))));
        assert!(matches!(tracker.start("9", ACCOUNT).await, Err(TrackingError::UnknownBoss(_))));

        store
            .save(&FightRecord::finalize(ACCOUNT, "0", 1.0, CO2_G_PER_KM, Utc::now()))
            .await
            .unwrap();
        assert!(matches!(tracker.start("0", ACCOUNT).await, Err(TrackingError::BossDefeated(_))));
        assert_eq!(tracker.snapshot().state, SessionState::Idle);
    }
}
