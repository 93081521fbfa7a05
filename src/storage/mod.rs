//! Persistent fight record and boss storage using sled embedded database.
//!
//! Fight records are append-only and content-addressed: the key is
//! `boss_id \0 sha256(record)`, so saving the same record twice is a no-op
//! and nothing is ever overwritten.

pub mod memory;

use async_trait::async_trait;
use sled::{Db, Tree};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::crypto::content_id;
use crate::health::AggregationInputError;
use crate::types::{BossProfile, FightRecord, NewBoss, BOSS_IMAGES};

pub use memory::MemoryStore;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Boss not found: {0}")]
    BossNotFound(String),
    #[error("Invalid boss: {0}")]
    InvalidBoss(String),
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Append-only store of fight records, queried by boss.
#[async_trait]
pub trait FightRecordStore: Send + Sync {
    /// Persist a finalized record. Not retried here.
    async fn save(&self, record: &FightRecord) -> Result<(), StorageError>;

    /// All records for `boss_id`, in no particular order.
    async fn query(&self, boss_id: &str) -> Result<Vec<FightRecord>, StorageError>;
}

/// Boss metadata provider.
#[async_trait]
pub trait BossDirectory: Send + Sync {
    async fn register(&self, boss: NewBoss) -> Result<BossProfile, StorageError>;

    async fn profile(&self, boss_id: &str) -> Result<Option<BossProfile>, StorageError>;

    async fn list(&self) -> Result<Vec<BossProfile>, StorageError>;

    async fn max_health_grams(&self, boss_id: &str) -> Result<Option<f64>, StorageError> {
        Ok(self.profile(boss_id).await?.map(|p| p.max_health_grams))
    }
}

/// Persistent storage for bosses and their fights
pub struct Storage {
    db: Db,
    fights: Tree,
    bosses: Tree,
    metadata: Tree,
}

impl Storage {
    /// Open or create storage at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let fights = db.open_tree("fights")?;
        let bosses = db.open_tree("bosses")?;
        let metadata = db.open_tree("metadata")?;

        info!("💾 Storage opened ({} fights, {} bosses)", fights.len(), bosses.len());

        Ok(Self { db, fights, bosses, metadata })
    }

    /// Flush to disk
    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    fn next_boss_id(&self) -> Result<u64, StorageError> {
        let next = self.metadata.update_and_fetch("next_boss_id", increment)?;
        let count = next
            .and_then(|bytes| <[u8; 8]>::try_from(bytes.as_ref()).ok())
            .map(u64::from_be_bytes)
            .unwrap_or(1);
        Ok(count - 1)
    }
}

#[async_trait]
impl FightRecordStore for Storage {
    async fn save(&self, record: &FightRecord) -> Result<(), StorageError> {
        let id = content_id(record)?;
        let key = fight_key(&record.boss_id, &id);
        let value = serde_json::to_vec(record)?;

        match self.fights.compare_and_swap(key, None::<&[u8]>, Some(value))? {
            Ok(()) => debug!("💾 Fight {}... saved for boss {}", &id[..16], record.boss_id),
            Err(_) => debug!("Fight {}... already stored", &id[..16]),
        }

        self.flush()
    }

    async fn query(&self, boss_id: &str) -> Result<Vec<FightRecord>, StorageError> {
        let mut records = Vec::new();

        for result in self.fights.scan_prefix(fight_prefix(boss_id)) {
            let (key, value) = result?;
            match serde_json::from_slice::<FightRecord>(&value) {
                Ok(record) => records.push(record),
                Err(e) => warn!(
                    "Skipping fight record {}: {}",
                    String::from_utf8_lossy(&key),
                    AggregationInputError::Undecodable(e.to_string())
                ),
            }
        }

        Ok(records)
    }
}

#[async_trait]
impl BossDirectory for Storage {
    async fn register(&self, boss: NewBoss) -> Result<BossProfile, StorageError> {
        let profile = build_profile(self.next_boss_id()?.to_string(), boss)?;
        self.bosses.insert(profile.id.as_bytes(), serde_json::to_vec(&profile)?)?;
        self.flush()?;

        info!("👾 Boss #{} registered: {} ({} g)", profile.id, profile.name, profile.max_health_grams);
        Ok(profile)
    }

    async fn profile(&self, boss_id: &str) -> Result<Option<BossProfile>, StorageError> {
        match self.bosses.get(boss_id.as_bytes())? {
            Some(value) => Ok(Some(serde_json::from_slice(&value)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<BossProfile>, StorageError> {
        let mut bosses = Vec::new();
        for result in self.bosses.iter() {
            let (_, value) = result?;
            let profile: BossProfile = serde_json::from_slice(&value)?;
            bosses.push(profile);
        }

        sort_by_id(&mut bosses);
        Ok(bosses)
    }
}

/// Validate a registration request and assign it `id`.
pub(crate) fn build_profile(id: String, boss: NewBoss) -> Result<BossProfile, StorageError> {
    let name = boss.name.trim();
    let location = boss.location.trim();
    if name.is_empty() {
        return Err(StorageError::InvalidBoss("name is required".into()));
    }
    if location.is_empty() {
        return Err(StorageError::InvalidBoss("location is required".into()));
    }
    if !BOSS_IMAGES.contains(&boss.image.as_str()) {
        return Err(StorageError::InvalidBoss(format!("unknown image '{}'", boss.image)));
    }

    let max_health_grams = match (boss.health_grams, boss.difficulty) {
        (Some(health), _) => health,
        (None, Some(difficulty)) => difficulty.health_grams(),
        (None, None) => return Err(StorageError::InvalidBoss("health or difficulty is required".into())),
    };
    if !max_health_grams.is_finite() || max_health_grams <= 0.0 {
        return Err(StorageError::InvalidBoss(format!("health must be positive, got {}", max_health_grams)));
    }

    Ok(BossProfile {
        id,
        name: name.to_string(),
        location: location.to_string(),
        image: boss.image,
        max_health_grams,
    })
}

/// Numeric ids sort numerically, anything else after them lexically.
pub(crate) fn sort_by_id(bosses: &mut [BossProfile]) {
    bosses.sort_by(|a, b| {
        match (a.id.parse::<u64>(), b.id.parse::<u64>()) {
            (Ok(x), Ok(y)) => x.cmp(&y),
            (Ok(_), Err(_)) => std::cmp::Ordering::Less,
            (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
            (Err(_), Err(_)) => a.id.cmp(&b.id),
        }
    });
}

fn fight_prefix(boss_id: &str) -> Vec<u8> {
    let mut prefix = boss_id.as_bytes().to_vec();
    prefix.push(0);
    prefix
}

fn fight_key(boss_id: &str, content_id: &str) -> Vec<u8> {
    let mut key = fight_prefix(boss_id);
    key.extend_from_slice(content_id.as_bytes());
    key
}

fn increment(old: Option<&[u8]>) -> Option<Vec<u8>> {
    let number = match old {
        Some(bytes) => {
            let arr: [u8; 8] = bytes.try_into().unwrap_or([0; 8]);
            u64::from_be_bytes(arr) + 1
        }
        None => 1,
    };
    Some(number.to_be_bytes().to_vec())
}
