//! In-process store for simulation runs and tests.

use async_trait::async_trait;
use std::collections::HashSet;
use tokio::sync::RwLock;

use super::{build_profile, sort_by_id, BossDirectory, FightRecordStore, StorageError};
use crate::crypto::content_id;
use crate::types::{BossProfile, FightRecord, NewBoss};

#[derive(Default)]
pub struct MemoryStore {
    fights: RwLock<Fights>,
    bosses: RwLock<Vec<BossProfile>>,
}

#[derive(Default)]
struct Fights {
    ids: HashSet<String>,
    records: Vec<FightRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records across all bosses
    pub async fn len(&self) -> usize {
        self.fights.read().await.records.len()
    }
}

#[async_trait]
impl FightRecordStore for MemoryStore {
    async fn save(&self, record: &FightRecord) -> Result<(), StorageError> {
        let id = content_id(record)?;
        let mut fights = self.fights.write().await;
        if fights.ids.insert(id) {
            fights.records.push(record.clone());
        }
        Ok(())
    }

    async fn query(&self, boss_id: &str) -> Result<Vec<FightRecord>, StorageError> {
        let fights = self.fights.read().await;
        Ok(fights.records.iter().filter(|r| r.boss_id == boss_id).cloned().collect())
    }
}

#[async_trait]
impl BossDirectory for MemoryStore {
    async fn register(&self, boss: NewBoss) -> Result<BossProfile, StorageError> {
        let mut bosses = self.bosses.write().await;
        let profile = build_profile(bosses.len().to_string(), boss)?;
        bosses.push(profile.clone());
        Ok(profile)
    }

    async fn profile(&self, boss_id: &str) -> Result<Option<BossProfile>, StorageError> {
        Ok(self.bosses.read().await.iter().find(|b| b.id == boss_id).cloned())
    }

    async fn list(&self) -> Result<Vec<BossProfile>, StorageError> {
        let mut bosses = self.bosses.read().await.clone();
        sort_by_id(&mut bosses);
        Ok(bosses)
    }
}
