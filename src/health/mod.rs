//! Boss health aggregation over the append-only fight record set.
//!
//! Health is never stored. Every read folds the full record set for a boss
//! against its declared maximum:
//!
//! `current = max(0, max_health - Σ co2_grams)`
//!
//! Stores do not guarantee record order, so the floating-point sum may
//! differ in the last bits between stores; the clamp is applied the same
//! way regardless.

use std::collections::BTreeSet;
use thiserror::Error;
use tracing::warn;

use crate::storage::{BossDirectory, FightRecordStore, StorageError};
use crate::types::{BossHealthState, BossProfile, FightRecord};

/// A fetched record that cannot count against a boss. Skipped, never fatal.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AggregationInputError {
    #[error("Record has no boss id")]
    EmptyBossId,
    #[error("Field {0} is not a finite number")]
    NonFinite(&'static str),
    #[error("Field {0} is negative: {1}")]
    Negative(&'static str, f64),
    #[error("Record could not be decoded: {0}")]
    Undecodable(String),
}

/// Current health given records already filtered to one boss.
/// Malformed records are skipped.
pub fn current_health(max_health_grams: f64, records: &[FightRecord]) -> f64 {
    let damage: f64 = valid(records).map(|r| r.co2_grams).sum();
    clamp_health(max_health_grams, damage)
}

/// Current health counting only the records that belong to `boss_id`.
pub fn current_health_for(boss_id: &str, max_health_grams: f64, records: &[FightRecord]) -> f64 {
    let damage: f64 = valid(records)
        .filter(|r| r.boss_id == boss_id)
        .map(|r| r.co2_grams)
        .sum();
    clamp_health(max_health_grams, damage)
}

/// Unique fighter accounts that contributed to a boss, sorted.
pub fn fighters(boss_id: &str, records: &[FightRecord]) -> BTreeSet<String> {
    valid(records)
        .filter(|r| r.boss_id == boss_id)
        .map(|r| r.account.clone())
        .collect()
}

impl BossHealthState {
    /// Fold the records of `boss_id` into its health summary.
    pub fn derive(boss_id: &str, max_health_grams: f64, records: &[FightRecord]) -> Self {
        let mut fights = 0;
        let mut skipped = 0;
        let mut total_distance_km = 0.0;
        let mut total_co2_grams = 0.0;

        for record in records.iter().filter(|r| r.boss_id == boss_id) {
            match record.validate() {
                Ok(()) => {
                    fights += 1;
                    total_distance_km += record.distance_km;
                    total_co2_grams += record.co2_grams;
                }
                Err(e) => {
                    warn!("Skipping fight record by {} for boss {}: {}", record.account, boss_id, e);
                    skipped += 1;
                }
            }
        }

        let current_health_grams = clamp_health(max_health_grams, total_co2_grams);

        Self {
            boss_id: boss_id.to_string(),
            max_health_grams,
            current_health_grams,
            fights,
            skipped,
            total_distance_km,
            total_co2_grams,
            defeated: current_health_grams <= 0.0,
        }
    }
}

/// Load a boss and fold its current fight records. Re-reads the full
/// record set on every call. `None` if the boss is unknown.
pub async fn fetch_boss_health(
    bosses: &dyn BossDirectory,
    store: &dyn FightRecordStore,
    boss_id: &str,
) -> Result<Option<(BossProfile, BossHealthState)>, StorageError> {
    let Some(profile) = bosses.profile(boss_id).await? else {
        return Ok(None);
    };
    let records = store.query(boss_id).await?;
    let state = BossHealthState::derive(boss_id, profile.max_health_grams, &records);
    Ok(Some((profile, state)))
}

fn valid(records: &[FightRecord]) -> impl Iterator<Item = &FightRecord> {
    records.iter().filter(|r| match r.validate() {
        Ok(()) => true,
        Err(e) => {
            warn!("Skipping fight record by {} for boss {}: {}", r.account, r.boss_id, e);
            false
        }
    })
}

fn clamp_health(max_health_grams: f64, damage: f64) -> f64 {
    (max_health_grams - damage).clamp(0.0, max_health_grams.max(0.0))
}
