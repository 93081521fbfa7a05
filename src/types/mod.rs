//! Core data types for the Boss Fight node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::health::AggregationInputError;

/// Grams of CO2 a car would have emitted per km, i.e. the damage dealt per
/// km travelled without one.
pub const CO2_G_PER_KM: f64 = 192.0;

/// Preset boss image keys.
pub const BOSS_IMAGES: [&str; 4] = ["one", "two", "three", "four"];

/// A single fix from the geolocation provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Degrees, WGS84
    pub latitude: f64,
    /// Degrees, WGS84
    pub longitude: f64,
    pub captured_at: DateTime<Utc>,
}

impl Position {
    /// Position captured now
    pub fn new(latitude: f64, longitude: f64) -> Self {
        Self::at(latitude, longitude, Utc::now())
    }

    pub fn at(latitude: f64, longitude: f64, captured_at: DateTime<Utc>) -> Self {
        Self { latitude, longitude, captured_at }
    }

    /// Finite and within the lat/lon ranges.
    pub fn is_valid(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && (-90.0..=90.0).contains(&self.latitude)
            && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// One completed tracking session's contribution against a boss.
/// Immutable once persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FightRecord {
    /// Fighter address (`0x` + 40 lowercase hex digits)
    pub account: String,
    pub boss_id: String,
    pub occurred_at: DateTime<Utc>,
    pub distance_km: f64,
    pub co2_grams: f64,
}

impl FightRecord {
    /// Build the record for a finished session. Distance and CO2 are stored
    /// with two decimals; CO2 is computed from the unrounded distance.
    pub fn finalize(
        account: &str,
        boss_id: &str,
        distance_km: f64,
        co2_per_km: f64,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account: account.to_string(),
            boss_id: boss_id.to_string(),
            occurred_at,
            distance_km: round2(distance_km),
            co2_grams: round2(distance_km * co2_per_km),
        }
    }

    /// Check the fields a fetched record must carry to count against a boss.
    pub fn validate(&self) -> Result<(), AggregationInputError> {
        if self.boss_id.trim().is_empty() {
            return Err(AggregationInputError::EmptyBossId);
        }
        for (field, value) in [("distance_km", self.distance_km), ("co2_grams", self.co2_grams)] {
            if !value.is_finite() {
                return Err(AggregationInputError::NonFinite(field));
            }
            if value < 0.0 {
                return Err(AggregationInputError::Negative(field, value));
            }
        }
        Ok(())
    }
}

/// Preset boss difficulties, in grams of CO2 health
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn health_grams(self) -> f64 {
        match self {
            Difficulty::Easy => 20_000.0,
            Difficulty::Medium => 50_000.0,
            Difficulty::Hard => 100_000.0,
        }
    }
}

/// Boss metadata as registered by its creator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossProfile {
    pub id: String,
    pub name: String,
    /// Where the boss damages the environment
    pub location: String,
    /// One of [`BOSS_IMAGES`]
    pub image: String,
    pub max_health_grams: f64,
}

/// Request to register a boss. Either `difficulty` or `health_grams` sets
/// the health pool; an explicit value wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBoss {
    pub name: String,
    pub location: String,
    #[serde(default = "default_image")]
    pub image: String,
    #[serde(default)]
    pub difficulty: Option<Difficulty>,
    #[serde(default)]
    pub health_grams: Option<f64>,
}

fn default_image() -> String {
    BOSS_IMAGES[0].to_string()
}

/// Derived health of a boss. Never stored, recomputed from its fights.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BossHealthState {
    pub boss_id: String,
    pub max_health_grams: f64,
    /// Always within `[0, max_health_grams]`
    pub current_health_grams: f64,
    pub fights: usize,
    /// Records dropped as malformed
    pub skipped: usize,
    pub total_distance_km: f64,
    pub total_co2_grams: f64,
    pub defeated: bool,
}

/// Normalize an EVM-style address. Returns `None` unless it is `0x`
/// followed by 40 hex digits.
pub fn normalize_account(account: &str) -> Option<String> {
    let digits = account.strip_prefix("0x").or_else(|| account.strip_prefix("0X"))?;
    if digits.len() != 40 || hex::decode(digits).is_err() {
        return None;
    }
    Some(format!("0x{}", digits.to_ascii_lowercase()))
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_rounds_to_two_decimals() {
        let record = FightRecord::finalize("0xabc", "1", 1.23456, CO2_G_PER_KM, Utc::now());
        assert_eq!(record.distance_km, 1.23);
        assert_eq!(record.co2_grams, 237.04);
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let mut record = FightRecord::finalize("0xabc", "1", 1.0, CO2_G_PER_KM, Utc::now());
        assert!(record.validate().is_ok());

        record.co2_grams = f64::NAN;
        assert!(matches!(record.validate(), Err(AggregationInputError::NonFinite("co2_grams"))));

        record.co2_grams = -5.0;
        assert!(matches!(record.validate(), Err(AggregationInputError::Negative("co2_grams", _))));

        record.co2_grams = 5.0;
        record.boss_id = " ".to_string();
        assert!(matches!(record.validate(), Err(AggregationInputError::EmptyBossId)));
    }

    #[test]
    fn test_normalize_account() {
        let upper = "0xABCDEF0123456789ABCDEF0123456789ABCDEF01";
        assert_eq!(
            normalize_account(upper).as_deref(),
            Some("0xabcdef0123456789abcdef0123456789abcdef01")
        );
        assert!(normalize_account("abcdef0123456789abcdef0123456789abcdef01").is_none());
        assert!(normalize_account("0x1234").is_none());
        assert!(normalize_account("0xzzcdef0123456789abcdef0123456789abcdef01").is_none());
    }

    #[test]
    fn test_position_validity() {
        assert!(Position::new(48.8566, 2.3522).is_valid());
        assert!(!Position::new(91.0, 0.0).is_valid());
        assert!(!Position::new(0.0, f64::INFINITY).is_valid());
    }

    #[test]
    fn test_difficulty_presets() {
        assert_eq!(Difficulty::Easy.health_grams(), 20_000.0);
        assert_eq!(Difficulty::Medium.health_grams(), 50_000.0);
        assert_eq!(Difficulty::Hard.health_grams(), 100_000.0);
    }
}
