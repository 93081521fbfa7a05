//! Geolocation providers consumed by the sampler.

use async_trait::async_trait;
use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::types::Position;

/// A single failed position read. Non-fatal: the next tick is the retry.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SamplingError {
    #[error("Location permission denied")]
    PermissionDenied,
    #[error("Position request timed out")]
    Timeout,
    #[error("Position signal lost")]
    SignalLost,
    #[error("Provider returned an invalid fix ({0}, {1})")]
    InvalidFix(f64, f64),
    #[error("Provider error: {0}")]
    Provider(String),
}

/// Source of the device's current position
#[async_trait]
pub trait GeolocationProvider: Send + Sync {
    async fn current_position(&self) -> Result<Position, SamplingError>;
}

/// Serves the latest fix pushed by a device.
pub struct ReportedPositionProvider {
    latest: RwLock<Option<Position>>,
    max_fix_age: Duration,
}

impl ReportedPositionProvider {
    pub fn new(max_fix_age: Duration) -> Self {
        Self {
            latest: RwLock::new(None),
            max_fix_age,
        }
    }

    /// Record a fix from the device. Rejects out-of-range coordinates.
    pub async fn report(&self, position: Position) -> Result<(), SamplingError> {
        if !position.is_valid() {
            return Err(SamplingError::InvalidFix(position.latitude, position.longitude));
        }
        debug!("📍 Fix reported: {:.5}, {:.5}", position.latitude, position.longitude);
        *self.latest.write().await = Some(position);
        Ok(())
    }
}

#[async_trait]
impl GeolocationProvider for ReportedPositionProvider {
    async fn current_position(&self) -> Result<Position, SamplingError> {
        let latest = *self.latest.read().await;
        let position = latest.ok_or(SamplingError::SignalLost)?;

        let age = Utc::now()
            .signed_duration_since(position.captured_at)
            .to_std()
            .unwrap_or_default();
        if age > self.max_fix_age {
            return Err(SamplingError::Timeout);
        }

        Ok(position)
    }
}

/// Random walk from a start point, for running without a device.
pub struct SimulatedProvider {
    state: Mutex<Walk>,
    step_km: f64,
    failure_rate: f64,
}

struct Walk {
    position: Position,
    heading: f64,
    rng: StdRng,
}

impl SimulatedProvider {
    /// `step_km` is the mean distance covered between two requests;
    /// `failure_rate` the chance a request reports signal loss.
    pub fn new(start: Position, step_km: f64, failure_rate: f64, seed: u64) -> Self {
        Self {
            state: Mutex::new(Walk {
                position: start,
                heading: 0.0,
                rng: StdRng::seed_from_u64(seed),
            }),
            step_km,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl GeolocationProvider for SimulatedProvider {
    async fn current_position(&self) -> Result<Position, SamplingError> {
        let mut walk = self.state.lock().await;

        if walk.rng.gen_bool(self.failure_rate) {
            return Err(SamplingError::SignalLost);
        }

        // Mostly straight ahead with some drift, like a walk or a ride
        let turn: f64 = walk.rng.gen_range(-0.5..0.5);
        walk.heading = (walk.heading + turn).rem_euclid(std::f64::consts::TAU);
        let step = self.step_km * walk.rng.gen_range(0.5..1.5);

        let north_km = step * walk.heading.cos();
        let east_km = step * walk.heading.sin();
        let lat = walk.position.latitude + north_km / KM_PER_DEGREE;
        let lon_scale = (KM_PER_DEGREE * lat.to_radians().cos()).max(1e-6);
        let lon = walk.position.longitude + east_km / lon_scale;

        walk.position = Position::new(lat.clamp(-90.0, 90.0), wrap_longitude(lon));
        Ok(walk.position)
    }
}

const KM_PER_DEGREE: f64 = 111.32;

fn wrap_longitude(lon: f64) -> f64 {
    (lon + 180.0).rem_euclid(360.0) - 180.0
}
