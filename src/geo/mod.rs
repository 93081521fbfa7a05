//! Great-circle distance between consecutive position fixes.

use serde::{Deserialize, Serialize};

use crate::types::Position;

/// Mean Earth radius in km
pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Per-sample increment used by the dev distance mode
pub const DEV_INCREMENT_KM: f64 = 0.42;

/// How an increment between two fixes is measured
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DistanceMode {
    /// Haversine distance between the two fixes
    Haversine,
    /// Fixed increment per sample regardless of movement. Only for testing
    /// without real GPS movement.
    Fixed { increment_km: f64 },
}

impl Default for DistanceMode {
    fn default() -> Self {
        DistanceMode::Haversine
    }
}

/// Result of folding one fix into a session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Accumulated {
    /// Always finite and `>= 0`
    pub increment_km: f64,
    pub updated_previous: Position,
}

/// Stateless converter from a pair of fixes to a distance increment.
/// The caller owns the running total and the previous fix.
#[derive(Debug, Clone, Copy, Default)]
pub struct DistanceAccumulator {
    mode: DistanceMode,
}

impl DistanceAccumulator {
    pub fn new(mode: DistanceMode) -> Self {
        Self { mode }
    }

    /// The first fix of a session (`previous == None`) yields no distance.
    pub fn accumulate(&self, previous: Option<&Position>, current: Position) -> Accumulated {
        let increment_km = match previous {
            None => 0.0,
            Some(prev) => match self.mode {
                DistanceMode::Haversine => haversine_km(prev, &current),
                DistanceMode::Fixed { increment_km } => increment_km,
            },
        };

        Accumulated {
            increment_km: sanitize(increment_km),
            updated_previous: current,
        }
    }
}

/// Haversine distance between two fixes (km)
pub fn haversine_km(a: &Position, b: &Position) -> f64 {
    let lat1 = a.latitude.to_radians();
    let lat2 = b.latitude.to_radians();
    let delta_lat = (b.latitude - a.latitude).to_radians();
    let delta_lon = (b.longitude - a.longitude).to_radians();

    let h = (delta_lat / 2.0).sin().powi(2)
        + lat1.cos() * lat2.cos() * (delta_lon / 2.0).sin().powi(2);
    // Rounding can push h just past 1 for antipodal points
    let c = 2.0 * h.clamp(0.0, 1.0).sqrt().asin();

    EARTH_RADIUS_KM * c
}

fn sanitize(km: f64) -> f64 {
    if km.is_finite() && km > 0.0 {
        km
    } else {
        0.0
    }
}
