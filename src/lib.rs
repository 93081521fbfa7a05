//! Boss Fight Node Library
//!
//! Tracks a fighter's movement, converts it into CO2 damage against a
//! boss and derives boss health from the recorded fights.
//!
//! ## Modules
//!
//! - `types` - Core data structures (Position, FightRecord, BossProfile)
//! - `geo` - Distance between consecutive position fixes
//! - `tracking` - Position sampling and the tracking session state machine
//! - `health` - Boss health aggregation over fight records
//! - `storage` - Fight record and boss storage (sled or in-memory)
//! - `crypto` - Content hashing for record ids
//! - `api` - HTTP and WebSocket API for devices

pub mod types;
pub mod geo;
pub mod tracking;
pub mod health;
pub mod storage;
pub mod crypto;
pub mod api;

pub use types::*;
pub use geo::{DistanceAccumulator, DistanceMode};
pub use health::{current_health, AggregationInputError};
pub use storage::{BossDirectory, FightRecordStore, MemoryStore, Storage, StorageError};
pub use tracking::provider::{GeolocationProvider, SamplingError};
pub use tracking::{PersistenceError, Tracker, TrackingConfig};
