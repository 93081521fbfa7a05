//! Periodic position sampling with linearizable cancellation.
//!
//! Every tick requests one fix. A request that outlives the interval is
//! reported as [`SamplingError::Timeout`] so it never delays the next tick.
//! Callbacks run while holding the handle's gate, and [`SamplerHandle::cancel`]
//! closes the gate, so once `cancel` returns no callback can fire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::lock;
use super::provider::{GeolocationProvider, SamplingError};
use crate::types::Position;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Polls a [`GeolocationProvider`] on a fixed interval.
#[derive(Clone)]
pub struct GeoSampler {
    provider: Arc<dyn GeolocationProvider>,
}

impl GeoSampler {
    pub fn new(provider: Arc<dyn GeolocationProvider>) -> Self {
        Self { provider }
    }

    /// Start sampling every `interval`. The first request is made one
    /// interval after start. Must be called within a tokio runtime.
    pub fn start<S, E>(&self, interval: Duration, mut on_sample: S, mut on_error: E) -> SamplerHandle
    where
        S: FnMut(Position) + Send + 'static,
        E: FnMut(SamplingError) + Send + 'static,
    {
        let interval = interval.max(Duration::from_millis(1));
        let id = NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed);
        let gate = Arc::new(Mutex::new(true));
        let provider = Arc::clone(&self.provider);
        let task_gate = Arc::clone(&gate);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;

                let outcome = match tokio::time::timeout(interval, provider.current_position()).await {
                    Ok(Ok(position)) if position.is_valid() => Ok(position),
                    Ok(Ok(position)) => Err(SamplingError::InvalidFix(position.latitude, position.longitude)),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(SamplingError::Timeout),
                };

                let open = lock(&task_gate);
                if !*open {
                    break;
                }
                match outcome {
                    Ok(position) => on_sample(position),
                    Err(e) => on_error(e),
                }
            }

            debug!("Sampler #{} stopped", id);
        });

        debug!("Sampler #{} started ({:?} interval)", id, interval);
        SamplerHandle { id, gate, task }
    }
}

/// Cancellation handle for a running sampler. Dropping it cancels.
pub struct SamplerHandle {
    id: u64,
    gate: Arc<Mutex<bool>>,
    task: JoinHandle<()>,
}

impl SamplerHandle {
    pub fn is_active(&self) -> bool {
        *lock(&self.gate)
    }

    /// Stop sampling. No callback fires after this returns; a request
    /// still in flight is discarded. Safe to call repeatedly.
    pub fn cancel(&self) {
        let mut open = lock(&self.gate);
        if *open {
            *open = false;
            debug!("Sampler #{} cancelled", self.id);
        }
        drop(open);
        self.task.abort();
    }
}

impl Drop for SamplerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}
