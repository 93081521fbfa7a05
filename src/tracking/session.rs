//! The tracking session state machine.
//!
//! ```text
//!  Idle --start--> Tracking --stop--> Finalizing --saveSucceeded/saveFailed--> Idle
//!                   |    ^             (distance > 0)
//!         sample,   |    |
//!         sampleErr +----+   Tracking --stop (distance == 0)--> Idle
//! ```
//!
//! `apply` is total over (state, event): any combination not drawn above is
//! ignored and leaves the session untouched. Samples carry the ticket of
//! the sampler that produced them and are dropped unless it is the
//! session's current ticket.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::provider::SamplingError;
use crate::geo::DistanceAccumulator;
use crate::types::{FightRecord, Position};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Idle,
    Tracking,
    Finalizing,
}

/// Who is fighting which boss
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FightTarget {
    pub boss_id: String,
    pub account: String,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Start {
        target: FightTarget,
        ticket: u64,
        at: DateTime<Utc>,
    },
    Sample {
        ticket: u64,
        position: Position,
    },
    SampleError {
        ticket: u64,
        error: SamplingError,
    },
    Stop {
        at: DateTime<Utc>,
    },
    SaveSucceeded,
    SaveFailed,
}

/// What an event did to the session
#[derive(Debug, Clone, PartialEq)]
pub enum Transition {
    Started,
    Sampled {
        increment_km: f64,
        distance_km: f64,
        co2_grams: f64,
    },
    SampleFailed(SamplingError),
    /// Stopped with distance; the record must now be saved
    Finalizing(FightRecord),
    /// Stopped without any distance; nothing to record
    Discarded,
    Saved(FightRecord),
    /// Save failed; the accumulated distance is dropped
    Dropped(FightRecord),
    Ignored,
}

/// Read-only view for callers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub target: Option<FightTarget>,
    pub started_at: Option<DateTime<Utc>>,
    pub distance_km: f64,
    pub co2_grams: f64,
    pub samples: u32,
    pub sample_errors: u32,
    pub last_position: Option<Position>,
}

#[derive(Debug, Clone)]
pub struct TrackingSession {
    state: SessionState,
    cumulative_distance_km: f64,
    last_position: Option<Position>,
    target: Option<FightTarget>,
    ticket: Option<u64>,
    started_at: Option<DateTime<Utc>>,
    pending: Option<FightRecord>,
    samples: u32,
    sample_errors: u32,
    accumulator: DistanceAccumulator,
    co2_per_km: f64,
}

impl TrackingSession {
    pub fn new(accumulator: DistanceAccumulator, co2_per_km: f64) -> Self {
        Self {
            state: SessionState::Idle,
            cumulative_distance_km: 0.0,
            last_position: None,
            target: None,
            ticket: None,
            started_at: None,
            pending: None,
            samples: 0,
            sample_errors: 0,
            accumulator,
            co2_per_km,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn cumulative_distance_km(&self) -> f64 {
        self.cumulative_distance_km
    }

    pub fn last_position(&self) -> Option<&Position> {
        self.last_position.as_ref()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            target: self.target.clone(),
            started_at: self.started_at,
            distance_km: self.cumulative_distance_km,
            co2_grams: self.cumulative_distance_km * self.co2_per_km,
            samples: self.samples,
            sample_errors: self.sample_errors,
            last_position: self.last_position,
        }
    }

    pub fn apply(&mut self, event: SessionEvent) -> Transition {
        use SessionEvent as E;
        use SessionState as S;

        match (self.state, event) {
            (S::Idle, E::Start { target, ticket, at }) => {
                self.reset();
                debug!("Session started for boss {} by {}", target.boss_id, target.account);
                self.state = S::Tracking;
                self.target = Some(target);
                self.ticket = Some(ticket);
                self.started_at = Some(at);
                Transition::Started
            }

            (S::Tracking, E::Sample { ticket, position }) if self.ticket == Some(ticket) => {
                let step = self.accumulator.accumulate(self.last_position.as_ref(), position);
                self.cumulative_distance_km += step.increment_km;
                self.last_position = Some(step.updated_previous);
                self.samples += 1;
                Transition::Sampled {
                    increment_km: step.increment_km,
                    distance_km: self.cumulative_distance_km,
                    co2_grams: self.cumulative_distance_km * self.co2_per_km,
                }
            }

            (S::Tracking, E::SampleError { ticket, error }) if self.ticket == Some(ticket) => {
                self.sample_errors += 1;
                Transition::SampleFailed(error)
            }

            (S::Tracking, E::Stop { at }) => {
                self.ticket = None;
                let Some(target) = self.target.clone() else {
                    self.reset();
                    return Transition::Discarded;
                };

                let record = FightRecord::finalize(
                    &target.account,
                    &target.boss_id,
                    self.cumulative_distance_km,
                    self.co2_per_km,
                    at,
                );

                // Judged on the stored (rounded) distance
                if record.distance_km > 0.0 {
                    self.state = S::Finalizing;
                    self.pending = Some(record.clone());
                    Transition::Finalizing(record)
                } else {
                    debug!(
                        "Session for boss {} stopped with {:.4} km, nothing to record",
                        target.boss_id, self.cumulative_distance_km
                    );
                    self.reset();
                    Transition::Discarded
                }
            }

            (S::Finalizing, E::SaveSucceeded) => match self.pending.take() {
                Some(record) => {
                    self.reset();
                    Transition::Saved(record)
                }
                None => {
                    self.reset();
                    Transition::Ignored
                }
            },

            (S::Finalizing, E::SaveFailed) => match self.pending.take() {
                Some(record) => {
                    self.reset();
                    Transition::Dropped(record)
                }
                None => {
                    self.reset();
                    Transition::Ignored
                }
            },

            (state, event) => {
                debug!("Ignoring {} while {:?}", event_name(&event), state);
                Transition::Ignored
            }
        }
    }

    fn reset(&mut self) {
        self.state = SessionState::Idle;
        self.cumulative_distance_km = 0.0;
        self.last_position = None;
        self.target = None;
        self.ticket = None;
        self.started_at = None;
        self.pending = None;
        self.samples = 0;
        self.sample_errors = 0;
    }
}

fn event_name(event: &SessionEvent) -> &'static str {
    match event {
        SessionEvent::Start { .. } => "start",
        SessionEvent::Sample { .. } => "sample",
        SessionEvent::SampleError { .. } => "sample_error",
        SessionEvent::Stop { .. } => "stop",
        SessionEvent::SaveSucceeded => "save_succeeded",
        SessionEvent::SaveFailed => "save_failed",
    }
}
