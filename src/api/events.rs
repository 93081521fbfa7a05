//! Event log for tracking node activity.
//! Ring buffer of recent events for the activity feed.

use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::RwLock;
use tracing::warn;

use crate::tracking::TrackerEvent;

const MAX_EVENTS: usize = 200;

/// Thread-safe event log with ring buffer
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<RwLock<VecDeque<TrackerEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self {
            events: Arc::new(RwLock::new(VecDeque::with_capacity(MAX_EVENTS))),
        }
    }

    /// Push an event to the log
    pub async fn push(&self, event: TrackerEvent) {
        let mut events = self.events.write().await;
        if events.len() >= MAX_EVENTS {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Get the latest N events (newest first)
    pub async fn latest(&self, limit: usize) -> Vec<TrackerEvent> {
        let events = self.events.read().await;
        events.iter().rev().take(limit).cloned().collect()
    }

    /// Events strictly after `cursor`, oldest first, at most `limit`.
    /// Feed the last returned timestamp back in to page forward.
    pub async fn after(&self, cursor: DateTime<Utc>, limit: usize) -> Vec<TrackerEvent> {
        let events = self.events.read().await;
        events
            .iter()
            .filter(|e| e.timestamp() > cursor)
            .take(limit)
            .cloned()
            .collect()
    }

    /// Copy every event from `rx` into the log until the sender is gone.
    pub fn record(&self, mut rx: broadcast::Receiver<TrackerEvent>) -> tokio::task::JoinHandle<()> {
        let log = self.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => log.push(event).await,
                    Err(RecvError::Lagged(missed)) => warn!("Event log lagged, {} events missed", missed),
                    Err(RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(timestamp: DateTime<Utc>) -> TrackerEvent {
        TrackerEvent::SampleFailed { timestamp, reason: "Position signal lost".into() }
    }

    #[tokio::test]
    async fn test_ring_buffer_keeps_newest() {
        let log = EventLog::new();
        let start = Utc::now();
        for i in 0..(MAX_EVENTS + 5) {
            log.push(failed(start + chrono::Duration::milliseconds(i as i64))).await;
        }

        let latest = log.latest(MAX_EVENTS + 10).await;
        assert_eq!(latest.len(), MAX_EVENTS);
        assert_eq!(latest[0].timestamp(), start + chrono::Duration::milliseconds((MAX_EVENTS + 4) as i64));
    }

    #[tokio::test]
    async fn test_after_pages_forward() {
        let log = EventLog::new();
        let start = Utc::now();
        for i in 0..10 {
            log.push(failed(start + chrono::Duration::milliseconds(i))).await;
        }

        let page = log.after(start + chrono::Duration::milliseconds(3), 4).await;
        let stamps: Vec<_> = page.iter().map(|e| e.timestamp()).collect();
        assert_eq!(stamps, (4..8).map(|i| start + chrono::Duration::milliseconds(i)).collect::<Vec<_>>());

        let rest = log.after(stamps[3], 50).await;
        assert_eq!(rest.len(), 2);
        assert!(log.after(start + chrono::Duration::milliseconds(9), 50).await.is_empty());
    }

    #[tokio::test]
    async fn test_record_from_channel() {
        let log = EventLog::new();
        let (tx, rx) = broadcast::channel(8);
        let task = log.record(rx);

        tx.send(failed(Utc::now())).unwrap();
        tx.send(failed(Utc::now())).unwrap();
        drop(tx);
        task.await.unwrap();

        assert_eq!(log.latest(10).await.len(), 2);
    }
}
