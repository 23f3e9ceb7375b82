//! Snapshot consumers
//!
//! `OverlaySink` keeps the latest snapshot for a display. The session
//! accumulator folds every new snapshot into a `SessionSummary` for the
//! coaching report.

use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tracing::warn;

use super::snapshot::SessionMetrics;

/// Receives every emitted snapshot, in order. Must not block.
pub trait MetricsSink: Send + Sync {
    fn publish(&self, metrics: &SessionMetrics);
}

impl<F> MetricsSink for F
where
    F: Fn(&SessionMetrics) + Send + Sync,
{
    fn publish(&self, metrics: &SessionMetrics) {
        self(metrics)
    }
}

/// Latest-value overlay feed
pub struct OverlaySink {
    tx: watch::Sender<Option<SessionMetrics>>,
}

impl OverlaySink {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<SessionMetrics>> {
        self.tx.subscribe()
    }

    pub fn latest(&self) -> Option<SessionMetrics> {
        *self.tx.borrow()
    }
}

impl Default for OverlaySink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink for OverlaySink {
    fn publish(&self, metrics: &SessionMetrics) {
        self.tx.send_replace(Some(*metrics));
    }
}

/// Aggregate of one session, handed to the coaching report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub started_at: i64,
    pub ended_at: i64,
    pub snapshot_count: u64,
    pub eye_contact: f64,
    pub smile: f64,
    pub posture: f64,
    pub speaking_ratio: f64,
    pub filler_words: f64,
    pub blink_count: u64,
}

#[derive(Debug, Default)]
struct Totals {
    count: u64,
    eye_contact: f64,
    smile: f64,
    posture: f64,
    speaking_ratio: f64,
    filler_words: f64,
    first_timestamp: Option<i64>,
    last_timestamp: Option<i64>,
    last: Option<SessionMetrics>,
}

/// Running averages over distinct snapshots.
///
/// A snapshot equal to the previous one is a re-emission and is skipped.
pub struct SessionAccumulator {
    session_id: String,
    totals: Mutex<Totals>,
}

impl SessionAccumulator {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            totals: Mutex::new(Totals::default()),
        })
    }

    pub fn snapshot_count(&self) -> u64 {
        self.totals.lock().map(|t| t.count).unwrap_or(0)
    }

    /// Averages so far. `ended_at` falls back to the last snapshot time.
    pub fn summary(&self, blink_count: u64, ended_at: Option<i64>) -> SessionSummary {
        let totals = match self.totals.lock() {
            Ok(totals) => totals,
            Err(poisoned) => poisoned.into_inner(),
        };
        let n = totals.count.max(1) as f64;
        let started_at = totals.first_timestamp.unwrap_or(0);
        SessionSummary {
            session_id: self.session_id.clone(),
            started_at,
            ended_at: ended_at.or(totals.last_timestamp).unwrap_or(started_at),
            snapshot_count: totals.count,
            eye_contact: totals.eye_contact / n,
            smile: totals.smile / n,
            posture: totals.posture / n,
            speaking_ratio: totals.speaking_ratio / n,
            filler_words: totals.filler_words / n,
            blink_count,
        }
    }
}

impl MetricsSink for SessionAccumulator {
    fn publish(&self, metrics: &SessionMetrics) {
        let mut totals = match self.totals.lock() {
            Ok(totals) => totals,
            Err(_) => {
                warn!("Session accumulator lock poisoned, dropping snapshot");
                return;
            }
        };
        if totals.last.as_ref() == Some(metrics) {
            return;
        }
        totals.count += 1;
        totals.eye_contact += f64::from(metrics.eye_contact);
        totals.smile += f64::from(metrics.smile);
        totals.posture += f64::from(metrics.posture);
        totals.speaking_ratio += f64::from(metrics.speaking_ratio);
        totals.filler_words += metrics.filler_words;
        totals.first_timestamp.get_or_insert(metrics.timestamp);
        totals.last_timestamp = Some(metrics.timestamp);
        totals.last = Some(*metrics);
    }
}
