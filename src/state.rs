use crate::engine::HealthVerdict;
use crate::glances::MetricSnapshot;
use crate::heartbeat::HeartbeatRecord;
use std::time::{SystemTime, UNIX_EPOCH};

pub fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Last-known results of the poll loop, shared with the HTTP server. The API
/// only ever reads this cache; polling cadence is independent of request rate.
#[derive(Debug, Clone, Default)]
pub struct RuntimeState {
    pub started_at_unix: i64,
    pub last_cycle_unix: i64,
    pub last_snapshot: Option<MetricSnapshot>,
    pub last_verdict: Option<HealthVerdict>,
    pub last_heartbeat: Option<HeartbeatRecord>,
    pub consecutive_fetch_failures: u32,
    pub cycles_completed: u64,
}

impl RuntimeState {
    pub fn new(now_unix: i64) -> Self {
        Self {
            started_at_unix: now_unix,
            ..Self::default()
        }
    }

    pub fn record_cycle(&mut self, now_unix: i64, snapshot: MetricSnapshot, verdict: HealthVerdict) {
        self.last_cycle_unix = now_unix;
        self.last_snapshot = Some(snapshot);
        self.last_verdict = Some(verdict);
        self.consecutive_fetch_failures = 0;
        self.cycles_completed = self.cycles_completed.saturating_add(1);
    }

    pub fn record_fetch_failure(&mut self) {
        self.consecutive_fetch_failures = self.consecutive_fetch_failures.saturating_add(1);
    }

    pub fn record_heartbeat(&mut self, record: HeartbeatRecord) {
        self.last_heartbeat = Some(record);
    }

    /// True once the cache holds data but the most recent fetches failed.
    pub fn is_stale(&self) -> bool {
        self.last_verdict.is_some() && self.consecutive_fetch_failures > 0
    }

    pub fn has_data(&self) -> bool {
        self.last_verdict.is_some()
    }
}
