use crate::engine;
use crate::glances::GlancesClient;
use crate::heartbeat::HeartbeatDispatcher;
use crate::metrics::Metrics;
use crate::state::{now_unix, RuntimeState};
use crate::thresholds::ThresholdStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Drives the poll -> evaluate -> dispatch cycle on a fixed interval. At most
/// one cycle runs at a time: the cycle executes inline on this task and a
/// cycle that overruns the interval delays the next tick instead of
/// overlapping it.
pub struct Scheduler {
    pub interval: Duration,
    pub glances: GlancesClient,
    pub dispatcher: Option<HeartbeatDispatcher>,
    pub store: Arc<ThresholdStore>,
    pub state: Arc<RwLock<RuntimeState>>,
    pub metrics: Arc<Metrics>,
}

impl Scheduler {
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("shutdown signal received, stopping poll loop");
                    break;
                }
                _ = ticker.tick() => {
                    self.run_cycle(&mut shutdown).await;
                }
            }
        }
    }

    async fn run_cycle(&self, shutdown: &mut watch::Receiver<bool>) {
        self.metrics.inc_cycle();

        let snapshot = match self.glances.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(error = %err, "metrics source unavailable, skipping cycle");
                self.metrics.inc_fetch_error();
                self.state.write().await.record_fetch_failure();
                return;
            }
        };

        let config = self.store.get().await;
        let verdict = engine::evaluate(&snapshot, &config);
        let now = now_unix();
        debug!(
            severity = ?verdict.severity,
            triggered = ?verdict.triggered,
            "cycle evaluated"
        );

        self.metrics.observe_cycle(now, &snapshot, &verdict);
        self.state
            .write()
            .await
            .record_cycle(now, snapshot, verdict.clone());

        if let Some(dispatcher) = &self.dispatcher {
            let record = dispatcher.dispatch(&verdict, shutdown).await;
            self.metrics.inc_heartbeat(record.success);
            if !record.success {
                warn!(
                    attempts = record.attempts,
                    detail = %record.detail,
                    "heartbeat dispatch failed, will try again next cycle"
                );
            }
            self.state.write().await.record_heartbeat(record);
        }
    }
}
