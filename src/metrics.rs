use crate::engine::HealthVerdict;
use crate::glances::MetricSnapshot;
use prometheus::{opts, Counter, CounterVec, Encoder, Gauge, GaugeVec, Registry, TextEncoder};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Clone)]
pub struct Metrics {
    registry: Registry,
    pub cycles_total: Counter,
    pub fetch_errors_total: Counter,
    pub heartbeats_total: CounterVec,
    pub verdict_severity: Gauge,
    pub reading: GaugeVec,
    pub uptime_seconds: Gauge,
    pub scrape_count_total: Counter,
    pub last_cycle_timestamp_seconds: Gauge,
    started_at_unix: i64,
}

impl Metrics {
    pub fn new() -> Result<Arc<Self>, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total = Counter::with_opts(opts!(
            "glancewatch_cycles_total",
            "Number of poll cycles started"
        ))?;
        let fetch_errors_total = Counter::with_opts(opts!(
            "glancewatch_fetch_errors_total",
            "Number of cycles skipped because the metrics source was unavailable"
        ))?;
        let heartbeats_total = CounterVec::new(
            opts!(
                "glancewatch_heartbeats_total",
                "Heartbeat dispatch chains by outcome"
            ),
            &["outcome"],
        )?;
        let verdict_severity = Gauge::with_opts(opts!(
            "glancewatch_verdict_severity",
            "Last verdict severity (0=OK, 1=WARNING, 2=CRITICAL)"
        ))?;
        let reading = GaugeVec::new(
            opts!("glancewatch_reading", "Last collected reading by metric"),
            &["metric"],
        )?;
        let uptime_seconds = Gauge::with_opts(opts!(
            "glancewatch_uptime_seconds",
            "Adapter uptime in seconds"
        ))?;
        let scrape_count_total = Counter::with_opts(opts!(
            "glancewatch_scrape_count_total",
            "Number of /metrics scrapes"
        ))?;
        let last_cycle_timestamp_seconds = Gauge::with_opts(opts!(
            "glancewatch_last_cycle_timestamp_seconds",
            "Unix timestamp of the last completed cycle"
        ))?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(fetch_errors_total.clone()))?;
        registry.register(Box::new(heartbeats_total.clone()))?;
        registry.register(Box::new(verdict_severity.clone()))?;
        registry.register(Box::new(reading.clone()))?;
        registry.register(Box::new(uptime_seconds.clone()))?;
        registry.register(Box::new(scrape_count_total.clone()))?;
        registry.register(Box::new(last_cycle_timestamp_seconds.clone()))?;

        let started_at_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        Ok(Arc::new(Self {
            registry,
            cycles_total,
            fetch_errors_total,
            heartbeats_total,
            verdict_severity,
            reading,
            uptime_seconds,
            scrape_count_total,
            last_cycle_timestamp_seconds,
            started_at_unix,
        }))
    }

    pub fn inc_cycle(&self) {
        self.cycles_total.inc();
    }

    pub fn inc_fetch_error(&self) {
        self.fetch_errors_total.inc();
    }

    pub fn inc_heartbeat(&self, success: bool) {
        let outcome = if success { "success" } else { "failure" };
        self.heartbeats_total.with_label_values(&[outcome]).inc();
    }

    pub fn inc_scrape_count(&self) {
        self.scrape_count_total.inc();
    }

    pub fn observe_cycle(&self, now_unix: i64, snapshot: &MetricSnapshot, verdict: &HealthVerdict) {
        self.verdict_severity.set(f64::from(verdict.severity.rank()));
        for (metric, value) in &snapshot.readings {
            self.reading.with_label_values(&[metric]).set(*value);
        }
        self.last_cycle_timestamp_seconds.set(now_unix as f64);
    }

    pub fn encode_metrics(&self) -> Result<String, prometheus::Error> {
        self.uptime_seconds.set(
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0)
                .saturating_sub(self.started_at_unix) as f64,
        );

        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&metric_families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Severity;
    use std::collections::BTreeMap;

    #[test]
    fn cycle_observation_is_visible_in_the_exposition() {
        let metrics = Metrics::new().expect("metrics init");
        let mut readings = BTreeMap::new();
        readings.insert("cpu_percent".to_string(), 95.0);
        let snapshot = MetricSnapshot {
            taken_at_unix: 1_700_000_000,
            readings,
        };
        let verdict = HealthVerdict {
            severity: Severity::Critical,
            triggered: vec!["cpu_percent".to_string()],
        };

        metrics.inc_cycle();
        metrics.observe_cycle(1_700_000_000, &snapshot, &verdict);
        metrics.inc_heartbeat(true);

        let text = metrics.encode_metrics().expect("encode");
        assert!(text.contains("glancewatch_cycles_total 1"));
        assert!(text.contains("glancewatch_verdict_severity 2"));
        assert!(text.contains("glancewatch_reading{metric=\"cpu_percent\"} 95"));
        assert!(text.contains("glancewatch_heartbeats_total{outcome=\"success\"} 1"));
        assert!(text.contains("glancewatch_uptime_seconds"));
    }
}
