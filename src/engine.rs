use crate::glances::MetricSnapshot;
use crate::thresholds::ThresholdConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    Ok,
    Warning,
    Critical,
}

impl Severity {
    /// Numeric rank for the Prometheus gauge: OK=0, WARNING=1, CRITICAL=2.
    pub fn rank(self) -> u8 {
        match self {
            Severity::Ok => 0,
            Severity::Warning => 1,
            Severity::Critical => 2,
        }
    }
}

/// Aggregated health classification for one snapshot. `triggered` lists every
/// metric at the winning severity, sorted by name.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthVerdict {
    pub severity: Severity,
    pub triggered: Vec<String>,
}

impl HealthVerdict {
    pub fn ok() -> Self {
        Self {
            severity: Severity::Ok,
            triggered: Vec::new(),
        }
    }
}

/// Classifies a snapshot against the current rule set. Disabled rules and
/// metrics absent from the snapshot are skipped, the worst severity wins.
pub fn evaluate(snapshot: &MetricSnapshot, config: &ThresholdConfig) -> HealthVerdict {
    let mut worst = Severity::Ok;
    let mut classified: Vec<(String, Severity)> = Vec::new();

    for (metric, rule) in &config.rules {
        if !rule.enabled {
            continue;
        }
        let Some(reading) = snapshot.readings.get(metric) else {
            continue;
        };
        let severity = if *reading >= rule.critical_level {
            Severity::Critical
        } else if *reading >= rule.warning_level {
            Severity::Warning
        } else {
            Severity::Ok
        };
        if severity > worst {
            worst = severity;
        }
        if severity > Severity::Ok {
            classified.push((metric.clone(), severity));
        }
    }

    if worst == Severity::Ok {
        return HealthVerdict::ok();
    }

    let triggered = classified
        .into_iter()
        .filter(|(_, severity)| *severity == worst)
        .map(|(metric, _)| metric)
        .collect();

    HealthVerdict {
        severity: worst,
        triggered,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::ThresholdRule;
    use std::collections::BTreeMap;

    fn snapshot(readings: &[(&str, f64)]) -> MetricSnapshot {
        MetricSnapshot {
            taken_at_unix: 1_700_000_000,
            readings: readings
                .iter()
                .map(|(name, value)| (name.to_string(), *value))
                .collect(),
        }
    }

    fn config(rules: &[(&str, f64, f64, bool)]) -> ThresholdConfig {
        let rules: BTreeMap<String, ThresholdRule> = rules
            .iter()
            .map(|(name, warning, critical, enabled)| {
                (
                    name.to_string(),
                    ThresholdRule {
                        warning_level: *warning,
                        critical_level: *critical,
                        enabled: *enabled,
                    },
                )
            })
            .collect();
        ThresholdConfig { rules }
    }

    #[test]
    fn cpu_over_critical_yields_critical_with_trigger() {
        let verdict = evaluate(
            &snapshot(&[("cpu_percent", 95.0)]),
            &config(&[("cpu_percent", 70.0, 90.0, true)]),
        );
        assert_eq!(verdict.severity, Severity::Critical);
        assert_eq!(verdict.triggered, vec!["cpu_percent".to_string()]);
    }

    #[test]
    fn critical_is_checked_before_warning() {
        // Reading above both levels must classify as critical, not warning.
        let verdict = evaluate(
            &snapshot(&[("mem_percent", 99.0)]),
            &config(&[("mem_percent", 80.0, 90.0, true)]),
        );
        assert_eq!(verdict.severity, Severity::Critical);
    }

    #[test]
    fn triggered_lists_all_metrics_at_winning_severity() {
        let verdict = evaluate(
            &snapshot(&[
                ("cpu_percent", 95.0),
                ("disk_percent", 96.0),
                ("mem_percent", 85.0),
            ]),
            &config(&[
                ("cpu_percent", 70.0, 90.0, true),
                ("disk_percent", 85.0, 95.0, true),
                ("mem_percent", 80.0, 90.0, true),
            ]),
        );
        assert_eq!(verdict.severity, Severity::Critical);
        assert_eq!(
            verdict.triggered,
            vec!["cpu_percent".to_string(), "disk_percent".to_string()]
        );
    }

    #[test]
    fn disabled_rules_never_trigger() {
        let verdict = evaluate(
            &snapshot(&[("cpu_percent", 99.0), ("mem_percent", 85.0)]),
            &config(&[
                ("cpu_percent", 70.0, 90.0, false),
                ("mem_percent", 80.0, 90.0, true),
            ]),
        );
        assert_eq!(verdict.severity, Severity::Warning);
        assert_eq!(verdict.triggered, vec!["mem_percent".to_string()]);
    }

    #[test]
    fn metrics_absent_from_snapshot_are_skipped_silently() {
        let verdict = evaluate(
            &snapshot(&[("cpu_percent", 10.0)]),
            &config(&[
                ("cpu_percent", 70.0, 90.0, true),
                ("disk_percent", 0.0, 0.0, true),
            ]),
        );
        assert_eq!(verdict.severity, Severity::Ok);
        assert!(verdict.triggered.is_empty());
    }

    #[test]
    fn empty_config_yields_ok() {
        let verdict = evaluate(&snapshot(&[("cpu_percent", 99.0)]), &config(&[]));
        assert_eq!(verdict.severity, Severity::Ok);
        assert!(verdict.triggered.is_empty());
    }

    #[test]
    fn raising_critical_level_never_raises_severity() {
        let snap = snapshot(&[("cpu_percent", 95.0)]);
        let before = evaluate(&snap, &config(&[("cpu_percent", 70.0, 90.0, true)]));
        let after = evaluate(&snap, &config(&[("cpu_percent", 70.0, 96.0, true)]));
        assert!(after.severity <= before.severity);
        assert_eq!(after.severity, Severity::Warning);
    }

    #[test]
    fn severity_order_is_total() {
        assert!(Severity::Ok < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert_eq!(Severity::Critical.rank(), 2);
    }
}
