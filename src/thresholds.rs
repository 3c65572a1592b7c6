use crate::glances::KNOWN_METRICS;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::sync::RwLock;

/// Per-metric warning/critical boundary. All supported metrics are ascending
/// (a higher reading is worse), so `warning_level <= critical_level` always holds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdRule {
    pub warning_level: f64,
    pub critical_level: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

impl ThresholdRule {
    pub const fn disabled() -> Self {
        Self {
            warning_level: 0.0,
            critical_level: 0.0,
            enabled: false,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdConfig {
    #[serde(rename = "thresholds", default)]
    pub rules: BTreeMap<String, ThresholdRule>,
}

impl ThresholdConfig {
    /// Rules shipped out of the box; swap and load stay present but disabled so
    /// the rule set covers every metric the collector can report.
    pub fn builtin_defaults() -> Self {
        let mut rules = BTreeMap::new();
        rules.insert(
            "cpu_percent".to_string(),
            ThresholdRule {
                warning_level: 80.0,
                critical_level: 90.0,
                enabled: true,
            },
        );
        rules.insert(
            "mem_percent".to_string(),
            ThresholdRule {
                warning_level: 80.0,
                critical_level: 90.0,
                enabled: true,
            },
        );
        rules.insert(
            "disk_percent".to_string(),
            ThresholdRule {
                warning_level: 85.0,
                critical_level: 95.0,
                enabled: true,
            },
        );
        let mut cfg = Self { rules };
        cfg.fill_known_metrics();
        cfg
    }

    /// Guarantees a rule exists for every reportable metric (disabled no-op when unset).
    pub fn fill_known_metrics(&mut self) {
        for metric in KNOWN_METRICS {
            self.rules
                .entry(metric.to_string())
                .or_insert_with(ThresholdRule::disabled);
        }
    }
}

#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("invalid rule for '{metric}': {detail}")]
    InvalidRule { metric: String, detail: String },
    #[error("failed to read thresholds file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse thresholds file {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("failed to persist thresholds to {path}: {detail}")]
    Persist { path: String, detail: String },
}

pub fn validate_rules(rules: &BTreeMap<String, ThresholdRule>) -> Result<(), ThresholdError> {
    for (metric, rule) in rules {
        if metric.trim().is_empty() {
            return Err(ThresholdError::InvalidRule {
                metric: metric.clone(),
                detail: "metric name must not be empty".to_string(),
            });
        }
        if !rule.warning_level.is_finite() || !rule.critical_level.is_finite() {
            return Err(ThresholdError::InvalidRule {
                metric: metric.clone(),
                detail: "warning_level and critical_level must be finite numbers".to_string(),
            });
        }
        if rule.warning_level > rule.critical_level {
            return Err(ThresholdError::InvalidRule {
                metric: metric.clone(),
                detail: format!(
                    "warning_level {} must be <= critical_level {}",
                    rule.warning_level, rule.critical_level
                ),
            });
        }
    }
    Ok(())
}

/// Owner of the current threshold set. All mutation goes through [`update`],
/// which validates, merges per key, persists, and only then swaps the shared
/// value, so readers never observe a torn or unpersisted rule set.
///
/// [`update`]: ThresholdStore::update
pub struct ThresholdStore {
    path: PathBuf,
    current: RwLock<ThresholdConfig>,
}

impl ThresholdStore {
    /// Loads the last persisted rule set, falling back to `seed` on first run.
    pub fn open(path: impl AsRef<Path>, seed: ThresholdConfig) -> Result<Self, ThresholdError> {
        let path = path.as_ref().to_path_buf();
        let mut config = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|source| ThresholdError::Read {
                path: path.display().to_string(),
                source,
            })?;
            serde_yaml::from_str(&text).map_err(|source| ThresholdError::Parse {
                path: path.display().to_string(),
                source,
            })?
        } else {
            seed
        };
        config.fill_known_metrics();
        validate_rules(&config.rules)?;

        Ok(Self {
            path,
            current: RwLock::new(config),
        })
    }

    pub async fn get(&self) -> ThresholdConfig {
        self.current.read().await.clone()
    }

    /// Per-key merge: each rule in `partial` replaces that metric's rule wholesale,
    /// metrics absent from `partial` keep their prior rule. Persisted before the
    /// in-memory swap; a failed write leaves the store unchanged.
    pub async fn update(
        &self,
        partial: BTreeMap<String, ThresholdRule>,
    ) -> Result<ThresholdConfig, ThresholdError> {
        validate_rules(&partial)?;

        let mut guard = self.current.write().await;
        let mut merged = guard.clone();
        for (metric, rule) in partial {
            merged.rules.insert(metric, rule);
        }
        merged.fill_known_metrics();

        self.persist(&merged)?;
        *guard = merged.clone();
        Ok(merged)
    }

    fn persist(&self, config: &ThresholdConfig) -> Result<(), ThresholdError> {
        let text = serde_yaml::to_string(config).map_err(|err| ThresholdError::Persist {
            path: self.path.display().to_string(),
            detail: err.to_string(),
        })?;
        // Write-then-rename keeps the file whole even if the process dies mid-write.
        let tmp = self.path.with_extension("yaml.tmp");
        fs::write(&tmp, text).map_err(|err| ThresholdError::Persist {
            path: tmp.display().to_string(),
            detail: err.to_string(),
        })?;
        fs::rename(&tmp, &self.path).map_err(|err| ThresholdError::Persist {
            path: self.path.display().to_string(),
            detail: err.to_string(),
        })
    }
}

const fn default_enabled() -> bool {
    true
}
