use crate::state::now_unix;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

pub const METRIC_CPU: &str = "cpu_percent";
pub const METRIC_MEM: &str = "mem_percent";
pub const METRIC_SWAP: &str = "swap_percent";
pub const METRIC_LOAD: &str = "load_avg";
pub const METRIC_DISK: &str = "disk_percent";

/// Every metric this adapter can report from a Glances instance.
pub const KNOWN_METRICS: [&str; 5] = [
    METRIC_CPU,
    METRIC_MEM,
    METRIC_SWAP,
    METRIC_LOAD,
    METRIC_DISK,
];

/// One point-in-time reading of the monitored system, keyed by metric name.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricSnapshot {
    pub taken_at_unix: i64,
    pub readings: BTreeMap<String, f64>,
}

#[derive(Debug, Error)]
pub enum GlancesError {
    #[error("glances '{endpoint}' timed out after {timeout_ms}ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
    #[error("glances '{endpoint}' unreachable: {source}")]
    Connect {
        endpoint: String,
        source: reqwest::Error,
    },
    #[error("glances '{endpoint}' returned HTTP {code}")]
    Status { endpoint: String, code: u16 },
    #[error("glances '{endpoint}' response could not be decoded: {source}")]
    Decode {
        endpoint: String,
        source: reqwest::Error,
    },
}

#[derive(Debug, Clone)]
pub struct GlancesClient {
    client: Client,
    base_url: String,
    api_version: u8,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct Quicklook {
    cpu: f64,
    mem: f64,
    swap: f64,
}

#[derive(Debug, Deserialize)]
struct LoadStats {
    min5: f64,
}

#[derive(Debug, Deserialize)]
struct FsEntry {
    percent: f64,
}

impl GlancesClient {
    pub fn new(client: Client, base_url: String, api_version: u8, timeout: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_version,
            timeout,
        }
    }

    /// Pulls one snapshot from the collector. No retries here: the poll loop
    /// treats any failure as a skipped cycle and tries again next interval.
    pub async fn fetch_snapshot(&self) -> Result<MetricSnapshot, GlancesError> {
        let quicklook: Quicklook = self.get_json("quicklook").await?;
        let load: LoadStats = self.get_json("load").await?;
        let fs: Vec<FsEntry> = self.get_json("fs").await?;

        let mut readings = BTreeMap::new();
        readings.insert(METRIC_CPU.to_string(), quicklook.cpu);
        readings.insert(METRIC_MEM.to_string(), quicklook.mem);
        readings.insert(METRIC_SWAP.to_string(), quicklook.swap);
        readings.insert(METRIC_LOAD.to_string(), load.min5);
        // Worst mount wins; a host without mounts simply reports no disk metric.
        if let Some(worst) = fs
            .iter()
            .map(|entry| entry.percent)
            .max_by(|a, b| a.total_cmp(b))
        {
            readings.insert(METRIC_DISK.to_string(), worst);
        }

        Ok(MetricSnapshot {
            taken_at_unix: now_unix(),
            readings,
        })
    }

    async fn get_json<T: DeserializeOwned>(&self, endpoint: &str) -> Result<T, GlancesError> {
        let url = format!("{}/api/{}/{}", self.base_url, self.api_version, endpoint);
        let response = self
            .client
            .get(&url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    GlancesError::Timeout {
                        endpoint: endpoint.to_string(),
                        timeout_ms: self.timeout.as_millis() as u64,
                    }
                } else {
                    GlancesError::Connect {
                        endpoint: endpoint.to_string(),
                        source,
                    }
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GlancesError::Status {
                endpoint: endpoint.to_string(),
                code: status.as_u16(),
            });
        }

        response
            .json::<T>()
            .await
            .map_err(|source| GlancesError::Decode {
                endpoint: endpoint.to_string(),
                source,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, timeout_ms: u64) -> GlancesClient {
        GlancesClient::new(
            Client::new(),
            server.uri(),
            4,
            Duration::from_millis(timeout_ms),
        )
    }

    #[tokio::test]
    async fn snapshot_maps_glances_endpoints_to_readings() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/4/quicklook"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "cpu": 12.5, "mem": 40.0, "swap": 1.5, "load": 10.0
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/4/load"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "min1": 0.4, "min5": 0.8, "min15": 1.0, "cpucore": 8
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/4/fs"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                { "mnt_point": "/", "percent": 55.5 },
                { "mnt_point": "/data", "percent": 80.1 }
            ])))
            .mount(&server)
            .await;

        let snapshot = client_for(&server, 2000)
            .fetch_snapshot()
            .await
            .expect("snapshot");

        assert_eq!(snapshot.readings[METRIC_CPU], 12.5);
        assert_eq!(snapshot.readings[METRIC_MEM], 40.0);
        assert_eq!(snapshot.readings[METRIC_SWAP], 1.5);
        assert_eq!(snapshot.readings[METRIC_LOAD], 0.8);
        assert_eq!(snapshot.readings[METRIC_DISK], 80.1);
        assert!(snapshot.taken_at_unix > 0);
    }

    #[tokio::test]
    async fn non_success_status_is_reported_as_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/4/quicklook"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let err = client_for(&server, 2000)
            .fetch_snapshot()
            .await
            .expect_err("must fail");
        assert!(matches!(err, GlancesError::Status { code: 503, .. }));
    }

    #[tokio::test]
    async fn slow_collector_hits_the_bounded_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/4/quicklook"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"cpu": 1.0, "mem": 1.0, "swap": 0.0}))
                    .set_delay(Duration::from_millis(500)),
            )
            .mount(&server)
            .await;

        let err = client_for(&server, 50)
            .fetch_snapshot()
            .await
            .expect_err("must time out");
        assert!(matches!(err, GlancesError::Timeout { .. }));
    }
}
