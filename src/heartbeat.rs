use crate::engine::{HealthVerdict, Severity};
use crate::state::now_unix;
use reqwest::{Client, RequestBuilder, Url};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};

const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Outcome of the most recent dispatch attempt chain. Only the latest record
/// is kept; `/status` surfaces it verbatim.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct HeartbeatRecord {
    pub success: bool,
    pub timestamp_unix: i64,
    pub attempts: u32,
    pub detail: String,
}

#[derive(Debug, Error)]
enum DispatchError {
    #[error("request failed: {0}")]
    Request(reqwest::Error),
    #[error("request timed out after {0}ms")]
    Timeout(u64),
    #[error("receiver returned HTTP {0}")]
    Status(u16),
}

/// Translates a verdict into the request the receiver understands. Swapping
/// the receiver protocol means swapping this implementation, nothing else.
pub trait VerdictEncoder: Send + Sync {
    fn encode(&self, client: &Client, verdict: &HealthVerdict) -> RequestBuilder;
}

/// Uptime Kuma push protocol: GET on the push URL with `status`, `msg` and
/// `ping` query parameters. OK maps to `up`, anything worse to `down`.
pub struct KumaPushEncoder {
    push_url: Url,
}

impl KumaPushEncoder {
    pub fn new(push_url: Url) -> Self {
        Self { push_url }
    }
}

impl VerdictEncoder for KumaPushEncoder {
    fn encode(&self, client: &Client, verdict: &HealthVerdict) -> RequestBuilder {
        let status = match verdict.severity {
            Severity::Ok => "up",
            Severity::Warning | Severity::Critical => "down",
        };
        let msg = if verdict.triggered.is_empty() {
            "OK".to_string()
        } else {
            format!("{:?}: {}", verdict.severity, verdict.triggered.join(","))
        };

        let mut url = self.push_url.clone();
        url.query_pairs_mut()
            .append_pair("status", status)
            .append_pair("msg", &msg)
            .append_pair("ping", "");
        client.get(url)
    }
}

/// Next retry delay: `base * 2^attempt`, capped. `attempt` counts completed
/// attempts, so the first retry waits exactly `base`.
pub fn backoff_delay(base: Duration, attempt: u32, cap: Duration) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt)).min(cap)
}

pub struct HeartbeatDispatcher {
    client: Client,
    encoder: Box<dyn VerdictEncoder>,
    timeout: Duration,
    max_retries: u32,
    base_delay: Duration,
}

impl HeartbeatDispatcher {
    pub fn new(
        client: Client,
        encoder: Box<dyn VerdictEncoder>,
        timeout: Duration,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        Self {
            client,
            encoder,
            timeout,
            max_retries,
            base_delay,
        }
    }

    /// Sends one heartbeat with bounded retries. Never returns an error: a
    /// chain that exhausts its attempts becomes a failure record and the poll
    /// loop carries on. A shutdown signal abandons the chain at the next
    /// retry boundary, never mid-request.
    pub async fn dispatch(
        &self,
        verdict: &HealthVerdict,
        shutdown: &mut watch::Receiver<bool>,
    ) -> HeartbeatRecord {
        let attempts_allowed = self.max_retries.saturating_add(1);
        let mut last_failure = String::new();

        for attempt in 0..attempts_allowed {
            match self.send_once(verdict).await {
                Ok(code) => {
                    info!(attempts = attempt + 1, code, "heartbeat delivered");
                    return HeartbeatRecord {
                        success: true,
                        timestamp_unix: now_unix(),
                        attempts: attempt + 1,
                        detail: format!("HTTP {code}"),
                    };
                }
                Err(err) => {
                    last_failure = err.to_string();
                    if attempt + 1 < attempts_allowed {
                        let delay = backoff_delay(self.base_delay, attempt, MAX_BACKOFF);
                        debug!(
                            error = %last_failure,
                            delay_ms = delay.as_millis() as u64,
                            attempt = attempt + 1,
                            "heartbeat attempt failed, backing off"
                        );
                        tokio::select! {
                            _ = sleep(delay) => {}
                            _ = shutdown.changed() => {
                                return HeartbeatRecord {
                                    success: false,
                                    timestamp_unix: now_unix(),
                                    attempts: attempt + 1,
                                    detail: format!("abandoned at shutdown: {last_failure}"),
                                };
                            }
                        }
                    }
                }
            }
        }

        warn!(
            attempts = attempts_allowed,
            error = %last_failure,
            "heartbeat failed after all attempts"
        );
        HeartbeatRecord {
            success: false,
            timestamp_unix: now_unix(),
            attempts: attempts_allowed,
            detail: last_failure,
        }
    }

    async fn send_once(&self, verdict: &HealthVerdict) -> Result<u16, DispatchError> {
        let response = self
            .encoder
            .encode(&self.client, verdict)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|source| {
                if source.is_timeout() {
                    DispatchError::Timeout(self.timeout.as_millis() as u64)
                } else {
                    DispatchError::Request(source)
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(status.as_u16())
        } else {
            Err(DispatchError::Status(status.as_u16()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn critical_verdict() -> HealthVerdict {
        HealthVerdict {
            severity: Severity::Critical,
            triggered: vec!["cpu_percent".to_string()],
        }
    }

    fn dispatcher_for(server: &MockServer, max_retries: u32, base_delay: Duration) -> HeartbeatDispatcher {
        let push_url = Url::parse(&format!("{}/api/push/tok123", server.uri())).unwrap();
        HeartbeatDispatcher::new(
            Client::new(),
            Box::new(KumaPushEncoder::new(push_url)),
            Duration::from_secs(2),
            max_retries,
            base_delay,
        )
    }

    #[test]
    fn backoff_doubles_from_base_and_caps() {
        let base = Duration::from_millis(500);
        let cap = Duration::from_secs(30);
        assert_eq!(backoff_delay(base, 0, cap), Duration::from_millis(500));
        assert_eq!(backoff_delay(base, 1, cap), Duration::from_millis(1000));
        assert_eq!(backoff_delay(base, 2, cap), Duration::from_millis(2000));
        assert_eq!(backoff_delay(base, 20, cap), cap);
    }

    #[test]
    fn kuma_encoder_maps_ok_to_up() {
        let encoder = KumaPushEncoder::new(Url::parse("http://kuma.local/api/push/tok").unwrap());
        let request = encoder
            .encode(&Client::new(), &HealthVerdict::ok())
            .build()
            .unwrap();
        let query = request.url().query().unwrap();
        assert!(query.contains("status=up"));
        assert!(query.contains("msg=OK"));
    }

    #[test]
    fn kuma_encoder_maps_critical_to_down_with_triggers() {
        let encoder = KumaPushEncoder::new(Url::parse("http://kuma.local/api/push/tok").unwrap());
        let request = encoder
            .encode(&Client::new(), &critical_verdict())
            .build()
            .unwrap();
        let query = request.url().query().unwrap();
        assert!(query.contains("status=down"));
        assert!(query.contains("cpu_percent"));
    }

    #[tokio::test]
    async fn succeeds_on_third_attempt_after_two_server_errors() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/push/tok123"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/push/tok123"))
            .and(query_param("status", "down"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = watch::channel(false);
        let record = dispatcher_for(&server, 3, Duration::from_millis(1))
            .dispatch(&critical_verdict(), &mut shutdown)
            .await;

        assert!(record.success);
        assert_eq!(record.attempts, 3);
        assert_eq!(record.detail, "HTTP 200");
    }

    #[tokio::test]
    async fn gives_up_after_exhausting_retries() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/push/tok123"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (_tx, mut shutdown) = watch::channel(false);
        let record = dispatcher_for(&server, 2, Duration::from_millis(1))
            .dispatch(&critical_verdict(), &mut shutdown)
            .await;

        assert!(!record.success);
        assert_eq!(record.attempts, 3);
        assert!(record.detail.contains("503"));
    }

    #[tokio::test]
    async fn shutdown_abandons_chain_at_retry_boundary() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/push/tok123"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let (tx, mut shutdown) = watch::channel(false);
        tx.send(true).unwrap();
        // A long base delay guarantees the shutdown branch wins the select.
        let record = dispatcher_for(&server, 5, Duration::from_secs(30))
            .dispatch(&critical_verdict(), &mut shutdown)
            .await;

        assert!(!record.success);
        assert_eq!(record.attempts, 1);
        assert!(record.detail.contains("abandoned at shutdown"));
    }
}
