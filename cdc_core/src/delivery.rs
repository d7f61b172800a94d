//! Delivery of change events to the remote HTTP sink.
//!
//! A delivery never surfaces an error to its caller: each event ends as a
//! plain success or failure after at most `retry_count + 1` attempts.
//! Retries back off exponentially and abort as soon as the agent leaves
//! RUNNING.

use crate::event::ChangeEvent;
use crate::lifecycle::Lifecycle;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff;
use config::SinkConfig;
use errors::DeliveryError;
use reqwest::Client;
use reqwest::header::CONTENT_TYPE;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Destination for admitted change events.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event. `true` only when the remote acknowledged it.
    async fn send(&self, event: Arc<ChangeEvent>) -> bool;
}

/// Retry delays for one delivery: `base`, `2 * base`, `4 * base`, ... capped
/// at `max`, without jitter and without an overall deadline.
pub fn retry_schedule(base: Duration, max: Duration) -> ExponentialBackoff {
    backoff::ExponentialBackoffBuilder::new()
        .with_initial_interval(base)
        .with_multiplier(2.0)
        .with_randomization_factor(0.0)
        .with_max_interval(max)
        .with_max_elapsed_time(None)
        .build()
}

/// POSTs the JSON wire form of each event to a fixed URL.
pub struct HttpDeliverySink {
    client: Client,
    url: String,
    lifecycle: Arc<Lifecycle>,
    retry_count: u32,
    retry_backoff: Duration,
    max_backoff: Duration,
    request_timeout: Duration
}

impl HttpDeliverySink {
    pub fn new(config: &SinkConfig, lifecycle: Arc<Lifecycle>) -> Result<Self, DeliveryError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .read_timeout(config.read_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| DeliveryError::Transport {
                url: config.url.clone(),
                reason: e.to_string()
            })?;

        Ok(Self {
            client,
            url: config.url.clone(),
            lifecycle,
            retry_count: config.retry_count,
            retry_backoff: config.retry_backoff(),
            max_backoff: config.max_backoff(),
            request_timeout: config.request_timeout()
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn attempt(&self, body: &str) -> Result<(), DeliveryError> {
        let response = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .body(body.to_string())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DeliveryError::Timeout {
                        url: self.url.clone(),
                        timeout_ms: self.request_timeout.as_millis() as u64
                    }
                } else {
                    DeliveryError::Transport {
                        url: self.url.clone(),
                        reason: e.to_string()
                    }
                }
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(DeliveryError::Status {
                url: self.url.clone(),
                status: status.as_u16()
            })
        }
    }
}

#[async_trait]
impl EventSink for HttpDeliverySink {
    async fn send(&self, event: Arc<ChangeEvent>) -> bool {
        if !self.lifecycle.is_running() {
            debug!(event_id = %event.id, "Skipping delivery: agent not running");
            return false;
        }

        let body = match serde_json::to_string(&*event) {
            Ok(body) => body,
            Err(e) => {
                let err = DeliveryError::Serialization {
                    event_id: event.id.clone(),
                    reason: e.to_string()
                };
                error!(event_id = %event.id, error = %err, "Dropping event");
                return false;
            }
        };

        let attempts = self.retry_count.saturating_add(1);
        let mut schedule = retry_schedule(self.retry_backoff, self.max_backoff);
        for attempt in 1..=attempts {
            match self.attempt(&body).await {
                Ok(()) => {
                    debug!(event_id = %event.id, attempt, "Event delivered");
                    return true;
                }
                Err(e) if !e.is_retryable() => {
                    error!(event_id = %event.id, attempt, error = %e, "Delivery failed permanently");
                    return false;
                }
                Err(e) => {
                    warn!(event_id = %event.id, attempt, max_attempts = attempts, error = %e, "Delivery attempt failed");
                }
            }

            if attempt == attempts {
                break;
            }

            let delay = schedule.next_backoff().unwrap_or(self.max_backoff);
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.lifecycle.wait_until_not_running() => {}
            }

            if !self.lifecycle.is_running() {
                info!(event_id = %event.id, attempt, state = %self.lifecycle.state(), "Abandoning retries: agent left RUNNING");
                return false;
            }
        }

        error!(event_id = %event.id, attempts, url = %self.url, "Delivery retries exhausted");
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Operation;
    use crate::lifecycle::AgentState;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn sink_config(server: &MockServer, retry_count: u32, backoff_ms: u64) -> SinkConfig {
        SinkConfig {
            url: format!("{}/api/events", server.uri()),
            retry_count,
            retry_backoff_ms: backoff_ms,
            max_backoff_ms: 10_000,
            connect_timeout_ms: 1_000,
            read_timeout_ms: 2_000,
            write_timeout_ms: 2_000,
            ..SinkConfig::default()
        }
    }

    fn running() -> Arc<Lifecycle> {
        let lifecycle = Arc::new(Lifecycle::new());
        assert!(lifecycle.set_state(AgentState::Starting));
        assert!(lifecycle.set_state(AgentState::Running));
        lifecycle
    }

    fn insert_event() -> Arc<ChangeEvent> {
        Arc::new(
            ChangeEvent::new("mysql", Operation::Insert)
                .with_origin(Some("inventory".to_string()), Some("customers".to_string()))
        )
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        let base = Duration::from_millis(1_000);
        let max = Duration::from_millis(30_000);
        let mut schedule = retry_schedule(base, max);

        let delays: Vec<Duration> = (0..8).filter_map(|_| schedule.next_backoff()).collect();
        assert_eq!(
            delays[..5],
            [
                Duration::from_millis(1_000),
                Duration::from_millis(2_000),
                Duration::from_millis(4_000),
                Duration::from_millis(8_000),
                Duration::from_millis(16_000)
            ]
        );
        assert_eq!(delays[5..], [max, max, max]);
    }

    #[test]
    fn test_retry_schedule_starts_over_per_delivery() {
        let base = Duration::from_millis(50);
        let mut first = retry_schedule(base, Duration::from_secs(1));
        first.next_backoff();
        first.next_backoff();

        let mut second = retry_schedule(base, Duration::from_secs(1));
        assert_eq!(second.next_backoff(), Some(base));
    }

    #[tokio::test]
    async fn test_success_posts_wire_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/events"))
            .and(header("content-type", "application/json"))
            .and(body_partial_json(serde_json::json!({
                "type": "mysql",
                "operation": "INSERT",
                "table": "customers"
            })))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpDeliverySink::new(&sink_config(&server, 3, 1), running()).unwrap();
        assert!(sink.send(insert_event()).await);
    }

    #[tokio::test]
    async fn test_not_running_makes_no_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let sink = HttpDeliverySink::new(&sink_config(&server, 3, 1), Arc::new(Lifecycle::new())).unwrap();
        assert!(!sink.send(insert_event()).await);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_permanent_failure_makes_retry_count_plus_one_attempts() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .expect(4)
            .mount(&server)
            .await;

        let sink = HttpDeliverySink::new(&sink_config(&server, 3, 1), running()).unwrap();
        assert!(!sink.send(insert_event()).await);
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_zero_retries_is_a_single_attempt() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpDeliverySink::new(&sink_config(&server, 0, 1), running()).unwrap();
        assert!(!sink.send(insert_event()).await);
    }

    #[tokio::test]
    async fn test_recovers_after_transient_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502))
            .up_to_n_times(2)
            .expect(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let sink = HttpDeliverySink::new(&sink_config(&server, 3, 1), running()).unwrap();
        assert!(sink.send(insert_event()).await);
    }

    #[tokio::test]
    async fn test_leaving_running_stops_retries() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let lifecycle = running();
        // Long backoff: the only way out before the deadline is the state change.
        let sink = Arc::new(HttpDeliverySink::new(&sink_config(&server, 5, 5_000), lifecycle.clone()).unwrap());
        let delivery = {
            let sink = Arc::clone(&sink);
            tokio::spawn(async move { sink.send(insert_event()).await })
        };

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while server.received_requests().await.unwrap().is_empty() {
            assert!(tokio::time::Instant::now() < deadline, "first attempt never arrived");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(lifecycle.set_state(AgentState::Paused));

        let delivered = tokio::time::timeout(Duration::from_secs(2), delivery)
            .await
            .expect("retry sleep should be interrupted")
            .unwrap();
        assert!(!delivered);
        assert_eq!(server.received_requests().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_sink_fails_without_panicking() {
        let config = SinkConfig {
            url: "http://127.0.0.1:9/api/events".to_string(),
            retry_count: 1,
            retry_backoff_ms: 1,
            connect_timeout_ms: 200,
            ..SinkConfig::default()
        };
        let sink = HttpDeliverySink::new(&config, running()).unwrap();
        assert!(!sink.send(insert_event()).await);
    }
}
