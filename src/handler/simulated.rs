//! Network-free handler for dry runs and tests
//!
//! The simulated handler never touches the network. Each request reports a
//! latency taken from a configured sequence (cycling when exhausted) and can
//! optionally wait for that long to mimic a real call. Outcomes, error codes,
//! and received byte counts are fixed per handler, which keeps runs
//! reproducible.

use super::{HandlerError, MessageType, OutcomeEvent, OutcomeSink, RequestHandler, Target};
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

/// Method label of simulated requests unless overridden with `with_key`
pub const SIMULATED_METHOD: &str = "request";

/// Handler that fabricates outcome events
pub struct SimulatedHandler {
    message_type: MessageType,
    method: String,
    latencies: Vec<Duration>,
    next: usize,
    wait: bool,
    failure_code: Option<i32>,
    received_bytes: u64,
    fail_init: bool,
    releases: Option<Arc<AtomicUsize>>,
    sink: Option<OutcomeSink>,
}

impl SimulatedHandler {
    /// Successful requests of a fixed latency that is actually waited out
    pub fn new(latency: Duration) -> Self {
        Self {
            message_type: MessageType::SIMULATED,
            method: SIMULATED_METHOD.to_string(),
            latencies: vec![latency],
            next: 0,
            wait: true,
            failure_code: None,
            received_bytes: 0,
            fail_init: false,
            releases: None,
            sink: None,
        }
    }

    /// Report the given latencies in order without waiting
    pub fn scripted(latencies: Vec<Duration>) -> Self {
        Self {
            latencies,
            wait: false,
            ..Self::new(Duration::ZERO)
        }
    }

    pub fn with_key(mut self, message_type: MessageType, method: impl Into<String>) -> Self {
        self.message_type = message_type;
        self.method = method.into();
        self
    }

    /// Every request fails with `code`
    pub fn failing_with(mut self, code: i32) -> Self {
        self.failure_code = Some(code);
        self
    }

    pub fn receiving(mut self, bytes: u64) -> Self {
        self.received_bytes = bytes;
        self
    }

    /// Make `init` fail, which aborts the owning worker
    pub fn failing_init(mut self) -> Self {
        self.fail_init = true;
        self
    }

    /// Count `release` calls into `counter`
    pub fn track_releases(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.releases = Some(counter);
        self
    }

    fn next_latency(&mut self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let latency = self.latencies[self.next % self.latencies.len()];
        self.next += 1;
        latency
    }
}

#[async_trait]
impl RequestHandler for SimulatedHandler {
    async fn init(&mut self, target: &Target, sink: OutcomeSink) -> Result<(), HandlerError> {
        if self.fail_init {
            return Err(HandlerError::InvalidTarget(target.url.clone()));
        }
        self.sink = Some(sink);
        Ok(())
    }

    async fn on_request(&mut self) -> Result<(), HandlerError> {
        let sink = self.sink.clone().ok_or(HandlerError::NotInitialized)?;
        let latency = self.next_latency();
        if self.wait && !latency.is_zero() {
            sleep(latency).await;
        }

        let event = match self.failure_code {
            None => OutcomeEvent::success(
                self.message_type,
                self.method.as_str(),
                latency,
                self.received_bytes,
            ),
            Some(code) => {
                OutcomeEvent::failure(self.message_type, self.method.as_str(), latency, code)
            }
        };
        sink.record(event).await
    }

    async fn release(&mut self) {
        if let Some(counter) = &self.releases {
            counter.fetch_add(1, Ordering::SeqCst);
        }
        self.sink = None;
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
