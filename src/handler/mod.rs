use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::mpsc;

pub mod simulated;
pub mod tcp_echo;

pub use simulated::SimulatedHandler;
pub use tcp_echo::TcpEchoHandler;

/// Error code recorded for a successful attempt
pub const CODE_OK: i32 = 0;

/// Error code for transport level failures (connect, read, write)
pub const CODE_TRANSPORT: i32 = -1001;

/// Error code for attempts that exceeded the handler's timeout
pub const CODE_TIMEOUT: i32 = -1002;

/// Error code for any other handler failure
pub const CODE_OTHER: i32 = -1003;

/// Errors raised by request handlers
#[derive(Debug, Error)]
pub enum HandlerError {
    #[error("invalid target '{0}'")]
    InvalidTarget(String),

    #[error("failed to connect to {target}: {source}")]
    Connect {
        target: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload of {size} bytes exceeds the {max} byte frame limit")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("handler used before initialization")]
    NotInitialized,

    #[error("outcome stream closed")]
    SinkClosed,
}

impl HandlerError {
    /// Numeric code recorded in the outcome event for this failure
    pub fn code(&self) -> i32 {
        match self {
            HandlerError::Connect { .. } | HandlerError::Io(_) => CODE_TRANSPORT,
            HandlerError::Timeout(_) => CODE_TIMEOUT,
            HandlerError::InvalidTarget(_)
            | HandlerError::PayloadTooLarge { .. }
            | HandlerError::NotInitialized
            | HandlerError::SinkClosed => CODE_OTHER,
        }
    }
}

/// Message type tag carried by every outcome event.
///
/// The tag is opaque to the statistics engine; display names come from the
/// [`MessageTypeRegistry`](crate::results::MessageTypeRegistry).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MessageType(pub u32);

impl MessageType {
    pub const GRPC: MessageType = MessageType(1);
    pub const MQ: MessageType = MessageType(2);
    pub const HTTP: MessageType = MessageType(3);
    pub const TCP: MessageType = MessageType(4);
    /// Events fabricated by [`SimulatedHandler`]
    pub const SIMULATED: MessageType = MessageType(5);
}

/// Descriptor of the system under test, handed to every handler on init
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
}

impl Target {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

/// Result of a single request attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutcomeEvent {
    pub message_type: MessageType,
    pub method: String,
    pub elapsed: Duration,
    pub succeeded: bool,
    pub error_code: i32,
    pub received_bytes: u64,
}

impl OutcomeEvent {
    pub fn success(
        message_type: MessageType,
        method: impl Into<String>,
        elapsed: Duration,
        received_bytes: u64,
    ) -> Self {
        Self {
            message_type,
            method: method.into(),
            elapsed,
            succeeded: true,
            error_code: CODE_OK,
            received_bytes,
        }
    }

    pub fn failure(
        message_type: MessageType,
        method: impl Into<String>,
        elapsed: Duration,
        error_code: i32,
    ) -> Self {
        Self {
            message_type,
            method: method.into(),
            elapsed,
            succeeded: false,
            error_code,
            received_bytes: 0,
        }
    }
}

/// Write side of the bounded outcome stream.
///
/// Every worker owns a clone. The stream closes once the coordinator and all
/// workers have dropped their sinks, so handlers must not keep a sink alive
/// past `release`.
#[derive(Debug, Clone)]
pub struct OutcomeSink {
    sender: mpsc::Sender<OutcomeEvent>,
}

impl OutcomeSink {
    pub fn new(sender: mpsc::Sender<OutcomeEvent>) -> Self {
        Self { sender }
    }

    /// Send an event, waiting while the stream is full
    pub async fn record(&self, event: OutcomeEvent) -> Result<(), HandlerError> {
        self.sender
            .send(event)
            .await
            .map_err(|_| HandlerError::SinkClosed)
    }

    /// Time `attempt`, emit exactly one outcome event for it, and hand back
    /// the attempt's own result.
    ///
    /// The attempt resolves to the number of bytes received on success.
    pub async fn measure<F>(
        &self,
        message_type: MessageType,
        method: &str,
        attempt: F,
    ) -> Result<u64, HandlerError>
    where
        F: Future<Output = Result<u64, HandlerError>> + Send,
    {
        let started = Instant::now();
        let result = attempt.await;
        let elapsed = started.elapsed();

        let event = match &result {
            Ok(bytes) => OutcomeEvent::success(message_type, method, elapsed, *bytes),
            Err(e) => OutcomeEvent::failure(message_type, method, elapsed, e.code()),
        };
        self.record(event).await?;
        result
    }
}

/// Protocol specific request driver.
///
/// One instance is created per worker. The coordinator calls `init` once,
/// then `on_request` the configured number of times, then `release`
/// exactly once, even when `init` failed. Every `on_request` call must emit
/// exactly one outcome event through the sink received in `init`, whether
/// the attempt succeeds or not.
#[async_trait]
pub trait RequestHandler: Send {
    /// Prepare connections and keep the sink for later requests
    async fn init(&mut self, target: &Target, sink: OutcomeSink) -> Result<(), HandlerError>;

    /// Perform one request attempt
    async fn on_request(&mut self) -> Result<(), HandlerError>;

    /// Release held resources. Must be idempotent.
    async fn release(&mut self);

    /// Handler name for identification in logs
    fn name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_measure_emits_success_event() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = OutcomeSink::new(tx);

        let bytes = sink
            .measure(MessageType::HTTP, "GET /", async { Ok(128) })
            .await
            .unwrap();
        assert_eq!(bytes, 128);

        let event = rx.recv().await.unwrap();
        assert!(event.succeeded);
        assert_eq!(event.error_code, CODE_OK);
        assert_eq!(event.received_bytes, 128);
        assert_eq!(event.method, "GET /");
        assert_eq!(event.message_type, MessageType::HTTP);
    }

    #[tokio::test]
    async fn test_measure_emits_failure_event_and_returns_error() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = OutcomeSink::new(tx);

        let result = sink
            .measure(MessageType::TCP, "echo", async {
                Err(HandlerError::Timeout(Duration::from_millis(5)))
            })
            .await;
        assert!(matches!(result, Err(HandlerError::Timeout(_))));

        let event = rx.recv().await.unwrap();
        assert!(!event.succeeded);
        assert_eq!(event.error_code, CODE_TIMEOUT);
        assert_eq!(event.received_bytes, 0);
    }

    #[tokio::test]
    async fn test_record_on_closed_stream() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let sink = OutcomeSink::new(tx);

        let event = OutcomeEvent::success(MessageType::MQ, "m", Duration::ZERO, 0);
        assert!(matches!(
            sink.record(event).await,
            Err(HandlerError::SinkClosed)
        ));
    }

    #[test]
    fn test_error_codes() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "gone");
        assert_eq!(HandlerError::Io(io).code(), CODE_TRANSPORT);
        assert_eq!(HandlerError::Timeout(Duration::from_secs(1)).code(), CODE_TIMEOUT);
        assert_eq!(HandlerError::NotInitialized.code(), CODE_OTHER);
    }
}
