use super::{HandlerError, MessageType, OutcomeSink, RequestHandler, Target};
use async_trait::async_trait;
use std::io;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Method label recorded for every echo request
pub const ECHO_METHOD: &str = "echo";

/// Largest frame payload accepted in either direction
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// TCP request/echo handler.
///
/// Each request writes one length-prefixed frame (4 byte little-endian
/// length, then payload) and waits for the peer to send a frame back. The
/// measured latency covers the full exchange; received bytes include the
/// reply's length prefix. A failed exchange drops the connection and the next
/// request reconnects as part of its own measured attempt.
pub struct TcpEchoHandler {
    payload: Vec<u8>,
    timeout: Duration,
    address: Option<String>,
    stream: Option<TcpStream>,
    sink: Option<OutcomeSink>,
}

impl TcpEchoHandler {
    /// Create a handler sending `payload_size` byte frames, bounding each
    /// connect and exchange by `timeout`
    pub fn new(payload_size: usize, timeout: Duration) -> Self {
        Self {
            payload: (0..payload_size).map(|i| (i % 251) as u8).collect(),
            timeout,
            address: None,
            stream: None,
            sink: None,
        }
    }

    /// Accepts `host:port` or `tcp://host:port`
    fn parse_address(target: &Target) -> Result<String, HandlerError> {
        let address = target
            .url
            .strip_prefix("tcp://")
            .unwrap_or(&target.url)
            .trim_end_matches('/');

        match address.rsplit_once(':') {
            Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => {
                Ok(address.to_string())
            }
            _ => Err(HandlerError::InvalidTarget(target.url.clone())),
        }
    }

    async fn connect(address: &str, limit: Duration) -> Result<TcpStream, HandlerError> {
        let stream = match timeout(limit, TcpStream::connect(address)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(HandlerError::Connect {
                    target: address.to_string(),
                    source,
                })
            }
            Err(_) => return Err(HandlerError::Timeout(limit)),
        };
        stream.set_nodelay(true)?;
        Ok(stream)
    }

    async fn exchange(
        stream: &mut TcpStream,
        payload: &[u8],
        limit: Duration,
    ) -> Result<u64, HandlerError> {
        let round_trip = async {
            let len = u32::try_from(payload.len()).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "payload exceeds u32 frame length")
            })?;
            stream.write_all(&len.to_le_bytes()).await?;
            stream.write_all(payload).await?;
            stream.flush().await?;

            let mut len_bytes = [0u8; 4];
            stream.read_exact(&mut len_bytes).await?;
            let reply_len = u32::from_le_bytes(len_bytes) as usize;
            if reply_len > MAX_FRAME_LEN {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!("reply too large: {} bytes", reply_len),
                ));
            }

            let mut reply = vec![0u8; reply_len];
            stream.read_exact(&mut reply).await?;
            Ok::<u64, io::Error>((reply_len + len_bytes.len()) as u64)
        };

        match timeout(limit, round_trip).await {
            Ok(Ok(bytes)) => Ok(bytes),
            Ok(Err(e)) => Err(HandlerError::Io(e)),
            Err(_) => Err(HandlerError::Timeout(limit)),
        }
    }
}

#[async_trait]
impl RequestHandler for TcpEchoHandler {
    async fn init(&mut self, target: &Target, sink: OutcomeSink) -> Result<(), HandlerError> {
        if self.payload.len() > MAX_FRAME_LEN {
            return Err(HandlerError::PayloadTooLarge {
                size: self.payload.len(),
                max: MAX_FRAME_LEN,
            });
        }
        let address = Self::parse_address(target)?;
        let stream = Self::connect(&address, self.timeout).await?;
        debug!("Connected echo handler to {}", address);

        self.address = Some(address);
        self.stream = Some(stream);
        self.sink = Some(sink);
        Ok(())
    }

    async fn on_request(&mut self) -> Result<(), HandlerError> {
        let sink = self.sink.clone().ok_or(HandlerError::NotInitialized)?;

        let result = sink
            .measure(MessageType::TCP, ECHO_METHOD, async {
                if self.stream.is_none() {
                    let address = self.address.as_deref().ok_or(HandlerError::NotInitialized)?;
                    self.stream = Some(Self::connect(address, self.timeout).await?);
                }
                let stream = self.stream.as_mut().ok_or(HandlerError::NotInitialized)?;
                Self::exchange(stream, &self.payload, self.timeout).await
            })
            .await;

        if result.is_err() {
            self.stream = None;
        }
        result.map(|_| ())
    }

    async fn release(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        self.sink = None;
    }

    fn name(&self) -> &'static str {
        "tcp-echo"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address() {
        let plain = Target::new("127.0.0.1:9000");
        assert_eq!(TcpEchoHandler::parse_address(&plain).unwrap(), "127.0.0.1:9000");

        let scheme = Target::new("tcp://localhost:7/");
        assert_eq!(TcpEchoHandler::parse_address(&scheme).unwrap(), "localhost:7");

        assert!(TcpEchoHandler::parse_address(&Target::new("localhost")).is_err());
        assert!(TcpEchoHandler::parse_address(&Target::new(":80")).is_err());
        assert!(TcpEchoHandler::parse_address(&Target::new("host:http")).is_err());
    }

    #[tokio::test]
    async fn test_request_before_init() {
        let mut handler = TcpEchoHandler::new(8, Duration::from_millis(100));
        assert!(matches!(
            handler.on_request().await,
            Err(HandlerError::NotInitialized)
        ));
        handler.release().await;
        handler.release().await;
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected_before_connecting() {
        let (tx, _rx) = tokio::sync::mpsc::channel(1);
        let mut handler = TcpEchoHandler::new(MAX_FRAME_LEN + 1, Duration::from_millis(100));
        let result = handler
            .init(&Target::new("127.0.0.1:9"), OutcomeSink::new(tx))
            .await;
        assert!(matches!(
            result,
            Err(HandlerError::PayloadTooLarge { size, max }) if size == MAX_FRAME_LEN + 1 && max == MAX_FRAME_LEN
        ));
    }
}
