//! WebSocket executor - one-shot session against a WebSocket server
//!
//! Sends the request body (if any) as a text frame, takes the first inbound
//! message as the response and closes. The whole session runs under a hard cap.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::time::{sleep_until, timeout_at};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::error::ProtocolError;
use tokio_tungstenite::tungstenite::http::{HeaderName, HeaderValue};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::connect_async;

use super::{elapsed_ms, Transport};
use crate::config::EngineConfig;
use crate::constants::WS_CLOSED_MESSAGE;
use crate::errors::TransportError;
use crate::models::{format_size, parse_body, Engine, ExecutionResult, RequestSpec, TimingBreakdown};

/// Status reported for a completed session (101 Switching Protocols)
const SWITCHING_PROTOCOLS: u16 = 101;

#[derive(Clone, Debug)]
pub struct WebSocketTransport {
    hard_cap: Duration,
    idle_close: Duration,
}

impl WebSocketTransport {
    pub fn new(hard_cap: Duration, idle_close: Duration) -> Self {
        WebSocketTransport { hard_cap, idle_close }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.ws_timeout(), config.ws_idle_close())
    }

    fn handshake_request(
        request: &RequestSpec,
    ) -> Result<tungstenite::handshake::client::Request, TransportError> {
        let mut client_request = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| TransportError::Request(e.to_string()))?;

        for header in &request.headers {
            let name = HeaderName::from_bytes(header.key.as_bytes())
                .map_err(|e| TransportError::Request(format!("Invalid header {}: {}", header.key, e)))?;
            let value = HeaderValue::from_str(&header.value)
                .map_err(|e| TransportError::Request(format!("Invalid header {}: {}", header.key, e)))?;
            client_request.headers_mut().insert(name, value);
        }

        Ok(client_request)
    }
}

/// What ended the session
enum Received {
    Text(String),
    Binary(usize),
    Closed,
}

impl Received {
    fn into_text(self) -> String {
        match self {
            Received::Text(text) => text,
            Received::Binary(len) => format!("[Binary: {} bytes]", len),
            Received::Closed => WS_CLOSED_MESSAGE.to_string(),
        }
    }
}

/// Errors that only mean the peer went away
fn is_closed_error(e: &tungstenite::Error) -> bool {
    matches!(
        e,
        tungstenite::Error::ConnectionClosed
            | tungstenite::Error::AlreadyClosed
            | tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake)
    )
}

#[async_trait]
impl Transport for WebSocketTransport {
    fn engine(&self) -> Engine {
        Engine::WebSocket
    }

    async fn execute(&self, request: &RequestSpec) -> Result<ExecutionResult, TransportError> {
        let start = Instant::now();
        let deadline = tokio::time::Instant::now() + self.hard_cap;
        let client_request = Self::handshake_request(request)?;

        let (ws_stream, response) = match timeout_at(deadline, connect_async(client_request)).await {
            Ok(Ok(pair)) => pair,
            Ok(Err(e)) => return Err(TransportError::Connect(e.to_string())),
            Err(_) => return Err(TransportError::Timeout(self.hard_cap)),
        };

        let headers: BTreeMap<String, String> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let (mut write, mut read) = ws_stream.split();

        // With nothing to send, give the server a moment to speak first
        let mut idle_close = None;
        match request.body.as_ref().filter(|body| !body.is_empty()) {
            Some(body) => {
                write
                    .send(Message::Text(body.to_text()))
                    .await
                    .map_err(|e| TransportError::Request(format!("Send failed: {}", e)))?;
            }
            None => idle_close = Some(tokio::time::Instant::now() + self.idle_close),
        }

        let received = loop {
            tokio::select! {
                biased;

                _ = sleep_until(deadline) => {
                    tracing::debug!(url = %request.url, "websocket session hit the hard cap");
                    break Received::Closed;
                }

                _ = sleep_until(idle_close.unwrap_or(deadline)), if idle_close.is_some() => {
                    idle_close = None;
                    if write.close().await.is_err() {
                        break Received::Closed;
                    }
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => break Received::Text(text),
                        Some(Ok(Message::Binary(data))) => break Received::Binary(data.len()),
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = write.send(Message::Pong(data)).await {
                                tracing::debug!(error = %e, "websocket pong failed");
                            }
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {}
                        Some(Ok(Message::Close(_))) | None => break Received::Closed,
                        Some(Err(e)) if is_closed_error(&e) => break Received::Closed,
                        Some(Err(e)) => {
                            return Err(TransportError::Request(format!("Receive error: {}", e)));
                        }
                    }
                }
            }
        };

        let _ = write.close().await;

        let text = received.into_text();
        Ok(ExecutionResult {
            status: SWITCHING_PROTOCOLS,
            size: format_size(text.len()),
            body: parse_body(&text),
            headers,
            timings: TimingBreakdown::total_only(elapsed_ms(start)),
            engine: Engine::WebSocket,
        })
    }
}
