//! Protocol dispatcher - picks the transport for a request and normalizes failures

use std::time::Instant;

use crate::config::EngineConfig;
use crate::errors::TransportError;
use crate::models::{ExecutionResult, Protocol, RequestSpec};
use crate::transport::{
    elapsed_ms, Capabilities, CurlTransport, NativeTransport, RpcTransport, Transport,
    WebSocketTransport,
};

pub struct Dispatcher {
    curl: CurlTransport,
    native: NativeTransport,
    websocket: WebSocketTransport,
    rpc: RpcTransport,
    capabilities: Capabilities,
}

impl Dispatcher {
    /// Build a dispatcher for one execution
    ///
    /// `client` is shared across executions; `capabilities` is probed per execution.
    pub fn new(config: &EngineConfig, client: reqwest::Client, capabilities: Capabilities) -> Self {
        Dispatcher {
            curl: CurlTransport::new(config.curl_binary.clone(), config.http_timeout()),
            native: NativeTransport::new(client, config.http_timeout()),
            websocket: WebSocketTransport::from_config(config),
            rpc: RpcTransport,
            capabilities,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn select(&self, protocol: Protocol) -> &dyn Transport {
        match protocol {
            Protocol::Ws => &self.websocket,
            Protocol::Rpc => &self.rpc,
            Protocol::Http if self.capabilities.curl_available => &self.curl,
            Protocol::Http => &self.native,
        }
    }

    /// Perform the exchange exactly once
    ///
    /// Always yields a result; a failed transport becomes a status-0 result
    /// carrying the error message, with the error returned alongside.
    pub async fn dispatch(&self, request: &RequestSpec) -> (ExecutionResult, Option<TransportError>) {
        let transport = self.select(request.protocol);
        let engine = transport.engine();
        tracing::debug!(protocol = request.protocol.as_str(), %engine, "Dispatching request");

        let start = Instant::now();
        match transport.execute(request).await {
            Ok(result) => (result, None),
            Err(e) => {
                tracing::warn!(%engine, url = %request.url, error = %e, "Transport failed");
                let result = ExecutionResult::transport_failure(engine, e.to_string(), elapsed_ms(start));
                (result, Some(e))
            }
        }
    }
}
