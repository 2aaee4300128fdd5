//! Transport layer - one executor per way of putting a request on the wire
//!
//! Every executor implements [`Transport`]; the dispatcher picks one per
//! execution and the orchestrator never branches on transport details.

pub mod curl;
pub mod native;
pub mod probe;
pub mod rpc;
pub mod websocket;

use async_trait::async_trait;

use crate::errors::TransportError;
use crate::models::{Engine, ExecutionResult, RequestSpec};

pub use curl::CurlTransport;
pub use native::NativeTransport;
pub use probe::{probe_capabilities, probe_curl, Capabilities, SystemStatus};
pub use rpc::RpcTransport;
pub use websocket::WebSocketTransport;

/// Performs the network exchange for one protocol family
#[async_trait]
pub trait Transport: Send + Sync {
    /// Tag reported on every result this transport produces
    fn engine(&self) -> Engine;

    /// Perform exactly one exchange for an already-resolved request
    async fn execute(&self, request: &RequestSpec) -> Result<ExecutionResult, TransportError>;
}

/// Milliseconds since `start`, with microsecond resolution
pub(crate) fn elapsed_ms(start: std::time::Instant) -> f64 {
    start.elapsed().as_micros() as f64 / 1000.0
}
