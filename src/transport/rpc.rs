//! RPC executor placeholder
//!
//! Dynamic gRPC invocation needs reflection or descriptor loading, which the
//! engine does not do yet. Requests are answered as unsupported, not failed.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;

use super::Transport;
use crate::constants::RPC_UNAVAILABLE_MESSAGE;
use crate::errors::TransportError;
use crate::models::{format_size, Engine, ExecutionResult, RequestSpec, TimingBreakdown};

#[derive(Clone, Copy, Debug, Default)]
pub struct RpcTransport;

#[async_trait]
impl Transport for RpcTransport {
    fn engine(&self) -> Engine {
        Engine::GrpcStub
    }

    async fn execute(&self, request: &RequestSpec) -> Result<ExecutionResult, TransportError> {
        tracing::debug!(url = %request.url, "rpc invocation not available");
        Ok(ExecutionResult {
            status: 0,
            body: Value::String(RPC_UNAVAILABLE_MESSAGE.to_string()),
            headers: BTreeMap::new(),
            size: format_size(0),
            timings: TimingBreakdown::total_only(0.0),
            engine: Engine::GrpcStub,
        })
    }
}
