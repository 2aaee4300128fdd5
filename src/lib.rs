//! # Courier
//!
//! Request execution engine for API clients.
//!
//! ## Features
//! - `{{variable}}` substitution in URL, headers and body
//! - Sandboxed pre-request / post-response JavaScript (`pm` API)
//! - HTTP through the curl binary with per-phase timings, or an in-process client
//! - One-shot WebSocket sessions
//! - Uniform result envelope for every transport
//!
//! ## Architecture
//! Actor-based with channels:
//! - Engine actor - receives commands, runs executions concurrently
//! - Orchestrator - per-execution state machine
//! - Dispatcher + transports - one executor per protocol

pub mod actor;
pub mod config;
pub mod constants;
pub mod context;
pub mod dispatch;
pub mod errors;
pub mod history;
pub mod messages;
pub mod models;
pub mod orchestrator;
pub mod resolver;
pub mod script;
pub mod transport;

// Re-export commonly used types
pub use actor::EngineActor;
pub use config::EngineConfig;
pub use context::{ExecutionContext, ExecutionPhase};
pub use dispatch::Dispatcher;
pub use errors::{ConfigError, ExecutionError, ScriptError, TransportError};
pub use history::{History, HistoryEntry, ResultSink};
pub use messages::{EngineCommand, EngineResponse};
pub use models::{
    Engine, ExecutionResult, Header, HttpMethod, Protocol, RequestBody, RequestSpec,
    TimingBreakdown, VariableMap,
};
pub use orchestrator::{ExecutionOutcome, ExecutionRequest, Orchestrator};
pub use script::{ScriptPhase, ScriptSandbox};
pub use transport::{Capabilities, SystemStatus, Transport};
