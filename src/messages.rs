//! Engine messages - communication between callers and the engine actor

use crate::orchestrator::{ExecutionOutcome, ExecutionRequest};

/// Commands sent to the engine actor
#[derive(Debug, Clone)]
pub enum EngineCommand {
    /// Run one execution
    Execute {
        id: u64,
        request: Box<ExecutionRequest>,
    },
    /// Cancel a pending execution
    Cancel(u64),
    /// Shutdown the engine actor
    Shutdown,
}

/// Responses sent back by the engine actor
#[derive(Debug)]
pub enum EngineResponse {
    /// Execution ran to an outcome (which may still carry an error)
    Finished {
        id: u64,
        outcome: Box<ExecutionOutcome>,
    },
    /// Execution was cancelled before it finished
    Cancelled { id: u64 },
}

impl EngineResponse {
    /// Get the execution ID from the response
    pub fn id(&self) -> u64 {
        match self {
            EngineResponse::Finished { id, .. } => *id,
            EngineResponse::Cancelled { id } => *id,
        }
    }
}
