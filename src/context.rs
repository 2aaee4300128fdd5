//! Execution context - the mutable state threaded through one execution

use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

use crate::models::{ExecutionResult, RequestSpec, VariableMap};

/// Where an execution currently stands
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionPhase {
    Init,
    VariablesResolved,
    PreScript,
    Dispatched,
    PostScript,
    Complete,
    Failed,
}

impl ExecutionPhase {
    /// Allowed edges of the execution state machine
    pub fn can_advance_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        matches!(
            (self, next),
            (Init, VariablesResolved)
                | (VariablesResolved, PreScript)
                | (VariablesResolved, Dispatched)
                | (PreScript, Dispatched)
                | (PreScript, Failed)
                | (Dispatched, PostScript)
                | (Dispatched, Complete)
                | (PostScript, Complete)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Complete | ExecutionPhase::Failed)
    }
}

/// Read-only view of a response for post-response scripts
#[derive(Clone, Debug, PartialEq)]
pub struct ResponseView {
    pub status: u16,
    /// Lower-cased keys
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl ResponseView {
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(&key.to_lowercase()).map(String::as_str)
    }
}

impl From<&ExecutionResult> for ResponseView {
    fn from(result: &ExecutionResult) -> Self {
        ResponseView {
            status: result.status,
            headers: result.headers.clone(),
            body: result.body.clone(),
        }
    }
}

/// Request, response, variables, tests and logs of one execution
#[derive(Clone, Debug)]
pub struct ExecutionContext {
    pub request: RequestSpec,
    pub response: Option<ResponseView>,
    pub variables: VariableMap,
    pub tests: BTreeMap<String, bool>,
    pub logs: Vec<String>,
    phase: ExecutionPhase,
}

impl ExecutionContext {
    pub fn new(request: RequestSpec, variables: VariableMap) -> Self {
        ExecutionContext {
            request,
            response: None,
            variables,
            tests: BTreeMap::new(),
            logs: Vec::new(),
            phase: ExecutionPhase::Init,
        }
    }

    pub fn phase(&self) -> ExecutionPhase {
        self.phase
    }

    /// Move to `next`, rejecting edges the state machine does not have
    pub fn advance(&mut self, next: ExecutionPhase) -> Result<(), String> {
        if !self.phase.can_advance_to(next) {
            return Err(format!("invalid phase transition {:?} -> {:?}", self.phase, next));
        }
        tracing::debug!(from = ?self.phase, to = ?next, "Execution phase");
        self.phase = next;
        Ok(())
    }

    pub fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HttpMethod;

    fn context() -> ExecutionContext {
        ExecutionContext::new(RequestSpec::new(HttpMethod::GET, "http://x"), VariableMap::new())
    }

    #[test]
    fn test_full_path() {
        let mut ctx = context();
        for phase in [
            ExecutionPhase::VariablesResolved,
            ExecutionPhase::PreScript,
            ExecutionPhase::Dispatched,
            ExecutionPhase::PostScript,
            ExecutionPhase::Complete,
        ] {
            ctx.advance(phase).unwrap();
        }
        assert!(ctx.phase().is_terminal());
    }

    #[test]
    fn test_scripts_are_optional() {
        let mut ctx = context();
        ctx.advance(ExecutionPhase::VariablesResolved).unwrap();
        ctx.advance(ExecutionPhase::Dispatched).unwrap();
        ctx.advance(ExecutionPhase::Complete).unwrap();
    }

    #[test]
    fn test_failed_only_from_pre_script() {
        assert!(ExecutionPhase::PreScript.can_advance_to(ExecutionPhase::Failed));
        assert!(!ExecutionPhase::PostScript.can_advance_to(ExecutionPhase::Failed));
        assert!(!ExecutionPhase::Dispatched.can_advance_to(ExecutionPhase::Failed));
        assert!(!ExecutionPhase::Init.can_advance_to(ExecutionPhase::Failed));
    }

    #[test]
    fn test_dispatch_happens_once() {
        let mut ctx = context();
        ctx.advance(ExecutionPhase::VariablesResolved).unwrap();
        ctx.advance(ExecutionPhase::Dispatched).unwrap();
        assert!(ctx.advance(ExecutionPhase::Dispatched).is_err());
        assert!(ctx.advance(ExecutionPhase::PreScript).is_err());
    }

    #[test]
    fn test_response_header_lookup() {
        let mut headers = BTreeMap::new();
        headers.insert("content-type".to_string(), "application/json".to_string());
        let view = ResponseView { status: 200, headers, body: Value::Null };
        assert_eq!(view.header("Content-Type"), Some("application/json"));
    }
}
