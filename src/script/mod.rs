//! Script sandbox - pre-request and post-response JavaScript
//!
//! Each evaluation gets a fresh QuickJS runtime on a blocking worker thread.
//! The runtime's interrupt handler enforces the time budget, so a runaway loop
//! is stopped by the engine rather than by the script's cooperation.
//!
//! Scripts see only the `pm` and `console` objects built by `prelude.js`:
//! no filesystem, network or process bindings exist in the context.

mod host;

use rquickjs::{Context, Ctx, Exception, Function, Runtime, Value};
use std::cell::RefCell;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::context::ExecutionContext;
use crate::errors::ScriptError;

pub use host::SandboxState;

const PRELUDE: &str = include_str!("prelude.js");

/// Which side of the dispatch a script runs on
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptPhase {
    PreRequest,
    PostResponse,
}

impl ScriptPhase {
    pub fn as_str(&self) -> &str {
        match self {
            ScriptPhase::PreRequest => "pre-request",
            ScriptPhase::PostResponse => "post-response",
        }
    }
}

/// Evaluates user scripts under a time and memory budget
#[derive(Clone, Debug)]
pub struct ScriptSandbox {
    timeout: Duration,
    memory_limit: usize,
}

impl ScriptSandbox {
    pub fn new(timeout: Duration, memory_limit: usize) -> Self {
        ScriptSandbox { timeout, memory_limit }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(config.script_timeout(), config.script_memory_limit)
    }

    /// Run `source` against `ctx`
    ///
    /// Request, variable, test and log changes are applied to `ctx` even when
    /// the script fails part-way; on failure a `Script Error:` line is logged.
    pub async fn run(
        &self,
        phase: ScriptPhase,
        source: &str,
        ctx: &mut ExecutionContext,
    ) -> Result<(), ScriptError> {
        let state = SandboxState::capture(ctx);
        let source = source.to_string();
        let (timeout, memory_limit) = (self.timeout, self.memory_limit);

        let joined =
            tokio::task::spawn_blocking(move || evaluate(&source, state, timeout, memory_limit)).await;

        let result = match joined {
            Ok((state, result)) => match state.write_back(ctx) {
                Ok(()) => result,
                Err(invalid) => result.and(Err(invalid)),
            },
            Err(e) => Err(ScriptError::Setup(e.to_string())),
        };

        if let Err(e) = &result {
            tracing::warn!(phase = phase.as_str(), error = %e, "Script failed");
            ctx.log(format!("Script Error: {}", e));
        }
        result
    }
}

impl Default for ScriptSandbox {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

/// Evaluate on the current thread, returning the final state alongside the outcome
fn evaluate(
    source: &str,
    state: SandboxState,
    timeout: Duration,
    memory_limit: usize,
) -> (SandboxState, Result<(), ScriptError>) {
    let shared = Rc::new(RefCell::new(state));
    let result = run_isolated(source, &shared, timeout, memory_limit);
    let state = match Rc::try_unwrap(shared) {
        Ok(cell) => cell.into_inner(),
        Err(shared) => shared.borrow().clone(),
    };
    (state, result)
}

fn run_isolated(
    source: &str,
    state: &Rc<RefCell<SandboxState>>,
    timeout: Duration,
    memory_limit: usize,
) -> Result<(), ScriptError> {
    let setup = |e: rquickjs::Error| ScriptError::Setup(e.to_string());

    let runtime = Runtime::new().map_err(setup)?;
    runtime.set_memory_limit(memory_limit);
    runtime.set_max_stack_size(1024 * 1024);

    let deadline = Instant::now() + timeout;
    let expired = Arc::new(AtomicBool::new(false));
    let flag = expired.clone();
    runtime.set_interrupt_handler(Some(Box::new(move || {
        if Instant::now() >= deadline {
            flag.store(true, Ordering::SeqCst);
            true
        } else {
            false
        }
    })));

    let context = Context::full(&runtime).map_err(setup)?;
    let outcome = context.with(|ctx| -> Result<(), ScriptError> {
        let bridge = host::install(&ctx, state).map_err(setup)?;
        let bootstrap: Function = ctx
            .eval(PRELUDE)
            .map_err(|e| ScriptError::Setup(describe_error(&ctx, e)))?;
        bootstrap
            .call::<_, Value>((bridge,))
            .map_err(|e| ScriptError::Setup(describe_error(&ctx, e)))?;

        ctx.eval::<Value, _>(source)
            .map(|_| ())
            .map_err(|e| ScriptError::Thrown(describe_error(&ctx, e)))
    });

    if expired.load(Ordering::SeqCst) {
        return Err(ScriptError::Timeout(timeout));
    }
    outcome
}

/// Human-readable text for whatever the script threw
fn describe_error(ctx: &Ctx<'_>, error: rquickjs::Error) -> String {
    if !matches!(error, rquickjs::Error::Exception) {
        return error.to_string();
    }

    let thrown = ctx.catch();
    if let Some(object) = thrown.as_object() {
        if let Some(exception) = Exception::from_object(object.clone()) {
            let message = exception.message().unwrap_or_default();
            let name: Option<String> = object.get("name").ok();
            return match name.as_deref() {
                Some("Error") | None => message,
                Some(name) => format!("{}: {}", name, message),
            };
        }
    }
    if let Some(text) = thrown.as_string().and_then(|s| s.to_string().ok()) {
        return text;
    }
    if let Some(n) = thrown.as_int() {
        return n.to_string();
    }
    if let Some(n) = thrown.as_float() {
        return n.to_string();
    }
    if let Some(b) = thrown.as_bool() {
        return b.to_string();
    }
    "Uncaught exception".to_string()
}
