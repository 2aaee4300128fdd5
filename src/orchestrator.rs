//! Orchestrator - drives one execution through its phases
//!
//! resolve variables -> pre-request script -> dispatch -> post-response script.
//! Every execution returns an [`ExecutionOutcome`]; nothing here panics or
//! propagates errors past the caller.

use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, HashMap};

use crate::config::EngineConfig;
use crate::context::{ExecutionContext, ExecutionPhase, ResponseView};
use crate::dispatch::Dispatcher;
use crate::errors::ExecutionError;
use crate::models::{ExecutionResult, Protocol, RequestSpec, Variable, VariableMap};
use crate::resolver;
use crate::script::{ScriptPhase, ScriptSandbox};
use crate::transport::native::create_client;
use crate::transport::{probe_capabilities, Capabilities};

/// What the caller asks the engine to run
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    #[serde(flatten)]
    pub request: RequestSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pre_request_script: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_response_script: Option<String>,
    #[serde(default, deserialize_with = "variable_source")]
    pub variables: VariableMap,
}

impl ExecutionRequest {
    pub fn new(request: RequestSpec) -> Self {
        ExecutionRequest {
            request,
            ..Default::default()
        }
    }

    pub fn with_pre_request_script(mut self, script: impl Into<String>) -> Self {
        self.pre_request_script = Some(script.into());
        self
    }

    pub fn with_post_response_script(mut self, script: impl Into<String>) -> Self {
        self.post_response_script = Some(script.into());
        self
    }

    pub fn with_variables(mut self, variables: VariableMap) -> Self {
        self.variables = variables;
        self
    }
}

/// Variables arrive either as a flat map or as environment entries
fn variable_source<'de, D: Deserializer<'de>>(deserializer: D) -> Result<VariableMap, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        Map(HashMap<String, String>),
        Entries(Vec<Variable>),
    }

    Ok(match Option::<Source>::deserialize(deserializer)? {
        Some(Source::Map(map)) => VariableMap::from(map),
        Some(Source::Entries(entries)) => VariableMap::from_entries(entries),
        None => VariableMap::new(),
    })
}

/// The engine's answer for one execution
#[derive(Debug)]
pub struct ExecutionOutcome {
    /// Absent when dispatch never happened
    pub result: Option<ExecutionResult>,
    /// The request as it was (or would have been) sent
    pub request: RequestSpec,
    pub logs: Vec<String>,
    pub tests: BTreeMap<String, bool>,
    pub variables: VariableMap,
    pub error: Option<ExecutionError>,
    pub phase: ExecutionPhase,
}

impl ExecutionOutcome {
    fn from_context(
        ctx: ExecutionContext,
        result: Option<ExecutionResult>,
        error: Option<ExecutionError>,
    ) -> Self {
        ExecutionOutcome {
            phase: ctx.phase(),
            result,
            request: ctx.request,
            logs: ctx.logs,
            tests: ctx.tests,
            variables: ctx.variables,
            error,
        }
    }

    pub fn status(&self) -> Option<u16> {
        self.result.as_ref().map(|r| r.status)
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Flat envelope: dispatch fields first, then the script outputs
impl Serialize for ExecutionOutcome {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        if let Some(result) = &self.result {
            map.serialize_entry("status", &result.status)?;
            map.serialize_entry("body", &result.body)?;
            map.serialize_entry("headers", &result.headers)?;
            map.serialize_entry("size", &result.size)?;
            map.serialize_entry("timings", &result.timings)?;
            map.serialize_entry("engine", &result.engine)?;
        }
        map.serialize_entry("logs", &self.logs)?;
        map.serialize_entry("tests", &self.tests)?;
        map.serialize_entry("variables", &self.variables)?;
        map.serialize_entry("phase", &self.phase)?;
        if let Some(error) = &self.error {
            map.serialize_entry("error", &error.to_string())?;
            map.serialize_entry("errorKind", error.kind())?;
        }
        map.end()
    }
}

/// Runs executions; cheap to share behind an `Arc`
pub struct Orchestrator {
    config: EngineConfig,
    client: reqwest::Client,
    sandbox: ScriptSandbox,
}

impl Orchestrator {
    pub fn new(config: EngineConfig) -> Self {
        Orchestrator {
            client: create_client(config.http_timeout()),
            sandbox: ScriptSandbox::from_config(&config),
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn capabilities(&self) -> Capabilities {
        probe_capabilities(&self.config).await
    }

    /// Execute a request, probing for curl only when the request is HTTP
    pub async fn execute(&self, request: ExecutionRequest) -> ExecutionOutcome {
        let capabilities = match request.request.protocol {
            Protocol::Http => self.capabilities().await,
            Protocol::Ws | Protocol::Rpc => Capabilities::default(),
        };
        self.execute_with(request, capabilities).await
    }

    /// Execute a request against already known capabilities
    pub async fn execute_with(
        &self,
        request: ExecutionRequest,
        capabilities: Capabilities,
    ) -> ExecutionOutcome {
        let ExecutionRequest {
            request,
            pre_request_script,
            post_response_script,
            variables,
        } = request;

        tracing::info!(
            method = %request.method,
            url = %request.url,
            protocol = request.protocol.as_str(),
            "Executing request"
        );

        let mut ctx = ExecutionContext::new(request, variables);
        resolver::resolve_request(&mut ctx.request, &ctx.variables);
        let missing = resolver::unresolved(&ctx.request.url);
        if !missing.is_empty() {
            tracing::debug!(?missing, "Unresolved variables in URL");
        }
        step(&mut ctx, ExecutionPhase::VariablesResolved);

        if let Some(script) = non_empty(pre_request_script.as_deref()) {
            step(&mut ctx, ExecutionPhase::PreScript);
            if let Err(e) = self.sandbox.run(ScriptPhase::PreRequest, script, &mut ctx).await {
                step(&mut ctx, ExecutionPhase::Failed);
                tracing::warn!(error = %e, "Execution aborted before dispatch");
                return ExecutionOutcome::from_context(ctx, None, Some(e.into()));
            }
        }

        let dispatcher = Dispatcher::new(&self.config, self.client.clone(), capabilities);
        let (result, transport_error) = dispatcher.dispatch(&ctx.request).await;
        step(&mut ctx, ExecutionPhase::Dispatched);
        ctx.response = Some(ResponseView::from(&result));

        tracing::info!(
            status = result.status,
            engine = %result.engine,
            total_ms = result.timings.total,
            "Request finished"
        );

        if let Some(e) = transport_error {
            if non_empty(post_response_script.as_deref()).is_some() {
                ctx.log("Post-response script skipped: request failed");
            }
            step(&mut ctx, ExecutionPhase::Complete);
            return ExecutionOutcome::from_context(ctx, Some(result), Some(e.into()));
        }

        if let Some(script) = non_empty(post_response_script.as_deref()) {
            step(&mut ctx, ExecutionPhase::PostScript);
            // Already logged by the sandbox; the response stands
            let _ = self.sandbox.run(ScriptPhase::PostResponse, script, &mut ctx).await;
        }

        step(&mut ctx, ExecutionPhase::Complete);
        ExecutionOutcome::from_context(ctx, Some(result), None)
    }
}

fn non_empty(script: Option<&str>) -> Option<&str> {
    script.filter(|s| !s.trim().is_empty())
}

fn step(ctx: &mut ExecutionContext, next: ExecutionPhase) {
    if let Err(e) = ctx.advance(next) {
        tracing::error!(error = %e, "Execution state machine out of order");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Engine, HttpMethod};
    use serde_json::{json, Value};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn orchestrator() -> Orchestrator {
        Orchestrator::new(EngineConfig::default())
    }

    fn native() -> Capabilities {
        Capabilities::with_curl(false)
    }

    #[test]
    fn test_request_from_json() {
        let json = r#"{
            "method": "GET",
            "url": "http://x/{{id}}",
            "headers": {"Accept": "application/json"},
            "preRequestScript": "console.log('hi')",
            "variables": {"id": "5"}
        }"#;
        let request: ExecutionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.request.url, "http://x/{{id}}");
        assert_eq!(request.request.protocol, Protocol::Http);
        assert_eq!(request.pre_request_script.as_deref(), Some("console.log('hi')"));
        assert_eq!(request.variables.get("id"), Some("5"));
    }

    #[test]
    fn test_request_with_environment_entries() {
        let json = r#"{
            "url": "http://x",
            "variables": [
                {"key": "a", "value": "1"},
                {"key": "b", "value": "2", "enabled": false}
            ]
        }"#;
        let request: ExecutionRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.variables.get("a"), Some("1"));
        assert_eq!(request.variables.get("b"), None);
    }

    #[tokio::test]
    async fn test_pre_request_failure_skips_dispatch() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let request = ExecutionRequest::new(RequestSpec::new(HttpMethod::GET, server.uri()))
            .with_pre_request_script("throw 'boom'");
        let outcome = orchestrator().execute_with(request, native()).await;

        assert!(outcome.result.is_none());
        assert_eq!(outcome.phase, ExecutionPhase::Failed);
        let error = outcome.error.as_ref().unwrap();
        assert_eq!(error.kind(), "script");
        assert!(error.to_string().contains("boom"));
        assert!(!outcome.logs.is_empty());

        let json = serde_json::to_value(&outcome).unwrap();
        assert!(json.get("status").is_none());
        assert_eq!(json["errorKind"], "script");
    }

    #[tokio::test]
    async fn test_full_http_execution() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/5"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("X-Request-Id", "r-9")
                    .set_body_raw(r#"{"id":5,"name":"kim"}"#, "application/json"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let request = ExecutionRequest::new(RequestSpec::new(
            HttpMethod::GET,
            format!("{}/users/{{{{id}}}}", server.uri()),
        ))
        .with_variables([("id", "5")].into_iter().collect())
        .with_pre_request_script("pm.variables.set('seen', pm.request.url);")
        .with_post_response_script(
            r#"
            pm.test('status ok', () => { pm.expect(pm.response.code).to.be(200); });
            pm.test('has name', () => { pm.expect(pm.response.json().name).to.equal('kim'); });
            pm.test('header', () => { pm.expect(pm.response.headers.get('x-request-id')).to.be('r-9'); });
            pm.variables.set('userId', pm.response.json().id);
            "#,
        );
        let outcome = orchestrator().execute_with(request, native()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.phase, ExecutionPhase::Complete);
        assert_eq!(outcome.status(), Some(200));
        assert_eq!(outcome.tests.len(), 3);
        assert!(outcome.tests.values().all(|passed| *passed));
        assert!(outcome.logs.is_empty());
        assert_eq!(outcome.variables.get("userId"), Some("5"));
        assert_eq!(
            outcome.variables.get("seen"),
            Some(format!("{}/users/5", server.uri()).as_str())
        );

        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["engine"], "native-fetch");
        assert_eq!(json["body"], json!({"id": 5, "name": "kim"}));
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn test_curl_execution_end_to_end() {
        if !crate::transport::probe_curl("curl", std::time::Duration::from_secs(5)).await {
            eprintln!("curl not installed, skipping");
            return;
        }

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ping"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(r#"{"pong":true}"#, "application/json"))
            .expect(1)
            .mount(&server)
            .await;

        let request = ExecutionRequest::new(RequestSpec::new(HttpMethod::GET, format!("{}/ping", server.uri())))
            .with_post_response_script("pm.test('pong', () => pm.expect(pm.response.json().pong).to.be(true));");
        let outcome = orchestrator()
            .execute_with(request, Capabilities::with_curl(true))
            .await;

        assert!(outcome.is_success());
        assert_eq!(outcome.tests.get("pong"), Some(&true));
        let result = outcome.result.unwrap();
        assert_eq!(result.engine, Engine::CurlBinary);
        assert_eq!(result.status, 200);
        assert!(result.timings.ttfb.is_some());
        assert!(result.timings.transfer.is_some());
    }

    #[tokio::test]
    async fn test_pre_request_script_changes_request() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/changed"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let request = ExecutionRequest::new(RequestSpec::new(HttpMethod::GET, server.uri()))
            .with_pre_request_script(
                "pm.request.method = 'POST'; pm.request.url = pm.request.url + '/changed';",
            );
        let outcome = orchestrator().execute_with(request, native()).await;

        assert_eq!(outcome.status(), Some(204));
        assert_eq!(outcome.request.method, HttpMethod::POST);
    }

    #[tokio::test]
    async fn test_post_response_failure_keeps_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .mount(&server)
            .await;

        let request = ExecutionRequest::new(RequestSpec::new(HttpMethod::GET, server.uri()))
            .with_post_response_script("pm.test('first', () => {}); undefinedFunction();");
        let outcome = orchestrator().execute_with(request, native()).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.phase, ExecutionPhase::Complete);
        assert_eq!(outcome.status(), Some(200));
        assert_eq!(outcome.tests.get("first"), Some(&true));
        assert!(outcome.logs.iter().any(|l| l.starts_with("Script Error:")));

        let result = outcome.result.as_ref().unwrap();
        assert_eq!(result.body, Value::String("ok".into()));
        assert_eq!(result.size, "0.00 KB");
    }

    #[tokio::test]
    async fn test_transport_failure() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = ExecutionRequest::new(RequestSpec::new(
            HttpMethod::GET,
            format!("http://127.0.0.1:{}/", port),
        ))
        .with_post_response_script("pm.test('never', () => {});");
        let outcome = orchestrator().execute_with(request, native()).await;

        assert_eq!(outcome.status(), Some(0));
        assert_eq!(outcome.error.as_ref().map(|e| e.kind()), Some("transport"));
        assert!(outcome.tests.is_empty());
        assert_eq!(outcome.logs, vec!["Post-response script skipped: request failed"]);
        assert_eq!(outcome.phase, ExecutionPhase::Complete);
    }

    #[tokio::test]
    async fn test_rpc_is_unsupported_not_failed() {
        let request = ExecutionRequest::new(
            RequestSpec::new(HttpMethod::POST, "grpc://localhost:50051").with_protocol(Protocol::Rpc),
        );
        let outcome = orchestrator().execute(request).await;

        assert!(outcome.is_success());
        let result = outcome.result.unwrap();
        assert_eq!(result.status, 0);
        assert_eq!(result.engine, Engine::GrpcStub);
        assert_eq!(
            result.body,
            Value::String("gRPC dynamic invocation is not yet available".into())
        );
    }
}
