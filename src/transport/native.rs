//! Native HTTP executor - in-process reqwest client
//!
//! Used when curl is not installed. Only the wall-clock total is measured.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use super::{elapsed_ms, Transport};
use crate::errors::TransportError;
use crate::models::{format_size, parse_body, Engine, ExecutionResult, HttpMethod, RequestSpec, TimingBreakdown};

/// Create an HTTP client with the engine's timeout and no idle connection reuse
pub fn create_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .pool_max_idle_per_host(0)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

#[derive(Clone, Debug)]
pub struct NativeTransport {
    client: reqwest::Client,
    timeout: Duration,
}

impl NativeTransport {
    pub fn new(client: reqwest::Client, timeout: Duration) -> Self {
        NativeTransport { client, timeout }
    }

    /// Build a request from the given parameters
    fn build_request(&self, request: &RequestSpec) -> reqwest::RequestBuilder {
        let client = &self.client;
        let mut req_builder = match request.method {
            HttpMethod::GET => client.get(&request.url),
            HttpMethod::POST => client.post(&request.url),
            HttpMethod::PUT => client.put(&request.url),
            HttpMethod::PATCH => client.patch(&request.url),
            HttpMethod::DELETE => client.delete(&request.url),
        };

        for header in &request.headers {
            req_builder = req_builder.header(&header.key, &header.value);
        }

        if let Some(body) = request.outgoing_body() {
            req_builder = req_builder.body(body);
        }

        req_builder
    }

    fn classify(&self, e: reqwest::Error) -> TransportError {
        if e.is_timeout() {
            TransportError::Timeout(self.timeout)
        } else if e.is_connect() {
            TransportError::Connect(e.to_string())
        } else {
            TransportError::Request(e.to_string())
        }
    }
}

#[async_trait]
impl Transport for NativeTransport {
    fn engine(&self) -> Engine {
        Engine::NativeFetch
    }

    async fn execute(&self, request: &RequestSpec) -> Result<ExecutionResult, TransportError> {
        let start = Instant::now();
        let resp = self
            .build_request(request)
            .send()
            .await
            .map_err(|e| self.classify(e))?;

        let status = resp.status().as_u16();
        let headers: BTreeMap<String, String> = resp
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_lowercase(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();

        let text = resp.text().await.map_err(|e| self.classify(e))?;
        let elapsed = elapsed_ms(start);

        Ok(ExecutionResult {
            status,
            size: format_size(text.len()),
            body: parse_body(&text),
            headers,
            timings: TimingBreakdown::total_only(elapsed),
            engine: Engine::NativeFetch,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RequestBody;
    use wiremock::matchers::{body_string, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport() -> NativeTransport {
        let timeout = Duration::from_secs(30);
        NativeTransport::new(create_client(timeout), timeout)
    }

    #[tokio::test]
    async fn test_json_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/users"))
            .and(header("x-api-key", "k1"))
            .and(body_string(r#"{"name":"kim"}"#))
            .respond_with(
                ResponseTemplate::new(201)
                    .insert_header("X-Trace-Id", "t-1")
                    .set_body_raw(r#"{"id":42}"#, "application/json"),
            )
            .mount(&server)
            .await;

        let request = RequestSpec::new(HttpMethod::POST, format!("{}/users", server.uri()))
            .with_header("X-Api-Key", "k1")
            .with_body(RequestBody::Json(serde_json::json!({"name": "kim"})));
        let result = transport().execute(&request).await.unwrap();

        assert_eq!(result.status, 201);
        assert_eq!(result.body, serde_json::json!({"id": 42}));
        assert_eq!(result.headers.get("x-trace-id").map(String::as_str), Some("t-1"));
        assert_eq!(result.engine, Engine::NativeFetch);
        assert!(result.timings.dns.is_none());
        assert!(result.timings.ttfb.is_none());
    }

    #[tokio::test]
    async fn test_text_body_kept_raw() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("hello"))
            .mount(&server)
            .await;

        let request = RequestSpec::new(HttpMethod::GET, server.uri());
        let result = transport().execute(&request).await.unwrap();

        assert_eq!(result.body, serde_json::Value::String("hello".into()));
        assert_eq!(result.size, "0.00 KB");
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let timeout = Duration::from_millis(200);
        let transport = NativeTransport::new(create_client(timeout), timeout);
        let err = transport
            .execute(&RequestSpec::new(HttpMethod::GET, server.uri()))
            .await
            .unwrap_err();

        assert!(matches!(err, TransportError::Timeout(_)));
        assert_eq!(err.to_string(), "Request timed out (0s)");
    }

    #[tokio::test]
    async fn test_connection_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let request = RequestSpec::new(HttpMethod::GET, format!("http://127.0.0.1:{}/", port));
        let err = transport().execute(&request).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(_)));
    }
}
