//! Capability probe - is the external HTTP client installed?

use serde::Serialize;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::config::EngineConfig;
use crate::models::Engine;

/// Runtime capabilities, produced once per execution and injected into the dispatcher
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub curl_available: bool,
}

impl Capabilities {
    pub fn with_curl(curl_available: bool) -> Self {
        Capabilities { curl_available }
    }

    /// Transport that HTTP requests will go through
    pub fn http_engine(&self) -> Engine {
        if self.curl_available {
            Engine::CurlBinary
        } else {
            Engine::NativeFetch
        }
    }
}

/// Health summary reported by `courier --status`
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemStatus {
    pub curl: bool,
    pub active_engine: Engine,
}

impl From<Capabilities> for SystemStatus {
    fn from(capabilities: Capabilities) -> Self {
        SystemStatus {
            curl: capabilities.curl_available,
            active_engine: capabilities.http_engine(),
        }
    }
}

pub async fn probe_capabilities(config: &EngineConfig) -> Capabilities {
    Capabilities::with_curl(probe_curl(&config.curl_binary, config.probe_timeout()).await)
}

/// Run `<binary> --version`; anything but a timely zero exit means unavailable
pub async fn probe_curl(binary: &str, timeout: Duration) -> bool {
    let status = Command::new(binary)
        .arg("--version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .status();

    match tokio::time::timeout(timeout, status).await {
        Ok(Ok(status)) => status.success(),
        Ok(Err(e)) => {
            tracing::debug!(binary, error = %e, "curl not available");
            false
        }
        Err(_) => {
            tracing::debug!(binary, "curl probe timed out");
            false
        }
    }
}
