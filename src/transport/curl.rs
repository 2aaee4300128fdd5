//! External-process HTTP executor - runs the `curl` binary
//!
//! curl is asked to print the raw response (`-i`) followed by a write-out
//! tuple of its own per-phase timers, separated by [`WRITE_OUT_MARKER`].

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

use super::{elapsed_ms, Transport};
use crate::constants::{WRITE_OUT_FORMAT, WRITE_OUT_MARKER};
use crate::errors::TransportError;
use crate::models::{format_size, parse_body, Engine, ExecutionResult, RequestSpec, TimingBreakdown};

static STATUS_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^HTTP/[\d.]+ (\d+)").expect("status line pattern is valid"));

/// Program and argument vector for one curl run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurlInvocation {
    pub program: String,
    pub args: Vec<String>,
}

impl CurlInvocation {
    /// Build the invocation for an already-resolved request
    pub fn for_request(program: &str, request: &RequestSpec, timeout: Duration) -> Self {
        let mut args: Vec<String> = vec![
            "-i".into(),
            "-s".into(),
            "-S".into(),
            "--max-time".into(),
            timeout.as_secs().max(1).to_string(),
            "-X".into(),
            request.method.as_str().into(),
            "--url".into(),
            request.url.clone(),
        ];

        for header in &request.headers {
            args.push("-H".into());
            args.push(format!("{}: {}", header.key, header.value));
        }

        if let Some(body) = request.outgoing_body() {
            args.push("--data-raw".into());
            args.push(body);
        }

        args.push("-w".into());
        args.push(format!("{}{}", WRITE_OUT_MARKER, WRITE_OUT_FORMAT));

        CurlInvocation {
            program: program.to_string(),
            args,
        }
    }

    /// Shell-quoted rendering of the invocation, for logs
    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .map(shell_quote)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Single-quote `arg` for a POSIX shell unless it is plainly safe
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./:=@,+".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', "'\\''"))
    }
}

/// curl's write-out tuple, in seconds except for the byte count
#[derive(Clone, Debug, PartialEq)]
pub struct WriteOut {
    pub namelookup: f64,
    pub connect: f64,
    pub appconnect: f64,
    pub pretransfer: f64,
    pub redirect: f64,
    pub starttransfer: f64,
    pub total: f64,
    pub size_download: u64,
}

impl WriteOut {
    pub fn parse(tuple: &str) -> Option<Self> {
        let fields: Vec<&str> = tuple.trim().split('|').map(str::trim).collect();
        if fields.len() != 8 {
            return None;
        }
        let secs = |i: usize| fields[i].parse::<f64>().ok().filter(|v| v.is_finite());

        Some(WriteOut {
            namelookup: secs(0)?,
            connect: secs(1)?,
            appconnect: secs(2)?,
            pretransfer: secs(3)?,
            redirect: secs(4)?,
            starttransfer: secs(5)?,
            total: secs(6)?,
            size_download: fields[7].parse().ok()?,
        })
    }

    /// Sub-phase deltas in milliseconds
    ///
    /// curl reports cumulative timers; the deltas are clamped at zero because
    /// redirects and reused connections can make them non-monotonic.
    pub fn timings(&self) -> TimingBreakdown {
        let dns = to_ms(self.namelookup);
        let connect = to_ms(self.connect);
        let appconnect = to_ms(self.appconnect);
        let ttfb = to_ms(self.starttransfer);
        let total = to_ms(self.total);

        TimingBreakdown {
            dns: Some(dns),
            tcp: Some(round_ms((connect - dns).max(0.0))),
            tls: Some(round_ms((appconnect - connect).max(0.0))),
            ttfb: Some(ttfb),
            transfer: Some(round_ms((total - ttfb).max(0.0))),
            total,
        }
    }
}

fn to_ms(seconds: f64) -> f64 {
    round_ms(seconds * 1000.0)
}

/// curl's timers have microsecond resolution; drop float noise below that
fn round_ms(ms: f64) -> f64 {
    (ms * 1000.0).round() / 1000.0
}

/// A response reconstructed from curl's stdout
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedOutput {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
    pub size: String,
    /// `None` when the write-out tuple is missing or malformed
    pub timings: Option<TimingBreakdown>,
}

/// Parse curl's stdout: raw response, marker, write-out tuple
pub fn parse_output(stdout: &str) -> ParsedOutput {
    let (raw, tuple) = match stdout.rsplit_once(WRITE_OUT_MARKER) {
        Some((raw, tuple)) => (raw, Some(tuple)),
        None => (stdout, None),
    };

    let (head, body) = split_response(raw);

    ParsedOutput {
        status: parse_status(head),
        headers: parse_headers(head),
        body: parse_body(body),
        size: format_size(body.len()),
        timings: tuple.and_then(WriteOut::parse).map(|w| w.timings()),
    }
}

/// Split at the first blank line: CRLFCRLF, then LFLF, else everything is head
fn split_head(text: &str) -> (&str, Option<&str>) {
    if let Some(i) = text.find("\r\n\r\n") {
        return (&text[..i], Some(&text[i + 4..]));
    }
    if let Some(i) = text.find("\n\n") {
        return (&text[..i], Some(&text[i + 2..]));
    }
    (text, None)
}

/// Head and body of the final response, skipping interim 1xx blocks
fn split_response(raw: &str) -> (&str, &str) {
    let mut rest = raw;
    loop {
        match split_head(rest) {
            (head, Some(body)) if is_interim(head) && body.starts_with("HTTP/") => rest = body,
            (head, Some(body)) => return (head, body),
            (head, None) => return (head, ""),
        }
    }
}

fn status_code(head: &str) -> Option<u16> {
    let first_line = head.lines().next()?;
    STATUS_LINE
        .captures(first_line.trim())
        .and_then(|caps| caps[1].parse().ok())
}

fn is_interim(head: &str) -> bool {
    matches!(status_code(head), Some(code) if (100..200).contains(&code) && code != 101)
}

fn parse_status(head: &str) -> u16 {
    status_code(head).unwrap_or(200)
}

fn parse_headers(head: &str) -> BTreeMap<String, String> {
    head.lines()
        .skip(1)
        .filter_map(|line| line.split_once(':'))
        .map(|(key, value)| (key.trim().to_lowercase(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}

/// Runs requests through the external curl binary
#[derive(Clone, Debug)]
pub struct CurlTransport {
    binary: String,
    timeout: Duration,
}

impl CurlTransport {
    pub fn new(binary: impl Into<String>, timeout: Duration) -> Self {
        CurlTransport {
            binary: binary.into(),
            timeout,
        }
    }

    fn classify_exit(&self, code: Option<i32>, stderr: &str) -> TransportError {
        let detail = if stderr.is_empty() {
            match code {
                Some(code) => format!("exit code {}", code),
                None => "terminated by signal".to_string(),
            }
        } else {
            stderr.to_string()
        };
        match code {
            // 6: could not resolve host, 7: could not connect
            Some(6) | Some(7) => TransportError::Connect(detail),
            Some(28) => TransportError::Timeout(self.timeout),
            _ => TransportError::Process(detail),
        }
    }
}

#[async_trait]
impl Transport for CurlTransport {
    fn engine(&self) -> Engine {
        Engine::CurlBinary
    }

    async fn execute(&self, request: &RequestSpec) -> Result<ExecutionResult, TransportError> {
        let invocation = CurlInvocation::for_request(&self.binary, request, self.timeout);
        tracing::debug!(command = %invocation.command_line(), "Spawning curl");

        let start = Instant::now();
        let child = Command::new(&invocation.program)
            .args(&invocation.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the child on timeout kills the process
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => return Err(TransportError::Timeout(self.timeout)),
        };
        let elapsed = elapsed_ms(start);

        let stdout = String::from_utf8_lossy(&output.stdout);

        // A failed run that still produced a response (e.g. cut off mid-body) is parsed
        if !output.status.success() && !stdout.starts_with("HTTP/") {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(self.classify_exit(output.status.code(), stderr.trim()));
        }

        let parsed = parse_output(&stdout);

        Ok(ExecutionResult {
            status: parsed.status,
            body: parsed.body,
            headers: parsed.headers,
            size: parsed.size,
            timings: parsed
                .timings
                .unwrap_or_else(|| TimingBreakdown::total_only(elapsed)),
            engine: Engine::CurlBinary,
        })
    }
}
