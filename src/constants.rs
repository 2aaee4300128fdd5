//! Engine constants
//!
//! Centralized location for magic strings and configuration defaults.

/// Default external HTTP client binary
pub const DEFAULT_CURL_BINARY: &str = "curl";

/// Overall timeout for HTTP-style transports
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Timeout for the `curl --version` capability probe
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

/// Hard ceiling for a WebSocket session
pub const DEFAULT_WS_TIMEOUT_SECS: u64 = 10;

/// Delay before closing a WebSocket when there is nothing to send
pub const DEFAULT_WS_IDLE_CLOSE_MS: u64 = 1000;

/// Time budget for a single script evaluation
pub const DEFAULT_SCRIPT_TIMEOUT_MS: u64 = 1000;

/// Memory ceiling for a script runtime (64 MiB)
pub const DEFAULT_SCRIPT_MEMORY_LIMIT: usize = 64 * 1024 * 1024;

/// Separates curl's response output from the write-out tuple
///
/// Must not start with `@`: curl reads such a `-w` value as a file name.
pub const WRITE_OUT_MARKER: &str = "\n__COURIER_WRITE_OUT__";

/// curl write-out variables, in the order the parser expects them
pub const WRITE_OUT_FORMAT: &str = "%{time_namelookup}|%{time_connect}|%{time_appconnect}|%{time_pretransfer}|%{time_redirect}|%{time_starttransfer}|%{time_total}|%{size_download}";

/// Body reported by the RPC stub
pub const RPC_UNAVAILABLE_MESSAGE: &str = "gRPC dynamic invocation is not yet available";

/// Body reported when a WebSocket closes before any message arrives
pub const WS_CLOSED_MESSAGE: &str = "Connection closed";

/// Maximum number of history entries kept in memory
pub const MAX_HISTORY: usize = 50;

/// Log file written by the binary
pub const LOG_FILE_NAME: &str = "courier.log";

/// Application version
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");
