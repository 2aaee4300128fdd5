//! courier - run one request through the execution engine
//!
//! Reads an execution request (JSON) from a file or stdin, executes it and
//! prints the outcome envelope as JSON.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tokio::sync::mpsc;

use courier::constants::{APP_VERSION, LOG_FILE_NAME};
use courier::{
    EngineActor, EngineCommand, EngineConfig, EngineResponse, ExecutionRequest, Orchestrator,
    SystemStatus,
};

const EXECUTION_ID: u64 = 1;

#[derive(Parser, Debug)]
#[command(name = "courier", version, about = "Execute an API request with scripts and timings")]
struct Cli {
    /// Config file (defaults to ~/.courier/config.yaml when present)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Report whether curl is available and which HTTP engine is active
    #[arg(long)]
    status: bool,

    /// Request JSON file; stdin when omitted
    #[arg(value_name = "REQUEST")]
    request: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Initialize logging to file
    let file_appender = tracing_appender::rolling::never(".", LOG_FILE_NAME);
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_ansi(false)
        .init();

    let cli = Cli::parse();
    tracing::info!(version = APP_VERSION, "courier starting");

    let config = load_config(cli.config.as_deref())?;
    let orchestrator = Arc::new(Orchestrator::new(config));

    if cli.status {
        let status = SystemStatus::from(orchestrator.capabilities().await);
        println!("{}", serde_json::to_string_pretty(&status)?);
        return Ok(ExitCode::SUCCESS);
    }

    let request = read_request(cli.request.as_deref())?;

    // Spawn engine actor
    let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<EngineCommand>();
    let (resp_tx, mut resp_rx) = mpsc::unbounded_channel::<EngineResponse>();
    tokio::spawn(EngineActor::new(orchestrator, resp_tx).run(cmd_rx));

    cmd_tx.send(EngineCommand::Execute {
        id: EXECUTION_ID,
        request: Box::new(request),
    })?;

    let exit = loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                let _ = cmd_tx.send(EngineCommand::Cancel(EXECUTION_ID));
            }
            response = resp_rx.recv() => {
                match response {
                    Some(EngineResponse::Finished { outcome, .. }) => {
                        println!("{}", serde_json::to_string_pretty(&outcome)?);
                        break if outcome.is_success() { ExitCode::SUCCESS } else { ExitCode::FAILURE };
                    }
                    Some(EngineResponse::Cancelled { .. }) => {
                        eprintln!("Execution cancelled");
                        break ExitCode::from(130);
                    }
                    None => anyhow::bail!("engine stopped before finishing the request"),
                }
            }
        }
    };

    let _ = cmd_tx.send(EngineCommand::Shutdown);
    Ok(exit)
}

/// Explicit config must load; the default location is optional
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => Ok(EngineConfig::load(path)?),
        None => {
            let default = EngineConfig::default_path();
            if default.exists() {
                Ok(EngineConfig::load(&default)?)
            } else {
                Ok(EngineConfig::default())
            }
        }
    }
}

fn read_request(path: Option<&Path>) -> Result<ExecutionRequest> {
    let content = match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read request file {}", path.display()))?,
        None => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("Failed to read request from stdin")?;
            buffer
        }
    };
    serde_json::from_str(&content).context("Invalid request JSON")
}
