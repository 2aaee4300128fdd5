//! Execution history - the most recent executions, newest first

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;

use crate::constants::MAX_HISTORY;
use crate::models::{Engine, HttpMethod};
use crate::orchestrator::ExecutionOutcome;

/// Summary of one dispatched execution
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub method: HttpMethod,
    pub url: String,
    pub status: u16,
    pub time_ms: f64,
    pub size: String,
    pub engine: Engine,
    pub timestamp: DateTime<Utc>,
}

impl HistoryEntry {
    /// None when the execution never reached dispatch
    pub fn from_outcome(outcome: &ExecutionOutcome) -> Option<Self> {
        let result = outcome.result.as_ref()?;
        Some(HistoryEntry {
            method: outcome.request.method,
            url: outcome.request.url.clone(),
            status: result.status,
            time_ms: result.timings.total,
            size: result.size.clone(),
            engine: result.engine,
            timestamp: Utc::now(),
        })
    }
}

/// Receives a summary of every finished execution
pub trait ResultSink: Send + Sync {
    fn record(&self, entry: HistoryEntry);
}

/// In-memory sink capped at `MAX_HISTORY` entries
#[derive(Debug, Default)]
pub struct History {
    entries: Mutex<VecDeque<HistoryEntry>>,
}

impl History {
    pub fn new() -> Self {
        History {
            entries: Mutex::new(VecDeque::with_capacity(MAX_HISTORY)),
        }
    }

    /// Get history item by index (0 = most recent)
    pub fn get(&self, index: usize) -> Option<HistoryEntry> {
        self.lock().get(index).cloned()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn recent(&self) -> Vec<HistoryEntry> {
        self.lock().iter().cloned().collect()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<HistoryEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ResultSink for History {
    fn record(&self, entry: HistoryEntry) {
        let mut entries = self.lock();
        if entries.len() >= MAX_HISTORY {
            entries.pop_back();
        }
        entries.push_front(entry);
    }
}
