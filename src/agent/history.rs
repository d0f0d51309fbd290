//! Execution history management
//!
//! A capacity-bounded ring buffer of execution records, oldest evicted
//! first. Timestamps are clamped on append so they never go backwards even
//! if the wall clock does.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::PageSnapshot;
use crate::core::Instruction;

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl StepResult {
    pub fn success(data: Option<Value>, duration_ms: u64) -> Self {
        Self {
            data,
            error: None,
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn failure(error: impl Into<String>, duration_ms: u64) -> Self {
        Self {
            data: None,
            error: Some(error.into()),
            duration_ms,
            timestamp: Utc::now(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// One executed (or attempted) step
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    /// Absent when the step failed before an instruction was obtained
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instruction: Option<Instruction>,
    /// Snapshot the instruction was planned against
    #[serde(skip)]
    pub snapshot_before: Option<Arc<PageSnapshot>>,
    pub result: StepResult,
    /// Whether the instruction came from the supervisor
    pub corrective: bool,
}

impl ExecutionRecord {
    pub fn new(
        instruction: Option<Instruction>,
        snapshot_before: Option<Arc<PageSnapshot>>,
        result: StepResult,
    ) -> Self {
        Self {
            instruction,
            snapshot_before,
            result,
            corrective: false,
        }
    }

    /// Mark as a supervisor-issued step
    pub fn corrective(mut self) -> Self {
        self.corrective = true;
        self
    }

    /// Url of the page the step started on
    pub fn page_url(&self) -> Option<&str> {
        self.snapshot_before.as_deref().map(|s| s.url.as_str())
    }

    /// Compact form sent to the oracle
    pub fn to_prompt_value(&self) -> Value {
        let mut value = serde_json::to_value(self).unwrap_or(Value::Null);
        if let (Some(fields), Some(url)) = (value.as_object_mut(), self.page_url()) {
            fields.insert("pageUrl".to_string(), Value::String(url.to_string()));
        }
        value
    }
}

/// Bounded, append-only, time-ordered history
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    records: VecDeque<ExecutionRecord>,
    capacity: usize,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ExecutionHistory {
    /// Create a history holding at most `capacity` records (minimum 1)
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            last_timestamp: None,
        }
    }

    /// Append, evicting the oldest record when full
    pub fn push(&mut self, mut record: ExecutionRecord) {
        if let Some(last) = self.last_timestamp {
            if record.result.timestamp < last {
                record.result.timestamp = last;
            }
        }
        self.last_timestamp = Some(record.result.timestamp);

        self.records.push_back(record);
        while self.records.len() > self.capacity {
            self.records.pop_front();
        }
    }

    /// The `k` most recent records, oldest first
    pub fn recent(&self, k: usize) -> Vec<&ExecutionRecord> {
        let skip = self.records.len().saturating_sub(k);
        self.records.iter().skip(skip).collect()
    }

    pub fn last(&self) -> Option<&ExecutionRecord> {
        self.records.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ExecutionRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Consume into a vector, oldest first
    pub fn into_vec(self) -> Vec<ExecutionRecord> {
        self.records.into()
    }
}
