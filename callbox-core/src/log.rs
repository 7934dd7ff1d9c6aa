//! Per-call log records.
//!
//! When a call enables logging, the orchestrator emits one [`LogEntry`] per
//! settled operation to the configured [`LogSink`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::method::HttpMethod;

/// How much a call reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Emit nothing.
    None,
    /// Emit timing and status.
    #[default]
    Basic,
    /// Additionally report the serialized response size.
    Verbose,
}

/// Final status of a logged call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    /// The transport produced a response.
    Ok,
    /// The call failed.
    Error,
}

/// Extra detail reported at [`LogLevel::Verbose`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogMeta {
    /// Length in bytes of the JSON-serialized response.
    pub size: usize,
}

/// One settled call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Rendered identity of the call.
    pub key: String,
    /// The verb.
    pub method: HttpMethod,
    /// The endpoint as requested by the caller.
    pub endpoint: String,
    /// When the operation started.
    pub started_at: DateTime<Utc>,
    /// When the operation settled.
    pub finished_at: DateTime<Utc>,
    /// Outcome.
    pub status: LogStatus,
    /// Error description when `status` is [`LogStatus::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Verbose-only detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<LogMeta>,
}

/// Destination for [`LogEntry`] records.
///
/// Implemented for any `Fn(&LogEntry)` closure.
pub trait LogSink: Send + Sync {
    /// Receives one record.
    fn send(&self, entry: &LogEntry);
}

impl<F> LogSink for F
where
    F: Fn(&LogEntry) + Send + Sync,
{
    fn send(&self, entry: &LogEntry) {
        self(entry)
    }
}
