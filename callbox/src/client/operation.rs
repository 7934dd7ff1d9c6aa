//! Resolution of one call and the bookkeeping around its settlement.

use std::time::Duration;

use callbox_core::{
    CallResult, HttpMethod, LogEntry, LogLevel, LogMeta, LogStatus, RequestKey, TransportRequest,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::cache::TtlCache;
use crate::inflight::InFlightRegistry;
use crate::metrics::{record_call_duration, record_fallback};
use crate::options::{CallOptions, LogOptions, RetryOptions, SharedLogSink};
use crate::scheduler::RateClock;

/// Everything derived from `(endpoint, payload, options)` before dispatch.
#[derive(Debug, Clone)]
pub(crate) struct CallPlan {
    pub(crate) method: HttpMethod,
    pub(crate) key: RequestKey,
    /// Identity in the response cache. Batched calls fold in their payload.
    pub(crate) cache_key: RequestKey,
    /// Identity in the in-flight registry. Absent for raw calls.
    pub(crate) inflight_key: Option<RequestKey>,
    pub(crate) request: TransportRequest,
}

impl CallPlan {
    pub(crate) fn new(endpoint: &str, payload: Option<&Value>, options: &CallOptions) -> Self {
        let method = options.method;
        let body = if method.has_body() {
            options.body.clone().or_else(|| payload.cloned())
        } else {
            None
        };
        let key = RequestKey::new(method, endpoint, &options.params, body.as_ref());
        let cache_key = if options.active_batch().is_some() {
            key.with_payload(payload)
        } else {
            key.clone()
        };
        let inflight_key = (!options.raw).then(|| cache_key.clone());
        let request = TransportRequest {
            method,
            endpoint: endpoint.to_owned(),
            headers: options.headers.clone(),
            params: options.params.clone(),
            body,
        };
        Self {
            method,
            key,
            cache_key,
            inflight_key,
            request,
        }
    }

    /// Key reported in log records.
    pub(crate) fn log_key(&self) -> &RequestKey {
        &self.cache_key
    }

    /// Default buffer key of a batched call.
    pub(crate) fn batch_key(&self) -> String {
        format!("{}:{}", self.method, self.request.endpoint)
    }
}

/// Applies write-through caching, logging and fallback to a settled outcome.
pub(crate) struct Settlement {
    pub(crate) cache_key: RequestKey,
    pub(crate) log_key: String,
    pub(crate) method: HttpMethod,
    pub(crate) endpoint: String,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) started: Instant,
    pub(crate) cache: TtlCache,
    pub(crate) cache_ttl: Option<Duration>,
    pub(crate) log: Option<LogOptions>,
    pub(crate) on_log: Option<SharedLogSink>,
    pub(crate) debug: bool,
    pub(crate) fallback: Option<RetryOptions>,
}

impl Settlement {
    pub(crate) fn settle(self, outcome: CallResult) -> CallResult {
        record_call_duration(self.method.as_str(), outcome.is_ok(), self.started.elapsed());
        match outcome {
            Ok(value) => {
                if let Some(ttl) = self.cache_ttl {
                    self.cache.set(self.cache_key.clone(), value.clone(), ttl);
                }
                self.report(LogStatus::Ok, None, Some(&value));
                Ok(value)
            }
            Err(failure) => {
                self.report(LogStatus::Error, Some(failure.to_string()), None);
                match self.fallback.as_ref().and_then(RetryOptions::fallback) {
                    Some(substitute) => {
                        debug!(error = %failure, "failure replaced by fallback value");
                        record_fallback();
                        Ok(substitute)
                    }
                    None => Err(failure),
                }
            }
        }
    }

    fn report(&self, status: LogStatus, error: Option<String>, value: Option<&Value>) {
        let Some(log) = self.log.as_ref().filter(|log| log.is_active()) else {
            return;
        };
        let meta = match (log.level, value) {
            (LogLevel::Verbose, Some(value)) => Some(LogMeta {
                size: serde_json::to_string(value).map_or(0, |text| text.len()),
            }),
            _ => None,
        };
        let entry = LogEntry {
            key: self.log_key.clone(),
            method: self.method,
            endpoint: self.endpoint.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            status,
            error,
            meta,
        };
        if self.debug {
            match entry.status {
                LogStatus::Ok => debug!(key = %entry.key, size = ?entry.meta.map(|m| m.size), "call settled"),
                LogStatus::Error => error!(key = %entry.key, error = ?entry.error, "call failed"),
            }
        }
        for sink in log.sink.iter().chain(self.on_log.iter()) {
            sink.as_sink().send(&entry);
        }
    }
}

/// Settle-or-cancel bookkeeping: marks the rate clock and frees the
/// in-flight entry when the operation ends, however it ends.
pub(crate) struct Bookkeeping {
    pub(crate) clock: RateClock,
    pub(crate) key: RequestKey,
    pub(crate) registration: Option<(InFlightRegistry, RequestKey, u64)>,
}

impl Drop for Bookkeeping {
    fn drop(&mut self) {
        self.clock.mark(&self.key);
        if let Some((registry, key, id)) = self.registration.take() {
            registry.remove(&key, id);
        }
    }
}
