#![doc = include_str!("../README.md")]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

/// Time-bounded response cache.
pub mod cache;

/// Client-wide defaults.
pub mod config;

/// Sharing of identical in-flight operations.
pub mod inflight;

/// Metrics collection for call observability.
///
/// When the `metrics` feature is enabled, this module provides counters
/// and histograms for cache hits, shared calls, transport invocations,
/// retries, timeouts, fallbacks, batch flushes and call latency.
pub mod metrics;

/// Per-call options.
pub mod options;

/// Priority admission queue.
pub mod queue;

/// Timeout, retry and backoff.
pub mod retry;

/// Debounce and rate-limit pacing.
pub mod scheduler;

/// Multi-caller batching.
pub mod batcher;

mod client;

pub use cache::TtlCache;
pub use client::{CallHandle, Client, ClientBuilder, NotSet};
pub use config::{ClientConfig, ClientConfigBuilder, ConcurrencyLimit};
pub use options::CallOptions;
pub use queue::{AdmissionPermit, AdmissionQueue};

pub use callbox_core::{
    CallError, CallResult, Headers, HttpMethod, LogEntry, LogLevel, LogMeta, LogSink, LogStatus,
    Params, RequestKey, Transport, TransportError, TransportRequest, ValidationError, fingerprint,
};
