#![warn(missing_docs)]
//! # callbox-core
//!
//! Core traits and types for the callbox request orchestration layer.
//!
//! This crate holds the pieces every other callbox crate agrees on:
//!
//! - **Identify** calls with canonical fingerprints ([`fingerprint()`], [`RequestKey`])
//! - **Describe** a single network call ([`TransportRequest`], [`HttpMethod`])
//! - **Issue** it through a pluggable [`Transport`]
//! - **Report** outcomes ([`CallError`], [`TransportError`], [`LogEntry`])
//!
//! The policy engine itself (caching, deduplication, pacing, admission control,
//! batching and retries) lives in the `callbox` crate.

pub mod error;
pub mod fingerprint;
pub mod key;
pub mod log;
pub mod method;
pub mod transport;

pub use error::{CallError, TransportError, ValidationError};
pub use fingerprint::{NULL_SENTINEL, fingerprint, fingerprint_opt};
pub use key::RequestKey;
pub use log::{LogEntry, LogLevel, LogMeta, LogSink, LogStatus};
pub use method::HttpMethod;
pub use transport::{Headers, Params, Transport, TransportRequest};

#[doc(hidden)]
pub use smol_str::SmolStr;

/// Outcome of a single orchestrated call.
pub type CallResult = Result<serde_json::Value, CallError>;
