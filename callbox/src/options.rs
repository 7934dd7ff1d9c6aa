//! Per-call options.
//!
//! [`CallOptions`] is an immutable snapshot handed to every call. Each policy
//! reads its own section: caching, pacing, retry, timeout, batching, admission
//! and logging. Everything except the callback fields deserializes with serde,
//! durations in humantime form (`"300ms"`, `"30s"`).
//!
//! ```
//! use std::time::Duration;
//! use callbox::options::{Backoff, CallOptions, RetryOptions};
//!
//! let options = CallOptions::new()
//!     .cache_for(Duration::from_secs(30))
//!     .timeout(Duration::from_secs(5))
//!     .retry(RetryOptions::new(2).backoff(Backoff::Exponential));
//! assert!(options.validate("/posts").is_ok());
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use callbox_core::{CallError, Headers, HttpMethod, LogLevel, LogSink, Params, ValidationError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Decides whether a failed attempt is retried.
#[derive(Clone)]
pub struct RetryPredicate(Arc<dyn Fn(&CallError) -> bool + Send + Sync>);

impl RetryPredicate {
    /// Wraps a predicate closure.
    pub fn new(predicate: impl Fn(&CallError) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// Evaluates the predicate.
    pub fn check(&self, error: &CallError) -> bool {
        (self.0)(error)
    }
}

/// Produces a substitute value for a terminally failed call.
#[derive(Clone)]
pub struct FallbackFactory(Arc<dyn Fn() -> Value + Send + Sync>);

impl FallbackFactory {
    /// Wraps a factory closure.
    pub fn new(factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(factory))
    }

    /// Produces a value.
    pub fn produce(&self) -> Value {
        (self.0)()
    }
}

/// Folds the payloads of a batch wave into one combined value.
#[derive(Clone)]
pub struct CombineFn(Arc<dyn Fn(Vec<Value>) -> Value + Send + Sync>);

impl CombineFn {
    /// Wraps a combine closure.
    pub fn new(combine: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) -> Self {
        Self(Arc::new(combine))
    }

    /// Combines `payloads`.
    pub fn combine(&self, payloads: Vec<Value>) -> Value {
        (self.0)(payloads)
    }
}

/// Picks one item's value out of a combined batch response.
///
/// Receives `(response, payload, index)`. An `Err` fails only that item.
#[derive(Clone)]
pub struct SelectorFn(Arc<dyn Fn(&Value, &Value, usize) -> Result<Value, String> + Send + Sync>);

impl SelectorFn {
    /// Wraps a selector closure.
    pub fn new(
        selector: impl Fn(&Value, &Value, usize) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self(Arc::new(selector))
    }

    /// Selects the value for the item at `index`.
    pub fn select(&self, response: &Value, payload: &Value, index: usize) -> Result<Value, String> {
        (self.0)(response, payload, index)
    }
}

/// Shared handle to a [`LogSink`].
#[derive(Clone)]
pub struct SharedLogSink(Arc<dyn LogSink>);

impl SharedLogSink {
    /// Wraps a sink.
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self(Arc::new(sink))
    }

    pub(crate) fn as_sink(&self) -> &dyn LogSink {
        self.0.as_ref()
    }
}

macro_rules! opaque_debug {
    ($($name:ident),*) => {
        $(impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(concat!(stringify!($name), "(..)"))
            }
        })*
    };
}

opaque_debug!(
    RetryPredicate,
    FallbackFactory,
    CombineFn,
    SelectorFn,
    SharedLogSink
);

/// Wait-time formula between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backoff {
    /// `base * attempt`
    Linear,
    /// `base * 2^(attempt - 1)`
    #[default]
    Exponential,
    /// `base * 2^(attempt - 1) + uniform[0, base)`
    Jitter,
}

/// Retry, backoff and fallback settings.
///
/// Fallback converts failure into success: when retries are exhausted (or
/// none are configured) and a fallback is set, the caller receives the
/// fallback value instead of the error.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryOptions {
    /// Maximum number of retries after the original invocation.
    #[serde(default)]
    pub attempts: u32,
    /// Backoff formula, client default when absent.
    #[serde(default)]
    pub backoff: Option<Backoff>,
    /// Base delay, client default when absent.
    #[serde(default, with = "humantime_serde")]
    pub base_delay: Option<Duration>,
    /// Upper bound for any single delay.
    #[serde(default, with = "humantime_serde")]
    pub max_delay: Option<Duration>,
    /// Retry only failures this predicate accepts. All failures when absent.
    #[serde(skip)]
    pub should_retry: Option<RetryPredicate>,
    /// Substitute value on terminal failure.
    #[serde(default)]
    pub fallback_value: Option<Value>,
    /// Substitute value factory, used when no `fallback_value` is set.
    #[serde(skip)]
    pub fallback_factory: Option<FallbackFactory>,
}

impl RetryOptions {
    /// Retries up to `attempts` times.
    pub fn new(attempts: u32) -> Self {
        Self {
            attempts,
            ..Default::default()
        }
    }

    /// Sets the backoff formula.
    pub fn backoff(self, backoff: Backoff) -> Self {
        Self {
            backoff: Some(backoff),
            ..self
        }
    }

    /// Sets the base delay.
    pub fn base_delay(self, delay: Duration) -> Self {
        Self {
            base_delay: Some(delay),
            ..self
        }
    }

    /// Caps every delay at `delay`.
    pub fn max_delay(self, delay: Duration) -> Self {
        Self {
            max_delay: Some(delay),
            ..self
        }
    }

    /// Restricts retries to failures accepted by `predicate`.
    pub fn should_retry(self, predicate: impl Fn(&CallError) -> bool + Send + Sync + 'static) -> Self {
        Self {
            should_retry: Some(RetryPredicate::new(predicate)),
            ..self
        }
    }

    /// Succeeds with `value` on terminal failure.
    pub fn fallback_value(self, value: Value) -> Self {
        Self {
            fallback_value: Some(value),
            ..self
        }
    }

    /// Succeeds with a value from `factory` on terminal failure.
    pub fn fallback_factory(self, factory: impl Fn() -> Value + Send + Sync + 'static) -> Self {
        Self {
            fallback_factory: Some(FallbackFactory::new(factory)),
            ..self
        }
    }

    /// Returns the substitute value, if any fallback is configured.
    pub fn fallback(&self) -> Option<Value> {
        self.fallback_value
            .clone()
            .or_else(|| self.fallback_factory.as_ref().map(FallbackFactory::produce))
    }
}

/// Multi-caller batching settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Turns batching on.
    #[serde(default)]
    pub enabled: bool,
    /// Buffer key, `"{METHOD}:{endpoint}"` when absent.
    #[serde(default)]
    pub key: Option<String>,
    /// Flush as soon as this many items are pending, client default when absent.
    #[serde(default)]
    pub size: Option<usize>,
    /// Quiet period after the last arrival before flushing, client default when absent.
    #[serde(default, with = "humantime_serde")]
    pub interval: Option<Duration>,
    /// Endpoint for the combined call, the call's own endpoint when absent.
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Builds the combined value. The payload list itself when absent.
    #[serde(skip)]
    pub combine: Option<CombineFn>,
    /// Picks each item's value. Indexed element of a list response, or the
    /// whole response, when absent.
    #[serde(skip)]
    pub selector: Option<SelectorFn>,
}

impl BatchOptions {
    /// Enabled batching with defaults.
    pub fn enabled() -> Self {
        Self {
            enabled: true,
            ..Default::default()
        }
    }

    /// Sets the buffer key.
    pub fn key(self, key: impl Into<String>) -> Self {
        Self {
            key: Some(key.into()),
            ..self
        }
    }

    /// Sets the size threshold.
    pub fn size(self, size: usize) -> Self {
        Self {
            size: Some(size),
            ..self
        }
    }

    /// Sets the quiet period.
    pub fn interval(self, interval: Duration) -> Self {
        Self {
            interval: Some(interval),
            ..self
        }
    }

    /// Sets the endpoint of the combined call.
    pub fn endpoint(self, endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: Some(endpoint.into()),
            ..self
        }
    }

    /// Sets the combine function.
    pub fn combine(self, combine: impl Fn(Vec<Value>) -> Value + Send + Sync + 'static) -> Self {
        Self {
            combine: Some(CombineFn::new(combine)),
            ..self
        }
    }

    /// Sets the selector.
    pub fn selector(
        self,
        selector: impl Fn(&Value, &Value, usize) -> Result<Value, String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            selector: Some(SelectorFn::new(selector)),
            ..self
        }
    }
}

/// Admission mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueMode {
    /// One call at a time.
    #[default]
    Sequential,
    /// Up to `concurrency` calls at a time.
    Parallel,
}

/// Admission priority. Higher priorities are admitted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// Weight 3.
    High,
    /// Weight 2.
    #[default]
    Normal,
    /// Weight 1.
    Low,
}

impl Priority {
    /// Ordinal weight.
    #[inline]
    pub const fn weight(&self) -> u8 {
        match self {
            Priority::High => 3,
            Priority::Normal => 2,
            Priority::Low => 1,
        }
    }
}

/// Admission queue settings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueueOptions {
    /// Route the call through the admission queue.
    #[serde(default)]
    pub enabled: bool,
    /// Admission mode.
    #[serde(default)]
    pub mode: QueueMode,
    /// Limit in [`QueueMode::Parallel`], client default when absent.
    ///
    /// The limit belongs to the shared queue: setting it affects every
    /// later call through the same client.
    #[serde(default)]
    pub concurrency: Option<usize>,
    /// Admission priority.
    #[serde(default)]
    pub priority: Priority,
}

impl QueueOptions {
    /// One call at a time.
    pub fn sequential() -> Self {
        Self {
            enabled: true,
            mode: QueueMode::Sequential,
            ..Default::default()
        }
    }

    /// Up to `concurrency` calls at a time.
    pub fn parallel(concurrency: usize) -> Self {
        Self {
            enabled: true,
            mode: QueueMode::Parallel,
            concurrency: Some(concurrency),
            ..Default::default()
        }
    }

    /// Sets the priority.
    pub fn priority(self, priority: Priority) -> Self {
        Self { priority, ..self }
    }

    /// Resolves the limit this call asks for.
    pub fn limit(&self, default: usize) -> usize {
        match self.mode {
            QueueMode::Sequential => 1,
            QueueMode::Parallel => self.concurrency.unwrap_or(default),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LogOptions {
    /// Turns per-call records on.
    #[serde(default)]
    pub enabled: bool,
    /// Detail level.
    #[serde(default)]
    pub level: LogLevel,
    /// Call-specific sink, in addition to the client-wide one.
    #[serde(skip)]
    pub sink: Option<SharedLogSink>,
}

impl LogOptions {
    /// Enabled logging at `level`.
    pub fn enabled(level: LogLevel) -> Self {
        Self {
            enabled: true,
            level,
            sink: None,
        }
    }

    /// Sends records to `sink`.
    pub fn sink(self, sink: impl LogSink + 'static) -> Self {
        Self {
            sink: Some(SharedLogSink::new(sink)),
            ..self
        }
    }

    /// Whether records are produced at all.
    pub fn is_active(&self) -> bool {
        self.enabled && self.level != LogLevel::None
    }
}

/// Immutable configuration snapshot of one call.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CallOptions {
    /// The verb.
    #[serde(default)]
    pub method: HttpMethod,
    /// Request headers.
    #[serde(default)]
    pub headers: Headers,
    /// Query parameters.
    #[serde(default)]
    pub params: Params,
    /// Explicit body. Falls back to the payload for body-carrying verbs.
    #[serde(default)]
    pub body: Option<Value>,
    /// Bypass in-flight sharing: every raw call runs on its own.
    #[serde(default)]
    pub raw: bool,
    /// Trailing debounce window.
    #[serde(default, with = "humantime_serde")]
    pub debounce: Option<Duration>,
    /// Minimum spacing between dispatches sharing a key.
    #[serde(default, with = "humantime_serde")]
    pub rate_limit: Option<Duration>,
    /// Cache successful responses for this long.
    #[serde(default, with = "humantime_serde")]
    pub cache_duration: Option<Duration>,
    /// Retry, backoff and fallback.
    #[serde(default)]
    pub retry: Option<RetryOptions>,
    /// Per-invocation timeout.
    #[serde(default, with = "humantime_serde")]
    pub timeout: Option<Duration>,
    /// Multi-caller batching.
    #[serde(default)]
    pub batch: Option<BatchOptions>,
    /// Admission queue.
    #[serde(default)]
    pub queue: Option<QueueOptions>,
    /// Per-call log records.
    #[serde(default)]
    pub log: Option<LogOptions>,
    /// Also emit log records as tracing events.
    #[serde(default)]
    pub debug: bool,
}

impl CallOptions {
    /// Options with every policy off.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the verb.
    pub fn method(self, method: HttpMethod) -> Self {
        Self { method, ..self }
    }

    /// Adds one header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Adds one query parameter.
    pub fn param(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Sets the explicit body.
    pub fn body(self, body: Value) -> Self {
        Self {
            body: Some(body),
            ..self
        }
    }

    /// Marks the call raw.
    pub fn raw(self) -> Self {
        Self { raw: true, ..self }
    }

    /// Sets the debounce window.
    pub fn debounce(self, window: Duration) -> Self {
        Self {
            debounce: Some(window),
            ..self
        }
    }

    /// Sets the minimum spacing.
    pub fn rate_limit(self, spacing: Duration) -> Self {
        Self {
            rate_limit: Some(spacing),
            ..self
        }
    }

    /// Caches successful responses for `duration`.
    pub fn cache_for(self, duration: Duration) -> Self {
        Self {
            cache_duration: Some(duration),
            ..self
        }
    }

    /// Sets retry settings.
    pub fn retry(self, retry: RetryOptions) -> Self {
        Self {
            retry: Some(retry),
            ..self
        }
    }

    /// Sets the timeout.
    pub fn timeout(self, timeout: Duration) -> Self {
        Self {
            timeout: Some(timeout),
            ..self
        }
    }

    /// Sets batching.
    pub fn batch(self, batch: BatchOptions) -> Self {
        Self {
            batch: Some(batch),
            ..self
        }
    }

    /// Sets the admission queue.
    pub fn queue(self, queue: QueueOptions) -> Self {
        Self {
            queue: Some(queue),
            ..self
        }
    }

    /// Sets logging.
    pub fn log(self, log: LogOptions) -> Self {
        Self {
            log: Some(log),
            ..self
        }
    }

    /// Mirrors log records to tracing.
    pub fn debug(self, debug: bool) -> Self {
        Self { debug, ..self }
    }

    /// Cache lifetime, if caching is on.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_duration.filter(|d| !d.is_zero())
    }

    /// Batch settings, if batching applies to this call.
    pub fn active_batch(&self) -> Option<&BatchOptions> {
        self.batch.as_ref().filter(|b| b.enabled && !self.raw)
    }

    /// Queue settings, if admission control applies to this call.
    pub fn active_queue(&self) -> Option<&QueueOptions> {
        self.queue.as_ref().filter(|q| q.enabled)
    }

    /// Rejects malformed options.
    pub fn validate(&self, endpoint: &str) -> Result<(), ValidationError> {
        if endpoint.is_empty() {
            return Err(ValidationError::EmptyEndpoint);
        }
        if let Some(queue) = self.active_queue()
            && queue.mode == QueueMode::Parallel
            && queue.concurrency == Some(0)
        {
            return Err(ValidationError::ZeroConcurrency);
        }
        if let Some(batch) = self.active_batch()
            && batch.size == Some(0)
        {
            return Err(ValidationError::ZeroBatchSize);
        }
        Ok(())
    }
}
