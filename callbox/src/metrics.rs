//! Metrics declaration and recording helpers.
//!
//! Every helper compiles to a no-op when the `metrics` feature is disabled.

use std::time::Duration;

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
lazy_static! {
    // Cache metrics

    /// Track number of cache hits.
    pub static ref CACHE_HIT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_cache_hit_total",
            "Total number of calls answered from the response cache."
        );
        "callbox_cache_hit_total"
    };
    /// Track number of cache misses.
    pub static ref CACHE_MISS_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_cache_miss_total",
            "Total number of cacheable calls that missed the response cache."
        );
        "callbox_cache_miss_total"
    };

    // Sharing metrics

    /// Track number of calls attached to an in-flight operation.
    pub static ref DEDUP_ATTACH_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_dedup_attach_total",
            "Total number of calls that attached to an identical in-flight operation."
        );
        "callbox_dedup_attach_total"
    };

    // Transport metrics

    /// Track number of transport invocations.
    pub static ref TRANSPORT_INVOCATIONS: &'static str = {
        metrics::describe_counter!(
            "callbox_transport_invocations_total",
            "Total number of transport invocations, retries included."
        );
        "callbox_transport_invocations_total"
    };
    /// Track number of retries.
    pub static ref RETRY_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_retry_total",
            "Total number of retried invocations."
        );
        "callbox_retry_total"
    };
    /// Track number of timed out invocations.
    pub static ref TIMEOUT_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_timeout_total",
            "Total number of invocations that hit their timeout."
        );
        "callbox_timeout_total"
    };
    /// Track number of failures converted by a fallback.
    pub static ref FALLBACK_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_fallback_total",
            "Total number of terminal failures replaced by a fallback value."
        );
        "callbox_fallback_total"
    };
    /// Track number of batch flushes.
    pub static ref BATCH_FLUSH_COUNTER: &'static str = {
        metrics::describe_counter!(
            "callbox_batch_flush_total",
            "Total number of combined batch calls."
        );
        "callbox_batch_flush_total"
    };

    // Admission metrics

    /// Gauge of held admission permits.
    pub static ref QUEUE_ACTIVE: &'static str = {
        metrics::describe_gauge!(
            "callbox_queue_active",
            "Number of admission permits currently held."
        );
        "callbox_queue_active"
    };

    // Latency metrics

    /// Histogram of call duration.
    pub static ref CALL_DURATION: &'static str = {
        metrics::describe_histogram!(
            "callbox_call_duration_seconds",
            metrics::Unit::Seconds,
            "Duration of orchestrated operations in seconds."
        );
        "callbox_call_duration_seconds"
    };
}

/// Records a cache lookup.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_cache_lookup(hit: bool) {
    let counter = if hit {
        *CACHE_HIT_COUNTER
    } else {
        *CACHE_MISS_COUNTER
    };
    metrics::counter!(counter).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_cache_lookup(_hit: bool) {}

/// Records a call attaching to an in-flight operation.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_dedup_attach() {
    metrics::counter!(*DEDUP_ATTACH_COUNTER).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_dedup_attach() {}

/// Records one transport invocation. `retry` is true for every attempt after the first.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_invocation(method: &'static str, retry: bool) {
    metrics::counter!(*TRANSPORT_INVOCATIONS, "method" => method).increment(1);
    if retry {
        metrics::counter!(*RETRY_COUNTER, "method" => method).increment(1);
    }
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_invocation(_method: &'static str, _retry: bool) {}

/// Records an invocation that hit its timeout.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_timeout() {
    metrics::counter!(*TIMEOUT_COUNTER).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_timeout() {}

/// Records a failure replaced by a fallback value.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_fallback() {
    metrics::counter!(*FALLBACK_COUNTER).increment(1);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_fallback() {}

/// Records one combined batch call of `items` items.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_batch_flush(items: usize) {
    metrics::counter!(*BATCH_FLUSH_COUNTER).increment(1);
    metrics::histogram!("callbox_batch_items").record(items as f64);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_batch_flush(_items: usize) {}

/// Records the number of held admission permits.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_queue_active(active: usize) {
    metrics::gauge!(*QUEUE_ACTIVE).set(active as f64);
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_queue_active(_active: usize) {}

/// Records how long an operation took from start to settle.
#[cfg(feature = "metrics")]
#[inline]
pub fn record_call_duration(method: &'static str, ok: bool, duration: Duration) {
    let status = if ok { "ok" } else { "error" };
    metrics::histogram!(*CALL_DURATION, "method" => method, "status" => status)
        .record(duration.as_secs_f64());
}

/// No-op version when metrics feature is disabled.
#[cfg(not(feature = "metrics"))]
#[inline]
pub fn record_call_duration(_method: &'static str, _ok: bool, _duration: Duration) {}
