//! The orchestrating client.
//!
//! [`Client::send`] composes the policies of one call in a fixed order:
//!
//! ```text
//! cache lookup ─hit──────────────────────────────────────────────▶ value
//!      │ miss
//! in-flight registry ─attach─────────────────────────────────────▶ shared result
//!      │ publish
//!      ├─ batched ─▶ batcher ─▶ combined call (timeout) ─┐
//!      └─ direct ──▶ delay ─▶ admission ─▶ retry(timeout(transport))
//!                                                        │
//!            settle: write-through cache, log, fallback ◀┘
//!            finalize: rate clock, release in-flight entry
//! ```
//!
//! Every non-raw operation is shared: identical calls that arrive while it is
//! pending attach to it instead of issuing another transport call.

mod builder;
mod handle;
mod operation;

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use callbox_core::{CallResult, HttpMethod, Params, RequestKey, Transport, TransportRequest};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{Instrument, Span, debug, debug_span, warn};

pub use builder::{ClientBuilder, NotSet};
pub use handle::CallHandle;

use crate::batcher::{BatchWave, Batcher, PerformFn};
use crate::cache::TtlCache;
use crate::config::ClientConfig;
use crate::inflight::InFlightRegistry;
use crate::metrics::{record_cache_lookup, record_dedup_attach, record_invocation};
use crate::options::{BatchOptions, CallOptions, SharedLogSink};
use crate::queue::AdmissionQueue;
use crate::retry::{RetryPolicy, invoke_with_policy, with_timeout};
use crate::scheduler::{DispatchGate, RateClock, deadline_after};

use operation::{Bookkeeping, CallPlan, Settlement};

pub(crate) struct ClientInner<T> {
    transport: Arc<T>,
    config: ClientConfig,
    cache: TtlCache,
    inflight: InFlightRegistry,
    clock: RateClock,
    queue: AdmissionQueue,
    batcher: Batcher,
    on_log: Option<SharedLogSink>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<T> Drop for ClientInner<T> {
    fn drop(&mut self) {
        let sweeper = self
            .sweeper
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(handle) = sweeper.take() {
            handle.abort();
        }
    }
}

/// Request orchestrator in front of a [`Transport`].
///
/// Cloning is cheap and shares all state: cache, in-flight registry, rate
/// clock, admission queue and batch buffers.
///
/// # Example
///
/// ```ignore
/// use std::time::Duration;
/// use callbox::{CallOptions, Client, Params};
///
/// let client = Client::builder().transport(transport).build();
/// let posts = client
///     .get("/posts", Params::new(), CallOptions::new().cache_for(Duration::from_secs(30)))
///     .await?;
/// ```
pub struct Client<T> {
    inner: Arc<ClientInner<T>>,
}

impl<T> Clone for Client<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.inner.config)
            .field("cache_entries", &self.inner.cache.len())
            .field("queue", &self.inner.queue)
            .finish_non_exhaustive()
    }
}

impl Client<NotSet> {
    /// Creates a new [`ClientBuilder`].
    pub fn builder() -> ClientBuilder<NotSet> {
        ClientBuilder::new()
    }
}

impl<T> Client<T> {
    /// Client-wide defaults.
    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    /// The response cache.
    pub fn cache(&self) -> &TtlCache {
        &self.inner.cache
    }

    /// The admission queue.
    pub fn queue(&self) -> &AdmissionQueue {
        &self.inner.queue
    }

    /// Evicts expired cache entries. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        self.inner.cache.sweep()
    }

    /// Starts sweeping the cache every `cleanup_interval` in the background.
    ///
    /// Replaces a sweeper started earlier. Must be called within a Tokio
    /// runtime; the sweeper stops on [`Client::shutdown`] or when the last
    /// clone of the client is dropped.
    pub fn spawn_cleanup(&self) {
        let period = self.inner.config.cleanup_interval;
        if period.is_zero() {
            warn!("cleanup interval is zero, background sweep disabled");
            return;
        }
        let cache = self.inner.cache.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(deadline_after(period), period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let evicted = cache.sweep();
                if evicted > 0 {
                    debug!(evicted, "swept expired cache entries");
                }
            }
        });
        let previous = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(handle);
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    /// Stops the background sweeper, if one is running.
    pub fn shutdown(&self) {
        let sweeper = self
            .inner
            .sweeper
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = sweeper {
            debug!("stopping cache sweeper");
            handle.abort();
        }
    }

    /// Drops the cached response of one call. Returns whether one existed.
    pub fn clear_by_key(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: &Params,
        body: Option<&Value>,
    ) -> bool {
        let key = RequestKey::new(method, endpoint, params, body);
        self.inner.cache.delete(&key)
    }

    /// Drops every cached response whose endpoint starts with `prefix`.
    pub fn clear_by_endpoint(&self, prefix: &str) -> usize {
        self.inner.cache.delete_by_endpoint(prefix)
    }

    /// Drops every cached response.
    pub fn clear_all(&self) {
        self.inner.cache.clear();
    }
}

impl<T> Client<T>
where
    T: Transport,
{
    /// Creates a client with default configuration.
    pub fn new(transport: T) -> Self {
        ClientBuilder::new().transport(transport).build()
    }

    /// Issues a GET.
    pub fn get(&self, endpoint: &str, params: Params, options: CallOptions) -> CallHandle {
        self.bodyless(HttpMethod::Get, endpoint, params, options)
    }

    /// Issues a HEAD.
    pub fn head(&self, endpoint: &str, params: Params, options: CallOptions) -> CallHandle {
        self.bodyless(HttpMethod::Head, endpoint, params, options)
    }

    /// Issues an OPTIONS.
    pub fn options(&self, endpoint: &str, params: Params, options: CallOptions) -> CallHandle {
        self.bodyless(HttpMethod::Options, endpoint, params, options)
    }

    /// Issues a POST carrying `body`.
    pub fn post(&self, endpoint: &str, body: Value, options: CallOptions) -> CallHandle {
        self.with_body(HttpMethod::Post, endpoint, body, options)
    }

    /// Issues a PUT carrying `body`.
    pub fn put(&self, endpoint: &str, body: Value, options: CallOptions) -> CallHandle {
        self.with_body(HttpMethod::Put, endpoint, body, options)
    }

    /// Issues a PATCH carrying `body`.
    pub fn patch(&self, endpoint: &str, body: Value, options: CallOptions) -> CallHandle {
        self.with_body(HttpMethod::Patch, endpoint, body, options)
    }

    /// Issues a DELETE carrying `body`.
    pub fn delete(&self, endpoint: &str, body: Value, options: CallOptions) -> CallHandle {
        self.with_body(HttpMethod::Delete, endpoint, body, options)
    }

    fn bodyless(
        &self,
        method: HttpMethod,
        endpoint: &str,
        params: Params,
        options: CallOptions,
    ) -> CallHandle {
        self.send(endpoint, None, CallOptions { method, params, ..options })
    }

    fn with_body(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: Value,
        options: CallOptions,
    ) -> CallHandle {
        let options = CallOptions {
            method,
            body: Some(body.clone()),
            ..options
        };
        self.send(endpoint, Some(body), options)
    }

    /// Issues a call with `options.method`.
    ///
    /// For body-carrying verbs the body is `options.body`, or `payload` when
    /// no explicit body is set. Batched calls contribute `payload` to the
    /// combined call.
    pub fn send(&self, endpoint: &str, payload: Option<Value>, options: CallOptions) -> CallHandle {
        if let Err(error) = options.validate(endpoint) {
            warn!(endpoint, %error, "call rejected");
            return CallHandle::ready(Err(error.into()));
        }

        let plan = CallPlan::new(endpoint, payload.as_ref(), &options);
        let span = debug_span!(
            "callbox.call",
            method = %plan.method,
            endpoint,
            key = %plan.key,
        );
        let _entered = span.enter();

        if options.cache_ttl().is_some() {
            let cached = self.inner.cache.get(&plan.cache_key);
            record_cache_lookup(cached.is_some());
            if let Some(value) = cached {
                debug!("served from cache");
                return CallHandle::ready(Ok(value));
            }
        }

        let Some(inflight_key) = plan.inflight_key.clone() else {
            let bookkeeping = self.bookkeeping(&plan, None);
            let gate = self.gate(&plan, &options);
            return CallHandle::owned(self.direct(&plan, &options, gate, bookkeeping, span.clone()));
        };

        let sharing = self
            .inner
            .inflight
            .share(inflight_key.clone(), options.debounce, |id| {
                let bookkeeping = self.bookkeeping(&plan, Some((inflight_key, id)));
                match options.active_batch() {
                    Some(batch) => {
                        let operation =
                            self.batched(&plan, payload, &options, batch, bookkeeping, span.clone());
                        (operation.shared(), None)
                    }
                    None => {
                        let gate = self.gate(&plan, &options);
                        let operation =
                            self.direct(&plan, &options, gate.clone(), bookkeeping, span.clone());
                        (operation.shared(), gate)
                    }
                }
            });
        if sharing.is_attached() {
            debug!("attached to in-flight call");
            record_dedup_attach();
        }
        CallHandle::shared(sharing.into_call())
    }

    fn bookkeeping(&self, plan: &CallPlan, registration: Option<(RequestKey, u64)>) -> Bookkeeping {
        Bookkeeping {
            clock: self.inner.clock.clone(),
            key: plan.key.clone(),
            registration: registration.map(|(key, id)| (self.inner.inflight.clone(), key, id)),
        }
    }

    fn settlement(&self, plan: &CallPlan, options: &CallOptions, with_fallback: bool) -> Settlement {
        Settlement {
            cache_key: plan.cache_key.clone(),
            log_key: plan.log_key().to_string(),
            method: plan.method,
            endpoint: plan.request.endpoint.clone(),
            started_at: chrono::Utc::now(),
            started: Instant::now(),
            cache: self.inner.cache.clone(),
            cache_ttl: options.cache_ttl(),
            log: options.log.clone(),
            on_log: self.inner.on_log.clone(),
            debug: options.debug,
            fallback: options.retry.clone().filter(|_| with_fallback),
        }
    }

    fn gate(&self, plan: &CallPlan, options: &CallOptions) -> Option<DispatchGate> {
        let delay = self
            .inner
            .clock
            .effective_delay(&plan.key, options.debounce, options.rate_limit);
        if !delay.is_zero() {
            debug!(delay = ?delay, "dispatch delayed");
        }
        (!delay.is_zero() || options.debounce.is_some()).then(|| DispatchGate::after(delay))
    }

    fn direct(
        &self,
        plan: &CallPlan,
        options: &CallOptions,
        gate: Option<DispatchGate>,
        bookkeeping: Bookkeeping,
        span: Span,
    ) -> BoxFuture<'static, CallResult> {
        let settlement = self.settlement(plan, options, true);
        let transport = self.inner.transport.clone();
        let request = plan.request.clone();
        let method = plan.method.as_str();
        let timeout = options.timeout;
        let policy = options
            .retry
            .as_ref()
            .and_then(|retry| RetryPolicy::resolve(retry, &self.inner.config));
        let admission = options.active_queue().map(|queue| {
            let limit = queue.limit(usize::from(self.inner.config.concurrency.get()));
            (self.inner.queue.clone(), queue.priority, limit)
        });

        async move {
            let _bookkeeping = bookkeeping;
            if let Some(gate) = gate {
                gate.wait().await;
            }
            let invocation = invoke_with_policy(policy.as_ref(), timeout, |attempt| {
                record_invocation(method, attempt > 0);
                transport.invoke(request.clone())
            });
            let outcome = match admission {
                Some((queue, priority, limit)) => {
                    queue.execute(priority, Some(limit), invocation).await
                }
                None => invocation.await,
            };
            settlement.settle(outcome)
        }
        .instrument(span)
        .boxed()
    }

    fn batched(
        &self,
        plan: &CallPlan,
        payload: Option<Value>,
        options: &CallOptions,
        batch: &BatchOptions,
        bookkeeping: Bookkeeping,
        span: Span,
    ) -> BoxFuture<'static, CallResult> {
        let settlement = self.settlement(plan, options, false);
        let perform = self.perform(plan, options.timeout);
        let wave = BatchWave::resolve(batch, &self.inner.config, &plan.request.endpoint, perform);
        let batch_key = batch.key.clone().unwrap_or_else(|| plan.batch_key());
        let item = self
            .inner
            .batcher
            .enqueue(&batch_key, payload.unwrap_or(Value::Null), wave);

        async move {
            let _bookkeeping = bookkeeping;
            settlement.settle(item.await)
        }
        .instrument(span)
        .boxed()
    }

    fn perform(&self, plan: &CallPlan, timeout: Option<Duration>) -> PerformFn {
        let transport = self.inner.transport.clone();
        let template = plan.request.clone();
        Arc::new(move |combined, endpoint| {
            let mut request = TransportRequest {
                endpoint,
                body: None,
                ..template.clone()
            };
            if request.method.has_body() {
                request.body = Some(combined);
            } else if combined.is_array() {
                request.params.insert("id".to_owned(), combined);
            } else if !combined.is_null() {
                debug!(method = %request.method, "combined value has no place in a bodyless call");
            }
            record_invocation(request.method.as_str(), false);
            with_timeout(timeout, transport.invoke(request)).boxed()
        })
    }
}
