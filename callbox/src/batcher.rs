//! Coalescing of distinct payloads into one combined call.
//!
//! Items are buffered per batch key. A buffer flushes as soon as it holds
//! `size` items, or after a quiet period of `interval` with no new arrival:
//! every arrival restarts the timer. Identical payloads within one buffer
//! share a single item.
//!
//! A flush drains the buffer, folds the payloads with the wave's combine
//! function, performs one call and hands each item its share of the response
//! through the selector. A failed call fails every drained item with the
//! same error; a failing selector fails only its own item.
//!
//! Flushes run as spawned tasks, so an item whose caller went away still
//! takes part in the combined call. [`Batcher::enqueue`] must therefore be
//! called from within a Tokio runtime.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use callbox_core::{CallError, CallResult, fingerprint};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, debug_span, trace};

use crate::config::ClientConfig;
use crate::inflight::SharedCall;
use crate::metrics::record_batch_flush;
use crate::options::{BatchOptions, CombineFn, SelectorFn};

/// Performs the combined call of a wave: `(combined, endpoint) -> response`.
pub type PerformFn = Arc<dyn Fn(Value, String) -> BoxFuture<'static, CallResult> + Send + Sync>;

/// Flush settings of a buffer, taken from its most recent arrival.
#[derive(Clone)]
pub struct BatchWave {
    /// Flush once this many items are pending.
    pub size: usize,
    /// Quiet period before a flush.
    pub interval: Duration,
    /// Endpoint of the combined call.
    pub endpoint: String,
    combine: Option<CombineFn>,
    selector: Option<SelectorFn>,
    perform: PerformFn,
}

impl fmt::Debug for BatchWave {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchWave")
            .field("size", &self.size)
            .field("interval", &self.interval)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

impl BatchWave {
    /// Resolves `options` against the client defaults.
    pub fn resolve(
        options: &BatchOptions,
        config: &ClientConfig,
        default_endpoint: &str,
        perform: PerformFn,
    ) -> Self {
        Self {
            size: options.size.unwrap_or(config.batch_size).max(1),
            interval: options.interval.unwrap_or(config.batch_interval),
            endpoint: options
                .endpoint
                .clone()
                .unwrap_or_else(|| default_endpoint.to_owned()),
            combine: options.combine.clone(),
            selector: options.selector.clone(),
            perform,
        }
    }

    fn combine(&self, payloads: Vec<Value>) -> Value {
        match &self.combine {
            Some(combine) => combine.combine(payloads),
            None => Value::Array(payloads),
        }
    }

    fn select(&self, response: &Value, payload: &Value, index: usize) -> CallResult {
        match &self.selector {
            Some(selector) => selector
                .select(response, payload, index)
                .map_err(CallError::Selector),
            None => Ok(default_select(response, index)),
        }
    }
}

/// Indexed element of a list response, or the whole response otherwise.
pub fn default_select(response: &Value, index: usize) -> Value {
    match response {
        Value::Array(items) => items.get(index).cloned().unwrap_or(Value::Null),
        other => other.clone(),
    }
}

struct PendingItem {
    payload: Value,
    fingerprint: String,
    tx: oneshot::Sender<CallResult>,
    result: SharedCall,
}

struct BatchBuffer {
    items: Vec<PendingItem>,
    generation: u64,
    timer: Option<JoinHandle<()>>,
    wave: BatchWave,
}

#[derive(Default)]
struct BatcherInner {
    buffers: Mutex<HashMap<String, BatchBuffer>>,
    generations: AtomicU64,
}

/// Per-key batch buffers. Cloning shares the buffers.
#[derive(Clone, Default)]
pub struct Batcher {
    inner: Arc<BatcherInner>,
}

impl fmt::Debug for Batcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batcher")
            .field("buffers", &self.lock().len())
            .finish()
    }
}

impl Batcher {
    /// Creates a batcher with no buffers.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, BatchBuffer>> {
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of items waiting under `key`.
    pub fn pending(&self, key: &str) -> usize {
        self.lock().get(key).map_or(0, |buffer| buffer.items.len())
    }

    /// Adds `payload` to the buffer for `key` and returns its eventual result.
    ///
    /// `wave` replaces the buffer's flush settings.
    pub fn enqueue(&self, key: &str, payload: Value, wave: BatchWave) -> SharedCall {
        let mut buffers = self.lock();
        let buffer = buffers.entry(key.to_owned()).or_insert_with(|| BatchBuffer {
            items: Vec::new(),
            generation: 0,
            timer: None,
            wave: wave.clone(),
        });
        buffer.wave = wave;

        let fingerprint = fingerprint(&payload);
        if let Some(existing) = buffer.items.iter().find(|item| item.fingerprint == fingerprint) {
            trace!(batch = key, "payload already pending, sharing its slot");
            return existing.result.clone();
        }

        let (tx, rx) = oneshot::channel();
        let result = rx
            .map(|received| received.unwrap_or(Err(CallError::Abandoned)))
            .boxed()
            .shared();
        buffer.items.push(PendingItem {
            payload,
            fingerprint,
            tx,
            result: result.clone(),
        });

        if let Some(timer) = buffer.timer.take() {
            timer.abort();
        }
        if buffer.items.len() >= buffer.wave.size {
            if let Some(buffer) = buffers.remove(key) {
                debug!(batch = key, items = buffer.items.len(), "batch full, flushing");
                spawn_flush(key, buffer);
            }
        } else {
            let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed) + 1;
            buffer.generation = generation;
            buffer.timer = Some(self.spawn_timer(key.to_owned(), generation, buffer.wave.interval));
        }
        result
    }

    fn spawn_timer(&self, key: String, generation: u64, interval: Duration) -> JoinHandle<()> {
        let batcher = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(interval).await;
            let drained = {
                let mut buffers = batcher.lock();
                match buffers.get(&key) {
                    Some(buffer) if buffer.generation == generation => buffers.remove(&key),
                    _ => None,
                }
            };
            if let Some(buffer) = drained {
                debug!(batch = %key, items = buffer.items.len(), "quiet period elapsed, flushing");
                spawn_flush(&key, buffer);
            }
        })
    }
}

fn spawn_flush(key: &str, buffer: BatchBuffer) {
    let span = debug_span!("callbox.batch", batch = key, items = buffer.items.len());
    tokio::spawn(flush(buffer).instrument(span));
}

async fn flush(buffer: BatchBuffer) {
    let BatchBuffer { items, wave, .. } = buffer;
    record_batch_flush(items.len());

    let payloads = items.iter().map(|item| item.payload.clone()).collect();
    let combined = wave.combine(payloads);
    let outcome = (wave.perform)(combined, wave.endpoint.clone()).await;
    if let Err(error) = &outcome {
        debug!(%error, "combined call failed");
    }

    for (index, item) in items.into_iter().enumerate() {
        let result = match &outcome {
            Ok(response) => wave.select(response, &item.payload, index),
            Err(error) => Err(error.clone()),
        };
        // The receiver lives inside the shared result and may be gone.
        let _ = item.tx.send(result);
    }
}
