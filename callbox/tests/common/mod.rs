//! Scripted in-memory transport for orchestration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use callbox::{Transport, TransportError, TransportRequest};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde_json::Value;
use tokio::time::Instant;

/// What the transport does with one invocation.
pub enum Scripted {
    /// Settle with `outcome` after `after`.
    Reply {
        after: Duration,
        outcome: Result<Value, TransportError>,
    },
    /// Never settle.
    Hang,
}

impl Scripted {
    pub fn ok(value: Value) -> Self {
        Self::delayed(Duration::ZERO, Ok(value))
    }

    pub fn status(status: u16) -> Self {
        Self::delayed(
            Duration::ZERO,
            Err(TransportError::Status { status, body: None }),
        )
    }

    pub fn delayed(after: Duration, outcome: Result<Value, TransportError>) -> Self {
        Self::Reply { after, outcome }
    }
}

/// One recorded invocation.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub request: TransportRequest,
    pub started: Instant,
    pub finished: Option<Instant>,
}

type Responder = dyn Fn(&TransportRequest, usize) -> Scripted + Send + Sync;

struct MockInner {
    responder: Box<Responder>,
    calls: Mutex<Vec<Invocation>>,
    active: AtomicUsize,
    peak: AtomicUsize,
    dropped: AtomicUsize,
}

/// In-memory transport scripted by a responder closure.
///
/// The responder receives each request and its zero-based invocation index.
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<MockInner>,
}

impl MockTransport {
    pub fn new(responder: impl Fn(&TransportRequest, usize) -> Scripted + Send + Sync + 'static) -> Self {
        Self {
            inner: Arc::new(MockInner {
                responder: Box::new(responder),
                calls: Mutex::new(Vec::new()),
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                dropped: AtomicUsize::new(0),
            }),
        }
    }

    /// Always answers `value` immediately.
    pub fn ok(value: Value) -> Self {
        Self::new(move |_, _| Scripted::ok(value.clone()))
    }

    /// Answers with the request body, or the params when there is none, after `after`.
    pub fn echo(after: Duration) -> Self {
        Self::new(move |request, _| {
            let value = request
                .body
                .clone()
                .unwrap_or_else(|| Value::Object(request.params.clone()));
            Scripted::delayed(after, Ok(value))
        })
    }

    /// Every invocation so far, in call order.
    pub fn calls(&self) -> Vec<Invocation> {
        self.inner.calls.lock().unwrap().clone()
    }

    pub fn count(&self) -> usize {
        self.inner.calls.lock().unwrap().len()
    }

    /// Start instants relative to `origin`.
    pub fn starts_since(&self, origin: Instant) -> Vec<Duration> {
        self.calls().iter().map(|call| call.started - origin).collect()
    }

    /// Invocations currently running.
    pub fn active(&self) -> usize {
        self.inner.active.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously running invocations.
    pub fn peak(&self) -> usize {
        self.inner.peak.load(Ordering::SeqCst)
    }

    /// Invocations dropped before they settled.
    pub fn dropped(&self) -> usize {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

struct ActiveGuard {
    inner: Arc<MockInner>,
    index: usize,
    settled: bool,
}

impl ActiveGuard {
    fn enter(inner: Arc<MockInner>, index: usize) -> Self {
        let now = inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        inner.peak.fetch_max(now, Ordering::SeqCst);
        Self {
            inner,
            index,
            settled: false,
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.inner.active.fetch_sub(1, Ordering::SeqCst);
        if self.settled {
            if let Some(call) = self.inner.calls.lock().unwrap().get_mut(self.index) {
                call.finished = Some(Instant::now());
            }
        } else {
            self.inner.dropped.fetch_add(1, Ordering::SeqCst);
        }
    }
}

impl Transport for MockTransport {
    type Future = BoxFuture<'static, Result<Value, TransportError>>;

    fn invoke(&self, request: TransportRequest) -> Self::Future {
        let index = {
            let mut calls = self.inner.calls.lock().unwrap();
            calls.push(Invocation {
                request: request.clone(),
                started: Instant::now(),
                finished: None,
            });
            calls.len() - 1
        };
        let script = (self.inner.responder)(&request, index);
        let inner = self.inner.clone();
        async move {
            let mut guard = ActiveGuard::enter(inner, index);
            match script {
                Scripted::Reply { after, outcome } => {
                    if !after.is_zero() {
                        tokio::time::sleep(after).await;
                    }
                    guard.settled = true;
                    outcome
                }
                Scripted::Hang => futures::future::pending().await,
            }
        }
        .boxed()
    }
}

/// Log sink collecting every record.
#[derive(Clone, Default)]
pub struct LogCollector {
    entries: Arc<Mutex<Vec<callbox::LogEntry>>>,
}

impl LogCollector {
    pub fn sink(&self) -> impl Fn(&callbox::LogEntry) + Send + Sync + 'static {
        let entries = self.entries.clone();
        move |entry: &callbox::LogEntry| entries.lock().unwrap().push(entry.clone())
    }

    pub fn entries(&self) -> Vec<callbox::LogEntry> {
        self.entries.lock().unwrap().clone()
    }
}

/// Builds query params from a JSON object literal.
pub fn params(value: Value) -> callbox::Params {
    match value {
        Value::Object(map) => map,
        other => panic!("params must be a JSON object, got {other}"),
    }
}
