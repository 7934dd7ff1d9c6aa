use std::sync::{Arc, Mutex};

use callbox_core::{LogSink, Transport};

use crate::batcher::Batcher;
use crate::cache::TtlCache;
use crate::config::ClientConfig;
use crate::inflight::InFlightRegistry;
use crate::options::SharedLogSink;
use crate::queue::AdmissionQueue;
use crate::scheduler::RateClock;

use super::{Client, ClientInner};

/// Marker type for unset builder fields.
///
/// When you see `NotSet` in a compiler error, it means you haven't called
/// [`ClientBuilder::transport`] yet.
pub struct NotSet;

/// Builder for [`Client`].
///
/// Use [`Client::builder()`] to create a new builder.
pub struct ClientBuilder<T> {
    transport: T,
    config: ClientConfig,
    on_log: Option<SharedLogSink>,
    cache: Option<TtlCache>,
    queue: Option<AdmissionQueue>,
}

impl ClientBuilder<NotSet> {
    /// Creates a new builder with no transport.
    pub fn new() -> Self {
        Self {
            transport: NotSet,
            config: ClientConfig::default(),
            on_log: None,
            cache: None,
            queue: None,
        }
    }
}

impl Default for ClientBuilder<NotSet> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ClientBuilder<T> {
    /// Sets the transport.
    pub fn transport<U>(self, transport: U) -> ClientBuilder<U> {
        ClientBuilder {
            transport,
            config: self.config,
            on_log: self.on_log,
            cache: self.cache,
            queue: self.queue,
        }
    }

    /// Sets the client-wide defaults.
    pub fn config(self, config: ClientConfig) -> Self {
        Self { config, ..self }
    }

    /// Receives the log record of every call that enables logging.
    pub fn on_log(self, sink: impl LogSink + 'static) -> Self {
        Self {
            on_log: Some(SharedLogSink::new(sink)),
            ..self
        }
    }

    /// Uses `cache` instead of a private one.
    pub fn cache(self, cache: TtlCache) -> Self {
        Self {
            cache: Some(cache),
            ..self
        }
    }

    /// Uses `queue` instead of a private one.
    pub fn queue(self, queue: AdmissionQueue) -> Self {
        Self {
            queue: Some(queue),
            ..self
        }
    }
}

impl<T> ClientBuilder<T>
where
    T: Transport,
{
    /// Builds the [`Client`].
    pub fn build(self) -> Client<T> {
        let queue = self
            .queue
            .unwrap_or_else(|| AdmissionQueue::new(usize::from(self.config.concurrency.get())));
        Client {
            inner: Arc::new(ClientInner {
                transport: Arc::new(self.transport),
                cache: self.cache.unwrap_or_default(),
                inflight: InFlightRegistry::new(),
                clock: RateClock::new(),
                queue,
                batcher: Batcher::new(),
                on_log: self.on_log,
                sweeper: Mutex::new(None),
                config: self.config,
            }),
        }
    }
}
