//! Sharing of identical in-flight operations.
//!
//! The registry maps a [`RequestKey`] to a weak handle on a [`SharedCall`].
//! A caller that finds a live entry attaches to it and receives the same
//! eventual result as everyone else; otherwise it publishes its own
//! operation. The registry never keeps an operation alive by itself: once
//! every attached caller has dropped its handle, the operation is dropped and
//! its transport invocation cancelled.
//!
//! Operations remove their own entry when they settle, so the next identical
//! call starts fresh instead of replaying an old result.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use callbox_core::{CallResult, RequestKey};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::future::{BoxFuture, Shared, WeakShared};
use tracing::trace;

use crate::scheduler::DispatchGate;

/// Multicast handle on one operation.
pub type SharedCall = Shared<BoxFuture<'static, CallResult>>;

struct InFlightEntry {
    id: u64,
    // Absent only if the operation settled before it was registered.
    call: Option<WeakShared<BoxFuture<'static, CallResult>>>,
    gate: Option<DispatchGate>,
}

impl InFlightEntry {
    fn upgrade(&self) -> Option<SharedCall> {
        self.call.as_ref().and_then(WeakShared::upgrade)
    }
}

/// Outcome of [`InFlightRegistry::share`].
pub enum Sharing {
    /// An identical operation was already running.
    Attached(SharedCall),
    /// A new operation was published.
    Published(SharedCall),
}

impl Sharing {
    /// The shared handle, whichever way it was obtained.
    pub fn into_call(self) -> SharedCall {
        match self {
            Sharing::Attached(call) | Sharing::Published(call) => call,
        }
    }

    /// Whether the caller attached to an existing operation.
    pub fn is_attached(&self) -> bool {
        matches!(self, Sharing::Attached(_))
    }
}

/// Registry of shareable operations keyed by request identity.
#[derive(Clone, Default)]
pub struct InFlightRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    entries: DashMap<RequestKey, InFlightEntry>,
    ids: AtomicU64,
}

impl std::fmt::Debug for InFlightRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InFlightRegistry")
            .field("entries", &self.inner.entries.len())
            .finish()
    }
}

impl InFlightRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attaches to the live operation for `key`, or publishes a new one.
    ///
    /// `create` receives the entry id the new operation must pass to
    /// [`InFlightRegistry::remove`] when it settles. Lookup and publication
    /// happen under one lock so two identical callers never both publish;
    /// `create` must not touch the registry itself.
    pub fn share<F>(&self, key: RequestKey, debounce: Option<Duration>, create: F) -> Sharing
    where
        F: FnOnce(u64) -> (SharedCall, Option<DispatchGate>),
    {
        let entry = self.inner.entries.entry(key);
        if let Entry::Occupied(occupied) = &entry
            && let Some(call) = occupied.get().upgrade()
        {
            if let (Some(gate), Some(debounce)) = (&occupied.get().gate, debounce) {
                gate.extend(debounce);
            }
            trace!(key = %occupied.key(), "attached to in-flight operation");
            return Sharing::Attached(call);
        }

        let id = self.inner.ids.fetch_add(1, Ordering::Relaxed);
        let (call, gate) = create(id);
        let published = InFlightEntry {
            id,
            call: call.downgrade(),
            gate,
        };
        match entry {
            Entry::Occupied(mut occupied) => {
                occupied.insert(published);
            }
            Entry::Vacant(vacant) => {
                vacant.insert(published);
            }
        }
        Sharing::Published(call)
    }

    /// Removes the entry for `key` if it is still the one with `id`.
    pub fn remove(&self, key: &RequestKey, id: u64) -> bool {
        self.inner
            .entries
            .remove_if(key, |_, entry| entry.id == id)
            .is_some()
    }

    /// Whether a live operation is registered for `key`.
    pub fn contains(&self, key: &RequestKey) -> bool {
        // Upgrade under the shard lock, drop the handle after releasing it.
        let call = self.inner.entries.get(key).and_then(|entry| entry.upgrade());
        call.is_some()
    }

    /// Number of registered entries, dead ones included.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    /// Whether the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }
}
