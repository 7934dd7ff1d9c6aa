use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::task::{Context, Poll};

use callbox_core::CallResult;
use futures::future::BoxFuture;

use crate::inflight::SharedCall;

enum HandleState {
    Ready(Ready<CallResult>),
    Shared(SharedCall),
    Owned(BoxFuture<'static, CallResult>),
}

/// Pending result of one call.
///
/// The handle is a future resolving to the call's value or error. Nothing is
/// dispatched until it is first polled, except batch enqueueing, which happens
/// when the call is sent.
///
/// Dropping the handle, or calling [`CallHandle::cancel`], detaches from the
/// call. A shared call is torn down only when its last handle goes away; a raw
/// call is cancelled immediately. Batched items keep their place in the
/// combined call either way.
#[must_use = "calls do nothing unless polled"]
pub struct CallHandle {
    state: HandleState,
}

impl CallHandle {
    pub(crate) fn ready(result: CallResult) -> Self {
        Self {
            state: HandleState::Ready(ready(result)),
        }
    }

    pub(crate) fn shared(call: SharedCall) -> Self {
        Self {
            state: HandleState::Shared(call),
        }
    }

    pub(crate) fn owned(call: BoxFuture<'static, CallResult>) -> Self {
        Self {
            state: HandleState::Owned(call),
        }
    }

    /// Detaches from the call.
    pub fn cancel(self) {
        drop(self);
    }

    /// Whether this handle shares its operation with other callers.
    pub fn is_shared(&self) -> bool {
        matches!(self.state, HandleState::Shared(_))
    }

    /// Whether the result is already known, e.g. from the cache.
    pub fn is_ready(&self) -> bool {
        matches!(self.state, HandleState::Ready(_))
    }
}

impl std::fmt::Debug for CallHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            HandleState::Ready(_) => "ready",
            HandleState::Shared(_) => "shared",
            HandleState::Owned(_) => "owned",
        };
        f.debug_struct("CallHandle").field("state", &state).finish()
    }
}

impl Future for CallHandle {
    type Output = CallResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            HandleState::Ready(result) => Pin::new(result).poll(cx),
            HandleState::Shared(call) => Pin::new(call).poll(cx),
            HandleState::Owned(call) => call.as_mut().poll(cx),
        }
    }
}
