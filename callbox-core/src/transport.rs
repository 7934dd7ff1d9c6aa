use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::TransportError;
use crate::method::HttpMethod;

/// Request headers, already in wire-ready string form.
pub type Headers = BTreeMap<String, String>;

/// Query parameters of a call.
pub type Params = Map<String, Value>;

/// One network call, fully resolved by the orchestrator.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TransportRequest {
    /// The verb.
    pub method: HttpMethod,
    /// Endpoint, absolute or relative to the transport's base.
    pub endpoint: String,
    /// Request headers.
    #[serde(default)]
    pub headers: Headers,
    /// Query parameters.
    #[serde(default)]
    pub params: Params,
    /// JSON body, never present for bodyless verbs.
    #[serde(default)]
    pub body: Option<Value>,
}

/// Issues single calls over the network.
///
/// The orchestrator treats a transport as a black box: each invocation either
/// resolves once or fails once. Invocations must be independent so several can
/// run concurrently, and dropping the returned future is the cancel signal.
///
/// # Examples
///
/// ```rust,ignore
/// use callbox_core::{Transport, TransportError, TransportRequest};
/// use futures::future::{BoxFuture, FutureExt};
/// use serde_json::{Value, json};
///
/// struct Echo;
///
/// impl Transport for Echo {
///     type Future = BoxFuture<'static, Result<Value, TransportError>>;
///
///     fn invoke(&self, request: TransportRequest) -> Self::Future {
///         async move { Ok(json!({ "endpoint": request.endpoint })) }.boxed()
///     }
/// }
/// ```
pub trait Transport: Send + Sync + 'static {
    /// The future that resolves to the decoded response.
    type Future: Future<Output = Result<Value, TransportError>> + Send + 'static;

    /// Issues `request` once.
    fn invoke(&self, request: TransportRequest) -> Self::Future;
}

impl<T> Transport for Arc<T>
where
    T: Transport,
{
    type Future = T::Future;

    fn invoke(&self, request: TransportRequest) -> Self::Future {
        self.as_ref().invoke(request)
    }
}
