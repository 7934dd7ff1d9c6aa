//! Request identity keys.
//!
//! A [`RequestKey`] identifies a logical call by its method, endpoint and the
//! fingerprint of its params and body. The same key addresses the response
//! cache, the in-flight registry and the rate clock.
//!
//! ## Format
//!
//! `{METHOD} {endpoint} :: {fingerprint({"body":…,"params":…})}`
//!
//! Batched calls additionally fold their payload into the in-flight identity
//! with a ` :: payload={fingerprint}` suffix, see [`RequestKey::with_payload`].
//!
//! ```
//! use callbox_core::{HttpMethod, RequestKey};
//! use serde_json::{Map, json};
//!
//! let mut params = Map::new();
//! params.insert("page".into(), json!(2));
//! let key = RequestKey::new(HttpMethod::Get, "/posts", &params, None);
//! assert_eq!(key.as_str(), r#"GET /posts :: {"body":null,"params":{"page":2}}"#);
//! assert_eq!(key.endpoint(), "/posts");
//! ```
//!
//! ## Performance
//!
//! The key wraps its data in an [`Arc`], so cloning only bumps a reference
//! count. Keys are cloned into every registry they touch.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde_json::Value;
use smol_str::SmolStr;

use crate::fingerprint::{fingerprint, fingerprint_opt};
use crate::method::HttpMethod;
use crate::transport::Params;

#[derive(Debug)]
struct RequestKeyInner {
    method: HttpMethod,
    endpoint: SmolStr,
    rendered: String,
}

/// Canonical identity of a call.
#[derive(Clone, Debug)]
pub struct RequestKey {
    inner: Arc<RequestKeyInner>,
}

impl RequestKey {
    /// Builds the key for `method endpoint` with the given params and body.
    pub fn new(method: HttpMethod, endpoint: &str, params: &Params, body: Option<&Value>) -> Self {
        let identity = format!(
            "{{\"body\":{},\"params\":{}}}",
            fingerprint_opt(body),
            fingerprint(&Value::Object(params.clone())),
        );
        Self::from_parts(
            method,
            SmolStr::new(endpoint),
            format!("{method} {endpoint} :: {identity}"),
        )
    }

    /// Derives the in-flight identity of a batched call carrying `payload`.
    pub fn with_payload(&self, payload: Option<&Value>) -> Self {
        Self::from_parts(
            self.inner.method,
            self.inner.endpoint.clone(),
            format!("{} :: payload={}", self.inner.rendered, fingerprint_opt(payload)),
        )
    }

    fn from_parts(method: HttpMethod, endpoint: SmolStr, rendered: String) -> Self {
        RequestKey {
            inner: Arc::new(RequestKeyInner {
                method,
                endpoint,
                rendered,
            }),
        }
    }

    /// Returns the verb this key was built for.
    #[inline]
    pub fn method(&self) -> HttpMethod {
        self.inner.method
    }

    /// Returns the endpoint this key was built for.
    #[inline]
    pub fn endpoint(&self) -> &str {
        &self.inner.endpoint
    }

    /// Returns the rendered key.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.inner.rendered
    }
}

impl PartialEq for RequestKey {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.inner.rendered == other.inner.rendered
    }
}

impl Eq for RequestKey {}

impl Hash for RequestKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.inner.rendered.hash(state);
    }
}

impl fmt::Display for RequestKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.inner.rendered)
    }
}
