//! Mapping of [`TransportRequest`] onto a [`reqwest::Client`].

use std::fmt;

use bytes::Bytes;
use callbox_core::{HttpMethod, Params, Transport, TransportError, TransportRequest};
use futures::FutureExt;
use futures::future::BoxFuture;
use http::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Method, Url};
use serde_json::Value;
use tracing::{debug, trace};

const JSON: &str = "application/json";

/// Transport issuing each call through a shared [`reqwest::Client`].
///
/// Endpoints that are absolute URLs are used as-is; relative ones are
/// appended to the base URL, when one is set.
#[derive(Clone, Default)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: Option<String>,
}

impl fmt::Debug for ReqwestTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReqwestTransport")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl ReqwestTransport {
    /// Wraps `client`.
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            base_url: None,
        }
    }

    /// Resolves relative endpoints against `base_url`.
    pub fn base_url(self, base_url: impl Into<String>) -> Self {
        Self {
            base_url: Some(base_url.into()),
            ..self
        }
    }

    /// The wrapped client.
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    fn url(&self, endpoint: &str, params: &Params) -> Result<Url, TransportError> {
        let mut url = match (Url::parse(endpoint), &self.base_url) {
            (Ok(absolute), _) => absolute,
            (Err(_), Some(base)) => {
                let joined = format!(
                    "{}/{}",
                    base.trim_end_matches('/'),
                    endpoint.trim_start_matches('/')
                );
                Url::parse(&joined).map_err(TransportError::network)?
            }
            (Err(error), None) => return Err(TransportError::network(error)),
        };
        let pairs = query_pairs(params);
        if !pairs.is_empty() {
            url.query_pairs_mut().extend_pairs(pairs);
        }
        Ok(url)
    }

    async fn execute(
        client: reqwest::Client,
        method: HttpMethod,
        url: Url,
        request: TransportRequest,
    ) -> Result<Value, TransportError> {
        let mut builder = client
            .request(to_method(method), url.clone())
            .header(ACCEPT, JSON);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            let encoded = serde_json::to_vec(body).map_err(TransportError::network)?;
            builder = builder.header(CONTENT_TYPE, JSON).body(encoded);
        }

        let response = builder.send().await.map_err(TransportError::network)?;
        let status = response.status();
        let body = response.bytes().await.map_err(TransportError::network)?;
        trace!(%url, status = status.as_u16(), bytes = body.len(), "response received");

        let decoded = decode_body(body);
        if status.is_success() {
            Ok(decoded)
        } else {
            debug!(%url, status = status.as_u16(), "upstream returned an error status");
            Err(TransportError::Status {
                status: status.as_u16(),
                body: (!decoded.is_null()).then_some(decoded),
            })
        }
    }
}

impl Transport for ReqwestTransport {
    type Future = BoxFuture<'static, Result<Value, TransportError>>;

    fn invoke(&self, request: TransportRequest) -> Self::Future {
        let url = self.url(&request.endpoint, &request.params);
        let client = self.client.clone();
        let method = request.method;
        async move { Self::execute(client, method, url?, request).await }.boxed()
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
        HttpMethod::Head => Method::HEAD,
        HttpMethod::Options => Method::OPTIONS,
    }
}

/// Flattens params into query pairs.
///
/// Arrays become one pair per element, `null` is skipped, strings are used
/// verbatim and every other value is written as JSON text.
pub fn query_pairs(params: &Params) -> Vec<(String, String)> {
    let mut pairs = Vec::with_capacity(params.len());
    for (name, value) in params {
        match value {
            Value::Null => {}
            Value::Array(items) => pairs.extend(
                items
                    .iter()
                    .filter(|item| !item.is_null())
                    .map(|item| (name.clone(), scalar(item))),
            ),
            other => pairs.push((name.clone(), scalar(other))),
        }
    }
    pairs
}

fn scalar(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Decodes a response body: empty is `null`, JSON is parsed, anything else
/// becomes a JSON string.
pub fn decode_body(body: Bytes) -> Value {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Value::Null;
    }
    serde_json::from_slice(&body)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&body).into_owned()))
}
