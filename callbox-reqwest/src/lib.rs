#![doc = include_str!("../README.md")]

mod transport;

pub use transport::{ReqwestTransport, decode_body, query_pairs};

/// Re-export of the underlying client type for convenience.
pub use reqwest::Client as ReqwestClient;
