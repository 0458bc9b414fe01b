//! Remote API client for the hosted backend.
//!
//! The queue only needs one call per operation; [`RemoteApi`] is the seam
//! tests replace with mocks.

mod client;

pub use client::{HttpRemoteApi, RemoteApi};

#[cfg(test)]
pub use client::MockRemoteApi;

use serde::Serialize;
use serde_json::Value;

/// HTTP verb used to replay an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Post,
    Patch,
    Delete,
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Post => "POST",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        };
        write!(f, "{s}")
    }
}

/// One request against the backend.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Sent as `Idempotency-Key` so replays are safe to repeat.
    pub idempotency_key: String,
}
