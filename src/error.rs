//! Error types for the library modules
//!
//! Binaries and the collector loop wrap these in `anyhow` with context.

use thiserror::Error;

/// Upstream node RPC failure
#[derive(Error, Debug)]
pub enum RpcError {
    /// HTTP transport failure (connect refused, TLS, body read)
    #[error("transport error calling {method}: {source}")]
    Transport {
        method: &'static str,
        #[source]
        source: reqwest::Error,
    },

    /// Request exceeded the configured timeout
    #[error("timeout calling {method}")]
    Timeout { method: &'static str },

    /// Node answered with a JSON-RPC error object
    #[error("node rejected {method}: {message} (code: {code})")]
    Node {
        method: &'static str,
        code: i64,
        message: String,
    },

    /// Response had neither result nor error
    #[error("empty result from {method}")]
    EmptyResult { method: &'static str },

    /// Result did not match the expected shape
    #[error("failed to decode {method} response: {source}")]
    Decode {
        method: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

impl RpcError {
    /// Node-side rejections are deterministic and not worth retrying
    pub fn is_retryable(&self) -> bool {
        !matches!(self, RpcError::Node { .. } | RpcError::Decode { .. })
    }
}

/// Inbound wire frame could not be understood
#[derive(Error, Debug)]
pub enum WireError {
    #[error("frame is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame has no string \"type\" tag")]
    MissingTag,

    #[error("payload for known tag {tag} is malformed: {source}")]
    BadPayload {
        tag: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Rendering surface failed to create a handle
#[derive(Error, Debug)]
#[error("render surface failed for view {view}: {reason}")]
pub struct RenderError {
    pub view: String,
    pub reason: String,
}
