//! Error taxonomy for the meshwork runtime.
//!
//! Uses `thiserror` for ergonomic error definitions. No error in this
//! taxonomy ever escapes the HTTP layer: failures either come back
//! inside an `ACKNOWLEDGEMENT`, land in a form's `error` field, or are
//! swallowed by the enqueue-and-expire path.

use thiserror::Error;

/// The top-level error type for meshwork operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Bad nonce, tag, or base64 on an encrypted envelope.
    #[error("envelope error: {0}")]
    Envelope(String),

    /// Payload JSON did not match the expected schema.
    #[error("validation error: {0}")]
    Validation(#[from] serde_json::Error),

    /// A form handler failed; the message is the formatted error chain
    /// that ends up in the form's `error` field.
    #[error("handler error: {0}")]
    Handler(String),

    /// An HTTP push to a peer failed. The message is enqueued so a
    /// future pull or route change can still deliver it.
    #[error("forward to {url} failed: {reason}")]
    Forward { url: String, reason: String },

    /// An object reached its TTL and was destroyed by a worker.
    #[error("{kind} {id} timed out")]
    Timeout { kind: &'static str, id: String },

    /// No peer and no route for a destination; the message is queued
    /// and will expire if never claimed.
    #[error("destination {0} unknown")]
    UnknownDestination(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Wrap a store-layer failure.
    pub fn store(error: impl std::fmt::Display) -> Error {
        Error::Store(error.to_string())
    }

    /// The flattened error chain, the way it is recorded in
    /// acknowledgements and form `error` fields.
    pub fn chain_string(&self) -> String {
        use std::error::Error as _;
        let mut out = self.to_string();
        let mut source = self.source();
        while let Some(inner) = source {
            out.push_str(": ");
            out.push_str(&inner.to_string());
            source = inner.source();
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_string_includes_source() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope").unwrap_err();
        let err = Error::Validation(bad);
        let chain = err.chain_string();
        assert!(chain.starts_with("validation error"));
    }

    #[test]
    fn forward_error_names_the_url() {
        let err = Error::Forward {
            url: "http://10.0.0.9:53080/mpi".into(),
            reason: "connection refused".into(),
        };
        assert!(err.to_string().contains("10.0.0.9"));
    }
}
