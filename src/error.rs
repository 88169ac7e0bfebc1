//! Error types for the fedlink transport client

use thiserror::Error;

/// Main error type for fedlink operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Missing or unreadable credential material at channel-open time
    #[error("transport configuration error: {0}")]
    TransportConfig(String),

    /// Target address could not be turned into a valid endpoint URI
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    Tls(String),

    /// Credential or identity rejection at the transport layer.
    ///
    /// Never retried; always surfaced to the caller immediately.
    #[error("authentication rejected by aggregator: {0}")]
    Authentication(String),

    /// A response header failed an identity invariant.
    ///
    /// Treated as a configuration or logic defect, not a transient condition.
    #[error("response header mismatch on {field}: expected {expected:?}, got {actual:?}")]
    HeaderMismatch {
        /// Header field that failed validation
        field: &'static str,
        /// Value the client expected
        expected: String,
        /// Value the aggregator sent
        actual: String,
    },

    /// Any other transport-level failure on a non-resilient call path
    #[error("gRPC error: {code:?}. Details: {details}")]
    Rpc {
        /// gRPC status code returned by the transport
        code: tonic::Code,
        /// Detail text attached to the status
        details: String,
    },

    /// Payload encoding/decoding error
    #[error("codec error: {0}")]
    Codec(String),
}

impl Error {
    /// Create a transport configuration error with the given message
    pub fn transport_config(msg: impl Into<String>) -> Self {
        Self::TransportConfig(msg.into())
    }

    /// Create a TLS configuration error with the given message
    pub fn tls(msg: impl Into<String>) -> Self {
        Self::Tls(msg.into())
    }

    /// Create a codec error with the given message
    pub fn codec(msg: impl Into<String>) -> Self {
        Self::Codec(msg.into())
    }

    /// Classify a gRPC status into the error taxonomy.
    ///
    /// `Unauthenticated` becomes [`Error::Authentication`]; everything else
    /// becomes [`Error::Rpc`] carrying the code and detail text.
    pub fn from_status(status: tonic::Status) -> Self {
        match status.code() {
            tonic::Code::Unauthenticated => Self::Authentication(status.message().to_string()),
            code => Self::Rpc {
                code,
                details: status.message().to_string(),
            },
        }
    }
}

impl From<tonic::Status> for Error {
    fn from(status: tonic::Status) -> Self {
        Self::from_status(status)
    }
}

impl From<prost::DecodeError> for Error {
    fn from(err: prost::DecodeError) -> Self {
        Self::Codec(err.to_string())
    }
}
