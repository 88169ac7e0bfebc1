//! Fedlink - resilient gRPC transport client for federated-learning collaborators
//!
//! Fedlink carries control messages and large binary payloads between a
//! collaborator (worker node) and its aggregator (coordinator) over a
//! gRPC channel secured by mutual TLS. It does not decide *what* to compute,
//! only *how* to move requests and responses reliably between two identified
//! parties over an unreliable network.
//!
//! # Architecture
//!
//! Every operation runs the same path: stamp the identity header, open a
//! fresh channel, issue the call through the retry layer, validate the
//! response header, tear the channel down. Transient transport failures are
//! absorbed with backoff pacing; authentication and identity-validation
//! failures always surface immediately.
//!
//! # Modules
//!
//! - [`proto`] - gRPC protocol definitions (the fixed external wire contract)
//! - [`channel`] - Transport channel construction (plaintext or mutual TLS)
//! - [`mtls`] - TLS configuration from credential byte blobs
//! - [`retry`] - Backoff pacing and status-gated retry
//! - [`header`] - Identity header stamping and validation
//! - [`codec`] - Payload chunking and the opaque tensor codec seam
//! - [`client`] - The aggregator client facade and operation set
//! - [`error`] - Error types for the transport client

#![deny(missing_docs)]

pub mod channel;
pub mod client;
pub mod codec;
pub mod error;
pub mod header;
pub mod mtls;
pub mod proto;
pub mod retry;

pub use client::{AggregatorClientConfig, AggregatorGrpcClient};
pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Default Configuration Constants
// =============================================================================
// Centralized here so client defaults and test fixtures stay consistent.

/// Default port for the aggregator gRPC server
pub const DEFAULT_AGGREGATOR_PORT: u16 = 50051;

/// Default interval between reconnect attempts
pub const DEFAULT_RECONNECT_INTERVAL: std::time::Duration = std::time::Duration::from_secs(1);

/// Default chunk size for streamed task-result payloads (2 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;
