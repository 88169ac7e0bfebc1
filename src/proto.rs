//! gRPC protocol definitions for collaborator-aggregator communication
//!
//! This module contains the generated Protobuf and gRPC code for the
//! aggregator wire contract. The schema is a fixed external contract: a
//! request/response pair per operation, a client-streaming mode for task
//! results, and a four-field identity header on everything except the
//! trained-model retrieval pair.
//!
//! # Example
//!
//! ```ignore
//! use fedlink::proto::aggregator_client::AggregatorClient;
//!
//! // Collaborator connects to the aggregator
//! let mut client = AggregatorClient::connect("https://aggregator.example.com:50051").await?;
//!
//! let response = client
//!     .get_tasks(GetTasksRequest { header: Some(header) })
//!     .await?
//!     .into_inner();
//! ```

#![allow(missing_docs)] // Generated code doesn't have docs
#![allow(clippy::doc_overindented_list_items)] // Generated proto docs have formatting issues

/// Generated protobuf and gRPC code for aggregator communication
pub mod aggregator {
    /// Version 1 of the aggregator protocol
    pub mod v1 {
        tonic::include_proto!("fedlink.aggregator.v1");
    }
}

// Re-export commonly used types at the module level for convenience
pub use aggregator::v1::*;
