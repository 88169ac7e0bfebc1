//! Payload chunking and the opaque tensor codec seam
//!
//! Task-result payloads can exceed a single gRPC frame, so the serialized
//! [`TaskResults`] message is split into a sequence of [`DataStream`] chunks
//! before transmission and reassembled byte-identically on the other side.
//!
//! The numeric compression pipeline that produced the tensor bytes is an
//! external concern; [`TensorCodec`] is the injection seam through which the
//! client decodes trained-model payloads, with [`NoCompression`] as the
//! passthrough default.

use prost::Message;

use crate::error::Error;
use crate::proto::{DataStream, NamedTensor, TaskResults};
use crate::Result;

/// Split a serialized task-results message into stream chunks.
///
/// Each chunk carries its own byte length in the `size` field. An empty
/// message still produces one (empty) frame so the server always receives at
/// least one message on the stream.
pub fn proto_to_datastream(results: &TaskResults, chunk_size: usize) -> Vec<DataStream> {
    let bytes = results.encode_to_vec();
    if bytes.is_empty() {
        return vec![DataStream {
            size: 0,
            npbytes: Vec::new(),
        }];
    }

    bytes
        .chunks(chunk_size.max(1))
        .map(|chunk| DataStream {
            size: chunk.len() as u32,
            npbytes: chunk.to_vec(),
        })
        .collect()
}

/// Reassemble stream chunks into the original task-results message.
///
/// The server-side half of the chunking round trip; the fake aggregator in
/// the integration tests uses it to verify split/reassemble idempotence.
pub fn datastream_to_proto(frames: impl IntoIterator<Item = DataStream>) -> Result<TaskResults> {
    let mut buf = Vec::new();
    for frame in frames {
        if frame.size as usize != frame.npbytes.len() {
            return Err(Error::codec(format!(
                "chunk size field {} does not match payload length {}",
                frame.size,
                frame.npbytes.len()
            )));
        }
        buf.extend_from_slice(&frame.npbytes);
    }

    TaskResults::decode(buf.as_slice()).map_err(Into::into)
}

/// Decodes a named tensor's bytes back into raw numeric state.
///
/// The real pipeline may apply lossy or lossless decompression; this crate
/// only carries the bytes, so the codec is injected and treated as opaque.
pub trait TensorCodec: Send + Sync {
    /// Decode one tensor's payload
    fn decode(&self, tensor: &NamedTensor) -> Result<Vec<u8>>;
}

/// Passthrough codec: the tensor bytes are used as-is.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoCompression;

impl TensorCodec for NoCompression {
    fn decode(&self, tensor: &NamedTensor) -> Result<Vec<u8>> {
        Ok(tensor.data_bytes.clone())
    }
}
