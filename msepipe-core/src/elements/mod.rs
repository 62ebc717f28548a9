//! Processing-side element graph: source, demuxer, decryptor, sink.
//!
//! The demuxer and decryptor are external capabilities described here only
//! by their contracts. Everything in this module except [`graph`]'s owning
//! half runs on the processing thread and reaches the owning side through
//! [`messages::OwnerLink`].

pub mod graph;
pub mod messages;
pub mod router;
pub mod sink;
pub mod source;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use graph::GraphState;
pub use messages::RendezvousError;
pub use router::ProcessingCounters;
pub use source::{DepartureProbe, PushOutcome};

use crate::media::{DemuxedSample, EncodedChunk, StreamFormat};

/// Identifier the demuxer assigns to one of its output streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StreamId(pub u32);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "stream-{}", self.0)
    }
}

/// Disposition of a sample handed downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowResult {
    /// Sample consumed, keep producing.
    Ok,
    /// The stream has no downstream consumer.
    NotLinked,
    /// Downstream is being reset; the sample was dropped.
    Flushing,
    /// Downstream failed or the pipeline was invalidated.
    Error,
}

impl FlowResult {
    pub fn is_fatal(self) -> bool {
        matches!(self, FlowResult::Flushing | FlowResult::Error)
    }
}

/// Request for a decryption context raised by the demuxer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRequest {
    pub context_type: String,
    /// Protection systems the content declares, in preference order.
    pub system_ids: Vec<String>,
}

/// Receiver of demuxer events; implemented by the stream router.
///
/// Every method is called on the processing thread.
pub trait DemuxerOutput {
    /// A new output stream appeared. `format` is absent when the demuxer has
    /// not negotiated one yet.
    fn stream_added(&mut self, stream: StreamId, format: Option<StreamFormat>);

    fn stream_removed(&mut self, stream: StreamId);

    fn format_changed(&mut self, stream: StreamId, format: StreamFormat);

    /// Hands a sample downstream; blocks until its disposition is known.
    fn sample(&mut self, stream: StreamId, sample: DemuxedSample) -> FlowResult;

    fn need_context(&mut self, request: ContextRequest);
}

/// Container demuxer contract.
pub trait Demuxer: Send {
    /// Parses one chunk, reporting streams and samples to `output`.
    ///
    /// # Errors
    ///
    /// - `DemuxError::Malformed` - Chunk could not be parsed
    /// - `DemuxError::Flow` - Downstream returned a fatal flow result
    fn push(
        &mut self,
        chunk: &EncodedChunk,
        output: &mut dyn DemuxerOutput,
    ) -> Result<(), DemuxError>;

    /// Drops any partially parsed state. Streams are re-announced afterwards.
    fn flush(&mut self);

    /// No more input will arrive until the next flush.
    fn end_of_stream(&mut self, output: &mut dyn DemuxerOutput) {
        let _ = output;
    }
}

/// Decryption stage spliced between a protected stream and the sink.
pub trait Decryptor: Send {
    fn protection_system(&self) -> &str;

    /// # Errors
    ///
    /// - `DecryptError::KeyUnavailable` - No usable key for this sample
    /// - `DecryptError::Failed` - Payload could not be decrypted
    fn decrypt(&mut self, sample: DemuxedSample) -> Result<DemuxedSample, DecryptError>;
}

/// Entry point into the key-system layer.
pub trait DecryptorFactory: Send + Sync {
    /// Resolves a decryptor for a protection system, if one is available.
    fn create_decryptor(&self, system_id: &str) -> Option<Box<dyn Decryptor>>;

    /// Called on the owning thread while the pipeline negotiates keys.
    fn on_need_context(&self, request: &ContextRequest) {
        let _ = request;
    }
}

/// Factory that never provides a decryptor; protected streams are rejected.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDecryptors;

impl DecryptorFactory for NoDecryptors {
    fn create_decryptor(&self, _system_id: &str) -> Option<Box<dyn Decryptor>> {
        None
    }
}

/// Errors raised by a demuxer implementation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DemuxError {
    #[error("Malformed container data: {reason}")]
    Malformed { reason: String },

    #[error("Downstream flow stopped: {result:?}")]
    Flow { result: FlowResult },
}

/// Errors raised by a decryptor implementation.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum DecryptError {
    #[error("No key available for protection system {system_id}")]
    KeyUnavailable { system_id: String },

    #[error("Decryption failed: {reason}")]
    Failed { reason: String },
}
