//! Collaborator contracts: the buffer-management client and the media engine.

use std::sync::{Arc, Weak};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::append_state::AppendState;
use super::PipelineId;
use crate::elements::DecryptorFactory;
use crate::media::{MediaSample, MediaTime, TrackDescriptor, TrackId, TrackIdRegistry};

/// Tracks detected by one append, plus the duration known at that point.
///
/// An empty track list means the stream was unusable; the append still
/// completes normally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializationSegment {
    pub tracks: Vec<TrackDescriptor>,
    pub duration: Option<MediaTime>,
}

/// Non-fatal conditions worth surfacing to tests and operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PipelineDiagnostic {
    /// A transition outside the table was requested and ignored.
    InvalidTransition { from: AppendState, to: AppendState },
    UnsupportedStream { media_type: String },
    MissingDecryptor { system_id: String },
    DemuxFailed { reason: String },
    RendezvousTimedOut { operation: String, limit: Duration },
    ElementFailure { reason: String },
}

/// Buffer-management layer receiving the pipeline's output.
///
/// All methods are invoked on the pipeline's owning task, in production
/// order.
pub trait AppendPipelineClient: Send + Sync {
    fn initialization_segment_received(&self, segment: InitializationSegment);

    fn sample_received(&self, sample: MediaSample);

    /// Fires exactly once per completed append.
    fn all_pending_samples_received(&self);

    /// An existing track changed presentation size or codec.
    fn track_format_changed(&self, track: &TrackDescriptor) {
        let _ = track;
    }

    fn end_of_stream_received(&self, track_id: &TrackId) {
        let _ = track_id;
    }

    fn append_state_changed(&self, from: AppendState, to: AppendState) {
        let _ = (from, to);
    }

    fn diagnostic(&self, diagnostic: &PipelineDiagnostic) {
        let _ = diagnostic;
    }
}

/// Player-side collaborator: duration oracle and track registry.
pub trait MediaEngine: Send + Sync {
    fn duration(&self) -> Option<MediaTime>;

    fn track_detected(&self, pipeline: PipelineId, track: &TrackDescriptor, is_first_track: bool);
}

/// Everything a pipeline needs from its surroundings.
#[derive(Clone)]
pub struct PipelineContext {
    /// Held weakly; the pipeline invalidates itself once the client is gone.
    pub client: Weak<dyn AppendPipelineClient>,
    pub engine: Arc<dyn MediaEngine>,
    pub decryptors: Arc<dyn DecryptorFactory>,
    pub track_ids: Arc<TrackIdRegistry>,
}

impl PipelineContext {
    /// Builds a context holding `client` weakly.
    pub fn new<C>(
        client: &Arc<C>,
        engine: Arc<dyn MediaEngine>,
        decryptors: Arc<dyn DecryptorFactory>,
        track_ids: Arc<TrackIdRegistry>,
    ) -> Self
    where
        C: AppendPipelineClient + 'static,
    {
        let client: Weak<C> = Arc::downgrade(client);
        let client: Weak<dyn AppendPipelineClient> = client;
        Self {
            client,
            engine,
            decryptors,
            track_ids,
        }
    }
}
