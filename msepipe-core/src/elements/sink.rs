//! Per-stream sink: the processing-thread end of sample delivery.

use super::FlowResult;
use super::StreamId;
use super::messages::{OwnerLink, ProcessingMessage, RendezvousError};
use crate::media::{DemuxedSample, StreamFormat};

pub(crate) struct StreamSink {
    stream: StreamId,
    format: Option<StreamFormat>,
}

impl StreamSink {
    pub(crate) fn new(stream: StreamId) -> Self {
        Self {
            stream,
            format: None,
        }
    }

    /// Reports a format. The first one for this stream means "track
    /// detected"; later ones are in-track changes. Repeats are ignored.
    pub(crate) fn on_format_changed(&mut self, link: &OwnerLink, format: StreamFormat) {
        if self.format.as_ref() == Some(&format) {
            return;
        }

        let first = self.format.is_none();
        self.format = Some(format.clone());
        link.post(ProcessingMessage::FormatChanged {
            stream: self.stream,
            format,
            first,
        });
    }

    /// Blocks until the owning thread has consumed the sample.
    pub(crate) fn on_sample_ready(&mut self, link: &OwnerLink, sample: DemuxedSample) -> FlowResult {
        let stream = self.stream;
        match link.rendezvous(|reply| ProcessingMessage::SampleReady {
            stream,
            sample,
            reply,
        }) {
            Ok(result) => result,
            Err(RendezvousError::TimedOut { limit }) => {
                tracing::warn!(%stream, ?limit, "Sample delivery timed out");
                link.post(ProcessingMessage::RendezvousTimedOut {
                    operation: "sample-ready",
                    limit,
                });
                FlowResult::Error
            }
            Err(RendezvousError::Closed) => {
                tracing::debug!(%stream, "Pipeline invalidated during sample delivery");
                FlowResult::Error
            }
        }
    }

    pub(crate) fn on_end_of_stream(&mut self, link: &OwnerLink) {
        link.post(ProcessingMessage::EndOfStream {
            stream: self.stream,
        });
    }
}
