//! Demuxer output routing: one linked stream, everything else discarded.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::messages::{OwnerLink, ProcessingMessage, RendezvousError, WiringDecision};
use super::sink::StreamSink;
use super::{ContextRequest, Decryptor, DemuxerOutput, FlowResult, StreamId};
use crate::media::{DemuxedSample, StreamFormat};

/// Counters updated by the processing thread, readable from anywhere.
#[derive(Debug, Default)]
pub struct ProcessingCounters {
    discarded_streams: AtomicU64,
    discarded_samples: AtomicU64,
}

impl ProcessingCounters {
    pub fn discarded_streams(&self) -> u64 {
        self.discarded_streams.load(Ordering::Relaxed)
    }

    pub fn discarded_samples(&self) -> u64 {
        self.discarded_samples.load(Ordering::Relaxed)
    }
}

enum Route {
    Linked {
        decryptor: Option<Box<dyn Decryptor>>,
        sink: StreamSink,
    },
    /// Black hole for streams beyond the first.
    Discard,
    Unlinked,
}

pub(crate) struct StreamRouter {
    link: OwnerLink,
    routes: HashMap<StreamId, Route>,
    counters: Arc<ProcessingCounters>,
}

impl StreamRouter {
    pub(crate) fn new(link: OwnerLink, counters: Arc<ProcessingCounters>) -> Self {
        Self {
            link,
            routes: HashMap::new(),
            counters,
        }
    }

    /// Forgets every stream; the demuxer re-announces them after a flush.
    pub(crate) fn reset(&mut self) {
        self.routes.clear();
    }

    pub(crate) fn end_of_stream(&mut self) {
        for route in self.routes.values_mut() {
            if let Route::Linked { sink, .. } = route {
                sink.on_end_of_stream(&self.link);
            }
        }
    }

    fn wire(&mut self, stream: StreamId, format: Option<StreamFormat>) -> Route {
        let requested = format.clone();
        let decision = self
            .link
            .rendezvous(|reply| ProcessingMessage::StreamWiring {
                stream,
                format: requested,
                reply,
            });

        match decision {
            Ok(WiringDecision::Linked { decryptor }) => {
                let mut sink = StreamSink::new(stream);
                if let Some(format) = format {
                    sink.on_format_changed(&self.link, format);
                }
                Route::Linked { decryptor, sink }
            }
            Ok(WiringDecision::Rejected) => Route::Unlinked,
            Err(RendezvousError::TimedOut { limit }) => {
                tracing::warn!(%stream, ?limit, "Stream wiring timed out");
                self.link.post(ProcessingMessage::RendezvousTimedOut {
                    operation: "stream-wiring",
                    limit,
                });
                Route::Unlinked
            }
            Err(RendezvousError::Closed) => Route::Unlinked,
        }
    }
}

impl DemuxerOutput for StreamRouter {
    fn stream_added(&mut self, stream: StreamId, format: Option<StreamFormat>) {
        if self.routes.contains_key(&stream) {
            tracing::debug!(%stream, "Stream re-announced");
            if let Some(format) = format {
                self.format_changed(stream, format);
            }
            return;
        }

        // Only one live stream per pipeline; later ones go to the black hole
        // without bothering the owning thread.
        if !self.routes.is_empty() {
            tracing::debug!(%stream, "Discarding additional demuxer stream");
            self.counters.discarded_streams.fetch_add(1, Ordering::Relaxed);
            self.routes.insert(stream, Route::Discard);
            return;
        }

        let route = self.wire(stream, format);
        self.routes.insert(stream, route);
    }

    fn stream_removed(&mut self, stream: StreamId) {
        match self.routes.remove(&stream) {
            Some(Route::Linked { .. }) => {
                self.link
                    .post(ProcessingMessage::StreamRemoved { stream });
            }
            Some(_) => tracing::debug!(%stream, "Unlinked stream removed"),
            None => tracing::debug!(%stream, "Removal of unknown stream ignored"),
        }
    }

    fn format_changed(&mut self, stream: StreamId, format: StreamFormat) {
        match self.routes.get_mut(&stream) {
            Some(Route::Linked { sink, .. }) => sink.on_format_changed(&self.link, format),
            _ => tracing::trace!(%stream, "Format change on unlinked stream"),
        }
    }

    fn sample(&mut self, stream: StreamId, sample: DemuxedSample) -> FlowResult {
        match self.routes.get_mut(&stream) {
            Some(Route::Linked { decryptor, sink }) => {
                let sample = match decryptor {
                    Some(decryptor) => match decryptor.decrypt(sample) {
                        Ok(clear) => clear,
                        Err(e) => {
                            tracing::warn!(%stream, "Decryption failed: {e}");
                            return FlowResult::Error;
                        }
                    },
                    None => sample,
                };
                sink.on_sample_ready(&self.link, sample)
            }
            Some(Route::Discard) => {
                self.counters
                    .discarded_samples
                    .fetch_add(1, Ordering::Relaxed);
                FlowResult::Ok
            }
            Some(Route::Unlinked) | None => FlowResult::NotLinked,
        }
    }

    fn need_context(&mut self, request: ContextRequest) {
        self.link.post(ProcessingMessage::NeedContext { request });
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use bytes::Bytes;
    use tokio::runtime::Handle;
    use tokio::sync::mpsc;

    use super::*;
    use crate::media::MediaTime;

    fn sample(pts_ms: i64) -> DemuxedSample {
        DemuxedSample::new(
            MediaTime::from_millis(pts_ms),
            MediaTime::from_millis(pts_ms),
            MediaTime::from_millis(40),
            Bytes::from_static(b"x"),
        )
    }

    /// Runs `script` against a router on a plain thread while the test
    /// answers rendezvous with `linked` / `FlowResult::Ok`.
    async fn drive(
        linked: bool,
        script: impl FnOnce(&mut StreamRouter) -> Vec<FlowResult> + Send + 'static,
    ) -> (Vec<FlowResult>, Vec<&'static str>, Arc<ProcessingCounters>) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let link = OwnerLink::new(tx, None, Handle::current());
        let counters = Arc::new(ProcessingCounters::default());
        let thread_counters = Arc::clone(&counters);

        let worker = thread::spawn(move || {
            let mut router = StreamRouter::new(link, thread_counters);
            script(&mut router)
        });

        let mut seen = Vec::new();
        while let Some(message) = rx.recv().await {
            seen.push(message.name());
            match message {
                ProcessingMessage::StreamWiring { reply, .. } => {
                    let decision = if linked {
                        WiringDecision::Linked { decryptor: None }
                    } else {
                        WiringDecision::Rejected
                    };
                    let _ = reply.send(decision);
                }
                ProcessingMessage::SampleReady { reply, .. } => {
                    let _ = reply.send(FlowResult::Ok);
                }
                _ => {}
            }
        }

        let results = tokio::task::spawn_blocking(move || worker.join().unwrap())
            .await
            .unwrap();
        (results, seen, counters)
    }

    #[tokio::test]
    async fn test_second_stream_goes_to_black_hole() {
        let (results, seen, counters) = drive(true, |router| {
            router.stream_added(StreamId(0), Some(StreamFormat::video("video/x-h264", 4, 4)));
            router.stream_added(StreamId(1), Some(StreamFormat::audio("audio/mpeg")));
            vec![router.sample(StreamId(0), sample(0)), router.sample(StreamId(1), sample(0))]
        })
        .await;

        assert_eq!(results, vec![FlowResult::Ok, FlowResult::Ok]);
        assert_eq!(seen, vec!["stream-wiring", "format-changed", "sample-ready"]);
        assert_eq!(counters.discarded_streams(), 1);
        assert_eq!(counters.discarded_samples(), 1);
    }

    #[tokio::test]
    async fn test_rejected_stream_is_not_linked() {
        let (results, seen, _) = drive(false, |router| {
            router.stream_added(StreamId(0), Some(StreamFormat::new("video/x-theora")));
            let result = router.sample(StreamId(0), sample(0));
            router.stream_removed(StreamId(0));
            vec![result]
        })
        .await;

        assert_eq!(results, vec![FlowResult::NotLinked]);
        assert_eq!(seen, vec!["stream-wiring"]);
    }

    #[tokio::test]
    async fn test_linked_stream_reports_removal_and_eos() {
        let (_, seen, _) = drive(true, |router| {
            router.stream_added(StreamId(3), None);
            router.format_changed(StreamId(3), StreamFormat::audio("audio/mpeg"));
            router.format_changed(StreamId(3), StreamFormat::audio("audio/mpeg"));
            router.end_of_stream();
            router.stream_removed(StreamId(3));
            Vec::new()
        })
        .await;

        assert_eq!(
            seen,
            vec!["stream-wiring", "format-changed", "end-of-stream", "stream-removed"]
        );
    }
}
