//! Injectable data source feeding the demuxer.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::media::EncodedChunk;
use crate::pipeline::PipelineError;

/// Work items travelling from the source to the processing thread.
pub(crate) enum SourceItem {
    Chunk(EncodedChunk),
    Flush,
    EndOfStream,
}

/// Result of pushing a chunk into the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PushOutcome {
    /// Forwarded to the demuxer.
    Accepted,
    /// Downstream had not asked for data; held until it does.
    Busy,
    /// An abort is pending; held until the pipeline is idle again.
    Deferred,
}

/// Owning-side half of the source element.
///
/// Tracks whether the demuxer asked for more data and holds at most one
/// chunk while it has not.
pub(crate) struct AppSource {
    sender: Option<mpsc::UnboundedSender<SourceItem>>,
    need_data: bool,
    queued: Option<EncodedChunk>,
}

impl AppSource {
    pub(crate) fn new() -> Self {
        Self {
            sender: None,
            need_data: true,
            queued: None,
        }
    }

    pub(crate) fn attach(&mut self, sender: mpsc::UnboundedSender<SourceItem>) {
        self.sender = Some(sender);
    }

    pub(crate) fn detach(&mut self) {
        self.sender = None;
        self.queued = None;
    }

    /// # Errors
    ///
    /// - `PipelineError::SourceQueueFull` - A chunk is already waiting for need-data
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub(crate) fn push(&mut self, chunk: EncodedChunk) -> Result<PushOutcome, PipelineError> {
        if self.need_data {
            self.send(SourceItem::Chunk(chunk))?;
            self.need_data = false;
            return Ok(PushOutcome::Accepted);
        }

        if self.queued.is_some() {
            return Err(PipelineError::SourceQueueFull);
        }

        tracing::trace!(len = chunk.len(), "Source busy, queueing chunk");
        self.queued = Some(chunk);
        Ok(PushOutcome::Busy)
    }

    /// Handles a need-data signal. Returns true when a queued chunk was
    /// replayed, meaning the demuxer has more work before it is drained.
    ///
    /// # Errors
    ///
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub(crate) fn on_need_data(&mut self) -> Result<bool, PipelineError> {
        match self.queued.take() {
            Some(chunk) => {
                self.send(SourceItem::Chunk(chunk))?;
                self.need_data = false;
                Ok(true)
            }
            None => {
                self.need_data = true;
                Ok(false)
            }
        }
    }

    /// Drops queued data and asks the processing thread to flush.
    pub(crate) fn flush(&mut self) {
        self.queued = None;
        self.need_data = true;
        if self.send(SourceItem::Flush).is_err() {
            tracing::debug!("Flush skipped, processing thread not running");
        }
    }

    /// # Errors
    ///
    /// - `PipelineError::ElementsStopped` - Processing thread is gone
    pub(crate) fn end_of_stream(&mut self) -> Result<(), PipelineError> {
        self.send(SourceItem::EndOfStream)
    }

    #[cfg(test)]
    pub(crate) fn has_queued(&self) -> bool {
        self.queued.is_some()
    }

    fn send(&self, item: SourceItem) -> Result<(), PipelineError> {
        self.sender
            .as_ref()
            .ok_or(PipelineError::ElementsStopped)?
            .send(item)
            .map_err(|_| PipelineError::ElementsStopped)
    }
}

/// Set-once latch recording that a chunk has left the source.
///
/// Shared with the processing thread. Once tripped the probe unsubscribes
/// itself unless diagnostics logging keeps it reporting every departure.
#[derive(Debug)]
pub struct DepartureProbe {
    departed: AtomicBool,
    subscribed: AtomicBool,
    keep_subscribed: bool,
}

impl DepartureProbe {
    pub fn new(keep_subscribed: bool) -> Self {
        Self {
            departed: AtomicBool::new(false),
            subscribed: AtomicBool::new(true),
            keep_subscribed,
        }
    }

    /// True once at least one chunk has departed since the last re-arm.
    pub fn has_departed(&self) -> bool {
        self.departed.load(Ordering::Acquire)
    }

    /// Records a departure; returns true when it should be reported.
    pub(crate) fn observe(&self) -> bool {
        if !self.subscribed.load(Ordering::Acquire) {
            return false;
        }

        let first = !self.departed.swap(true, Ordering::AcqRel);
        if !self.keep_subscribed {
            self.subscribed.store(false, Ordering::Release);
        }
        first || self.keep_subscribed
    }

    pub(crate) fn rearm(&self) {
        self.departed.store(false, Ordering::Release);
        self.subscribed.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attached() -> (AppSource, mpsc::UnboundedReceiver<SourceItem>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut source = AppSource::new();
        source.attach(tx);
        (source, rx)
    }

    fn next_chunk(rx: &mut mpsc::UnboundedReceiver<SourceItem>) -> Option<EncodedChunk> {
        match rx.try_recv() {
            Ok(SourceItem::Chunk(chunk)) => Some(chunk),
            _ => None,
        }
    }

    #[test]
    fn test_push_forwards_when_data_needed() {
        let (mut source, mut rx) = attached();
        let outcome = source.push(EncodedChunk::from_static(b"a")).unwrap();
        assert_eq!(outcome, PushOutcome::Accepted);
        assert_eq!(next_chunk(&mut rx).unwrap().as_bytes(), b"a");
    }

    #[test]
    fn test_push_queues_single_chunk_until_need_data() {
        let (mut source, mut rx) = attached();
        source.push(EncodedChunk::from_static(b"a")).unwrap();
        next_chunk(&mut rx);

        assert_eq!(
            source.push(EncodedChunk::from_static(b"b")).unwrap(),
            PushOutcome::Busy
        );
        assert!(source.has_queued());
        assert!(next_chunk(&mut rx).is_none());
        assert_eq!(
            source.push(EncodedChunk::from_static(b"c")),
            Err(PipelineError::SourceQueueFull)
        );

        assert!(source.on_need_data().unwrap());
        assert_eq!(next_chunk(&mut rx).unwrap().as_bytes(), b"b");
        assert!(!source.on_need_data().unwrap());
    }

    #[test]
    fn test_flush_drops_queue_and_accepts_again() {
        let (mut source, mut rx) = attached();
        source.push(EncodedChunk::from_static(b"a")).unwrap();
        source.push(EncodedChunk::from_static(b"b")).unwrap();
        next_chunk(&mut rx);

        source.flush();
        assert!(matches!(rx.try_recv(), Ok(SourceItem::Flush)));
        assert!(!source.has_queued());
        assert_eq!(
            source.push(EncodedChunk::from_static(b"c")).unwrap(),
            PushOutcome::Accepted
        );
    }

    #[test]
    fn test_detached_source_reports_stopped() {
        let mut source = AppSource::new();
        assert_eq!(
            source.push(EncodedChunk::from_static(b"a")),
            Err(PipelineError::ElementsStopped)
        );
    }

    #[test]
    fn test_probe_unsubscribes_after_first_departure() {
        let probe = DepartureProbe::new(false);
        assert!(!probe.has_departed());
        assert!(probe.observe());
        assert!(probe.has_departed());
        assert!(!probe.observe());

        probe.rearm();
        assert!(!probe.has_departed());
        assert!(probe.observe());
    }

    #[test]
    fn test_probe_keeps_reporting_with_diagnostics() {
        let probe = DepartureProbe::new(true);
        assert!(probe.observe());
        assert!(probe.observe());
        assert!(probe.has_departed());
    }
}
