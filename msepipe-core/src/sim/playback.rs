//! Simulated transport and buffer oracle for seek tests.

use std::ops::Range;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::media::{BufferedRanges, MediaTime};
use crate::playback::{PlaybackTransport, SeekBufferOracle, TransportError, TransportLifecycle};

#[derive(Debug)]
struct TransportState {
    lifecycle: TransportLifecycle,
    pending_state_change: bool,
    end_of_stream: bool,
    seeks: Vec<MediaTime>,
    resets: u32,
    fail_next_seek: Option<String>,
}

/// Transport whose state is driven by the test. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl SimulatedTransport {
    pub fn new(lifecycle: TransportLifecycle) -> Self {
        Self {
            state: Arc::new(Mutex::new(TransportState {
                lifecycle,
                pending_state_change: false,
                end_of_stream: false,
                seeks: Vec::new(),
                resets: 0,
                fail_next_seek: None,
            })),
        }
    }

    pub fn set_lifecycle(&self, lifecycle: TransportLifecycle) {
        self.state.lock().lifecycle = lifecycle;
    }

    pub fn set_pending_state_change(&self, pending: bool) {
        self.state.lock().pending_state_change = pending;
    }

    pub fn set_end_of_stream(&self, ended: bool) {
        self.state.lock().end_of_stream = ended;
    }

    pub fn fail_next_seek(&self, reason: &str) {
        self.state.lock().fail_next_seek = Some(reason.to_string());
    }

    /// Targets of every successful transport seek.
    pub fn seeks(&self) -> Vec<MediaTime> {
        self.state.lock().seeks.clone()
    }

    pub fn resets(&self) -> u32 {
        self.state.lock().resets
    }
}

#[async_trait]
impl PlaybackTransport for SimulatedTransport {
    fn lifecycle(&self) -> TransportLifecycle {
        self.state.lock().lifecycle
    }

    fn has_pending_state_change(&self) -> bool {
        self.state.lock().pending_state_change
    }

    fn is_end_of_stream(&self) -> bool {
        self.state.lock().end_of_stream
    }

    async fn reset(&mut self) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        state.resets += 1;
        // Reset completes asynchronously; the test settles it.
        state.pending_state_change = true;
        state.end_of_stream = false;
        Ok(())
    }

    async fn seek(&mut self, target: MediaTime, _rate: f64) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if let Some(reason) = state.fail_next_seek.take() {
            return Err(TransportError::SeekRejected { reason });
        }
        state.seeks.push(target);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct BufferState {
    ranges: BufferedRanges,
    data_requests: Vec<MediaTime>,
    seeked_to: Vec<MediaTime>,
}

/// Buffer oracle backed by explicit ranges. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBuffers {
    state: Arc<Mutex<BufferState>>,
}

impl SimulatedBuffers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, range: Range<MediaTime>) {
        self.state.lock().ranges.insert(range);
    }

    /// Times passed to `request_data_for_time`.
    pub fn data_requests(&self) -> Vec<MediaTime> {
        self.state.lock().data_requests.clone()
    }

    /// Times passed to `seek_to_time`.
    pub fn seeked_to(&self) -> Vec<MediaTime> {
        self.state.lock().seeked_to.clone()
    }
}

impl SeekBufferOracle for SimulatedBuffers {
    fn buffered(&self) -> BufferedRanges {
        self.state.lock().ranges.clone()
    }

    fn request_data_for_time(&mut self, time: MediaTime) {
        self.state.lock().data_requests.push(time);
    }

    fn seek_to_time(&mut self, time: MediaTime) {
        self.state.lock().seeked_to.push(time);
    }
}
