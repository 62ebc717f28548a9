//! Contracts for the playback transport and the buffered-data oracle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::media::{BufferedRanges, MediaTime};

/// Lifecycle of the underlying playback transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransportLifecycle {
    Null,
    Ready,
    Paused,
    Playing,
}

impl TransportLifecycle {
    /// Seeks are only possible once the transport has prerolled.
    pub fn is_seekable(self) -> bool {
        self >= TransportLifecycle::Paused
    }
}

/// Errors reported by a playback transport.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    #[error("Transport rejected seek: {reason}")]
    SeekRejected { reason: String },

    #[error("Transport state change failed: {reason}")]
    StateChangeFailed { reason: String },
}

/// The player's transport: the thing that actually moves the playhead.
#[async_trait]
pub trait PlaybackTransport: Send {
    fn lifecycle(&self) -> TransportLifecycle;

    /// An asynchronous state change has been requested and not yet settled.
    fn has_pending_state_change(&self) -> bool;

    fn is_end_of_stream(&self) -> bool;

    /// Brings an ended transport back to a seekable state.
    ///
    /// # Errors
    ///
    /// - `TransportError::StateChangeFailed` - Transport could not be reset
    async fn reset(&mut self) -> Result<(), TransportError>;

    /// Issues a flushing seek. Completion is reported separately.
    ///
    /// # Errors
    ///
    /// - `TransportError::SeekRejected` - Transport refused the seek
    async fn seek(&mut self, target: MediaTime, rate: f64) -> Result<(), TransportError>;
}

/// Media source side of a seek: what is buffered and how to get more.
pub trait SeekBufferOracle: Send {
    fn buffered(&self) -> BufferedRanges;

    /// Asks the client to refill buffers around `time`. The answer arrives
    /// later as a "buffered data sufficient" signal.
    fn request_data_for_time(&mut self, time: MediaTime);

    /// Tells the source buffers to re-enqueue samples from `time`.
    fn seek_to_time(&mut self, time: MediaTime);
}
