//! Seek coordination between the playback transport and MSE buffers.
//!
//! A seek completes only when two independent confirmations have arrived:
//! the transport finished its flushing seek, and the append side reported
//! that every pending sample was received. Requests that arrive while a
//! transport seek is in flight are coalesced so only the newest survives.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use super::transport::{PlaybackTransport, SeekBufferOracle, TransportError};
use crate::config::SeekConfig;
use crate::media::MediaTime;

/// Errors surfaced by [`SeekCoordinator`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SeekError {
    #[error("Transport seek failed: {0}")]
    Transport(#[from] TransportError),
}

/// Notifications published to coordinator subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PlaybackEvent {
    SeekStarted { target: MediaTime },
    TimeChanged { position: MediaTime },
    SeekCompleted { position: MediaTime },
    SeekFailed { target: MediaTime, reason: String },
}

/// Where the current seek is waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SeekPhase {
    Idle,
    /// Transport not seekable yet.
    DeferredForTransport,
    /// Refill requested; waiting for "buffered data sufficient".
    WaitingForData,
    /// Transport seek issued; waiting for both completions.
    InFlight,
}

/// What a seek request did.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SeekOutcome {
    /// Already at the requested position.
    NoOp,
    /// Stored as the pending target behind the in-flight seek.
    Coalesced,
    Deferred,
    WaitingForData,
    /// Transport seek issued at `time` (possibly snapped).
    Issued { time: MediaTime },
}

/// Drives seeks on a transport against buffered MSE data.
pub struct SeekCoordinator<T, B> {
    config: SeekConfig,
    transport: T,
    buffers: B,
    position: MediaTime,
    seeking: bool,
    target: Option<MediaTime>,
    /// Target of the last seek that completed, restored on failure.
    settled_target: Option<MediaTime>,
    pending: Option<MediaTime>,
    phase: SeekPhase,
    transport_seek_completed: bool,
    mse_seek_completed: bool,
    rate: f64,
    events: broadcast::Sender<PlaybackEvent>,
}

impl<T, B> SeekCoordinator<T, B>
where
    T: PlaybackTransport,
    B: SeekBufferOracle,
{
    pub fn new(config: SeekConfig, transport: T, buffers: B) -> Self {
        let (events, _) = broadcast::channel(64);
        let rate = config.default_rate;
        Self {
            config,
            transport,
            buffers,
            position: MediaTime::ZERO,
            seeking: false,
            target: None,
            settled_target: None,
            pending: None,
            phase: SeekPhase::Idle,
            transport_seek_completed: true,
            mse_seek_completed: true,
            rate,
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PlaybackEvent> {
        self.events.subscribe()
    }

    pub fn position(&self) -> MediaTime {
        self.position
    }

    pub fn is_seeking(&self) -> bool {
        self.seeking
    }

    pub fn target(&self) -> Option<MediaTime> {
        self.target
    }

    pub fn pending_target(&self) -> Option<MediaTime> {
        self.pending
    }

    pub fn phase(&self) -> SeekPhase {
        self.phase
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn set_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn buffers(&self) -> &B {
        &self.buffers
    }

    /// Records normal playback progress. Ignored while seeking.
    pub fn update_position(&mut self, position: MediaTime) {
        if !self.seeking {
            self.position = position;
        }
    }

    /// Requests a seek to `time`.
    ///
    /// # Errors
    ///
    /// - `SeekError::Transport` - Transport reset or seek failed; the seek
    ///   state is rolled back
    pub async fn request_seek(&mut self, time: MediaTime) -> Result<SeekOutcome, SeekError> {
        if time == self.position && !self.seeking {
            tracing::debug!(%time, "Seek to current position");
            self.publish(PlaybackEvent::TimeChanged {
                position: self.position,
            });
            return Ok(SeekOutcome::NoOp);
        }

        match self.phase {
            SeekPhase::InFlight => {
                tracing::debug!(%time, "Seek in flight, coalescing");
                self.pending = Some(time);
                return Ok(SeekOutcome::Coalesced);
            }
            SeekPhase::DeferredForTransport | SeekPhase::WaitingForData => {
                tracing::debug!(%time, phase = ?self.phase, "Retargeting waiting seek");
            }
            SeekPhase::Idle => {
                self.seeking = true;
                self.publish(PlaybackEvent::SeekStarted { target: time });
            }
        }

        self.target = Some(time);
        self.attempt().await
    }

    /// The transport settled a state change; retries a deferred seek.
    ///
    /// # Errors
    ///
    /// - `SeekError::Transport` - Retried seek failed
    pub async fn on_transport_state_changed(&mut self) -> Result<Option<SeekOutcome>, SeekError> {
        if self.phase != SeekPhase::DeferredForTransport {
            return Ok(None);
        }
        self.attempt().await.map(Some)
    }

    /// Enough data is buffered around the requested time; retries the seek.
    ///
    /// # Errors
    ///
    /// - `SeekError::Transport` - Retried seek failed
    pub async fn on_buffered_data_sufficient(&mut self) -> Result<Option<SeekOutcome>, SeekError> {
        if self.phase != SeekPhase::WaitingForData {
            return Ok(None);
        }
        self.attempt().await.map(Some)
    }

    /// Transport finished its flushing seek.
    ///
    /// # Errors
    ///
    /// - `SeekError::Transport` - A coalesced follow-up seek failed
    pub async fn on_transport_seek_completed(&mut self) -> Result<(), SeekError> {
        if self.phase != SeekPhase::InFlight {
            tracing::trace!("Transport seek completion outside a seek");
            return Ok(());
        }
        self.transport_seek_completed = true;
        self.finish_and_resume().await
    }

    /// Append side reported all pending samples received.
    ///
    /// # Errors
    ///
    /// - `SeekError::Transport` - A coalesced follow-up seek failed
    pub async fn on_all_pending_samples_received(&mut self) -> Result<(), SeekError> {
        if self.phase != SeekPhase::InFlight {
            return Ok(());
        }
        self.mse_seek_completed = true;
        self.finish_and_resume().await
    }

    async fn finish_and_resume(&mut self) -> Result<(), SeekError> {
        if let Some(next) = self.finish_if_complete() {
            tracing::debug!(%next, "Resuming coalesced seek");
            self.request_seek(next).await?;
        }
        Ok(())
    }

    /// Completes the in-flight seek once both sides confirmed. Returns the
    /// coalesced target to seek to next, if any.
    fn finish_if_complete(&mut self) -> Option<MediaTime> {
        if !(self.transport_seek_completed && self.mse_seek_completed) {
            return None;
        }

        let position = self.target.unwrap_or(self.position);
        self.position = position;
        self.settled_target = self.target;
        self.seeking = false;
        self.phase = SeekPhase::Idle;
        tracing::debug!(%position, "Seek completed");

        self.publish(PlaybackEvent::TimeChanged { position });
        self.publish(PlaybackEvent::SeekCompleted { position });
        self.pending.take()
    }

    async fn attempt(&mut self) -> Result<SeekOutcome, SeekError> {
        let Some(requested) = self.target else {
            return Ok(SeekOutcome::NoOp);
        };

        let lifecycle = self.transport.lifecycle();
        let ended = self.transport.is_end_of_stream();
        if !lifecycle.is_seekable() || self.transport.has_pending_state_change() || ended {
            if ended {
                tracing::debug!("Transport ended, resetting before seek");
                if let Err(e) = self.transport.reset().await {
                    return Err(self.roll_back(requested, e));
                }
            }
            tracing::debug!(?lifecycle, %requested, "Transport not seekable, deferring");
            self.phase = SeekPhase::DeferredForTransport;
            return Ok(SeekOutcome::Deferred);
        }

        let buffered = self.buffers.buffered();
        let mut time = requested;
        if !buffered.contains(time) {
            let epsilon = MediaTime::from(self.config.snap_epsilon);
            if let Some(snapped) = buffered.start_within(time, epsilon) {
                tracing::debug!(%requested, %snapped, "Snapping seek to buffered data");
                time = snapped;
                self.target = Some(snapped);
            }
        }

        if !buffered.contains(time) {
            tracing::debug!(%time, "Seek target not buffered, requesting data");
            self.buffers.request_data_for_time(time);
            self.phase = SeekPhase::WaitingForData;
            return Ok(SeekOutcome::WaitingForData);
        }

        self.transport_seek_completed = false;
        self.mse_seek_completed = false;
        if let Err(e) = self.transport.seek(time, self.rate).await {
            return Err(self.roll_back(time, e));
        }

        self.buffers.seek_to_time(time);
        self.phase = SeekPhase::InFlight;
        tracing::debug!(%time, rate = self.rate, "Transport seek issued");
        Ok(SeekOutcome::Issued { time })
    }

    fn roll_back(&mut self, attempted: MediaTime, error: TransportError) -> SeekError {
        tracing::warn!(%attempted, "Seek failed: {error}");
        self.target = self.settled_target;
        self.seeking = false;
        self.pending = None;
        self.phase = SeekPhase::Idle;
        self.transport_seek_completed = true;
        self.mse_seek_completed = true;
        self.publish(PlaybackEvent::SeekFailed {
            target: attempted,
            reason: error.to_string(),
        });
        SeekError::Transport(error)
    }

    fn publish(&self, event: PlaybackEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::TransportLifecycle;
    use crate::sim::{SimulatedBuffers, SimulatedTransport};

    fn ms(millis: i64) -> MediaTime {
        MediaTime::from_millis(millis)
    }

    fn coordinator() -> (
        SeekCoordinator<SimulatedTransport, SimulatedBuffers>,
        SimulatedTransport,
        SimulatedBuffers,
    ) {
        let transport = SimulatedTransport::new(TransportLifecycle::Paused);
        let buffers = SimulatedBuffers::new();
        let coordinator =
            SeekCoordinator::new(SeekConfig::default(), transport.clone(), buffers.clone());
        (coordinator, transport, buffers)
    }

    #[tokio::test]
    async fn test_seek_to_current_position_is_noop() {
        let (mut seek, transport, _) = coordinator();
        let mut events = seek.subscribe();

        assert_eq!(seek.request_seek(MediaTime::ZERO).await, Ok(SeekOutcome::NoOp));
        assert_eq!(
            events.try_recv().unwrap(),
            PlaybackEvent::TimeChanged {
                position: MediaTime::ZERO
            }
        );
        assert!(transport.seeks().is_empty());
        assert!(!seek.is_seeking());
    }

    #[tokio::test]
    async fn test_buffered_seek_needs_both_completions() {
        let (mut seek, transport, buffers) = coordinator();
        buffers.insert(ms(0)..ms(10_000));

        let outcome = seek.request_seek(ms(4_000)).await.unwrap();
        assert_eq!(outcome, SeekOutcome::Issued { time: ms(4_000) });
        assert_eq!(transport.seeks(), vec![ms(4_000)]);
        assert_eq!(buffers.seeked_to(), vec![ms(4_000)]);

        seek.on_transport_seek_completed().await.unwrap();
        assert!(seek.is_seeking());
        seek.on_all_pending_samples_received().await.unwrap();
        assert!(!seek.is_seeking());
        assert_eq!(seek.position(), ms(4_000));
    }

    #[tokio::test]
    async fn test_snaps_to_nearby_buffered_start() {
        let (mut seek, transport, buffers) = coordinator();
        buffers.insert(ms(2_050)..ms(5_000));

        let outcome = seek.request_seek(ms(2_000)).await.unwrap();
        assert_eq!(outcome, SeekOutcome::Issued { time: ms(2_050) });
        assert_eq!(transport.seeks(), vec![ms(2_050)]);
        assert_eq!(seek.target(), Some(ms(2_050)));
    }

    #[tokio::test]
    async fn test_coalesces_while_in_flight() {
        let (mut seek, transport, buffers) = coordinator();
        buffers.insert(ms(0)..ms(10_000));

        seek.request_seek(ms(1_000)).await.unwrap();
        assert_eq!(seek.request_seek(ms(2_000)).await, Ok(SeekOutcome::Coalesced));
        assert_eq!(seek.request_seek(ms(3_000)).await, Ok(SeekOutcome::Coalesced));
        assert_eq!(seek.pending_target(), Some(ms(3_000)));

        seek.on_all_pending_samples_received().await.unwrap();
        seek.on_transport_seek_completed().await.unwrap();

        assert_eq!(transport.seeks(), vec![ms(1_000), ms(3_000)]);
        assert_eq!(seek.phase(), SeekPhase::InFlight);
        assert_eq!(seek.pending_target(), None);
    }

    #[tokio::test]
    async fn test_failed_transport_seek_rolls_back() {
        let (mut seek, transport, buffers) = coordinator();
        buffers.insert(ms(0)..ms(10_000));
        transport.fail_next_seek("no preroll");
        let mut events = seek.subscribe();

        let result = seek.request_seek(ms(6_000)).await;
        assert!(matches!(result, Err(SeekError::Transport(TransportError::SeekRejected { .. }))));
        assert!(!seek.is_seeking());
        assert_eq!(seek.target(), None);
        assert_eq!(seek.phase(), SeekPhase::Idle);

        assert!(matches!(events.try_recv(), Ok(PlaybackEvent::SeekStarted { .. })));
        assert!(matches!(events.try_recv(), Ok(PlaybackEvent::SeekFailed { .. })));
    }

    #[tokio::test]
    async fn test_ended_transport_is_reset_and_deferred() {
        let (mut seek, transport, buffers) = coordinator();
        buffers.insert(ms(0)..ms(10_000));
        transport.set_end_of_stream(true);

        assert_eq!(seek.request_seek(ms(500)).await, Ok(SeekOutcome::Deferred));
        assert_eq!(transport.resets(), 1);
        assert!(transport.seeks().is_empty());

        transport.set_pending_state_change(false);
        let retried = seek.on_transport_state_changed().await.unwrap();
        assert_eq!(retried, Some(SeekOutcome::Issued { time: ms(500) }));
    }

    #[tokio::test]
    async fn test_update_position_ignored_while_seeking() {
        let (mut seek, _, buffers) = coordinator();
        seek.update_position(ms(100));
        assert_eq!(seek.position(), ms(100));

        buffers.insert(ms(0)..ms(1_000));
        seek.request_seek(ms(900)).await.unwrap();
        seek.update_position(ms(200));
        assert_eq!(seek.position(), ms(100));
    }
}
