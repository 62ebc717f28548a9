//! Playback side: coordinating seeks between the transport and the
//! buffered media fed by append pipelines.

pub mod seek;
pub mod transport;

pub use seek::{PlaybackEvent, SeekCoordinator, SeekError, SeekOutcome, SeekPhase};
pub use transport::{PlaybackTransport, SeekBufferOracle, TransportError, TransportLifecycle};
