//! Scripted collaborators for tests and simulations.
//!
//! Everything here is deterministic: the container format is plain JSON, and
//! the recording fakes keep every call they receive for later assertions.

pub mod client;
pub mod container;
pub mod drm;
pub mod playback;

pub use client::{ClientEvent, DetectedTrack, RecordingClient, RecordingEngine};
pub use container::{ChunkLog, SimContainer, SimDemuxer, SimRecord};
pub use drm::{StaticDecryptorFactory, XorDecryptor};
pub use playback::{SimulatedBuffers, SimulatedTransport};
