//! Value types shared by the append pipeline and its collaborators.

pub mod chunk;
pub mod format;
pub mod sample;
pub mod time;
pub mod track;

pub use chunk::EncodedChunk;
pub use format::{PresentationSize, ProtectionInfo, StreamFormat, StreamKind, classify};
pub use sample::{DemuxedSample, MediaSample};
pub use time::{BufferedRanges, MediaTime};
pub use track::{TrackDescriptor, TrackId, TrackIdRegistry};
