//! Track identity and descriptors.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::format::{PresentationSize, StreamFormat, StreamKind};

/// Stable identifier of a detected track, e.g. `V1` or `A3`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackId(String);

impl TrackId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Client-visible description of a detected track.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackDescriptor {
    pub id: TrackId,
    pub kind: StreamKind,
    pub codec: String,
    pub presentation_size: Option<PresentationSize>,
}

impl TrackDescriptor {
    pub(crate) fn from_format(id: TrackId, kind: StreamKind, format: &StreamFormat) -> Self {
        let presentation_size = match kind {
            StreamKind::Video => format.presentation_size(),
            _ => None,
        };

        Self {
            id,
            kind,
            codec: format.codec_string(),
            presentation_size,
        }
    }
}

/// Per-kind sequence counters used to mint track identifiers.
///
/// Created by the embedder, normally once per process, and shared by every
/// append pipeline so identifiers stay unique across source buffers.
/// Counters never reset while the registry lives.
#[derive(Debug, Default)]
pub struct TrackIdRegistry {
    counters: Mutex<HashMap<StreamKind, u32>>,
}

impl TrackIdRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next identifier for `kind`.
    pub fn allocate(&self, kind: StreamKind) -> TrackId {
        let mut counters = self.counters.lock();
        let counter = counters.entry(kind).or_insert(0);
        *counter += 1;
        TrackId(format!("{}{}", kind.id_prefix(), counter))
    }
}
