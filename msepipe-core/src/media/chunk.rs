//! Encoded byte ranges handed to the append pipeline.

use std::fmt;

use bytes::Bytes;

/// An opaque range of container bytes.
///
/// No timing is implied beyond container order. The chunk is exclusively
/// owned by whoever holds it: the caller until it is pushed, then the
/// pipeline until the demuxer has consumed it.
#[derive(Clone, PartialEq, Eq)]
pub struct EncodedChunk {
    data: Bytes,
}

impl EncodedChunk {
    /// Wraps static memory without copying.
    pub fn from_static(data: &'static [u8]) -> Self {
        Self {
            data: Bytes::from_static(data),
        }
    }

    /// Copies caller memory so the chunk can outlive the caller's buffer.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            data: Bytes::copy_from_slice(data),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Releases the underlying buffer.
    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

/// Takes ownership of an existing buffer without copying.
impl From<Bytes> for EncodedChunk {
    fn from(data: Bytes) -> Self {
        Self { data }
    }
}

/// Takes ownership of a vector without copying.
impl From<Vec<u8>> for EncodedChunk {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data: Bytes::from(data),
        }
    }
}

impl fmt::Debug for EncodedChunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncodedChunk")
            .field("len", &self.data.len())
            .finish()
    }
}
