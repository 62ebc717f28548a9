//! JSON-scripted container and the demuxer that plays it back.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::elements::{ContextRequest, DemuxError, Demuxer, DemuxerOutput, StreamId};
use crate::media::{DemuxedSample, EncodedChunk, MediaTime, StreamFormat};

/// One demuxer event in a scripted chunk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimRecord {
    StreamAdded {
        stream: u32,
        #[serde(default)]
        format: Option<StreamFormat>,
    },
    FormatChanged {
        stream: u32,
        format: StreamFormat,
    },
    Sample {
        stream: u32,
        pts_ms: i64,
        dts_ms: i64,
        duration_ms: i64,
        #[serde(default = "default_keyframe")]
        keyframe: bool,
        #[serde(default)]
        payload: Vec<u8>,
    },
    StreamRemoved {
        stream: u32,
    },
    NeedContext {
        system_ids: Vec<String>,
    },
}

fn default_keyframe() -> bool {
    true
}

/// Builder for scripted chunks.
#[derive(Debug, Clone, Default)]
pub struct SimContainer {
    records: Vec<SimRecord>,
}

impl SimContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stream(mut self, stream: u32, format: StreamFormat) -> Self {
        self.records.push(SimRecord::StreamAdded {
            stream,
            format: Some(format),
        });
        self
    }

    /// Announces a stream whose format is not known yet.
    pub fn bare_stream(mut self, stream: u32) -> Self {
        self.records.push(SimRecord::StreamAdded {
            stream,
            format: None,
        });
        self
    }

    pub fn format(mut self, stream: u32, format: StreamFormat) -> Self {
        self.records.push(SimRecord::FormatChanged { stream, format });
        self
    }

    /// Adds a keyframe whose payload is the presentation time in ASCII.
    pub fn sample(self, stream: u32, pts_ms: i64, dts_ms: i64, duration_ms: i64) -> Self {
        let payload = format!("frame@{pts_ms}").into_bytes();
        self.sample_with_payload(stream, pts_ms, dts_ms, duration_ms, payload)
    }

    pub fn sample_with_payload(
        mut self,
        stream: u32,
        pts_ms: i64,
        dts_ms: i64,
        duration_ms: i64,
        payload: Vec<u8>,
    ) -> Self {
        self.records.push(SimRecord::Sample {
            stream,
            pts_ms,
            dts_ms,
            duration_ms,
            keyframe: true,
            payload,
        });
        self
    }

    /// `count` consecutive samples of `duration_ms` each, starting at zero.
    pub fn samples(mut self, stream: u32, count: usize, duration_ms: i64) -> Self {
        for i in 0..count as i64 {
            self = self.sample(stream, i * duration_ms, i * duration_ms, duration_ms);
        }
        self
    }

    pub fn removed(mut self, stream: u32) -> Self {
        self.records.push(SimRecord::StreamRemoved { stream });
        self
    }

    pub fn need_context(mut self, system_ids: &[&str]) -> Self {
        self.records.push(SimRecord::NeedContext {
            system_ids: system_ids.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    pub fn records(&self) -> &[SimRecord] {
        &self.records
    }

    /// Serializes the script into a chunk the [`SimDemuxer`] understands.
    pub fn encode(&self) -> EncodedChunk {
        match serde_json::to_vec(&self.records) {
            Ok(bytes) => EncodedChunk::from(bytes),
            Err(e) => {
                tracing::error!("Failed to encode sim container: {e}");
                EncodedChunk::from(Vec::new())
            }
        }
    }

    /// Convenience: a single H.264 stream with `samples` 40 ms frames.
    pub fn single_video(samples: usize) -> EncodedChunk {
        Self::new()
            .stream(0, StreamFormat::video("video/x-h264", 640, 360).with_codec("avc1.42E01E"))
            .samples(0, samples, 40)
            .encode()
    }
}

/// Every chunk a [`SimDemuxer`] received, in order.
pub type ChunkLog = Arc<Mutex<Vec<Bytes>>>;

/// Demuxer that replays [`SimContainer`] scripts.
///
/// Empty chunks parse to nothing. Anything that is not a JSON record list
/// is reported as malformed.
#[derive(Debug, Default)]
pub struct SimDemuxer {
    received: ChunkLog,
    flushes: Arc<Mutex<u32>>,
}

impl SimDemuxer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn chunk_log(&self) -> ChunkLog {
        Arc::clone(&self.received)
    }

    pub fn flush_count(&self) -> Arc<Mutex<u32>> {
        Arc::clone(&self.flushes)
    }
}

impl Demuxer for SimDemuxer {
    fn push(
        &mut self,
        chunk: &EncodedChunk,
        output: &mut dyn DemuxerOutput,
    ) -> Result<(), DemuxError> {
        self.received
            .lock()
            .push(Bytes::copy_from_slice(chunk.as_bytes()));

        if chunk.is_empty() {
            return Ok(());
        }

        let records: Vec<SimRecord> =
            serde_json::from_slice(chunk.as_bytes()).map_err(|e| DemuxError::Malformed {
                reason: e.to_string(),
            })?;

        for record in records {
            match record {
                SimRecord::StreamAdded { stream, format } => {
                    output.stream_added(StreamId(stream), format);
                }
                SimRecord::FormatChanged { stream, format } => {
                    output.format_changed(StreamId(stream), format);
                }
                SimRecord::Sample {
                    stream,
                    pts_ms,
                    dts_ms,
                    duration_ms,
                    keyframe,
                    payload,
                } => {
                    let mut sample = DemuxedSample::new(
                        MediaTime::from_millis(pts_ms),
                        MediaTime::from_millis(dts_ms),
                        MediaTime::from_millis(duration_ms),
                        payload,
                    );
                    sample.keyframe = keyframe;

                    let result = output.sample(StreamId(stream), sample);
                    if result.is_fatal() {
                        return Err(DemuxError::Flow { result });
                    }
                }
                SimRecord::StreamRemoved { stream } => output.stream_removed(StreamId(stream)),
                SimRecord::NeedContext { system_ids } => output.need_context(ContextRequest {
                    context_type: "drm-preferred-decryption-system-id".to_string(),
                    system_ids,
                }),
            }
        }

        Ok(())
    }

    fn flush(&mut self) {
        *self.flushes.lock() += 1;
    }
}
