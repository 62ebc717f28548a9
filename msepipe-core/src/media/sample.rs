//! Demuxed sample units and the timing metadata they carry.

use bytes::Bytes;

use super::format::PresentationSize;
use super::time::MediaTime;
use super::track::TrackId;

/// A sample as produced by the demuxer, before it is bound to a track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemuxedSample {
    pub presentation_time: MediaTime,
    pub decode_time: MediaTime,
    pub duration: MediaTime,
    pub keyframe: bool,
    pub payload: Bytes,
}

impl DemuxedSample {
    pub fn new(
        presentation_time: MediaTime,
        decode_time: MediaTime,
        duration: MediaTime,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            presentation_time,
            decode_time,
            duration,
            keyframe: true,
            payload: payload.into(),
        }
    }
}

/// A fully demuxed (and decrypted) sample delivered to the client.
///
/// Timing and identity are read-only once the pipeline has bound the sample
/// to its track.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaSample {
    track_id: TrackId,
    presentation_time: MediaTime,
    decode_time: MediaTime,
    duration: MediaTime,
    presentation_size: Option<PresentationSize>,
    keyframe: bool,
    payload: Bytes,
}

impl MediaSample {
    pub(crate) fn bind(
        sample: DemuxedSample,
        track_id: TrackId,
        presentation_size: Option<PresentationSize>,
    ) -> Self {
        Self {
            track_id,
            presentation_time: sample.presentation_time,
            decode_time: sample.decode_time,
            duration: sample.duration,
            presentation_size,
            keyframe: sample.keyframe,
            payload: sample.payload,
        }
    }

    pub fn track_id(&self) -> &TrackId {
        &self.track_id
    }

    pub fn presentation_time(&self) -> MediaTime {
        self.presentation_time
    }

    pub fn decode_time(&self) -> MediaTime {
        self.decode_time
    }

    pub fn duration(&self) -> MediaTime {
        self.duration
    }

    pub fn presentation_size(&self) -> Option<PresentationSize> {
        self.presentation_size
    }

    pub fn is_keyframe(&self) -> bool {
        self.keyframe
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Stretches a sample that starts shortly after zero back to zero.
    ///
    /// Presentation time becomes zero and the duration grows by the gap, so
    /// the buffered range starts at the origin.
    pub(crate) fn extend_to_the_beginning(&mut self) {
        self.duration = self.duration + self.presentation_time;
        self.presentation_time = MediaTime::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bind_preserves_timing() {
        let demuxed = DemuxedSample::new(
            MediaTime::from_millis(40),
            MediaTime::from_millis(0),
            MediaTime::from_millis(40),
            Bytes::from_static(b"frame"),
        );
        let sample = MediaSample::bind(
            demuxed,
            TrackId::new("V1"),
            Some(PresentationSize::new(640, 480)),
        );

        assert_eq!(sample.track_id().as_str(), "V1");
        assert_eq!(sample.presentation_time(), MediaTime::from_millis(40));
        assert_eq!(sample.decode_time(), MediaTime::ZERO);
        assert_eq!(
            sample.presentation_size(),
            Some(PresentationSize::new(640, 480))
        );
        assert_eq!(sample.payload().as_ref(), b"frame");
    }

    #[test]
    fn test_extend_to_the_beginning() {
        let demuxed = DemuxedSample::new(
            MediaTime::from_millis(60),
            MediaTime::ZERO,
            MediaTime::from_millis(33),
            Bytes::new(),
        );
        let mut sample = MediaSample::bind(demuxed, TrackId::new("V1"), None);
        sample.extend_to_the_beginning();

        assert_eq!(sample.presentation_time(), MediaTime::ZERO);
        assert_eq!(sample.duration(), MediaTime::from_millis(93));
    }
}
