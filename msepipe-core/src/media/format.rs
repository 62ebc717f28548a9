//! Stream format announcements and stream classification.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of elementary stream carried by a demuxer output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StreamKind {
    Audio,
    Video,
    Text,
    /// Unsupported or unrecognised; the stream carries no further data.
    Invalid,
}

impl StreamKind {
    /// Single-letter prefix used for track identifiers.
    pub fn id_prefix(self) -> &'static str {
        match self {
            StreamKind::Audio => "A",
            StreamKind::Video => "V",
            StreamKind::Text => "T",
            StreamKind::Invalid => "X",
        }
    }
}

impl fmt::Display for StreamKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamKind::Audio => "audio",
            StreamKind::Video => "video",
            StreamKind::Text => "text",
            StreamKind::Invalid => "invalid",
        };
        f.write_str(name)
    }
}

/// Display dimensions of a video stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PresentationSize {
    pub width: u32,
    pub height: u32,
}

impl PresentationSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl fmt::Display for PresentationSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Content protection metadata attached to an encrypted stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtectionInfo {
    /// Protection system identifier (for example a DRM system UUID).
    pub system_id: String,
    /// Media type of the content before encryption.
    pub original_media_type: String,
}

/// Format announced by the demuxer for one output stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFormat {
    /// Media type such as `video/x-h264`, or the protected wrapper type.
    pub media_type: String,
    /// Codec identification string, e.g. `avc1.42E01E`.
    #[serde(default)]
    pub codec: Option<String>,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub protection: Option<ProtectionInfo>,
}

impl StreamFormat {
    pub fn new(media_type: impl Into<String>) -> Self {
        Self {
            media_type: media_type.into(),
            codec: None,
            width: None,
            height: None,
            protection: None,
        }
    }

    pub fn video(media_type: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            ..Self::new(media_type)
        }
    }

    pub fn audio(media_type: impl Into<String>) -> Self {
        Self::new(media_type)
    }

    pub fn with_codec(mut self, codec: impl Into<String>) -> Self {
        self.codec = Some(codec.into());
        self
    }

    /// Wraps this format as encrypted content for the given protection system.
    pub fn encrypted(self, system_id: impl Into<String>) -> Self {
        Self {
            media_type: "application/x-cenc".to_string(),
            protection: Some(ProtectionInfo {
                system_id: system_id.into(),
                original_media_type: self.media_type,
            }),
            ..self
        }
    }

    /// Media type of the payload, looking through content protection.
    pub fn effective_media_type(&self) -> &str {
        match &self.protection {
            Some(protection) => &protection.original_media_type,
            None => &self.media_type,
        }
    }

    pub fn presentation_size(&self) -> Option<PresentationSize> {
        match (self.width, self.height) {
            (Some(width), Some(height)) => Some(PresentationSize::new(width, height)),
            _ => None,
        }
    }

    /// Codec string reported to clients; falls back to the media type.
    pub fn codec_string(&self) -> String {
        self.codec
            .clone()
            .unwrap_or_else(|| self.effective_media_type().to_string())
    }
}

/// Derives the stream kind from a format announcement.
///
/// Encrypted formats are classified by their original media type. A media
/// type missing from `supported` yields `StreamKind::Invalid`.
pub fn classify(format: &StreamFormat, supported: &[String]) -> StreamKind {
    let media_type = format.effective_media_type();

    let kind = if media_type.starts_with("video/") {
        StreamKind::Video
    } else if media_type.starts_with("audio/") {
        StreamKind::Audio
    } else if media_type.starts_with("text/")
        || media_type.starts_with("application/x-subtitle")
        || media_type == "application/ttml+xml"
    {
        StreamKind::Text
    } else {
        StreamKind::Invalid
    };

    if kind != StreamKind::Invalid && !supported.iter().any(|s| s == media_type) {
        return StreamKind::Invalid;
    }

    kind
}

#[cfg(test)]
mod tests {
    use super::*;

    fn supported() -> Vec<String> {
        ["video/x-h264", "audio/mpeg", "text/vtt"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_classify_plain_streams() {
        let supported = supported();
        assert_eq!(
            classify(&StreamFormat::video("video/x-h264", 640, 360), &supported),
            StreamKind::Video
        );
        assert_eq!(
            classify(&StreamFormat::audio("audio/mpeg"), &supported),
            StreamKind::Audio
        );
        assert_eq!(
            classify(&StreamFormat::new("text/vtt"), &supported),
            StreamKind::Text
        );
    }

    #[test]
    fn test_classify_rejects_unsupported_codec() {
        assert_eq!(
            classify(&StreamFormat::video("video/x-theora", 320, 240), &supported()),
            StreamKind::Invalid
        );
        assert_eq!(
            classify(&StreamFormat::new("application/octet-stream"), &supported()),
            StreamKind::Invalid
        );
    }

    #[test]
    fn test_classify_encrypted_uses_original_type() {
        let format = StreamFormat::video("video/x-h264", 1920, 1080).encrypted("clearkey");
        assert_eq!(format.media_type, "application/x-cenc");
        assert_eq!(format.effective_media_type(), "video/x-h264");
        assert_eq!(classify(&format, &supported()), StreamKind::Video);
        assert_eq!(
            format.presentation_size(),
            Some(PresentationSize::new(1920, 1080))
        );
    }

    #[test]
    fn test_codec_string_fallback() {
        let format = StreamFormat::audio("audio/mpeg");
        assert_eq!(format.codec_string(), "audio/mpeg");
        let format = format.with_codec("mp4a.40.2");
        assert_eq!(format.codec_string(), "mp4a.40.2");
    }
}
