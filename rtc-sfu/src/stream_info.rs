/// RTCP feedback mechanism negotiated for the stream.
///
/// See: <https://draft.ortc.org/#dom-rtcrtcpfeedback>
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct RTCPFeedback {
    /// Type of feedback mechanism: "ack", "ccm", "nack", "goog-remb", "transport-cc".
    pub typ: String,

    /// Parameter value that depends on the feedback type, e.g. "pli" for `typ="nack"`.
    pub parameter: String,
}

/// Audio or video.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    #[default]
    Video,
}

impl MediaKind {
    pub fn is_video(&self) -> bool {
        *self == MediaKind::Video
    }
}

/// Stream context passed to interceptor bind/unbind callbacks.
#[derive(Default, Debug, Clone)]
pub struct StreamInfo {
    /// Unique identifier for the stream
    pub id: String,
    /// Synchronization Source identifier (SSRC) of the stream
    pub ssrc: u32,
    /// RTP payload type (e.g., 96 for VP8, 111 for Opus)
    pub payload_type: u8,
    /// MIME type of the codec (e.g., "video/VP8", "audio/opus")
    pub mime_type: String,
    /// Clock rate in Hz (e.g., 90000 for video, 48000 for audio)
    pub clock_rate: u32,
    /// Number of audio channels (0 for video)
    pub channels: u16,
    /// RTCP feedback mechanisms negotiated for this stream
    pub rtcp_feedback: Vec<RTCPFeedback>,
}

impl StreamInfo {
    /// Kind derived from the MIME type prefix. Anything not `audio/` counts as video.
    pub fn kind(&self) -> MediaKind {
        if self.mime_type.to_ascii_lowercase().starts_with("audio/") {
            MediaKind::Audio
        } else {
            MediaKind::Video
        }
    }

    /// Generic NACK (`type: "nack"` with an empty parameter) was negotiated.
    pub fn supports_nack(&self) -> bool {
        self.rtcp_feedback
            .iter()
            .any(|fb| fb.typ == "nack" && fb.parameter.is_empty())
    }

    pub fn supports_remb(&self) -> bool {
        self.rtcp_feedback.iter().any(|fb| fb.typ == "goog-remb")
    }
}
