//! Messages pushed to the remote peer over the data channel.
//!
//! Every message is a JSON object tagged by `type`:
//!
//! ```text
//! {"type":"segment","sequence":1,"text":"hello","isFinal":false,"start":0.0,"end":1.2}
//! {"type":"status","sessionId":"sess_...","state":"completed","segments":2}
//! ```

use serde::{Deserialize, Serialize};

/// One transcription segment as observed by the receiver.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentMessage {
    /// Per-session sequence number, starting at 1 with no gaps.
    pub sequence: u64,
    /// Transcribed text.
    pub text: String,
    /// Whether this segment is final (no further revisions follow).
    pub is_final: bool,
    /// Start offset into the audio, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<f64>,
    /// End offset into the audio, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<f64>,
}

/// Terminal session report, sent once when status events are enabled.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusMessage {
    /// Session the report belongs to.
    pub session_id: String,
    /// Terminal state (`completed`, `failed`, `cancelled`).
    pub state: String,
    /// Number of segments delivered before the session ended.
    pub segments: u64,
    /// Failure description, present for `failed`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Any message sent over a transcription channel.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelMessage {
    /// A transcription segment.
    Segment(SegmentMessage),
    /// A terminal session report.
    Status(StatusMessage),
}

impl ChannelMessage {
    /// Serialize to the JSON text sent on the channel.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse a message received from a channel.
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Sequence number, if this is a segment.
    pub fn sequence(&self) -> Option<u64> {
        match self {
            Self::Segment(s) => Some(s.sequence),
            Self::Status(_) => None,
        }
    }
}
