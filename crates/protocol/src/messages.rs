use serde::{Deserialize, Serialize};

/// SDP payload carried by offer and answer messages.
///
/// Mirrors the browser's `RTCSessionDescriptionInit` shape so a JS peer can
/// feed it straight into `setRemoteDescription`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSdp {
    #[serde(rename = "type")]
    pub kind: SdpKind,
    pub sdp: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// Connectivity candidate payload, mirroring `RTCIceCandidateInit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateInit {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

/// Signaling messages exchanged between the two call participants.
///
/// One JSON object per message. Every message carries the room it belongs to
/// and the sender's user id; the channel itself is scoped to a single room.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SignalingMessage {
    /// Sender entered the room.
    Join {
        room: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
    /// WebRTC SDP offer
    Offer {
        room: String,
        #[serde(rename = "userId")]
        user_id: String,
        sdp: SessionSdp,
    },
    /// WebRTC SDP answer
    Answer {
        room: String,
        #[serde(rename = "userId")]
        user_id: String,
        sdp: SessionSdp,
    },
    /// ICE candidate exchange
    Candidate {
        room: String,
        #[serde(rename = "userId")]
        user_id: String,
        candidate: CandidateInit,
    },
    /// Sender left the room / hung up.
    Leave {
        room: String,
        #[serde(rename = "userId")]
        user_id: String,
    },
}

impl SignalingMessage {
    pub fn room(&self) -> &str {
        match self {
            Self::Join { room, .. }
            | Self::Offer { room, .. }
            | Self::Answer { room, .. }
            | Self::Candidate { room, .. }
            | Self::Leave { room, .. } => room,
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Self::Join { user_id, .. }
            | Self::Offer { user_id, .. }
            | Self::Answer { user_id, .. }
            | Self::Candidate { user_id, .. }
            | Self::Leave { user_id, .. } => user_id,
        }
    }

    /// Parse and validate one wire frame.
    ///
    /// This is the schema boundary: anything that fails here is dropped by
    /// the channel and never reaches the state machine.
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let msg: Self = serde_json::from_str(text)?;
        match &msg {
            Self::Offer { sdp, .. } | Self::Answer { sdp, .. } => {
                if sdp.sdp.is_empty() {
                    return Err(ProtocolError::EmptySdp);
                }
            }
            Self::Candidate { candidate, .. } => {
                if candidate.candidate.is_empty() {
                    return Err(ProtocolError::EmptyCandidate);
                }
            }
            Self::Join { .. } | Self::Leave { .. } => {}
        }
        Ok(msg)
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed signaling frame: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("offer/answer message with an empty sdp payload")]
    EmptySdp,
    #[error("candidate message with an empty candidate string")]
    EmptyCandidate,
}
