use crate::session::ConnectionState;

#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Operation attempted in a state that forbids it. Rejected with no
    /// state change.
    #[error("{op} is not allowed in the {state:?} state")]
    InvalidState {
        op: &'static str,
        state: ConnectionState,
    },
    /// Device or permission failure. Fatal to the attempted call; never
    /// retried by the core.
    #[error("media acquisition failed: {reason}")]
    MediaAcquisition { reason: String },
    /// Inbound offer while a session is already negotiating or established.
    /// Non-fatal: the offer is dropped and the state machine is unchanged.
    #[error("unexpected offer while {state:?} (renegotiation is not supported)")]
    UnexpectedOffer { state: ConnectionState },
    /// Remote description application or answer generation failed. Fatal to
    /// the session.
    #[error("negotiation failed: {0}")]
    Negotiation(#[from] webrtc::Error),
    /// The outbound signaling channel is gone.
    #[error("signaling channel closed")]
    SignalingClosed,
    /// Signaling transport failure while connecting or pumping frames.
    #[error("signaling transport: {0}")]
    Transport(#[from] tokio_tungstenite::tungstenite::Error),
    /// A frame failed schema validation at the channel boundary.
    #[error("signaling protocol: {0}")]
    Protocol(#[from] huddle_protocol::ProtocolError),
}
