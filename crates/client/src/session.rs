/// Negotiation state of the single call session.
///
/// `Idle` is initial; `Closed` is terminal and one-shot — a new orchestrator
/// must be created to call again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No call in progress
    Idle,
    /// Local offer sent, waiting for the remote answer
    Offering,
    /// Remote offer received, producing the local answer
    Answering,
    /// Descriptions exchanged, session established
    Connected,
    /// Torn down; resources released
    Closed,
}

/// The one live session of an orchestrator instance.
#[derive(Debug, Clone)]
pub struct Session {
    pub room: String,
    pub local_id: String,
    /// Learned from the remote peer's join or offer message.
    pub remote_id: Option<String>,
    pub state: ConnectionState,
}

impl Session {
    pub fn new(room: impl Into<String>, local_id: impl Into<String>) -> Self {
        Self {
            room: room.into(),
            local_id: local_id.into(),
            remote_id: None,
            state: ConnectionState::Idle,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_idle() {
        let session = Session::new("r1", "alice");
        assert_eq!(session.state, ConnectionState::Idle);
        assert_eq!(session.remote_id, None);
    }
}
