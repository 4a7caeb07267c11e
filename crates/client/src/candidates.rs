use huddle_protocol::CandidateInit;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::RTCPeerConnection;

/// FIFO buffer for connectivity candidates that arrive before the remote
/// session description has been applied.
///
/// Receive-side only: locally gathered candidates are forwarded the moment
/// the gathering callback fires and never pass through here.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<CandidateInit>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a candidate, preserving arrival order. Unbounded within the
    /// session's lifetime.
    pub fn push(&mut self, candidate: CandidateInit) {
        self.pending.push(candidate);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Buffered candidates in arrival order.
    pub fn pending(&self) -> &[CandidateInit] {
        &self.pending
    }

    /// Apply every buffered candidate in FIFO order, then clear.
    ///
    /// Must be called after the remote description is set. A candidate that
    /// fails to apply is logged and skipped; inbound candidate problems are
    /// never fatal. Re-draining after clear is a no-op.
    pub async fn drain_into(&mut self, pc: &RTCPeerConnection) -> usize {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return 0;
        }
        debug!(count = pending.len(), "Draining buffered ICE candidates");
        let mut applied = 0;
        for candidate in pending {
            match pc.add_ice_candidate(rtc_candidate(&candidate)).await {
                Ok(()) => applied += 1,
                Err(e) => warn!("Failed to apply buffered ICE candidate: {e}"),
            }
        }
        applied
    }

    /// Discard everything without applying (teardown path).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

pub(crate) fn rtc_candidate(candidate: &CandidateInit) -> RTCIceCandidateInit {
    RTCIceCandidateInit {
        candidate: candidate.candidate.clone(),
        sdp_mid: candidate.sdp_mid.clone(),
        sdp_mline_index: candidate.sdp_mline_index,
        ..Default::default()
    }
}
