use std::sync::Arc;

use huddle_protocol::{CandidateInit, IceConfig, SdpKind, SessionSdp, SignalingMessage};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

use crate::candidates::{CandidateBuffer, rtc_candidate};
use crate::error::CallError;
use crate::media::{MediaDevices, MediaKind, MediaTrackManager, VideoSource};
use crate::peer::build_peer_connection;
use crate::session::{ConnectionState, Session};

/// Local user commands fed into the run loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallCommand {
    StartCall,
    EndCall,
    ToggleAudio,
    ToggleVideo,
    StartScreenShare,
    StopScreenShare,
    /// The share ended outside our control (OS/browser chrome).
    ScreenShareEnded,
}

/// Notifications for the host UI. Fatal errors appear here exactly once.
#[derive(Debug)]
pub enum CallEvent {
    StateChanged(ConnectionState),
    RemoteJoined { user_id: String },
    RemoteLeft { user_id: String },
    TrackToggled { kind: MediaKind, enabled: bool },
    VideoSourceChanged(VideoSource),
    Error(CallError),
}

/// The connection orchestration state machine.
///
/// Owns the single peer connection and the one [`Session`] of a call.
/// Every transition runs on whatever task drives this value (`&mut self`
/// throughout), so inbound messages and local commands are serialized in
/// arrival order — see [`CallOrchestrator::run`].
///
/// ```text
/// Idle --start_call--> Offering --remote answer--> Connected --end_call/leave--> Closed
/// Idle --remote offer--> Answering --local answer sent--> Connected --end_call/leave--> Closed
/// (any state) --fatal negotiation error--> Closed
/// ```
pub struct CallOrchestrator<D: MediaDevices> {
    ice: IceConfig,
    session: Session,
    media: MediaTrackManager<D>,
    signal_tx: mpsc::UnboundedSender<SignalingMessage>,
    event_tx: mpsc::UnboundedSender<CallEvent>,
    pc: Option<Arc<RTCPeerConnection>>,
    pending: CandidateBuffer,
    remote_description_set: bool,
}

impl<D: MediaDevices> CallOrchestrator<D> {
    pub fn new(
        ice: IceConfig,
        room: impl Into<String>,
        local_id: impl Into<String>,
        devices: D,
        signal_tx: mpsc::UnboundedSender<SignalingMessage>,
        event_tx: mpsc::UnboundedSender<CallEvent>,
    ) -> Self {
        Self {
            ice,
            session: Session::new(room, local_id),
            media: MediaTrackManager::new(devices),
            signal_tx,
            event_tx,
            pc: None,
            pending: CandidateBuffer::new(),
            remote_description_set: false,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn media(&self) -> &MediaTrackManager<D> {
        &self.media
    }

    /// Candidates waiting for the remote description.
    pub fn candidates(&self) -> &CandidateBuffer {
        &self.pending
    }

    /// Begin a call as the offering side. Valid only in Idle; anywhere else
    /// this is rejected with no side effect.
    pub async fn start_call(&mut self) -> Result<(), CallError> {
        if self.session.state != ConnectionState::Idle {
            return Err(CallError::InvalidState {
                op: "start_call",
                state: self.session.state,
            });
        }
        self.set_state(ConnectionState::Offering);
        if let Err(e) = self.media.acquire().await {
            // Device failure before anything was negotiated: no session.
            self.set_state(ConnectionState::Idle);
            return Err(e);
        }
        match self.begin_offer().await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shutdown(true).await;
                Err(e)
            }
        }
    }

    /// Tear the call down. Valid in any state; repeated calls are no-ops.
    pub async fn end_call(&mut self) -> Result<(), CallError> {
        if self.session.state == ConnectionState::Closed {
            debug!("end_call on a closed session is a no-op");
            return Ok(());
        }
        self.shutdown(true).await;
        Ok(())
    }

    /// Dispatch one validated inbound signaling message.
    pub async fn handle_message(&mut self, msg: SignalingMessage) -> Result<(), CallError> {
        match msg {
            SignalingMessage::Join { user_id, .. } => {
                debug!(user_id, "Remote peer joined the room");
                self.session.remote_id.get_or_insert(user_id.clone());
                let _ = self.event_tx.send(CallEvent::RemoteJoined { user_id });
                Ok(())
            }
            SignalingMessage::Offer { user_id, sdp, .. } => self.handle_offer(user_id, sdp).await,
            SignalingMessage::Answer { sdp, .. } => self.handle_answer(sdp).await,
            SignalingMessage::Candidate { candidate, .. } => self.handle_candidate(candidate).await,
            SignalingMessage::Leave { user_id, .. } => {
                if self.session.state == ConnectionState::Closed {
                    return Ok(());
                }
                info!(user_id, "Remote peer left, ending call");
                let _ = self.event_tx.send(CallEvent::RemoteLeft { user_id });
                // The peer is already gone; no leave is echoed back.
                self.shutdown(false).await;
                Ok(())
            }
        }
    }

    /// Dispatch one local command.
    pub async fn handle_command(&mut self, cmd: CallCommand) -> Result<(), CallError> {
        match cmd {
            CallCommand::StartCall => self.start_call().await,
            CallCommand::EndCall => self.end_call().await,
            CallCommand::ToggleAudio => {
                self.toggle(MediaKind::Audio);
                Ok(())
            }
            CallCommand::ToggleVideo => {
                self.toggle(MediaKind::Video);
                Ok(())
            }
            CallCommand::StartScreenShare => {
                if self.media.start_screen_share().await? {
                    let _ = self
                        .event_tx
                        .send(CallEvent::VideoSourceChanged(VideoSource::Screen));
                }
                Ok(())
            }
            CallCommand::StopScreenShare => {
                if self.media.stop_screen_share().await? {
                    let _ = self
                        .event_tx
                        .send(CallEvent::VideoSourceChanged(VideoSource::Camera));
                }
                Ok(())
            }
            CallCommand::ScreenShareEnded => {
                if self.media.screen_share_ended().await? {
                    let _ = self
                        .event_tx
                        .send(CallEvent::VideoSourceChanged(VideoSource::Camera));
                }
                Ok(())
            }
        }
    }

    /// Flip mic/camera enablement; returns the new value, None without a
    /// matching track.
    pub fn toggle(&mut self, kind: MediaKind) -> Option<bool> {
        let enabled = self.media.toggle(kind)?;
        let _ = self.event_tx.send(CallEvent::TrackToggled { kind, enabled });
        Some(enabled)
    }

    /// Drive the orchestrator from the channel halves: the single logical
    /// task queue. Runs until both feeds are gone or the signaling transport
    /// closes. Non-fatal errors are reported on the event channel and the
    /// loop keeps serving; fatal ones have already moved the session to
    /// Closed, where every further message is discarded.
    pub async fn run(
        mut self,
        mut inbound: mpsc::UnboundedReceiver<SignalingMessage>,
        mut commands: mpsc::UnboundedReceiver<CallCommand>,
    ) {
        loop {
            tokio::select! {
                msg = inbound.recv() => match msg {
                    Some(msg) => {
                        if let Err(e) = self.handle_message(msg).await {
                            warn!("Signaling message failed: {e}");
                            let _ = self.event_tx.send(CallEvent::Error(e));
                        }
                    }
                    None => {
                        info!("Signaling channel gone, tearing down");
                        self.shutdown(false).await;
                        break;
                    }
                },
                cmd = commands.recv() => match cmd {
                    Some(cmd) => {
                        if let Err(e) = self.handle_command(cmd).await {
                            warn!("Command failed: {e}");
                            let _ = self.event_tx.send(CallEvent::Error(e));
                        }
                    }
                    None => {
                        self.shutdown(true).await;
                        break;
                    }
                },
            }
        }
    }

    async fn handle_offer(&mut self, user_id: String, sdp: SessionSdp) -> Result<(), CallError> {
        if self.session.state != ConnectionState::Idle {
            // No renegotiation support: drop it, report it, change nothing.
            let err = CallError::UnexpectedOffer {
                state: self.session.state,
            };
            warn!("{err}");
            let _ = self.event_tx.send(CallEvent::Error(err));
            return Ok(());
        }
        if sdp.kind != SdpKind::Offer {
            warn!("Offer message carrying a non-offer description, dropping");
            return Ok(());
        }
        self.session.remote_id.get_or_insert(user_id);
        self.set_state(ConnectionState::Answering);
        if let Err(e) = self.media.acquire().await {
            self.set_state(ConnectionState::Idle);
            return Err(e);
        }
        match self.accept_offer(sdp).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shutdown(true).await;
                Err(e)
            }
        }
    }

    async fn handle_answer(&mut self, sdp: SessionSdp) -> Result<(), CallError> {
        if self.session.state != ConnectionState::Offering {
            debug!(state = ?self.session.state, "Ignoring answer outside Offering");
            return Ok(());
        }
        if sdp.kind != SdpKind::Answer {
            warn!("Answer message carrying a non-answer description, dropping");
            return Ok(());
        }
        let Some(pc) = self.pc.clone() else {
            debug!("No peer connection for the answer, discarding");
            return Ok(());
        };
        match self.accept_answer(&pc, sdp).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.shutdown(true).await;
                Err(e)
            }
        }
    }

    async fn handle_candidate(&mut self, candidate: CandidateInit) -> Result<(), CallError> {
        if self.session.state == ConnectionState::Closed {
            debug!("Session closed, discarding late candidate");
            return Ok(());
        }
        if self.remote_description_set {
            let Some(pc) = self.pc.clone() else {
                debug!("No peer connection for the candidate, discarding");
                return Ok(());
            };
            // Bad inbound candidates are never fatal.
            if let Err(e) = pc.add_ice_candidate(rtc_candidate(&candidate)).await {
                warn!("Failed to apply ICE candidate: {e}");
            }
        } else {
            self.pending.push(candidate);
            debug!(
                buffered = self.pending.len(),
                "Buffering candidate until the remote description is applied"
            );
        }
        Ok(())
    }

    async fn begin_offer(&mut self) -> Result<(), CallError> {
        let pc = self.create_peer().await?;
        let offer = pc.create_offer(None).await?;
        pc.set_local_description(offer.clone()).await?;
        self.send_signal(SignalingMessage::Offer {
            room: self.session.room.clone(),
            user_id: self.session.local_id.clone(),
            sdp: SessionSdp {
                kind: SdpKind::Offer,
                sdp: offer.sdp,
            },
        })?;
        Ok(())
    }

    async fn accept_offer(&mut self, sdp: SessionSdp) -> Result<(), CallError> {
        let pc = self.create_peer().await?;
        let remote = RTCSessionDescription::offer(sdp.sdp)?;
        pc.set_remote_description(remote).await?;
        self.remote_description_set = true;

        let answer = pc.create_answer(None).await?;
        pc.set_local_description(answer.clone()).await?;
        self.send_signal(SignalingMessage::Answer {
            room: self.session.room.clone(),
            user_id: self.session.local_id.clone(),
            sdp: SessionSdp {
                kind: SdpKind::Answer,
                sdp: answer.sdp,
            },
        })?;

        self.set_state(ConnectionState::Connected);
        self.pending.drain_into(&pc).await;
        Ok(())
    }

    async fn accept_answer(
        &mut self,
        pc: &RTCPeerConnection,
        sdp: SessionSdp,
    ) -> Result<(), CallError> {
        let remote = RTCSessionDescription::answer(sdp.sdp)?;
        pc.set_remote_description(remote).await?;
        self.remote_description_set = true;
        self.set_state(ConnectionState::Connected);
        self.pending.drain_into(pc).await;
        Ok(())
    }

    /// Create the session's peer connection, attach local tracks and wire
    /// the gathering callback. Locally gathered candidates are forwarded
    /// unconditionally — buffering is receive-side only.
    async fn create_peer(&mut self) -> Result<Arc<RTCPeerConnection>, CallError> {
        let pc = build_peer_connection(&self.ice).await?;
        self.media.attach(&pc).await?;

        let signal_tx = self.signal_tx.clone();
        let room = self.session.room.clone();
        let local_id = self.session.local_id.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            if let Some(c) = candidate {
                match c.to_json() {
                    Ok(json) => {
                        let _ = signal_tx.send(SignalingMessage::Candidate {
                            room: room.clone(),
                            user_id: local_id.clone(),
                            candidate: CandidateInit {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            },
                        });
                    }
                    Err(e) => warn!("Failed to serialize ICE candidate: {e}"),
                }
            }
            Box::pin(async {})
        }));

        pc.on_peer_connection_state_change(Box::new(move |state| {
            debug!(?state, "Peer connection state changed");
            Box::pin(async {})
        }));

        self.pc = Some(Arc::clone(&pc));
        Ok(pc)
    }

    async fn shutdown(&mut self, notify_remote: bool) {
        if self.session.state == ConnectionState::Closed {
            return;
        }
        if notify_remote {
            let _ = self.signal_tx.send(SignalingMessage::Leave {
                room: self.session.room.clone(),
                user_id: self.session.local_id.clone(),
            });
        }
        if let Some(pc) = self.pc.take() {
            if let Err(e) = pc.close().await {
                warn!("Failed to close peer connection: {e}");
            }
        }
        self.media.release_all();
        self.pending.clear();
        self.remote_description_set = false;
        self.set_state(ConnectionState::Closed);
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.session.state == state {
            return;
        }
        info!(from = ?self.session.state, to = ?state, "Call state changed");
        self.session.state = state;
        let _ = self.event_tx.send(CallEvent::StateChanged(state));
    }

    fn send_signal(&self, msg: SignalingMessage) -> Result<(), CallError> {
        self.signal_tx
            .send(msg)
            .map_err(|_| CallError::SignalingClosed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{SampleDevices, UserMedia};
    use async_trait::async_trait;
    use std::sync::Arc;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

    type TestOrchestrator = CallOrchestrator<SampleDevices>;

    fn orchestrator(
        local_id: &str,
    ) -> (
        TestOrchestrator,
        mpsc::UnboundedReceiver<SignalingMessage>,
        mpsc::UnboundedReceiver<CallEvent>,
    ) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let orchestrator = CallOrchestrator::new(
            IceConfig::default(),
            "r1",
            local_id,
            SampleDevices::new(),
            signal_tx,
            event_tx,
        );
        (orchestrator, signal_rx, event_rx)
    }

    fn candidate_msg(port: u16) -> SignalingMessage {
        SignalingMessage::Candidate {
            room: "r1".to_string(),
            user_id: "bob".to_string(),
            candidate: CandidateInit {
                candidate: format!("candidate:1 1 UDP 2130706431 127.0.0.1 {port} typ host"),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
        }
    }

    /// Skip interleaved ICE candidate traffic until the wanted message kind
    /// shows up.
    async fn wait_for(
        rx: &mut mpsc::UnboundedReceiver<SignalingMessage>,
        want: fn(&SignalingMessage) -> bool,
    ) -> SignalingMessage {
        while let Some(msg) = rx.recv().await {
            if want(&msg) {
                return msg;
            }
        }
        panic!("signaling channel closed before the expected message arrived");
    }

    fn drain_events(rx: &mut mpsc::UnboundedReceiver<CallEvent>) -> Vec<CallEvent> {
        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn count_leaves(rx: &mut mpsc::UnboundedReceiver<SignalingMessage>) -> usize {
        let mut leaves = 0;
        while let Ok(msg) = rx.try_recv() {
            if matches!(msg, SignalingMessage::Leave { .. }) {
                leaves += 1;
            }
        }
        leaves
    }

    struct DeniedDevices;

    #[async_trait]
    impl MediaDevices for DeniedDevices {
        async fn user_media(&self) -> Result<UserMedia, CallError> {
            Err(CallError::MediaAcquisition {
                reason: "no camera present".to_string(),
            })
        }

        async fn display_media(&self) -> Result<Arc<TrackLocalStaticSample>, CallError> {
            Err(CallError::MediaAcquisition {
                reason: "no display".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn start_call_sends_offer_and_enters_offering() {
        let (mut alice, mut signals, _events) = orchestrator("alice");

        alice.start_call().await.unwrap();
        assert_eq!(alice.state(), ConnectionState::Offering);

        let offer = wait_for(&mut signals, |m| {
            matches!(m, SignalingMessage::Offer { .. })
        })
        .await;
        match offer {
            SignalingMessage::Offer { room, user_id, sdp } => {
                assert_eq!(room, "r1");
                assert_eq!(user_id, "alice");
                assert_eq!(sdp.kind, SdpKind::Offer);
                assert!(!sdp.sdp.is_empty());
            }
            other => panic!("expected Offer, got {other:?}"),
        }

        alice.end_call().await.unwrap();
    }

    #[tokio::test]
    async fn start_call_rejected_outside_idle() {
        let (mut alice, _signals, _events) = orchestrator("alice");
        alice.start_call().await.unwrap();

        match alice.start_call().await {
            Err(CallError::InvalidState { op, state }) => {
                assert_eq!(op, "start_call");
                assert_eq!(state, ConnectionState::Offering);
            }
            other => panic!("expected InvalidState, got {other:?}"),
        }
        // The rejected call had no side effect
        assert_eq!(alice.state(), ConnectionState::Offering);

        alice.end_call().await.unwrap();
        // Closed is one-shot: no new call on this orchestrator
        assert!(matches!(
            alice.start_call().await,
            Err(CallError::InvalidState {
                state: ConnectionState::Closed,
                ..
            })
        ));
        assert_eq!(alice.state(), ConnectionState::Closed);
    }

    #[tokio::test]
    async fn offer_answer_flow_connects_both_sides() {
        let (mut alice, mut alice_signals, _alice_events) = orchestrator("alice");
        let (mut bob, mut bob_signals, mut bob_events) = orchestrator("bob");

        alice.start_call().await.unwrap();
        let offer = wait_for(&mut alice_signals, |m| {
            matches!(m, SignalingMessage::Offer { .. })
        })
        .await;

        // The answer is produced within the same handling cycle.
        bob.handle_message(offer).await.unwrap();
        assert_eq!(bob.state(), ConnectionState::Connected);
        assert_eq!(bob.session().remote_id.as_deref(), Some("alice"));

        let states: Vec<_> = drain_events(&mut bob_events)
            .into_iter()
            .filter_map(|e| match e {
                CallEvent::StateChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(
            states,
            vec![ConnectionState::Answering, ConnectionState::Connected]
        );

        let answer = wait_for(&mut bob_signals, |m| {
            matches!(m, SignalingMessage::Answer { .. })
        })
        .await;
        match &answer {
            SignalingMessage::Answer { sdp, .. } => assert!(!sdp.sdp.is_empty()),
            other => panic!("expected Answer, got {other:?}"),
        }

        alice.handle_message(answer).await.unwrap();
        assert_eq!(alice.state(), ConnectionState::Connected);

        alice.end_call().await.unwrap();
        bob.end_call().await.unwrap();
    }

    #[tokio::test]
    async fn candidates_buffered_in_order_until_remote_description() {
        let (mut alice, mut alice_signals, _alice_events) = orchestrator("alice");
        let (mut bob, mut bob_signals, _bob_events) = orchestrator("bob");

        alice.start_call().await.unwrap();

        // No remote description yet: everything queues in arrival order.
        for port in [50000, 50001, 50002] {
            alice.handle_message(candidate_msg(port)).await.unwrap();
        }
        assert_eq!(alice.candidates().len(), 3);
        let buffered_ports: Vec<_> = alice
            .candidates()
            .pending()
            .iter()
            .map(|c| c.candidate.split_whitespace().nth(5).unwrap().to_string())
            .collect();
        assert_eq!(buffered_ports, vec!["50000", "50001", "50002"]);

        // Complete the handshake; the buffer drains exactly once.
        let offer = wait_for(&mut alice_signals, |m| {
            matches!(m, SignalingMessage::Offer { .. })
        })
        .await;
        bob.handle_message(offer).await.unwrap();
        let answer = wait_for(&mut bob_signals, |m| {
            matches!(m, SignalingMessage::Answer { .. })
        })
        .await;
        alice.handle_message(answer).await.unwrap();

        assert_eq!(alice.state(), ConnectionState::Connected);
        assert!(alice.candidates().is_empty());

        // Post-connect candidates apply immediately, bypassing the buffer.
        alice.handle_message(candidate_msg(50003)).await.unwrap();
        assert!(alice.candidates().is_empty());

        alice.end_call().await.unwrap();
        bob.end_call().await.unwrap();
    }

    #[tokio::test]
    async fn unexpected_offer_is_dropped_without_state_change() {
        let (mut alice, _signals, mut events) = orchestrator("alice");
        alice.start_call().await.unwrap();
        drain_events(&mut events);

        let stray_offer = SignalingMessage::Offer {
            room: "r1".to_string(),
            user_id: "bob".to_string(),
            sdp: SessionSdp {
                kind: SdpKind::Offer,
                sdp: "v=0\r\n".to_string(),
            },
        };
        alice.handle_message(stray_offer).await.unwrap();
        assert_eq!(alice.state(), ConnectionState::Offering);

        let saw_unexpected = drain_events(&mut events).into_iter().any(|e| {
            matches!(
                e,
                CallEvent::Error(CallError::UnexpectedOffer {
                    state: ConnectionState::Offering
                })
            )
        });
        assert!(saw_unexpected, "UnexpectedOffer must be reported");

        alice.end_call().await.unwrap();
    }

    #[tokio::test]
    async fn stray_answer_is_ignored() {
        let (mut alice, _signals, _events) = orchestrator("alice");
        let stray_answer = SignalingMessage::Answer {
            room: "r1".to_string(),
            user_id: "bob".to_string(),
            sdp: SessionSdp {
                kind: SdpKind::Answer,
                sdp: "v=0\r\n".to_string(),
            },
        };
        alice.handle_message(stray_answer).await.unwrap();
        assert_eq!(alice.state(), ConnectionState::Idle);
    }

    #[tokio::test]
    async fn end_call_twice_is_a_noop_with_one_leave() {
        let (mut alice, mut signals, _events) = orchestrator("alice");
        alice.start_call().await.unwrap();

        alice.end_call().await.unwrap();
        assert_eq!(alice.state(), ConnectionState::Closed);
        alice.end_call().await.unwrap();
        assert_eq!(alice.state(), ConnectionState::Closed);

        assert_eq!(count_leaves(&mut signals), 1);
    }

    #[tokio::test]
    async fn remote_leave_ends_the_call_without_echo() {
        let (mut alice, mut signals, mut events) = orchestrator("alice");
        alice.start_call().await.unwrap();

        alice
            .handle_message(SignalingMessage::Leave {
                room: "r1".to_string(),
                user_id: "bob".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(alice.state(), ConnectionState::Closed);

        assert_eq!(count_leaves(&mut signals), 0);
        let saw_left = drain_events(&mut events)
            .into_iter()
            .any(|e| matches!(e, CallEvent::RemoteLeft { .. }));
        assert!(saw_left);

        // Late candidates after Closed are silently discarded.
        alice.handle_message(candidate_msg(50000)).await.unwrap();
        assert!(alice.candidates().is_empty());
    }

    #[tokio::test]
    async fn media_failure_rolls_back_to_idle() {
        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let mut alice = CallOrchestrator::new(
            IceConfig::default(),
            "r1",
            "alice",
            DeniedDevices,
            signal_tx,
            event_tx,
        );

        match alice.start_call().await {
            Err(CallError::MediaAcquisition { reason }) => {
                assert_eq!(reason, "no camera present");
            }
            other => panic!("expected MediaAcquisition, got {other:?}"),
        }
        assert_eq!(alice.state(), ConnectionState::Idle);
        assert!(signal_rx.try_recv().is_err(), "no offer may be sent");

        // Idle again: a working retry path is the caller's decision, but the
        // state machine itself permits it.
        assert!(matches!(
            alice.start_call().await,
            Err(CallError::MediaAcquisition { .. })
        ));
    }

    #[tokio::test]
    async fn inbound_offer_with_media_failure_rolls_back_to_idle() {
        let (mut alice, mut alice_signals, _alice_events) = orchestrator("alice");
        alice.start_call().await.unwrap();
        let offer = wait_for(&mut alice_signals, |m| {
            matches!(m, SignalingMessage::Offer { .. })
        })
        .await;
        alice.end_call().await.unwrap();

        let (signal_tx, mut signal_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let mut bob = CallOrchestrator::new(
            IceConfig::default(),
            "r1",
            "bob",
            DeniedDevices,
            signal_tx,
            event_tx,
        );
        assert!(matches!(
            bob.handle_message(offer).await,
            Err(CallError::MediaAcquisition { .. })
        ));
        assert_eq!(bob.state(), ConnectionState::Idle);
        assert!(signal_rx.try_recv().is_err(), "no answer may be sent");
    }

    #[tokio::test]
    async fn join_records_the_remote_id() {
        let (mut alice, _signals, mut events) = orchestrator("alice");
        alice
            .handle_message(SignalingMessage::Join {
                room: "r1".to_string(),
                user_id: "bob".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(alice.session().remote_id.as_deref(), Some("bob"));
        let saw_joined = drain_events(&mut events)
            .into_iter()
            .any(|e| matches!(e, CallEvent::RemoteJoined { ref user_id } if user_id == "bob"));
        assert!(saw_joined);
    }

    #[tokio::test]
    async fn commands_drive_toggles_and_screen_share() {
        let (mut alice, _signals, mut events) = orchestrator("alice");
        alice.start_call().await.unwrap();
        drain_events(&mut events);

        let before = alice.media().is_enabled(MediaKind::Audio).unwrap();
        alice
            .handle_command(CallCommand::ToggleAudio)
            .await
            .unwrap();
        assert_eq!(alice.media().is_enabled(MediaKind::Audio), Some(!before));
        alice
            .handle_command(CallCommand::ToggleAudio)
            .await
            .unwrap();
        assert_eq!(alice.media().is_enabled(MediaKind::Audio), Some(before));

        alice
            .handle_command(CallCommand::StartScreenShare)
            .await
            .unwrap();
        assert_eq!(alice.media().video_source(), VideoSource::Screen);
        alice
            .handle_command(CallCommand::ScreenShareEnded)
            .await
            .unwrap();
        assert_eq!(alice.media().video_source(), VideoSource::Camera);

        let sources: Vec<_> = drain_events(&mut events)
            .into_iter()
            .filter_map(|e| match e {
                CallEvent::VideoSourceChanged(s) => Some(s),
                _ => None,
            })
            .collect();
        assert_eq!(sources, vec![VideoSource::Screen, VideoSource::Camera]);

        alice.end_call().await.unwrap();
    }

    #[tokio::test]
    async fn garbled_offer_sdp_tears_the_session_down() {
        let (mut alice, mut signals, _events) = orchestrator("alice");

        // Candidates queued before the failure must not survive teardown.
        alice.handle_message(candidate_msg(50000)).await.unwrap();
        alice.handle_message(candidate_msg(50001)).await.unwrap();
        assert_eq!(alice.candidates().len(), 2);

        // Non-empty, so it clears the channel boundary; unparseable, so
        // description construction fails.
        let garbled = SignalingMessage::Offer {
            room: "r1".to_string(),
            user_id: "bob".to_string(),
            sdp: SessionSdp {
                kind: SdpKind::Offer,
                sdp: "not a session description".to_string(),
            },
        };
        match alice.handle_message(garbled).await {
            Err(CallError::Negotiation(_)) => {}
            other => panic!("expected Negotiation, got {other:?}"),
        }
        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(alice.candidates().is_empty());
        assert!(!alice.media().has_local_media());
        assert_eq!(count_leaves(&mut signals), 1);

        // Closed is terminal and already released: nothing more goes out.
        alice.end_call().await.unwrap();
        assert_eq!(count_leaves(&mut signals), 0);
    }

    #[tokio::test]
    async fn start_call_with_closed_signaling_is_fatal() {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let (event_tx, _event_rx) = mpsc::unbounded_channel();
        let mut alice = CallOrchestrator::new(
            IceConfig::default(),
            "r1",
            "alice",
            SampleDevices::new(),
            signal_tx,
            event_tx,
        );
        drop(signal_rx);

        match alice.start_call().await {
            Err(CallError::SignalingClosed) => {}
            other => panic!("expected SignalingClosed, got {other:?}"),
        }
        assert_eq!(alice.state(), ConnectionState::Closed);
        assert!(!alice.media().has_local_media());
    }
}
