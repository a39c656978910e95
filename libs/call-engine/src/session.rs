use std::sync::Arc;
use std::time::{Duration, Instant};

use media::PeerLink;
use shared_proto::signaling::{
    CallType, IceCandidate, Sdp, SignalingMessage, PROTOCOL_VERSION,
};
use tokio::task::JoinHandle;

use crate::observability;
use crate::transport::SignalingSender;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    Idle,
    Calling,
    Ringing,
    Connected,
    Ended,
}

impl CallStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CallStatus::Idle => "idle",
            CallStatus::Calling => "calling",
            CallStatus::Ringing => "ringing",
            CallStatus::Connected => "connected",
            CallStatus::Ended => "ended",
        }
    }
}

impl std::fmt::Display for CallStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallRole {
    Caller,
    Callee,
}

/// Outcome of feeding one inbound frame to the session. Anything the
/// coordinator must react to (timers, call log, events) is named; frames
/// that changed nothing fold into `Unchanged`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transition {
    Unchanged,
    /// calling → connected, answer applied.
    Connected,
    /// calling → ended, remote declined.
    Declined,
    /// Remote hangup or cancel; the prior status tells the reason.
    RemoteEnded,
}

/// One call's state machine. Created on `start_call` or on an inbound
/// call-request, driven sequentially by the coordinator, destroyed when it
/// reaches `ended`.
pub struct CallSession {
    room_id: String,
    local_user_id: String,
    remote_user_id: String,
    call_type: CallType,
    role: CallRole,
    status: CallStatus,
    started_at: Option<Instant>,
    peer: Option<Arc<PeerLink>>,
    pending_offer: Option<Sdp>,
    pending_candidates: Vec<IceCandidate>,
    candidate_forwarder: Option<JoinHandle<()>>,
    sender: SignalingSender,
}

impl CallSession {
    pub(crate) fn new_outgoing(
        room_id: String,
        local_user_id: String,
        remote_user_id: String,
        call_type: CallType,
        sender: SignalingSender,
    ) -> Self {
        Self {
            room_id,
            local_user_id,
            remote_user_id,
            call_type,
            role: CallRole::Caller,
            status: CallStatus::Calling,
            started_at: None,
            peer: None,
            pending_offer: None,
            pending_candidates: Vec::new(),
            candidate_forwarder: None,
            sender,
        }
    }

    pub(crate) fn new_incoming(
        room_id: String,
        local_user_id: String,
        remote_user_id: String,
        call_type: CallType,
        offer: Sdp,
        sender: SignalingSender,
    ) -> Self {
        Self {
            room_id,
            local_user_id,
            remote_user_id,
            call_type,
            role: CallRole::Callee,
            status: CallStatus::Ringing,
            started_at: None,
            peer: None,
            pending_offer: Some(offer),
            pending_candidates: Vec::new(),
            candidate_forwarder: None,
            sender,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub(crate) fn matches(&self, room_id: &str) -> bool {
        self.room_id == room_id
    }

    pub fn remote_user_id(&self) -> &str {
        &self.remote_user_id
    }

    pub fn call_type(&self) -> CallType {
        self.call_type
    }

    pub fn role(&self) -> CallRole {
        self.role
    }

    pub fn status(&self) -> CallStatus {
        self.status
    }

    /// Elapsed connected time, `None` before the call was answered.
    pub fn duration(&self) -> Option<Duration> {
        self.started_at.map(|t| t.elapsed())
    }

    pub(crate) fn peer(&self) -> Option<&Arc<PeerLink>> {
        self.peer.as_ref()
    }

    pub(crate) fn pending_offer(&self) -> Option<Sdp> {
        self.pending_offer.clone()
    }

    #[cfg(test)]
    pub(crate) fn buffered_candidates(&self) -> usize {
        self.pending_candidates.len()
    }

    fn trace_id() -> Option<String> {
        Some(observability::trace_id().to_string())
    }

    /// Attach the negotiated peer link and drain candidates that arrived
    /// before it existed; the link buffers them further if its remote
    /// description is not in place yet.
    pub(crate) async fn install_peer(&mut self, link: Arc<PeerLink>) {
        for candidate in std::mem::take(&mut self.pending_candidates) {
            if let Err(e) = link.add_ice_candidate(candidate).await {
                tracing::warn!(
                    component = "call.session",
                    room_id = %self.room_id,
                    error = %e,
                    "dropping early candidate"
                );
            }
        }
        self.peer = Some(link);
    }

    pub(crate) fn set_candidate_forwarder(&mut self, forwarder: JoinHandle<()>) {
        self.candidate_forwarder = Some(forwarder);
    }

    /// Caller side: announce the call, exactly once, with the local offer.
    pub(crate) fn send_call_request(&self, offer: Sdp) {
        self.sender.send(SignalingMessage::CallRequest {
            version: PROTOCOL_VERSION,
            trace_id: Self::trace_id(),
            from: self.local_user_id.clone(),
            to: self.remote_user_id.clone(),
            room_id: self.room_id.clone(),
            call_type: self.call_type,
            payload: offer,
        });
    }

    /// Callee side: complete the accept — peer installed, answer sent,
    /// session connected.
    pub(crate) async fn complete_accept(&mut self, link: Arc<PeerLink>, answer: Sdp) {
        self.install_peer(link).await;
        self.sender.send(SignalingMessage::CallAccepted {
            version: PROTOCOL_VERSION,
            trace_id: Self::trace_id(),
            to: self.remote_user_id.clone(),
            room_id: self.room_id.clone(),
            payload: answer,
        });
        self.status = CallStatus::Connected;
        self.started_at = Some(Instant::now());
    }

    /// Callee side: decline the ringing call.
    pub(crate) fn reject(&mut self) {
        self.sender.send(SignalingMessage::CallRejected {
            version: PROTOCOL_VERSION,
            trace_id: Self::trace_id(),
            to: self.remote_user_id.clone(),
            room_id: self.room_id.clone(),
        });
        self.status = CallStatus::Ended;
    }

    pub(crate) fn send_end(&self) {
        self.sender.send(SignalingMessage::EndCall {
            version: PROTOCOL_VERSION,
            trace_id: Self::trace_id(),
            to: self.remote_user_id.clone(),
            room_id: self.room_id.clone(),
        });
    }

    /// Feed one inbound frame. Only the state-machine edges mutate
    /// `status`; everything else is a no-op with a log line.
    pub(crate) async fn handle_signal(&mut self, msg: &SignalingMessage) -> Transition {
        if msg.room_id() != self.room_id {
            tracing::warn!(
                component = "call.session",
                kind = msg.kind(),
                room_id = msg.room_id(),
                active_room = %self.room_id,
                "ignoring frame for another room"
            );
            return Transition::Unchanged;
        }

        match msg {
            SignalingMessage::CallAccepted { payload, .. } => {
                if self.status != CallStatus::Calling {
                    self.log_out_of_sequence(msg);
                    return Transition::Unchanged;
                }
                let Some(peer) = self.peer.as_ref() else {
                    tracing::warn!(
                        component = "call.session",
                        room_id = %self.room_id,
                        "call-accepted before local offer was ready, dropping"
                    );
                    return Transition::Unchanged;
                };
                if let Err(e) = peer.set_remote_description(payload).await {
                    tracing::warn!(
                        component = "call.session",
                        room_id = %self.room_id,
                        error = %e,
                        "failed to apply answer, dropping frame"
                    );
                    return Transition::Unchanged;
                }
                self.status = CallStatus::Connected;
                self.started_at = Some(Instant::now());
                Transition::Connected
            }
            SignalingMessage::CallRejected { .. } => {
                if self.status != CallStatus::Calling {
                    self.log_out_of_sequence(msg);
                    return Transition::Unchanged;
                }
                self.status = CallStatus::Ended;
                Transition::Declined
            }
            SignalingMessage::EndCall { .. } => match self.status {
                CallStatus::Calling | CallStatus::Ringing | CallStatus::Connected => {
                    self.status = CallStatus::Ended;
                    Transition::RemoteEnded
                }
                _ => {
                    self.log_out_of_sequence(msg);
                    Transition::Unchanged
                }
            },
            SignalingMessage::Candidate { payload, .. } => {
                self.on_candidate(payload.clone()).await;
                Transition::Unchanged
            }
            SignalingMessage::Offer { payload, .. } => {
                // Some peers re-send the description outside the
                // call-request; only a ringing session cares.
                if self.status == CallStatus::Ringing {
                    self.pending_offer = Some(payload.clone());
                }
                Transition::Unchanged
            }
            SignalingMessage::Answer { payload, .. } => {
                if self.status == CallStatus::Calling {
                    if let Some(peer) = self.peer.as_ref() {
                        if let Err(e) = peer.set_remote_description(payload).await {
                            tracing::warn!(
                                component = "call.session",
                                room_id = %self.room_id,
                                error = %e,
                                "failed to apply bare answer"
                            );
                        }
                    }
                }
                Transition::Unchanged
            }
            SignalingMessage::CallRequest { .. } => {
                // A duplicate or stale request for the active room; the
                // session never regresses because of it.
                self.log_out_of_sequence(msg);
                Transition::Unchanged
            }
            SignalingMessage::UserJoined { .. } => Transition::Unchanged,
        }
    }

    /// Forward to the peer link, or hold until one exists.
    pub(crate) async fn on_candidate(&mut self, candidate: IceCandidate) {
        match self.peer.as_ref() {
            Some(peer) => {
                if let Err(e) = peer.add_ice_candidate(candidate).await {
                    tracing::warn!(
                        component = "call.session",
                        room_id = %self.room_id,
                        error = %e,
                        "dropping remote candidate"
                    );
                }
            }
            None => self.pending_candidates.push(candidate),
        }
    }

    /// Release everything the session owns. The peer link stops the local
    /// tracks; this is the last step of every termination path.
    pub(crate) async fn teardown(&mut self) {
        if let Some(forwarder) = self.candidate_forwarder.take() {
            forwarder.abort();
        }
        if let Some(peer) = self.peer.take() {
            peer.close().await;
        }
        self.pending_candidates.clear();
        self.pending_offer = None;
        self.status = CallStatus::Ended;
    }

    fn log_out_of_sequence(&self, msg: &SignalingMessage) {
        tracing::warn!(
            component = "call.session",
            kind = msg.kind(),
            status = %self.status,
            room_id = %self.room_id,
            "out-of-sequence frame, no transition"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SignalingSender;

    fn end_call_frame(room: &str) -> SignalingMessage {
        SignalingMessage::EndCall {
            version: PROTOCOL_VERSION,
            trace_id: None,
            to: "alice".to_string(),
            room_id: room.to_string(),
        }
    }

    fn outgoing_session() -> (CallSession, tokio::sync::mpsc::UnboundedReceiver<SignalingMessage>) {
        let (sender, rx) = SignalingSender::detached();
        let session = CallSession::new_outgoing(
            "room1".to_string(),
            "alice".to_string(),
            "bob".to_string(),
            CallType::Audio,
            sender,
        );
        (session, rx)
    }

    fn incoming_session() -> (CallSession, tokio::sync::mpsc::UnboundedReceiver<SignalingMessage>) {
        let (sender, rx) = SignalingSender::detached();
        let session = CallSession::new_incoming(
            "room1".to_string(),
            "bob".to_string(),
            "alice".to_string(),
            CallType::Video,
            Sdp::offer("v=0"),
            sender,
        );
        (session, rx)
    }

    #[tokio::test]
    async fn frames_for_another_room_never_mutate_status() {
        let (mut session, _rx) = outgoing_session();
        assert_eq!(session.status(), CallStatus::Calling);

        let transition = session.handle_signal(&end_call_frame("room2")).await;
        assert_eq!(transition, Transition::Unchanged);
        assert_eq!(session.status(), CallStatus::Calling);
    }

    #[tokio::test]
    async fn remote_hangup_ends_a_ringing_session() {
        let (mut session, _rx) = incoming_session();
        assert_eq!(session.status(), CallStatus::Ringing);

        let transition = session.handle_signal(&end_call_frame("room1")).await;
        assert_eq!(transition, Transition::RemoteEnded);
        assert_eq!(session.status(), CallStatus::Ended);
    }

    #[tokio::test]
    async fn rejected_only_applies_while_calling() {
        let (mut session, _rx) = incoming_session();
        let reject = SignalingMessage::CallRejected {
            version: PROTOCOL_VERSION,
            trace_id: None,
            to: "bob".to_string(),
            room_id: "room1".to_string(),
        };
        // A callee is never the target of call-rejected.
        assert_eq!(session.handle_signal(&reject).await, Transition::Unchanged);
        assert_eq!(session.status(), CallStatus::Ringing);

        let (mut caller, _rx) = outgoing_session();
        assert_eq!(caller.handle_signal(&reject).await, Transition::Declined);
        assert_eq!(caller.status(), CallStatus::Ended);
    }

    #[tokio::test]
    async fn accepted_without_local_peer_is_dropped() {
        let (mut session, _rx) = outgoing_session();
        let accepted = SignalingMessage::CallAccepted {
            version: PROTOCOL_VERSION,
            trace_id: None,
            to: "alice".to_string(),
            room_id: "room1".to_string(),
            payload: Sdp::answer("v=0"),
        };
        assert_eq!(session.handle_signal(&accepted).await, Transition::Unchanged);
        assert_eq!(session.status(), CallStatus::Calling);
    }

    #[tokio::test]
    async fn candidates_buffer_until_a_peer_exists() {
        let (mut session, _rx) = incoming_session();
        let candidate = IceCandidate {
            candidate: "candidate:1 1 udp 2130706431 127.0.0.1 40000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_m_line_index: Some(0),
        };
        session.on_candidate(candidate.clone()).await;
        session.on_candidate(candidate).await;
        assert_eq!(session.buffered_candidates(), 2);
        assert_eq!(session.status(), CallStatus::Ringing);
    }

    #[tokio::test]
    async fn duplicate_call_request_does_not_regress_status() {
        let (mut session, _rx) = incoming_session();
        let dup = SignalingMessage::CallRequest {
            version: PROTOCOL_VERSION,
            trace_id: None,
            from: "alice".to_string(),
            to: "bob".to_string(),
            room_id: "room1".to_string(),
            call_type: CallType::Video,
            payload: Sdp::offer("v=0"),
        };
        assert_eq!(session.handle_signal(&dup).await, Transition::Unchanged);
        assert_eq!(session.status(), CallStatus::Ringing);
    }

    #[tokio::test]
    async fn reject_sends_one_frame_and_ends() {
        let (mut session, mut rx) = incoming_session();
        session.reject();
        assert_eq!(session.status(), CallStatus::Ended);

        let frame = rx.recv().await.expect("one rejected frame");
        assert_eq!(frame.kind(), "call-rejected");
        assert_eq!(frame.room_id(), "room1");
        assert!(rx.try_recv().is_err());
    }
}
