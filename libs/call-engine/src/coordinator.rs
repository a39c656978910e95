use std::sync::Arc;
use std::time::Duration;

use media::{IceServerConfig, MediaConstraints, MediaDevices, MediaError, NegotiationRole, PeerLink};
use shared_proto::signaling::{
    CallType, Sdp, SignalingMessage, PROTOCOL_VERSION,
};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::api::chat::{CallLogEntry, CallLogSink};
use crate::api::users::UserDirectory;
use crate::error::CallError;
use crate::events::{CallEvent, EndReason, IncomingCall, MediaControls, NotificationAction};
use crate::observability;
use crate::session::{CallRole, CallSession, CallStatus, Transition};
use crate::transport::{SignalingSender, SignalingTransport, TransportEvent};

pub const DEFAULT_RING_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone)]
pub struct CoordinatorConfig {
    pub server_url: String,
    /// How long an outgoing call may ring before it counts as missed.
    pub ring_timeout: Duration,
    pub ice_servers: Vec<IceServerConfig>,
}

impl CoordinatorConfig {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            ring_timeout: DEFAULT_RING_TIMEOUT,
            ice_servers: Vec::new(),
        }
    }

    pub fn with_ring_timeout(mut self, timeout: Duration) -> Self {
        self.ring_timeout = timeout;
        self
    }

    pub fn with_ice_servers(mut self, servers: Vec<IceServerConfig>) -> Self {
        self.ice_servers = servers;
        self
    }
}

/// External capabilities the engine consumes but does not own.
#[derive(Clone)]
pub struct Collaborators {
    pub devices: Arc<dyn MediaDevices>,
    pub directory: Arc<dyn UserDirectory>,
    pub call_log: Arc<dyn CallLogSink>,
}

type Reply<T> = oneshot::Sender<Result<T, CallError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SetupPurpose {
    Outgoing,
    Accepting,
}

struct SetupBundle {
    link: Arc<PeerLink>,
    sdp: Sdp,
}

enum Command {
    StartCall {
        room_id: String,
        to: String,
        call_type: CallType,
        reply: Reply<()>,
    },
    AcceptCall {
        call_type: CallType,
        reply: Reply<()>,
    },
    RejectCall {
        reply: Reply<()>,
    },
    EndCall {
        reply: Reply<()>,
    },
    ToggleMute {
        reply: Reply<bool>,
    },
    ToggleVideo {
        reply: Reply<bool>,
    },
    Controls {
        reply: Reply<MediaControls>,
    },
    Status {
        reply: oneshot::Sender<CallStatus>,
    },
    JoinRoom {
        room_id: String,
        reply: Reply<()>,
    },
    Notification(NotificationAction),
    Transport(TransportEvent),
    SetupReady {
        epoch: u64,
        room_id: String,
        purpose: SetupPurpose,
        result: Result<SetupBundle, CallError>,
    },
    RingExpired {
        room_id: String,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
}

/// Session-scoped singleton: one per logged-in user, owning the signaling
/// transport for the whole authenticated session and at most one call at a
/// time. All state lives in a single actor task; commands and transport
/// events are processed sequentially, so handlers always read current
/// state.
pub struct CallCoordinator {
    user_id: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl CallCoordinator {
    /// Connect the per-user transport and spin up the engine. Disposed
    /// with [`CallCoordinator::stop`] on logout.
    pub async fn start(
        user_id: impl Into<String>,
        config: CoordinatorConfig,
        collaborators: Collaborators,
    ) -> Result<(Self, mpsc::UnboundedReceiver<CallEvent>), CallError> {
        let user_id = user_id.into();

        let (transport_tx, mut transport_rx) = mpsc::unbounded_channel();
        let transport =
            SignalingTransport::connect(&config.server_url, &user_id, None, transport_tx).await?;

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let bridge_tx = cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = transport_rx.recv().await {
                if bridge_tx.send(Command::Transport(event)).is_err() {
                    break;
                }
            }
        });

        let engine = Engine {
            user_id: user_id.clone(),
            config,
            collaborators,
            sender: transport.sender(),
            transport: Some(transport),
            cmd_tx: cmd_tx.clone(),
            event_tx,
            session: None,
            auto_accept: None,
            ring_timer: None,
            setup_epoch: 0,
            pending_reply: None,
        };
        tokio::spawn(engine.run(cmd_rx));

        Ok((Self { user_id, cmd_tx }, event_rx))
    }

    /// Engine wired to bare channels instead of a live relay; the returned
    /// receiver sees every outbound frame.
    #[cfg(test)]
    pub(crate) fn start_detached(
        user_id: impl Into<String>,
        config: CoordinatorConfig,
        collaborators: Collaborators,
    ) -> (
        Self,
        mpsc::UnboundedReceiver<CallEvent>,
        mpsc::UnboundedReceiver<SignalingMessage>,
    ) {
        let user_id = user_id.into();
        let (sender, outbound_rx) = SignalingSender::detached();
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        let engine = Engine {
            user_id: user_id.clone(),
            config,
            collaborators,
            sender,
            transport: None,
            cmd_tx: cmd_tx.clone(),
            event_tx,
            session: None,
            auto_accept: None,
            ring_timer: None,
            setup_epoch: 0,
            pending_reply: None,
        };
        tokio::spawn(engine.run(cmd_rx));

        (Self { user_id, cmd_tx }, event_rx, outbound_rx)
    }

    #[cfg(test)]
    pub(crate) fn inject_transport_event(&self, event: TransportEvent) {
        let _ = self.cmd_tx.send(Command::Transport(event));
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> Command,
    ) -> Result<T, CallError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(build(tx))
            .map_err(|_| CallError::NotRunning)?;
        rx.await.map_err(|_| CallError::NotRunning)?
    }

    /// Start an outgoing call. Resolves once the call-request left (the
    /// session is then `calling`), or with the acquisition error that
    /// aborted it.
    pub async fn start_call(
        &self,
        room_id: impl Into<String>,
        to: impl Into<String>,
        call_type: CallType,
    ) -> Result<(), CallError> {
        let room_id = room_id.into();
        let to = to.into();
        self.request(|reply| Command::StartCall {
            room_id,
            to,
            call_type,
            reply,
        })
        .await
    }

    /// Accept the ringing call.
    pub async fn accept_call(&self, call_type: CallType) -> Result<(), CallError> {
        self.request(|reply| Command::AcceptCall { call_type, reply })
            .await
    }

    /// Decline the ringing call.
    pub async fn reject_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::RejectCall { reply }).await
    }

    /// Hang up (or cancel an unanswered outgoing call).
    pub async fn end_call(&self) -> Result<(), CallError> {
        self.request(|reply| Command::EndCall { reply }).await
    }

    /// Returns the new muted state.
    pub async fn toggle_mute(&self) -> Result<bool, CallError> {
        self.request(|reply| Command::ToggleMute { reply }).await
    }

    /// Returns the new video-enabled state.
    pub async fn toggle_video(&self) -> Result<bool, CallError> {
        self.request(|reply| Command::ToggleVideo { reply }).await
    }

    pub async fn media_controls(&self) -> Result<MediaControls, CallError> {
        self.request(|reply| Command::Controls { reply }).await
    }

    pub async fn status(&self) -> Result<CallStatus, CallError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Status { reply: tx })
            .map_err(|_| CallError::NotRunning)?;
        rx.await.map_err(|_| CallError::NotRunning)
    }

    /// Announce presence in a signaling room ahead of any call-request.
    pub async fn join_room(&self, room_id: impl Into<String>) -> Result<(), CallError> {
        let room_id = room_id.into();
        self.request(|reply| Command::JoinRoom { room_id, reply })
            .await
    }

    /// Feed a notification action (e.g. "answer" tapped before the
    /// call-request arrived); arms auto-accept for the named room.
    pub fn notification_action(&self, action: NotificationAction) {
        let _ = self.cmd_tx.send(Command::Notification(action));
    }

    /// Tear everything down: active call, transport, engine task.
    pub async fn stop(&self) {
        let (tx, rx) = oneshot::channel();
        if self.cmd_tx.send(Command::Stop { reply: tx }).is_ok() {
            let _ = rx.await;
        }
    }
}

struct Engine {
    user_id: String,
    config: CoordinatorConfig,
    collaborators: Collaborators,
    sender: SignalingSender,
    transport: Option<SignalingTransport>,
    cmd_tx: mpsc::UnboundedSender<Command>,
    event_tx: mpsc::UnboundedSender<CallEvent>,
    session: Option<CallSession>,
    auto_accept: Option<(String, CallType)>,
    ring_timer: Option<JoinHandle<()>>,
    setup_epoch: u64,
    pending_reply: Option<Reply<()>>,
}

impl Engine {
    async fn run(mut self, mut cmd_rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = cmd_rx.recv().await {
            match command {
                Command::StartCall {
                    room_id,
                    to,
                    call_type,
                    reply,
                } => self.handle_start_call(room_id, to, call_type, reply),
                Command::AcceptCall { call_type, reply } => {
                    self.handle_accept_call(call_type, reply)
                }
                Command::RejectCall { reply } => self.handle_reject_call(reply).await,
                Command::EndCall { reply } => self.handle_end_call(reply).await,
                Command::ToggleMute { reply } => {
                    let _ = reply.send(self.with_peer(|peer| {
                        peer.toggle_mute().map_err(CallError::from)
                    }));
                }
                Command::ToggleVideo { reply } => {
                    let _ = reply.send(self.with_peer(|peer| {
                        peer.toggle_video().map_err(CallError::from)
                    }));
                }
                Command::Controls { reply } => {
                    let _ = reply.send(self.with_peer(|peer| {
                        match (peer.is_muted(), peer.is_video_enabled()) {
                            (Some(muted), video) => Ok(MediaControls {
                                muted,
                                video_enabled: video.unwrap_or(false),
                            }),
                            _ => Err(CallError::state_conflict("no local media attached")),
                        }
                    }));
                }
                Command::Status { reply } => {
                    let status = self
                        .session
                        .as_ref()
                        .map(|s| s.status())
                        .unwrap_or(CallStatus::Idle);
                    let _ = reply.send(status);
                }
                Command::JoinRoom { room_id, reply } => {
                    self.send_user_joined(&room_id);
                    let _ = reply.send(Ok(()));
                }
                Command::Notification(action) => self.handle_notification(action),
                Command::Transport(event) => self.handle_transport(event).await,
                Command::SetupReady {
                    epoch,
                    room_id,
                    purpose,
                    result,
                } => self.handle_setup_ready(epoch, room_id, purpose, result).await,
                Command::RingExpired { room_id } => self.handle_ring_expired(room_id).await,
                Command::Stop { reply } => {
                    self.shutdown().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }
    }

    // === local intents ===

    fn handle_start_call(
        &mut self,
        room_id: String,
        to: String,
        call_type: CallType,
        reply: Reply<()>,
    ) {
        if let Some(session) = self.session.as_ref() {
            let _ = reply.send(Err(CallError::state_conflict(format!(
                "cannot start a call while {} in room {}",
                session.status(),
                session.room_id()
            ))));
            return;
        }
        if self.pending_reply.is_some() {
            let _ = reply.send(Err(CallError::state_conflict(
                "another call operation is in progress",
            )));
            return;
        }

        tracing::info!(
            component = "call.coordinator",
            room_id = %room_id,
            to = %to,
            call_type = %call_type,
            "starting outgoing call"
        );

        self.session = Some(CallSession::new_outgoing(
            room_id.clone(),
            self.user_id.clone(),
            to,
            call_type,
            self.sender.clone(),
        ));
        self.emit_status(&room_id, CallStatus::Calling);
        self.arm_ring_timer(room_id.clone());
        self.pending_reply = Some(reply);
        self.spawn_media_setup(SetupPurpose::Outgoing, room_id, call_type, None);
    }

    fn handle_accept_call(&mut self, call_type: CallType, reply: Reply<()>) {
        let Some(session) = self.session.as_ref() else {
            let _ = reply.send(Err(CallError::state_conflict("no incoming call to accept")));
            return;
        };
        if session.status() != CallStatus::Ringing {
            let _ = reply.send(Err(CallError::state_conflict(format!(
                "cannot accept while {}",
                session.status()
            ))));
            return;
        }
        if self.pending_reply.is_some() {
            let _ = reply.send(Err(CallError::state_conflict(
                "another call operation is in progress",
            )));
            return;
        }
        let Some(offer) = session.pending_offer() else {
            let _ = reply.send(Err(CallError::state_conflict("no pending offer to answer")));
            return;
        };
        if call_type != session.call_type() {
            tracing::warn!(
                component = "call.coordinator",
                requested = %call_type,
                offered = %session.call_type(),
                "accept call type differs from the offer, keeping session type"
            );
        }

        let room_id = session.room_id().to_string();
        self.pending_reply = Some(reply);
        self.spawn_media_setup(SetupPurpose::Accepting, room_id, call_type, Some(offer));
    }

    async fn handle_reject_call(&mut self, reply: Reply<()>) {
        match self.session.as_mut() {
            Some(session) if session.status() == CallStatus::Ringing => {
                session.reject();
                self.finalize_session(EndReason::Declined).await;
                let _ = reply.send(Ok(()));
            }
            Some(session) => {
                let _ = reply.send(Err(CallError::state_conflict(format!(
                    "cannot reject while {}",
                    session.status()
                ))));
            }
            None => {
                let _ = reply.send(Err(CallError::state_conflict("no incoming call to reject")));
            }
        }
    }

    async fn handle_end_call(&mut self, reply: Reply<()>) {
        let Some(session) = self.session.as_mut() else {
            let _ = reply.send(Err(CallError::state_conflict("no active call to end")));
            return;
        };

        match session.status() {
            CallStatus::Ringing => {
                // Ending a ringing call is a decline.
                session.reject();
                self.finalize_session(EndReason::Declined).await;
            }
            CallStatus::Calling => {
                session.send_end();
                self.finalize_session(EndReason::Cancelled).await;
            }
            CallStatus::Connected => {
                session.send_end();
                self.finalize_session(EndReason::Completed).await;
            }
            status => {
                let _ = reply.send(Err(CallError::state_conflict(format!(
                    "cannot end a call while {status}"
                ))));
                return;
            }
        }
        let _ = reply.send(Ok(()));
    }

    fn with_peer<T>(
        &self,
        f: impl FnOnce(&Arc<PeerLink>) -> Result<T, CallError>,
    ) -> Result<T, CallError> {
        match self.session.as_ref().and_then(|s| s.peer()) {
            Some(peer) => f(peer),
            None => Err(CallError::state_conflict("no active call media")),
        }
    }

    fn handle_notification(&mut self, action: NotificationAction) {
        if action.action != "answer" {
            tracing::warn!(
                component = "call.coordinator",
                action = %action.action,
                "unknown notification action, ignoring"
            );
            return;
        }
        if self.session.is_some() {
            tracing::warn!(
                component = "call.coordinator",
                room_id = %action.room_id,
                "notification answer while a call is active, ignoring"
            );
            return;
        }

        tracing::info!(
            component = "call.coordinator",
            room_id = %action.room_id,
            call_type = %action.call_type,
            "arming auto-accept from notification"
        );
        self.send_user_joined(&action.room_id);
        self.auto_accept = Some((action.room_id, action.call_type));
    }

    // === transport events ===

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Message(msg) => self.handle_signal(msg).await,
            TransportEvent::Closed => {
                tracing::warn!(component = "call.coordinator", "signaling transport closed");
                self.emit(CallEvent::TransportClosed);
                if self.session.is_some() {
                    self.finalize_session(EndReason::Failed).await;
                }
            }
        }
    }

    async fn handle_signal(&mut self, msg: SignalingMessage) {
        match &msg {
            SignalingMessage::CallRequest {
                from,
                to,
                room_id,
                call_type,
                payload,
                ..
            } => {
                if to != &self.user_id {
                    tracing::warn!(
                        component = "call.coordinator",
                        to = %to,
                        "call-request addressed to someone else, dropping"
                    );
                    return;
                }
                if let Some(session) = self.session.as_mut() {
                    if session.matches(room_id) {
                        // Stale duplicate for the active room; the session
                        // logs it and stays put.
                        let _ = session.handle_signal(&msg).await;
                    } else {
                        tracing::warn!(
                            component = "call.coordinator",
                            active_room = session.room_id(),
                            room_id = %room_id,
                            "call-request while another call is active, ignoring"
                        );
                    }
                    return;
                }
                self.begin_incoming(
                    from.clone(),
                    room_id.clone(),
                    *call_type,
                    payload.clone(),
                );
            }
            SignalingMessage::UserJoined { from, room_id, .. } => {
                if from != &self.user_id {
                    self.emit(CallEvent::PeerJoined {
                        room_id: room_id.clone(),
                        user_id: from.clone(),
                    });
                }
            }
            _ => {
                let Some(session) = self.session.as_mut() else {
                    tracing::debug!(
                        component = "call.coordinator",
                        kind = msg.kind(),
                        "frame without an active session, dropping"
                    );
                    return;
                };
                let prior = session.status();
                let transition = session.handle_signal(&msg).await;
                match transition {
                    Transition::Unchanged => {}
                    Transition::Connected => {
                        self.disarm_ring_timer();
                        let room_id = self
                            .session
                            .as_ref()
                            .map(|s| s.room_id().to_string())
                            .unwrap_or_default();
                        self.emit_status(&room_id, CallStatus::Connected);
                    }
                    Transition::Declined => {
                        self.finalize_session(EndReason::Declined).await;
                    }
                    Transition::RemoteEnded => {
                        let reason = match prior {
                            CallStatus::Connected => EndReason::Completed,
                            CallStatus::Ringing | CallStatus::Calling => EndReason::Cancelled,
                            _ => EndReason::Completed,
                        };
                        self.finalize_session(reason).await;
                    }
                }
            }
        }
    }

    fn begin_incoming(&mut self, from: String, room_id: String, call_type: CallType, offer: Sdp) {
        let session = CallSession::new_incoming(
            room_id.clone(),
            self.user_id.clone(),
            from.clone(),
            call_type,
            offer.clone(),
            self.sender.clone(),
        );
        self.session = Some(session);
        self.emit_status(&room_id, CallStatus::Ringing);

        if let Some((armed_room, armed_type)) = self.auto_accept.take() {
            if armed_room == room_id {
                tracing::info!(
                    component = "call.coordinator",
                    room_id = %room_id,
                    "auto-accepting call-request armed from notification"
                );
                self.spawn_media_setup(SetupPurpose::Accepting, room_id, armed_type, Some(offer));
                return;
            }
            // Wrong room; keep ringing normally and drop the stale intent.
            tracing::warn!(
                component = "call.coordinator",
                armed_room = %armed_room,
                room_id = %room_id,
                "auto-accept armed for a different room, surfacing ring"
            );
        }

        let directory = self.collaborators.directory.clone();
        let event_tx = self.event_tx.clone();
        tokio::spawn(async move {
            let display_name = directory
                .display_name(&from)
                .await
                .unwrap_or_else(|| from.clone());
            let _ = event_tx.send(CallEvent::IncomingCall(IncomingCall {
                room_id,
                from,
                display_name,
                call_type,
            }));
        });
    }

    // === media setup ===

    fn spawn_media_setup(
        &mut self,
        purpose: SetupPurpose,
        room_id: String,
        call_type: CallType,
        offer: Option<Sdp>,
    ) {
        self.setup_epoch += 1;
        let epoch = self.setup_epoch;
        let devices = self.collaborators.devices.clone();
        let ice_servers = self.config.ice_servers.clone();
        let cmd_tx = self.cmd_tx.clone();

        tokio::spawn(async move {
            let role = match purpose {
                SetupPurpose::Outgoing => NegotiationRole::Offerer,
                SetupPurpose::Accepting => NegotiationRole::Answerer,
            };
            let result = setup_peer(devices, ice_servers, call_type, role, offer).await;
            let _ = cmd_tx.send(Command::SetupReady {
                epoch,
                room_id,
                purpose,
                result,
            });
        });
    }

    async fn handle_setup_ready(
        &mut self,
        epoch: u64,
        room_id: String,
        purpose: SetupPurpose,
        result: Result<SetupBundle, CallError>,
    ) {
        let stale = epoch != self.setup_epoch
            || self
                .session
                .as_ref()
                .map(|s| !s.matches(&room_id))
                .unwrap_or(true);
        if stale {
            // The session died while acquisition was in flight; whatever
            // arrived is released immediately instead of leaking live
            // tracks.
            if let Ok(bundle) = result {
                tracing::info!(
                    component = "call.coordinator",
                    room_id = %room_id,
                    "releasing media acquired for a dead session"
                );
                tokio::spawn(async move { bundle.link.close().await });
            }
            return;
        }

        match result {
            Err(e) => {
                tracing::warn!(
                    component = "call.coordinator",
                    room_id = %room_id,
                    error = %e,
                    "media setup failed, aborting call"
                );
                self.fail_pending(e);
                self.finalize_session(EndReason::Failed).await;
            }
            Ok(bundle) => match purpose {
                SetupPurpose::Outgoing => {
                    if self.session_status() != Some(CallStatus::Calling) {
                        tokio::spawn(async move { bundle.link.close().await });
                        return;
                    }
                    let session = self.session.as_mut().expect("session checked above");
                    session.install_peer(bundle.link.clone()).await;
                    // The announcement must hit the wire before any relayed
                    // candidate for this room.
                    session.send_call_request(bundle.sdp);
                    let forwarder = self.spawn_candidate_forwarder(&bundle.link);
                    if let Some(session) = self.session.as_mut() {
                        session.set_candidate_forwarder(forwarder);
                    }
                    self.resolve_pending();
                }
                SetupPurpose::Accepting => {
                    if self.session_status() != Some(CallStatus::Ringing) {
                        tokio::spawn(async move { bundle.link.close().await });
                        return;
                    }
                    let session = self.session.as_mut().expect("session checked above");
                    session.complete_accept(bundle.link.clone(), bundle.sdp).await;
                    let forwarder = self.spawn_candidate_forwarder(&bundle.link);
                    if let Some(session) = self.session.as_mut() {
                        session.set_candidate_forwarder(forwarder);
                    }
                    self.emit_status(&room_id, CallStatus::Connected);
                    self.resolve_pending();
                }
            },
        }
    }

    fn spawn_candidate_forwarder(&self, link: &Arc<PeerLink>) -> JoinHandle<()> {
        let Some(mut candidate_rx) = link.take_candidate_receiver() else {
            return tokio::spawn(async {});
        };
        let sender = self.sender.clone();
        let session = self.session.as_ref().expect("forwarder needs a session");
        let to = session.remote_user_id().to_string();
        let room_id = session.room_id().to_string();

        tokio::spawn(async move {
            while let Some(candidate) = candidate_rx.recv().await {
                sender.send(SignalingMessage::Candidate {
                    version: PROTOCOL_VERSION,
                    trace_id: Some(observability::trace_id().to_string()),
                    to: to.clone(),
                    room_id: room_id.clone(),
                    payload: candidate,
                });
            }
        })
    }

    // === ring timer ===

    fn arm_ring_timer(&mut self, room_id: String) {
        self.disarm_ring_timer();
        let timeout = self.config.ring_timeout;
        let cmd_tx = self.cmd_tx.clone();
        self.ring_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            let _ = cmd_tx.send(Command::RingExpired { room_id });
        }));
    }

    fn disarm_ring_timer(&mut self) {
        if let Some(timer) = self.ring_timer.take() {
            timer.abort();
        }
    }

    async fn handle_ring_expired(&mut self, room_id: String) {
        let live = self
            .session
            .as_ref()
            .map(|s| s.matches(&room_id) && s.status() == CallStatus::Calling)
            .unwrap_or(false);
        if !live {
            tracing::debug!(
                component = "call.coordinator",
                room_id = %room_id,
                "stale ring timeout, ignoring"
            );
            return;
        }

        tracing::info!(
            component = "call.coordinator",
            room_id = %room_id,
            "ring timeout expired, call missed"
        );
        if let Some(session) = self.session.as_ref() {
            session.send_end();
        }
        self.fail_pending(CallError::state_conflict("call timed out before setup"));
        self.finalize_session(EndReason::Missed).await;
    }

    // === teardown & side effects ===

    async fn finalize_session(&mut self, reason: EndReason) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        self.disarm_ring_timer();
        self.fail_pending(CallError::state_conflict("call ended"));

        let room_id = session.room_id().to_string();
        let role = session.role();
        let duration = session.duration();
        session.teardown().await;

        // The caller side owns the three-outcome call log.
        if role == CallRole::Caller {
            match reason {
                EndReason::Completed => {
                    self.append_call_log(CallLogEntry::answered(
                        &room_id,
                        duration.unwrap_or_default(),
                    ));
                }
                EndReason::Missed => self.append_call_log(CallLogEntry::missed(&room_id)),
                EndReason::Declined => self.append_call_log(CallLogEntry::declined(&room_id)),
                EndReason::Cancelled | EndReason::Failed => {}
            }
        }

        self.emit(CallEvent::CallEnded { room_id, reason });
    }

    fn append_call_log(&self, entry: CallLogEntry) {
        let sink = self.collaborators.call_log.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.append(entry).await {
                tracing::warn!(
                    component = "call.coordinator",
                    error = %e,
                    "failed to append call log entry"
                );
            }
        });
    }

    async fn shutdown(&mut self) {
        if let Some(session) = self.session.as_ref() {
            if matches!(
                session.status(),
                CallStatus::Calling | CallStatus::Connected
            ) {
                session.send_end();
            }
            let reason = match session.status() {
                CallStatus::Connected => EndReason::Completed,
                _ => EndReason::Cancelled,
            };
            self.finalize_session(reason).await;
        }
        if let Some(transport) = self.transport.take() {
            transport.disconnect();
        }
        tracing::info!(component = "call.coordinator", "coordinator stopped");
    }

    // === helpers ===

    fn session_status(&self) -> Option<CallStatus> {
        self.session.as_ref().map(|s| s.status())
    }

    fn send_user_joined(&self, room_id: &str) {
        self.sender.send(SignalingMessage::UserJoined {
            version: PROTOCOL_VERSION,
            trace_id: Some(observability::trace_id().to_string()),
            from: self.user_id.clone(),
            room_id: room_id.to_string(),
        });
    }

    fn resolve_pending(&mut self) {
        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(Ok(()));
        }
    }

    fn fail_pending(&mut self, error: CallError) {
        if let Some(reply) = self.pending_reply.take() {
            let _ = reply.send(Err(error));
        }
    }

    fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }

    fn emit_status(&self, room_id: &str, status: CallStatus) {
        self.emit(CallEvent::StatusChanged {
            room_id: room_id.to_string(),
            status,
        });
    }
}

async fn setup_peer(
    devices: Arc<dyn MediaDevices>,
    ice_servers: Vec<IceServerConfig>,
    call_type: CallType,
    role: NegotiationRole,
    offer: Option<Sdp>,
) -> Result<SetupBundle, CallError> {
    let constraints = MediaConstraints::from(call_type);
    let stream = tokio::task::spawn_blocking(move || devices.get_user_media(constraints))
        .await
        .map_err(|e| CallError::Media(MediaError::Backend(e.to_string())))??;

    let link = match PeerLink::new(role, &ice_servers).await {
        Ok(link) => link,
        Err(e) => {
            stream.release();
            return Err(e.into());
        }
    };

    if let Err(e) = link.attach_local_stream(stream).await {
        link.close().await;
        return Err(e.into());
    }

    let sdp = match role {
        NegotiationRole::Offerer => link.create_offer().await,
        NegotiationRole::Answerer => {
            let offer = offer.ok_or_else(|| CallError::state_conflict("no offer to answer"))?;
            link.create_answer(&offer).await
        }
    };

    match sdp {
        Ok(sdp) => Ok(SetupBundle {
            link: Arc::new(link),
            sdp,
        }),
        Err(e) => {
            link.close().await;
            Err(e.into())
        }
    }
}
