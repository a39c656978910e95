use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use shared_proto::signaling::{IceCandidate, Sdp, SdpKind};
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::config::IceServerConfig;
use crate::track::{MediaStream, TrackKind};

#[derive(Debug, Error)]
pub enum PeerError {
    #[error(transparent)]
    Webrtc(#[from] webrtc::Error),

    #[error("invalid session description: {0}")]
    InvalidSdp(String),

    #[error("no local {0} track")]
    MissingTrack(&'static str),

    #[error("operation not valid for the {0} role")]
    Role(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NegotiationRole {
    Offerer,
    Answerer,
}

impl NegotiationRole {
    pub fn as_str(self) -> &'static str {
        match self {
            NegotiationRole::Offerer => "offerer",
            NegotiationRole::Answerer => "answerer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

/// Descriptor for a track the remote side is sending us. The media samples
/// themselves are consumed by playback pipelines outside this crate; the
/// descriptors are never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteTrack {
    pub kind: TrackKind,
}

/// Owns one underlying peer connection for a single call: local stream
/// attachment, SDP negotiation with a fixed role, and ICE candidate
/// exchange with explicit buffering for candidates that arrive before the
/// remote description.
pub struct PeerLink {
    role: NegotiationRole,
    pc: Arc<RTCPeerConnection>,
    local_stream: Mutex<Option<MediaStream>>,
    remote_tracks: Arc<Mutex<Vec<RemoteTrack>>>,
    pending_candidates: Mutex<Vec<IceCandidate>>,
    remote_set: AtomicBool,
    closed: AtomicBool,
    candidate_rx: Mutex<Option<mpsc::UnboundedReceiver<IceCandidate>>>,
    state_rx: watch::Receiver<PeerState>,
}

impl PeerLink {
    pub async fn new(
        role: NegotiationRole,
        ice_servers: &[IceServerConfig],
    ) -> Result<Self, PeerError> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: ice_servers
                .iter()
                .map(|s| RTCIceServer {
                    urls: s.urls.clone(),
                    username: s.username.clone().unwrap_or_default(),
                    credential: s.credential.clone().unwrap_or_default(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        };

        let pc = Arc::new(api.new_peer_connection(config).await?);

        let (candidate_tx, candidate_rx) = mpsc::unbounded_channel();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let candidate_tx = candidate_tx.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => {
                        let _ = candidate_tx.send(IceCandidate {
                            candidate: init.candidate,
                            sdp_mid: init.sdp_mid,
                            sdp_m_line_index: init.sdp_mline_index,
                        });
                    }
                    Err(e) => {
                        tracing::warn!(component = "media.peer", error = %e, "failed to serialize local candidate");
                    }
                }
            })
        }));

        let (state_tx, state_rx) = watch::channel(PeerState::New);
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let mapped = PeerState::from(state);
            tracing::info!(component = "media.peer", state = ?mapped, "peer connection state changed");
            let _ = state_tx.send(mapped);
            Box::pin(async {})
        }));

        let remote_tracks: Arc<Mutex<Vec<RemoteTrack>>> = Arc::new(Mutex::new(Vec::new()));
        let remote_tracks_clone = remote_tracks.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let kind = match track.kind() {
                RTPCodecType::Video => TrackKind::Video,
                _ => TrackKind::Audio,
            };
            tracing::info!(component = "media.peer", kind = kind.as_str(), "remote track added");
            remote_tracks_clone
                .lock()
                .expect("remote tracks lock")
                .push(RemoteTrack { kind });
            Box::pin(async {})
        }));

        Ok(Self {
            role,
            pc,
            local_stream: Mutex::new(None),
            remote_tracks,
            pending_candidates: Mutex::new(Vec::new()),
            remote_set: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            candidate_rx: Mutex::new(Some(candidate_rx)),
            state_rx,
        })
    }

    pub fn role(&self) -> NegotiationRole {
        self.role
    }

    pub fn state(&self) -> PeerState {
        *self.state_rx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<PeerState> {
        self.state_rx.clone()
    }

    /// Locally-gathered candidates to relay to the remote peer; taken once
    /// by the owner.
    pub fn take_candidate_receiver(&self) -> Option<mpsc::UnboundedReceiver<IceCandidate>> {
        self.candidate_rx.lock().expect("candidate rx lock").take()
    }

    pub fn remote_tracks(&self) -> Vec<RemoteTrack> {
        self.remote_tracks
            .lock()
            .expect("remote tracks lock")
            .clone()
    }

    /// Attach the local stream: one sending track per captured track. The
    /// link takes ownership; `close` releases the tracks.
    pub async fn attach_local_stream(&self, stream: MediaStream) -> Result<(), PeerError> {
        {
            let mut guard = self.local_stream.lock().expect("local stream lock");
            *guard = Some(stream.clone());
        }

        for track in stream.tracks() {
            let capability = match track.kind() {
                TrackKind::Audio => RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_owned(),
                    ..Default::default()
                },
                TrackKind::Video => RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
            };
            let local = Arc::new(TrackLocalStaticSample::new(
                capability,
                track.id().to_string(),
                "local-media".to_string(),
            ));
            self.pc
                .add_track(local as Arc<dyn TrackLocal + Send + Sync>)
                .await?;
        }

        Ok(())
    }

    /// Create the offer and set it as the local description.
    pub async fn create_offer(&self) -> Result<Sdp, PeerError> {
        if self.role != NegotiationRole::Offerer {
            return Err(PeerError::Role(self.role.as_str()));
        }
        let offer = self.pc.create_offer(None).await?;
        let sdp = offer.sdp.clone();
        self.pc.set_local_description(offer).await?;
        Ok(Sdp::offer(sdp))
    }

    /// Apply the remote offer and produce the answer, set as the local
    /// description. Flushes any candidates buffered before the offer landed.
    pub async fn create_answer(&self, offer: &Sdp) -> Result<Sdp, PeerError> {
        if self.role != NegotiationRole::Answerer {
            return Err(PeerError::Role(self.role.as_str()));
        }
        if offer.kind != SdpKind::Offer {
            return Err(PeerError::InvalidSdp("expected an offer".to_string()));
        }
        self.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        let sdp = answer.sdp.clone();
        self.pc.set_local_description(answer).await?;
        Ok(Sdp::answer(sdp))
    }

    /// Apply the remote description and flush buffered candidates in
    /// arrival order. A second call is ignored.
    pub async fn set_remote_description(&self, desc: &Sdp) -> Result<(), PeerError> {
        if self.remote_set.load(Ordering::SeqCst) {
            tracing::warn!(
                component = "media.peer",
                "remote description already set, ignoring duplicate"
            );
            return Ok(());
        }

        let desc = match desc.kind {
            SdpKind::Offer => RTCSessionDescription::offer(desc.sdp.clone()),
            SdpKind::Answer => RTCSessionDescription::answer(desc.sdp.clone()),
        }
        .map_err(|e| PeerError::InvalidSdp(e.to_string()))?;

        self.pc.set_remote_description(desc).await?;
        self.remote_set.store(true, Ordering::SeqCst);

        let pending: Vec<IceCandidate> = {
            let mut guard = self.pending_candidates.lock().expect("pending lock");
            std::mem::take(&mut *guard)
        };
        for candidate in pending {
            if let Err(e) = self.apply_candidate(&candidate).await {
                tracing::warn!(component = "media.peer", error = %e, "dropping buffered candidate");
            }
        }

        Ok(())
    }

    /// Apply immediately once the remote description is in place, buffer
    /// otherwise.
    pub async fn add_ice_candidate(&self, candidate: IceCandidate) -> Result<(), PeerError> {
        if !self.remote_set.load(Ordering::SeqCst) {
            self.pending_candidates
                .lock()
                .expect("pending lock")
                .push(candidate);
            return Ok(());
        }
        self.apply_candidate(&candidate).await
    }

    async fn apply_candidate(&self, candidate: &IceCandidate) -> Result<(), PeerError> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    pub fn pending_candidate_count(&self) -> usize {
        self.pending_candidates.lock().expect("pending lock").len()
    }

    /// Flip the first local audio track and return the new muted state.
    pub fn toggle_mute(&self) -> Result<bool, PeerError> {
        let guard = self.local_stream.lock().expect("local stream lock");
        let stream = guard.as_ref().ok_or(PeerError::MissingTrack("audio"))?;
        let track = stream
            .first_track(TrackKind::Audio)
            .ok_or(PeerError::MissingTrack("audio"))?;
        Ok(!track.toggle())
    }

    /// Flip the first local video track and return the new enabled state.
    pub fn toggle_video(&self) -> Result<bool, PeerError> {
        let guard = self.local_stream.lock().expect("local stream lock");
        let stream = guard.as_ref().ok_or(PeerError::MissingTrack("video"))?;
        let track = stream
            .first_track(TrackKind::Video)
            .ok_or(PeerError::MissingTrack("video"))?;
        Ok(track.toggle())
    }

    pub fn is_muted(&self) -> Option<bool> {
        let guard = self.local_stream.lock().expect("local stream lock");
        guard
            .as_ref()
            .and_then(|s| s.first_track(TrackKind::Audio))
            .map(|t| !t.enabled())
    }

    pub fn is_video_enabled(&self) -> Option<bool> {
        let guard = self.local_stream.lock().expect("local stream lock");
        guard
            .as_ref()
            .and_then(|s| s.first_track(TrackKind::Video))
            .map(|t| t.enabled())
    }

    /// Stop all local tracks and release the connection. Safe to call more
    /// than once.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let stream = self.local_stream.lock().expect("local stream lock").take();
        if let Some(stream) = stream {
            stream.release();
        }

        if let Err(e) = self.pc.close().await {
            tracing::warn!(component = "media.peer", error = %e, "peer connection close failed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}
