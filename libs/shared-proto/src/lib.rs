pub mod signaling {
    use serde::{Deserialize, Serialize};

    /// Current wire protocol version, stamped on every outbound frame.
    pub const PROTOCOL_VERSION: u8 = 2;
    /// Oldest version peers may still speak; frames without an explicit
    /// `version` field parse as this.
    pub const LEGACY_PROTOCOL_VERSION: u8 = 1;

    pub fn is_supported_protocol_version(version: u8) -> bool {
        (LEGACY_PROTOCOL_VERSION..=PROTOCOL_VERSION).contains(&version)
    }

    fn legacy_version() -> u8 {
        LEGACY_PROTOCOL_VERSION
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum CallType {
        Audio,
        Video,
    }

    impl CallType {
        pub fn as_str(self) -> &'static str {
            match self {
                CallType::Audio => "audio",
                CallType::Video => "video",
            }
        }
    }

    impl std::fmt::Display for CallType {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            f.write_str(self.as_str())
        }
    }

    #[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "lowercase")]
    pub enum SdpKind {
        Offer,
        Answer,
    }

    /// A session description as exchanged on the wire, matching the
    /// `{type, sdp}` shape peers produce.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    pub struct Sdp {
        #[serde(rename = "type")]
        pub kind: SdpKind,
        pub sdp: String,
    }

    impl Sdp {
        pub fn offer(sdp: impl Into<String>) -> Self {
            Self {
                kind: SdpKind::Offer,
                sdp: sdp.into(),
            }
        }

        pub fn answer(sdp: impl Into<String>) -> Self {
            Self {
                kind: SdpKind::Answer,
                sdp: sdp.into(),
            }
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
    #[serde(rename_all = "camelCase")]
    pub struct IceCandidate {
        pub candidate: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub sdp_mid: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        pub sdp_m_line_index: Option<u16>,
    }

    /// One signaling frame. Serialized shape is
    /// `{type, from?, to?, roomId?, callType?, payload?}` with kebab-case
    /// type names; `payload` carries the SDP description or ICE candidate.
    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    #[serde(tag = "type", rename_all = "kebab-case")]
    pub enum SignalingMessage {
        #[serde(rename_all = "camelCase")]
        CallRequest {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            from: String,
            to: String,
            room_id: String,
            call_type: CallType,
            payload: Sdp,
        },
        #[serde(rename_all = "camelCase")]
        CallAccepted {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            to: String,
            room_id: String,
            payload: Sdp,
        },
        #[serde(rename_all = "camelCase")]
        CallRejected {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            to: String,
            room_id: String,
        },
        #[serde(rename_all = "camelCase")]
        Candidate {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            to: String,
            room_id: String,
            payload: IceCandidate,
        },
        #[serde(rename_all = "camelCase")]
        EndCall {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            to: String,
            room_id: String,
        },
        /// Presence announcement: the sender joined a signaling room.
        #[serde(rename_all = "camelCase")]
        UserJoined {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            from: String,
            room_id: String,
        },
        /// Bare SDP relay, kept for in-flight compatibility with peers that
        /// send the description outside the call-request/call-accepted pair.
        #[serde(rename_all = "camelCase")]
        Offer {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            to: String,
            room_id: String,
            payload: Sdp,
        },
        #[serde(rename_all = "camelCase")]
        Answer {
            #[serde(default = "legacy_version")]
            version: u8,
            #[serde(default, skip_serializing_if = "Option::is_none")]
            trace_id: Option<String>,
            to: String,
            room_id: String,
            payload: Sdp,
        },
    }

    impl SignalingMessage {
        pub fn kind(&self) -> &'static str {
            match self {
                SignalingMessage::CallRequest { .. } => "call-request",
                SignalingMessage::CallAccepted { .. } => "call-accepted",
                SignalingMessage::CallRejected { .. } => "call-rejected",
                SignalingMessage::Candidate { .. } => "candidate",
                SignalingMessage::EndCall { .. } => "end-call",
                SignalingMessage::UserJoined { .. } => "user-joined",
                SignalingMessage::Offer { .. } => "offer",
                SignalingMessage::Answer { .. } => "answer",
            }
        }

        pub fn version(&self) -> u8 {
            match self {
                SignalingMessage::CallRequest { version, .. }
                | SignalingMessage::CallAccepted { version, .. }
                | SignalingMessage::CallRejected { version, .. }
                | SignalingMessage::Candidate { version, .. }
                | SignalingMessage::EndCall { version, .. }
                | SignalingMessage::UserJoined { version, .. }
                | SignalingMessage::Offer { version, .. }
                | SignalingMessage::Answer { version, .. } => *version,
            }
        }

        pub fn room_id(&self) -> &str {
            match self {
                SignalingMessage::CallRequest { room_id, .. }
                | SignalingMessage::CallAccepted { room_id, .. }
                | SignalingMessage::CallRejected { room_id, .. }
                | SignalingMessage::Candidate { room_id, .. }
                | SignalingMessage::EndCall { room_id, .. }
                | SignalingMessage::UserJoined { room_id, .. }
                | SignalingMessage::Offer { room_id, .. }
                | SignalingMessage::Answer { room_id, .. } => room_id,
            }
        }

        /// Routing target, when the frame is addressed to a single peer.
        pub fn recipient(&self) -> Option<&str> {
            match self {
                SignalingMessage::CallRequest { to, .. }
                | SignalingMessage::CallAccepted { to, .. }
                | SignalingMessage::CallRejected { to, .. }
                | SignalingMessage::Candidate { to, .. }
                | SignalingMessage::EndCall { to, .. }
                | SignalingMessage::Offer { to, .. }
                | SignalingMessage::Answer { to, .. } => Some(to),
                SignalingMessage::UserJoined { .. } => None,
            }
        }

        pub fn sender(&self) -> Option<&str> {
            match self {
                SignalingMessage::CallRequest { from, .. }
                | SignalingMessage::UserJoined { from, .. } => Some(from),
                _ => None,
            }
        }
    }

    /// Fresh room id for a call started outside an existing chat room.
    pub fn generate_room_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::signaling::*;

    #[test]
    fn call_request_wire_shape() {
        let msg = SignalingMessage::CallRequest {
            version: PROTOCOL_VERSION,
            trace_id: Some("t-1".to_string()),
            from: "alice".to_string(),
            to: "bob".to_string(),
            room_id: "room1".to_string(),
            call_type: CallType::Video,
            payload: Sdp::offer("v=0"),
        };

        let json = serde_json::to_value(&msg).expect("serialize frame");
        assert_eq!(json["type"], "call-request");
        assert_eq!(json["from"], "alice");
        assert_eq!(json["to"], "bob");
        assert_eq!(json["roomId"], "room1");
        assert_eq!(json["callType"], "video");
        assert_eq!(json["payload"]["type"], "offer");
        assert_eq!(json["payload"]["sdp"], "v=0");
        assert_eq!(json["version"], 2);
    }

    #[test]
    fn candidate_uses_browser_field_names() {
        let msg = SignalingMessage::Candidate {
            version: PROTOCOL_VERSION,
            trace_id: None,
            to: "bob".to_string(),
            room_id: "room1".to_string(),
            payload: IceCandidate {
                candidate: "candidate:1 1 udp 2130706431 192.0.2.1 54321 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_m_line_index: Some(0),
            },
        };

        let json = serde_json::to_value(&msg).expect("serialize frame");
        assert_eq!(json["payload"]["sdpMid"], "0");
        assert_eq!(json["payload"]["sdpMLineIndex"], 0);
        assert!(json.get("traceId").is_none());
    }

    #[test]
    fn frame_without_version_parses_as_legacy() {
        let raw = r#"{"type":"end-call","to":"bob","roomId":"room1"}"#;
        let msg: SignalingMessage = serde_json::from_str(raw).expect("parse legacy frame");
        assert_eq!(msg.version(), LEGACY_PROTOCOL_VERSION);
        assert_eq!(msg.room_id(), "room1");
        assert_eq!(msg.recipient(), Some("bob"));
    }

    #[test]
    fn unknown_type_is_rejected() {
        let raw = r#"{"type":"group-call","roomId":"room1"}"#;
        assert!(serde_json::from_str::<SignalingMessage>(raw).is_err());
    }

    #[test]
    fn version_window() {
        assert!(is_supported_protocol_version(LEGACY_PROTOCOL_VERSION));
        assert!(is_supported_protocol_version(PROTOCOL_VERSION));
        assert!(!is_supported_protocol_version(PROTOCOL_VERSION + 1));
        assert!(!is_supported_protocol_version(0));
    }
}
