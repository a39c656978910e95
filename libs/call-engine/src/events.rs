use serde::Deserialize;
use shared_proto::signaling::CallType;

use crate::session::CallStatus;

/// A ringing call surfaced to the UI layer.
#[derive(Debug, Clone)]
pub struct IncomingCall {
    pub room_id: String,
    pub from: String,
    pub display_name: String,
    pub call_type: CallType,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// Hung up after being connected, by either side.
    Completed,
    /// Callee rejected before answer.
    Declined,
    /// Ring timeout expired with no answer.
    Missed,
    /// Caller cancelled before answer.
    Cancelled,
    /// Transport or media failure tore the call down.
    Failed,
}

/// Engine-to-UI notifications.
#[derive(Debug, Clone)]
pub enum CallEvent {
    IncomingCall(IncomingCall),
    StatusChanged {
        room_id: String,
        status: CallStatus,
    },
    PeerJoined {
        room_id: String,
        user_id: String,
    },
    CallEnded {
        room_id: String,
        reason: EndReason,
    },
    TransportClosed,
}

/// Payload of a notification "answer" action, delivered by the platform
/// notification channel before the call-request may have arrived.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationAction {
    pub action: String,
    pub room_id: String,
    pub call_type: CallType,
}

/// Snapshot of the local media toggles for rendering call controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MediaControls {
    pub muted: bool,
    pub video_enabled: bool,
}
